//! The core object that ties the device link together.
//!
//! A [`Session`] owns every piece of mutable state: the image assembler, the
//! dispatcher and its motor table, the latest detection, and the activity
//! log. It is driven from a single thread. Producers (the serial reader, a
//! radio stack, the detection feed, the UI) post [`SessionEvent`]s into one
//! channel and [`Session::run`] handles them one at a time, in order, while
//! firing whichever timer comes due first. Nothing else mutates the state;
//! the UI reads [`SessionSnapshot`]s.

use crate::activity_log::{ActivityLog, LogEntry};
use crate::command::Command;
use crate::config::Config;
use crate::detection::{DetectionPowerMapper, DetectionResult, FeedEvent, FeedSignal};
use crate::dispatcher::{Dispatcher, SnapshotOutcome};
use crate::error::DispatchError;
use crate::frame_decoder::{decode, Frame};
use crate::image_assembler::{AssemblerEvent, ImageAssembler};
use crate::localizer::{Camera, Direction};
use crate::motor::{MotorId, MotorTable};
use crate::timer::earliest;
use crate::transport::Transport;

use log::{debug, info, warn};
use std::{
    error::Error,
    fmt::{self, Display},
    sync::mpsc::{Receiver, RecvTimeoutError, Sender},
    time::Instant,
};

/// Everything that can happen to a session.
#[derive(Debug)]
pub enum SessionEvent {
    /// Raw bytes from the transport, exactly as delivered.
    Chunk(Vec<u8>),
    /// The transport reported the link is gone.
    Disconnected,
    /// A message from the detection feed.
    Feed(FeedEvent),
    /// A command typed or clicked by the user.
    Command(String),
    AllOff,
    Toggle(MotorId),
    /// Enable or disable driving motors from detections.
    AutoDrive(bool),
    /// The user asked to hang up.
    Disconnect,
    /// Reply with a snapshot of the current state.
    Status(Sender<SessionSnapshot>),
    /// Hang up and stop the event loop.
    Shutdown,
}

impl SessionEvent {
    /// Interpret one line typed at the console. Blank lines are `None`;
    /// anything unrecognised is passed on as a raw command.
    pub fn from_console(line: &str) -> Result<Option<Self>, Box<dyn Error + Send + Sync>> {
        let line = line.trim();
        let event = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [] => return Ok(None),
            _ if line.starts_with('{') => SessionEvent::Feed(FeedEvent::parse(line)?),
            ["quit"] | ["exit"] => SessionEvent::Shutdown,
            ["disconnect"] => SessionEvent::Disconnect,
            ["all_off"] => SessionEvent::AllOff,
            ["auto", "on"] => SessionEvent::AutoDrive(true),
            ["auto", "off"] => SessionEvent::AutoDrive(false),
            ["toggle", n] => {
                let id = n
                    .parse()
                    .ok()
                    .and_then(MotorId::new)
                    .ok_or_else(|| DispatchError::InvalidMotor((*n).to_owned()))?;
                SessionEvent::Toggle(id)
            }
            _ => SessionEvent::Command(line.to_owned()),
        };
        Ok(Some(event))
    }
}

/// A read-only copy of the session state, for display.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub transport: Option<String>,
    pub motors: MotorTable,
    pub streaming: bool,
    pub capturing: bool,
    pub receiving_image: bool,
    pub images_received: u64,
    pub last_image: Option<Vec<u8>>,
    pub latest_detection: Option<DetectionResult>,
    pub auto_drive: bool,
    pub status: Option<String>,
    pub log: Vec<LogEntry>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }
}

impl fmt::Display for SessionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transport {
            Some(name) => writeln!(f, "connected to {name}")?,
            None => writeln!(f, "not connected")?,
        }
        for (id, motor) in self.motors.iter() {
            writeln!(
                f,
                "  motor {id}: {:<3} {:>3} Hz  last: {}",
                if motor.on { "on" } else { "off" },
                motor.frequency.hz(),
                if motor.last_command.is_empty() { "-" } else { motor.last_command.as_str() },
            )?;
        }
        writeln!(
            f,
            "  camera: streaming={} capturing={} receiving={} images={}",
            self.streaming, self.capturing, self.receiving_image, self.images_received
        )?;
        if let Some(image) = &self.last_image {
            writeln!(f, "  last image: {} bytes", image.len())?;
        }
        match &self.latest_detection {
            Some(detection) => writeln!(
                f,
                "  detection: {} at {} (auto drive {})",
                detection.sound,
                detection.angle.map_or_else(
                    || "unknown bearing".to_owned(),
                    |a| format!("{a:.1}° ({})", Direction::from_angle(a))
                ),
                if self.auto_drive { "on" } else { "off" },
            )?,
            None => writeln!(
                f,
                "  detection: none (auto drive {})",
                if self.auto_drive { "on" } else { "off" }
            )?,
        }
        if let Some(status) = &self.status {
            writeln!(f, "  status: {status}")?;
        }
        Ok(())
    }
}

pub struct Session {
    assembler: ImageAssembler,
    dispatcher: Dispatcher,
    mapper: DetectionPowerMapper,
    log: ActivityLog,
    images_received: u64,
    last_image: Option<Vec<u8>>,
    latest_detection: Option<DetectionResult>,
    auto_drive: bool,
    status: Option<String>,
    feed: Option<Sender<FeedSignal>>,
}

impl Session {
    pub fn new(config: &Config, now: Instant) -> Self {
        Self {
            assembler: ImageAssembler::new(config.image_timeout()),
            dispatcher: Dispatcher::new(config.dispatch_settings()),
            mapper: DetectionPowerMapper::new(config.power_threshold),
            log: ActivityLog::new(now, config.log_capacity),
            images_received: 0,
            last_image: None,
            latest_detection: None,
            auto_drive: false,
            status: None,
            feed: None,
        }
    }

    /// Forward completed camera images to the detection feed.
    pub fn with_feed(mut self, feed: Sender<FeedSignal>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn with_auto_drive(mut self, enabled: bool) -> Self {
        self.auto_drive = enabled;
        self
    }

    pub fn images_received(&self) -> u64 {
        self.images_received
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    pub fn motors(&self) -> &MotorTable {
        self.dispatcher.motors()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            transport: self.dispatcher.transport_name().map(str::to_owned),
            motors: self.dispatcher.motors().clone(),
            streaming: self.dispatcher.is_streaming(),
            capturing: self.dispatcher.is_capturing(),
            receiving_image: self.assembler.is_receiving(),
            images_received: self.images_received,
            last_image: self.last_image.clone(),
            latest_detection: self.latest_detection.clone(),
            auto_drive: self.auto_drive,
            status: self.status.clone(),
            log: self.log.entries().cloned().collect(),
        }
    }

    /// Adopt a freshly opened transport and put the device in a known idle
    /// state: motors off, camera stopped.
    pub fn connect(&mut self, transport: Box<dyn Transport>, now: Instant) -> Result<(), DispatchError> {
        let name = transport.name().to_owned();
        self.dispatcher.attach(transport);
        self.status = None;
        self.note(now, format!("Connected to {name}"));

        let stopped = self.dispatcher.all_off(now);
        let camera = self.send_command(Command::CamStop, now);
        if let Err(error) = &stopped {
            self.report(now, format!("Initial stop failed: {error}"));
        }
        stopped.and(camera)
    }

    /// Hang up on purpose: switch every motor off, then tear down.
    pub fn disconnect(&mut self, now: Instant) {
        if !self.dispatcher.is_connected() {
            return;
        }
        if let Err(error) = self.dispatcher.motors_off_individually(now) {
            self.report(now, format!("Failed to stop motors before disconnect: {error}"));
        }
        self.on_disconnected(now);
    }

    /// The link dropped. Abandon any image in flight and forget all
    /// tracked device state.
    pub fn on_disconnected(&mut self, now: Instant) {
        self.assembler.reset();
        self.dispatcher.disconnected();
        self.note(now, "Disconnected");
    }

    /// Decode and route one inbound chunk.
    pub fn on_chunk(&mut self, chunk: &[u8], now: Instant) {
        match decode(chunk, self.assembler.is_receiving()) {
            Frame::TextLine { text } => self.on_text(text, now),
            Frame::Unknown { bytes } => {
                let text = Frame::lossy_text(&bytes);
                if !text.is_empty() {
                    self.on_text(text, now);
                }
            }
            frame => {
                if let Some(event) = self.assembler.handle(frame, now) {
                    self.on_assembler_event(event, now);
                }
            }
        }
    }

    fn on_text(&mut self, text: String, now: Instant) {
        info!("device: {}", text);
        let outcome = self.dispatcher.on_text_line(&text);
        self.note(now, format!("Device: {text}"));
        if let Some(outcome) = outcome {
            self.on_snapshot(outcome, now);
        }
    }

    fn on_snapshot(&mut self, outcome: SnapshotOutcome, now: Instant) {
        match outcome {
            SnapshotOutcome::Done => self.note(now, "Snapshot done"),
            SnapshotOutcome::Failed => self.report(now, "Snapshot failed"),
            SnapshotOutcome::TimedOut => self.report(now, "Snapshot not acknowledged"),
        }
    }

    fn on_assembler_event(&mut self, event: AssemblerEvent, now: Instant) {
        match event {
            AssemblerEvent::ReceptionStarted { expected_size } => {
                self.note(now, format!("Receiving image: {expected_size} bytes"));
            }
            AssemblerEvent::ImageComplete { bytes } => {
                self.images_received += 1;
                self.note(
                    now,
                    format!("Image complete: {} bytes (#{})", bytes.len(), self.images_received),
                );
                if let Some(feed) = &self.feed {
                    if feed.send(FeedSignal::image(Camera::Back, &bytes)).is_err() {
                        debug!("detection feed gone, dropping image");
                        self.feed = None;
                    }
                }
                self.last_image = Some(bytes);
            }
            AssemblerEvent::ImageFailed(error) => self.report(now, error),
        }
    }

    /// Store the newest detection and, if auto-drive is on, steer the
    /// motors with it.
    pub fn on_feed(&mut self, event: FeedEvent, now: Instant) {
        let result = match event.into_result() {
            Ok(Some(result)) => result,
            Ok(None) => {
                debug!("feed acknowledgement, nothing to do");
                return;
            }
            Err(error) => return self.report(now, error),
        };
        if let Some(error) = &result.error {
            self.note(now, format!("Detection: {} ({error})", result.sound));
        }
        let powers = result.motor_powers;
        self.latest_detection = Some(result);

        let Some(powers) = powers.filter(|_| self.auto_drive) else {
            return;
        };
        // Nothing can be driven until a transport is attached.
        if !self.dispatcher.is_connected() {
            return;
        }
        for (command, sent) in self.mapper.drive(&powers, &mut self.dispatcher, now) {
            match sent {
                Ok(()) => self.note(now, format!("Auto: {command}")),
                Err(error) => self.report(now, format!("Auto: {command} failed - {error}")),
            }
        }
    }

    /// Send a command typed by the user.
    pub fn send_text(&mut self, text: &str, now: Instant) -> Result<Command, DispatchError> {
        match self.dispatcher.send_text(text, now) {
            Ok(command) => {
                self.note(now, format!("Sent: {command}"));
                self.status = None;
                Ok(command)
            }
            Err(error) => {
                self.report(now, format!("Failed: {} - {error}", text.trim()));
                Err(error)
            }
        }
    }

    pub fn send_command(&mut self, command: Command, now: Instant) -> Result<(), DispatchError> {
        let sent = self.dispatcher.send(command, now);
        match &sent {
            Ok(()) => self.note(now, format!("Sent: {command}")),
            Err(error) => self.report(now, format!("Failed: {command} - {error}")),
        }
        sent
    }

    pub fn all_off(&mut self, now: Instant) -> Result<(), DispatchError> {
        let sent = self.dispatcher.all_off(now);
        match &sent {
            Ok(()) => self.note(now, "All motors off"),
            Err(error) => self.report(now, format!("Stop all failed - {error}")),
        }
        sent
    }

    pub fn toggle(&mut self, id: MotorId, now: Instant) -> Result<(), DispatchError> {
        let was_on = self.dispatcher.motors().get(id).on;
        let sent = self.dispatcher.toggle(id, now);
        let on = self.dispatcher.motors().get(id).on;
        let state = if on { "on" } else { "off" };
        match &sent {
            Ok(()) => self.note(now, format!("Motor {id} {state}")),
            // Only the frequency write was refused.
            Err(error) if on != was_on => self.report(
                now,
                format!("Motor {id} {state}, but its frequency was not set - {error}"),
            ),
            Err(error) => self.report(now, format!("Motor {id} toggle failed - {error}")),
        }
        sent
    }

    pub fn set_auto_drive(&mut self, enabled: bool, now: Instant) {
        self.auto_drive = enabled;
        self.note(
            now,
            format!("Auto drive {}", if enabled { "enabled" } else { "disabled" }),
        );
    }

    /// Fire any timers that have come due.
    pub fn poll(&mut self, now: Instant) {
        if let Some(event) = self.assembler.poll(now) {
            self.on_assembler_event(event, now);
        }
        if let Some(outcome) = self.dispatcher.poll(now) {
            self.on_snapshot(outcome, now);
        }
    }

    /// When the next timer is due, if any is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([self.assembler.deadline(), self.dispatcher.deadline()])
    }

    /// Handle one event. Returns `false` once the session should stop.
    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> bool {
        match event {
            SessionEvent::Chunk(bytes) => self.on_chunk(&bytes, now),
            SessionEvent::Disconnected => self.on_disconnected(now),
            SessionEvent::Feed(event) => self.on_feed(event, now),
            SessionEvent::Command(text) => {
                let _ = self.send_text(&text, now);
            }
            SessionEvent::AllOff => {
                let _ = self.all_off(now);
            }
            SessionEvent::Toggle(id) => {
                let _ = self.toggle(id, now);
            }
            SessionEvent::AutoDrive(enabled) => self.set_auto_drive(enabled, now),
            SessionEvent::Disconnect => self.disconnect(now),
            SessionEvent::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionEvent::Shutdown => {
                self.disconnect(now);
                return false;
            }
        }
        true
    }

    /// Process events until [`SessionEvent::Shutdown`] or until every sender
    /// is gone, then hand the session back.
    pub fn run(mut self, events: Receiver<SessionEvent>) -> Self {
        loop {
            let now = Instant::now();
            self.poll(now);

            let received = match self.next_deadline() {
                Some(deadline) => events.recv_timeout(deadline.saturating_duration_since(now)),
                None => events.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(event) => {
                    if !self.handle(event, Instant::now()) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("session terminated");
        self
    }

    fn note(&mut self, now: Instant, text: impl Into<String>) {
        self.log.push(now, text);
    }

    // A failure the user should see: logged, and kept as the status message.
    fn report(&mut self, now: Instant, error: impl Display) {
        let message = error.to_string();
        warn!("{}", message);
        self.log.push(now, message.clone());
        self.status = Some(message);
    }
}
