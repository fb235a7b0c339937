//! Sends commands to the wearable and tracks what they should have done.
//!
//! All writes go through one [`Dispatcher`], which owns the transport, so two
//! commands can never interleave on the wire. State is only touched after the
//! transport accepts a write; a refused write is logged and leaves the motor
//! table exactly as it was.

use crate::command::Command;
use crate::error::{DispatchError, TransportError};
use crate::motor::{Frequency, MotorId, MotorTable};
use crate::timer::Timer;
use crate::transport::Transport;

use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Pause between consecutive commands in a burst.
pub const DEFAULT_INTER_COMMAND_DELAY: Duration = Duration::from_millis(50);

/// How long a snapshot may go unacknowledged before the capturing flag is
/// dropped anyway.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Knobs for a [`Dispatcher`].
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub inter_command_delay: Duration,
    pub snapshot_timeout: Duration,
    pub default_frequency: Frequency,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            inter_command_delay: DEFAULT_INTER_COMMAND_DELAY,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            default_frequency: Frequency::default(),
        }
    }
}

/// How a snapshot request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Done,
    Failed,
    TimedOut,
}

pub struct Dispatcher {
    transport: Option<Box<dyn Transport>>,
    motors: MotorTable,
    streaming: bool,
    capturing: bool,
    snapshot_timer: Timer,
    inter_command_delay: Duration,
}

impl Dispatcher {
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            transport: None,
            motors: MotorTable::new(settings.default_frequency),
            streaming: false,
            capturing: false,
            snapshot_timer: Timer::new(settings.snapshot_timeout),
            inter_command_delay: settings.inter_command_delay,
        }
    }

    /// Take ownership of a freshly connected transport, replacing (and
    /// closing) any previous one.
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        if let Some(mut old) = self.transport.replace(transport) {
            old.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport_name(&self) -> Option<&str> {
        self.transport.as_deref().map(|t| t.name())
    }

    pub fn motors(&self) -> &MotorTable {
        &self.motors
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.snapshot_timer.deadline()
    }

    /// Transmit one command and, if the transport accepted it, apply its
    /// effect to the tracked state.
    pub fn send(&mut self, command: Command, now: Instant) -> Result<(), DispatchError> {
        if command == Command::AllOff && !self.all_off_reliable() {
            debug!("all_off unreliable here, sending individual offs");
            return self.motors_off_individually(now);
        }

        let Some(transport) = self.transport.as_mut() else {
            warn!("cannot send {:?}: not connected", command.to_string());
            return Err(TransportError::NotConnected.into());
        };

        let bytes = command.encode(transport.framing());
        if let Err(error) = transport.send(&bytes) {
            warn!("failed to send {:?}: {}", command.to_string(), error);
            return Err(error.into());
        }
        debug!("sent {:?} via {}", command.to_string(), transport.name());

        self.apply(command, now);
        Ok(())
    }

    /// Parse free text and send it. Malformed text never reaches the
    /// transport.
    pub fn send_text(&mut self, text: &str, now: Instant) -> Result<Command, DispatchError> {
        let command: Command = text.parse()?;
        self.send(command, now)?;
        Ok(command)
    }

    /// Stop every motor. Uses `all_off` where the transport honours it, and
    /// three individual `off` commands otherwise. [`Dispatcher::send`] applies
    /// the same substitution, so a typed `all_off` is never sent raw either.
    pub fn all_off(&mut self, now: Instant) -> Result<(), DispatchError> {
        self.send(Command::AllOff, now)
    }

    fn all_off_reliable(&self) -> bool {
        self.transport
            .as_deref()
            .map_or(true, |transport| transport.all_off_reliable())
    }

    /// Send `off` to motors 1, 2 and 3 in turn, pausing between them. Every
    /// motor is attempted; the first failure is returned.
    pub fn motors_off_individually(&mut self, now: Instant) -> Result<(), DispatchError> {
        let mut result = Ok(());
        for (i, id) in MotorId::ALL.into_iter().enumerate() {
            if i > 0 {
                self.pause();
            }
            let sent = self.send(Command::MotorOff(id), now);
            if result.is_ok() {
                result = sent;
            }
        }
        result
    }

    /// Flip one motor. Turning on re-sends the tracked frequency first.
    pub fn toggle(&mut self, id: MotorId, now: Instant) -> Result<(), DispatchError> {
        let (on, frequency) = {
            let state = self.motors.get(id);
            (state.on, state.frequency)
        };
        if on {
            return self.send(Command::MotorOff(id), now);
        }

        let freq_result = self.send(Command::MotorFrequency(id, frequency), now);
        self.pause();
        self.send(Command::MotorOn(id), now)?;
        freq_result
    }

    /// Look at a text line from the device for a snapshot acknowledgment.
    pub fn on_text_line(&mut self, text: &str) -> Option<SnapshotOutcome> {
        if !self.capturing {
            return None;
        }
        let lower = text.to_ascii_lowercase();
        let outcome = if lower.contains("snapshot done") {
            SnapshotOutcome::Done
        } else if lower.contains("snapshot failed") {
            SnapshotOutcome::Failed
        } else {
            return None;
        };
        self.snapshot_timer.cancel();
        self.capturing = false;
        info!("snapshot acknowledged: {:?}", outcome);
        Some(outcome)
    }

    /// Drop the capturing flag if the snapshot was never acknowledged.
    pub fn poll(&mut self, now: Instant) -> Option<SnapshotOutcome> {
        if self.snapshot_timer.fire(now) && self.capturing {
            self.capturing = false;
            warn!("snapshot not acknowledged, giving up");
            return Some(SnapshotOutcome::TimedOut);
        }
        None
    }

    /// The link is gone: forget the transport and return to defaults.
    pub fn disconnected(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            info!("{} disconnected", transport.name());
            transport.close();
        }
        self.motors.reset();
        self.streaming = false;
        self.capturing = false;
        self.snapshot_timer.cancel();
    }

    fn apply(&mut self, command: Command, now: Instant) {
        match command {
            Command::MotorOn(id) => self.motors.get_mut(id).on = true,
            Command::MotorOff(id) => self.motors.get_mut(id).on = false,
            Command::MotorFrequency(id, hz) => self.motors.get_mut(id).frequency = hz,
            Command::AllOff => {
                for id in MotorId::ALL {
                    let motor = self.motors.get_mut(id);
                    motor.on = false;
                    motor.last_command = command.to_string();
                    motor.last_sent = Some(now);
                }
            }
            Command::CamStart => self.streaming = true,
            Command::CamStop => self.streaming = false,
            Command::CamSnap => {
                self.capturing = true;
                self.snapshot_timer.arm(now);
            }
            Command::CamPing => {}
        }

        if let Some(id) = command.motor() {
            let motor = self.motors.get_mut(id);
            motor.last_command = command.to_string();
            motor.last_sent = Some(now);
        }
    }

    fn pause(&self) {
        if !self.inter_command_delay.is_zero() {
            spin_sleep::sleep(self.inter_command_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::atomic::Ordering;

    fn m(n: u8) -> MotorId {
        MotorId::new(n).unwrap()
    }

    fn quick() -> DispatchSettings {
        DispatchSettings {
            inter_command_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn connected(mock: &MockTransport) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(quick());
        dispatcher.attach(Box::new(mock.clone()));
        dispatcher
    }

    #[test]
    fn motor_state_follows_successful_writes() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();

        dispatcher.send(Command::MotorOn(m(1)), now).unwrap();
        dispatcher
            .send(Command::MotorFrequency(m(1), Frequency::new(80).unwrap()), now)
            .unwrap();

        let motor = dispatcher.motors().get(m(1));
        assert!(motor.on);
        assert_eq!(motor.frequency.hz(), 80);
        assert_eq!(motor.last_command, "motor1_freq=80");
        assert_eq!(motor.last_sent, Some(now));
        assert_eq!(mock.sent(), vec!["motor1_on", "motor1_freq=80"]);

        dispatcher.send(Command::MotorOff(m(1)), now).unwrap();
        assert!(!dispatcher.motors().get(m(1)).on);
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();
        dispatcher.send(Command::MotorOn(m(2)), now).unwrap();

        mock.fail(true);
        let result = dispatcher.send(Command::MotorOff(m(2)), now);
        assert!(matches!(
            result,
            Err(DispatchError::Transport(TransportError::WriteFailure(_)))
        ));
        assert!(dispatcher.motors().get(m(2)).on);
        assert!(dispatcher.is_connected());
    }

    #[test]
    fn invalid_frequency_never_reaches_the_transport() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();
        let before = dispatcher.motors().get(m(2)).clone();

        for text in ["motor2_freq=0", "motor2_freq=abc"] {
            assert!(matches!(
                dispatcher.send_text(text, now),
                Err(DispatchError::InvalidFrequency(_))
            ));
        }
        assert!(mock.sent().is_empty());
        assert_eq!(dispatcher.motors().get(m(2)), &before);
    }

    #[test]
    fn sending_without_transport_is_not_connected() {
        let mut dispatcher = Dispatcher::new(quick());
        assert!(matches!(
            dispatcher.send(Command::MotorOn(m(1)), Instant::now()),
            Err(DispatchError::Transport(TransportError::NotConnected))
        ));
        assert!(!dispatcher.motors().get(m(1)).on);
    }

    #[test]
    fn line_framing_reaches_the_wire() {
        let mock = MockTransport::serial_like();
        let mut dispatcher = connected(&mock);
        dispatcher.send(Command::CamPing, Instant::now()).unwrap();
        assert_eq!(mock.writes.lock().unwrap()[0], b"CAM PING\n".to_vec());
    }

    #[test]
    fn all_off_uses_single_command_when_reliable() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();
        dispatcher.send(Command::MotorOn(m(1)), now).unwrap();
        dispatcher.send(Command::MotorOn(m(3)), now).unwrap();
        mock.clear();

        dispatcher.all_off(now).unwrap();
        assert_eq!(mock.sent(), vec!["all_off"]);
        assert!(dispatcher.motors().iter().all(|(_, s)| !s.on));
    }

    #[test]
    fn all_off_falls_back_to_individual_offs() {
        let mock = MockTransport::serial_like();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();
        dispatcher.send(Command::MotorOn(m(2)), now).unwrap();
        mock.clear();

        dispatcher.all_off(now).unwrap();
        assert_eq!(mock.sent(), vec!["motor1_off", "motor2_off", "motor3_off"]);
        assert!(!dispatcher.motors().get(m(2)).on);
    }

    #[test]
    fn typed_all_off_is_never_sent_raw_when_unreliable() {
        let mock = MockTransport::serial_like();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();
        dispatcher.send(Command::MotorOn(m(1)), now).unwrap();
        dispatcher.send(Command::MotorOn(m(3)), now).unwrap();
        mock.clear();

        assert_eq!(dispatcher.send_text("all_off", now).unwrap(), Command::AllOff);
        dispatcher.send(Command::AllOff, now).unwrap();
        let offs = ["motor1_off", "motor2_off", "motor3_off"];
        assert_eq!(mock.sent(), [offs, offs].concat());
        assert!(dispatcher.motors().iter().all(|(_, motor)| !motor.on));
    }

    #[test]
    fn refused_fallback_leaves_motors_on() {
        let mock = MockTransport::serial_like();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();
        dispatcher.send(Command::MotorOn(m(1)), now).unwrap();

        mock.fail(true);
        assert!(dispatcher.send_text("all_off", now).is_err());
        assert!(dispatcher.motors().get(m(1)).on);
    }

    #[test]
    fn individual_offs_are_paced() {
        let mock = MockTransport::serial_like();
        let mut dispatcher = Dispatcher::new(DispatchSettings {
            inter_command_delay: Duration::from_millis(20),
            ..Default::default()
        });
        dispatcher.attach(Box::new(mock.clone()));

        let started = Instant::now();
        dispatcher.all_off(started).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(mock.sent().len(), 3);
    }

    #[test]
    fn toggle_sends_frequency_then_on() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();

        dispatcher.toggle(m(3), now).unwrap();
        assert_eq!(mock.sent(), vec!["motor3_freq=50", "motor3_on"]);
        assert!(dispatcher.motors().get(m(3)).on);

        dispatcher.toggle(m(3), now).unwrap();
        assert_eq!(mock.sent().last().unwrap(), "motor3_off");
        assert!(!dispatcher.motors().get(m(3)).on);
    }

    #[test]
    fn camera_flags() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();

        dispatcher.send(Command::CamStart, now).unwrap();
        assert!(dispatcher.is_streaming());
        dispatcher.send(Command::CamStop, now).unwrap();
        assert!(!dispatcher.is_streaming());
    }

    #[test]
    fn snapshot_cleared_by_acknowledgment() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();

        assert_eq!(dispatcher.on_text_line("Snapshot done"), None);
        dispatcher.send(Command::CamSnap, now).unwrap();
        assert!(dispatcher.is_capturing());
        assert_eq!(dispatcher.on_text_line("camera warming up"), None);
        assert_eq!(
            dispatcher.on_text_line("Snapshot FAILED: no frame"),
            Some(SnapshotOutcome::Failed)
        );
        assert!(!dispatcher.is_capturing());
        assert_eq!(dispatcher.poll(now + Duration::from_secs(60)), None);
    }

    #[test]
    fn snapshot_cleared_by_fallback_timeout() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();

        dispatcher.send(Command::CamSnap, now).unwrap();
        assert_eq!(dispatcher.poll(now + Duration::from_millis(9_999)), None);
        assert_eq!(
            dispatcher.poll(now + Duration::from_millis(10_000)),
            Some(SnapshotOutcome::TimedOut)
        );
        assert!(!dispatcher.is_capturing());
    }

    #[test]
    fn disconnect_resets_everything() {
        let mock = MockTransport::packet();
        let mut dispatcher = connected(&mock);
        let now = Instant::now();
        dispatcher.send(Command::MotorOn(m(1)), now).unwrap();
        dispatcher
            .send(Command::MotorFrequency(m(1), Frequency::new(150).unwrap()), now)
            .unwrap();
        dispatcher.send(Command::CamStart, now).unwrap();
        dispatcher.send(Command::CamSnap, now).unwrap();

        dispatcher.disconnected();
        assert!(!dispatcher.is_connected());
        assert!(mock.closed.load(Ordering::SeqCst));
        assert!(!dispatcher.is_streaming());
        assert!(!dispatcher.is_capturing());
        assert_eq!(dispatcher.deadline(), None);
        assert_eq!(dispatcher.motors(), &MotorTable::default());
    }
}
