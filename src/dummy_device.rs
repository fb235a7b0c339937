//! A stand-in for the wearable, for running without hardware.
//!
//! The dummy sits on the far side of a [`NotificationPeer`] and behaves like
//! the real firmware: it acknowledges commands with text lines, streams
//! camera frames while `CAM START` is in effect, and answers `CAM SNAP` with
//! one frame followed by `T:snapshot done`. Frames are synthetic JPEGs of
//! random filler.

use crate::frame_decoder::{IMAGE_END_MARKER, IMAGE_START_MARKER, TEXT_MARKER};
use crate::image_assembler::JPEG_SIGNATURE;
use crate::transport::NotificationPeer;

use log::{debug, info, warn};
use rand::prelude::*;
use std::{
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread,
    time::{Duration, Instant},
};

/// Largest notification the dummy sends, matching a typical negotiated MTU.
pub const CHUNK_SIZE: usize = 180;

const DEFAULT_IMAGE_SIZE: usize = 2048;
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(500);
const POLL: Duration = Duration::from_millis(10);

pub struct DummyDevice {
    handle: Option<thread::JoinHandle<()>>,
    tx: Sender<Signal>,
}

enum Signal {
    ImageSize(usize),
    FrameInterval(Duration),
    Unplug,
    Stop,
}

impl DummyDevice {
    /// Start answering on `peer` from a background thread.
    pub fn start(peer: NotificationPeer) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || Firmware::new(peer).run(rx));
        DummyDevice {
            handle: Some(handle),
            tx,
        }
    }

    /// Size of generated frames, in bytes. Clamped to at least four.
    pub fn set_image_size(&self, size: usize) {
        let _ = self.tx.send(Signal::ImageSize(size));
    }

    pub fn set_frame_interval(&self, interval: Duration) {
        let _ = self.tx.send(Signal::FrameInterval(interval));
    }

    /// Drop the link as if the device walked out of range.
    pub fn unplug(&mut self) {
        let _ = self.tx.send(Signal::Unplug);
        self.join();
    }

    pub fn stop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
        self.join();
    }

    fn join(&mut self) {
        if let Some(thread) = self.handle.take() {
            if thread.join().is_err() {
                warn!("dummy device thread panicked");
            }
        }
    }
}

impl Drop for DummyDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Firmware {
    peer: NotificationPeer,
    rng: ThreadRng,
    image_size: usize,
    frame_interval: Duration,
    streaming: bool,
    last_frame: Instant,
}

impl Firmware {
    fn new(peer: NotificationPeer) -> Self {
        Self {
            peer,
            rng: thread_rng(),
            image_size: DEFAULT_IMAGE_SIZE,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            streaming: false,
            last_frame: Instant::now(),
        }
    }

    fn run(mut self, rx: Receiver<Signal>) {
        info!("dummy device running");
        loop {
            let packet = match self.peer.recv_write(POLL) {
                Ok(packet) => packet,
                Err(_) => break,
            };

            // Settings sent before a command apply to that command.
            loop {
                match rx.try_recv() {
                    Ok(Signal::ImageSize(size)) => self.image_size = size,
                    Ok(Signal::FrameInterval(interval)) => self.frame_interval = interval,
                    Ok(Signal::Unplug) => {
                        info!("dummy device unplugged");
                        self.peer.disconnect();
                        return;
                    }
                    Ok(Signal::Stop) | Err(TryRecvError::Disconnected) => {
                        debug!("dummy device terminated");
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            if let Some(packet) = packet {
                if !self.answer(&String::from_utf8_lossy(&packet)) {
                    break;
                }
            }

            if self.streaming && self.last_frame.elapsed() >= self.frame_interval {
                self.last_frame = Instant::now();
                if !self.send_image() {
                    break;
                }
            }
        }
        debug!("dummy device terminated");
    }

    // Returns false once nobody is listening.
    fn answer(&mut self, command: &str) -> bool {
        let command = command.trim();
        debug!("dummy device got {:?}", command);
        match command {
            "CAM START" => {
                self.streaming = true;
                self.last_frame = Instant::now()
                    .checked_sub(self.frame_interval)
                    .unwrap_or_else(Instant::now);
                self.say("OK CAM START")
            }
            "CAM STOP" => {
                self.streaming = false;
                self.say("OK CAM STOP")
            }
            "CAM SNAP" => self.send_image() && self.say("snapshot done"),
            "CAM PING" => self.say("PONG"),
            other => self.say(&format!("OK {other}")),
        }
    }

    fn say(&self, text: &str) -> bool {
        let mut line = TEXT_MARKER.to_vec();
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        self.peer.notify(&line)
    }

    fn send_image(&mut self) -> bool {
        let image = fake_jpeg(&mut self.rng, self.image_size);
        let mut start = vec![IMAGE_START_MARKER];
        start.extend_from_slice(&(image.len() as u32).to_le_bytes());

        self.peer.notify(&start)
            && image.chunks(CHUNK_SIZE).all(|chunk| self.peer.notify(chunk))
            && self.peer.notify(&[IMAGE_END_MARKER])
    }
}

/// A JPEG-shaped buffer: start-of-image, filler, end-of-image.
fn fake_jpeg(rng: &mut impl Rng, size: usize) -> Vec<u8> {
    let size = size.max(JPEG_SIGNATURE.len() + 2);
    let mut image = Vec::with_capacity(size);
    image.extend_from_slice(&JPEG_SIGNATURE);
    // Filler stays clear of the ASCII marker bytes.
    image.extend((0..size - 4).map(|_| rng.gen_range(0x80u8..0xFF)));
    image.extend_from_slice(&[0xFF, 0xD9]);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::config::Config;
    use crate::session::{Session, SessionEvent};
    use crate::transport::notification_pair;

    fn session_with_dummy(events: Sender<SessionEvent>) -> (Session, DummyDevice) {
        let (transport, peer) = notification_pair("dummy", events);
        let config = Config {
            inter_command_delay_ms: 0,
            ..Default::default()
        };
        let now = Instant::now();
        let mut session = Session::new(&config, now);
        let device = DummyDevice::start(peer);
        session.connect(Box::new(transport), now).unwrap();
        (session, device)
    }

    fn pump_until(
        session: &mut Session,
        rx: &Receiver<SessionEvent>,
        mut done: impl FnMut(&Session) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(session) {
            assert!(Instant::now() < deadline, "dummy device never answered");
            if let Ok(event) = rx.recv_timeout(Duration::from_millis(50)) {
                session.handle(event, Instant::now());
            }
        }
    }

    #[test]
    fn fake_jpeg_has_markers_and_size() {
        let image = fake_jpeg(&mut thread_rng(), 500);
        assert_eq!(image.len(), 500);
        assert_eq!(image[..2], JPEG_SIGNATURE);
        assert_eq!(image[498..], [0xFF, 0xD9]);
        assert_eq!(fake_jpeg(&mut thread_rng(), 0).len(), 4);
    }

    #[test]
    fn snapshot_round_trip() {
        let (tx, rx) = mpsc::channel();
        let (mut session, mut device) = session_with_dummy(tx);
        device.set_image_size(1000);

        session.send_command(Command::CamSnap, Instant::now()).unwrap();
        pump_until(&mut session, &rx, |s| !s.snapshot().capturing);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.images_received, 1);
        assert_eq!(snapshot.last_image.map(|i| i.len()), Some(1000));
        assert!(snapshot.log.iter().any(|e| e.text == "Snapshot done"));
        device.stop();
    }

    #[test]
    fn streams_until_stopped() {
        let (tx, rx) = mpsc::channel();
        let (mut session, mut device) = session_with_dummy(tx);
        device.set_frame_interval(Duration::from_millis(20));

        session.send_command(Command::CamStart, Instant::now()).unwrap();
        pump_until(&mut session, &rx, |s| s.images_received() >= 3);
        session.send_command(Command::CamStop, Instant::now()).unwrap();
        device.stop();
    }

    #[test]
    fn unplug_reaches_the_session() {
        let (tx, rx) = mpsc::channel();
        let (mut session, mut device) = session_with_dummy(tx);
        assert!(session.is_connected());

        device.unplug();
        pump_until(&mut session, &rx, |s| !s.is_connected());
    }
}
