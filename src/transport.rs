//! Byte-delivery channels to the wearable.
//!
//! The core only needs three things from a transport: a way to write bytes,
//! a stream of inbound chunks, and a disconnect notification. Inbound chunks
//! and disconnects are posted as [`SessionEvent`]s into the session's queue,
//! so they are handled strictly in arrival order on the session thread.
//! Chunk boundaries are whatever the transport delivers.

use crate::command::Framing;
use crate::error::TransportError;
use crate::session::SessionEvent;

use log::{debug, info, warn};
use serial2::SerialPort;
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Baud rate the wearable's motor controller listens at.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

// How often the serial reader wakes up to check for shutdown.
const READ_POLL: Duration = Duration::from_millis(100);

/// A writable connection to the device.
pub trait Transport: Send {
    /// Hand bytes to the channel. `Ok` means the write was accepted, not
    /// that the device acted on it.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    fn framing(&self) -> Framing;

    /// Whether the firmware reliably honours `all_off` over this channel.
    fn all_off_reliable(&self) -> bool {
        true
    }

    /// Release the channel. Called once, before the transport is dropped.
    fn close(&mut self) {}

    fn name(&self) -> &str;
}

/// A wired serial link, newline-delimited.
pub struct SerialTransport {
    name: String,
    port: Arc<SerialPort>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// List serial devices the OS knows about.
    pub fn available_ports() -> Result<Vec<PathBuf>, TransportError> {
        SerialPort::available_ports().map_err(|e| TransportError::Unavailable(e.to_string()))
    }

    /// Open `path` and start a reader thread that posts inbound chunks to
    /// `events`.
    pub fn open(
        path: impl AsRef<Path>,
        baud_rate: u32,
        events: Sender<SessionEvent>,
    ) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let mut port = SerialPort::open(path, baud_rate)
            .map_err(|e| TransportError::ConnectionFailure(format!("{}: {e}", path.display())))?;
        port.set_read_timeout(READ_POLL)
            .map_err(|e| TransportError::ConnectionFailure(e.to_string()))?;
        info!("serial port {} opened at {} baud", path.display(), baud_rate);

        let port = Arc::new(port);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_serial_reader(Arc::clone(&port), Arc::clone(&stop), events);

        Ok(Self {
            name: path.display().to_string(),
            port,
            stop,
            reader: Some(reader),
        })
    }
}

fn spawn_serial_reader(
    port: Arc<SerialPort>,
    stop: Arc<AtomicBool>,
    events: Sender<SessionEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0; 256];
        while !stop.load(Ordering::Relaxed) {
            match port.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if events.send(SessionEvent::Chunk(buffer[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
                Err(e) => {
                    warn!("serial read failed: {}", e);
                    break;
                }
            }
        }
        // A requested stop is not a disconnect the session needs telling about.
        if !stop.load(Ordering::Relaxed) {
            let _ = events.send(SessionEvent::Disconnected);
        }
        debug!("serial reader terminated");
    })
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn framing(&self) -> Framing {
        Framing::Line
    }

    // The motor controller ignores all_off over serial.
    fn all_off_reliable(&self) -> bool {
        false
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("serial reader panicked");
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// A wireless characteristic link: each write is one packet, each
/// notification one inbound chunk.
///
/// The radio stack itself lives outside this crate. It holds the matching
/// [`NotificationPeer`], forwards notifications through it, and drains the
/// packets written here.
pub struct NotificationTransport {
    name: String,
    writes: Sender<Vec<u8>>,
}

/// The radio-stack side of a [`NotificationTransport`].
pub struct NotificationPeer {
    events: Sender<SessionEvent>,
    writes: Receiver<Vec<u8>>,
}

/// Make a connected transport/peer pair whose inbound side posts into
/// `events`.
pub fn notification_pair(
    name: impl Into<String>,
    events: Sender<SessionEvent>,
) -> (NotificationTransport, NotificationPeer) {
    let (tx, rx) = mpsc::channel();
    (
        NotificationTransport {
            name: name.into(),
            writes: tx,
        },
        NotificationPeer { events, writes: rx },
    )
}

impl Transport for NotificationTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writes
            .send(bytes.to_vec())
            .map_err(|_| TransportError::WriteFailure("characteristic closed".to_owned()))
    }

    fn framing(&self) -> Framing {
        Framing::Packet
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl NotificationPeer {
    /// Deliver one notification. Returns `false` once the session is gone.
    pub fn notify(&self, bytes: &[u8]) -> bool {
        self.events.send(SessionEvent::Chunk(bytes.to_vec())).is_ok()
    }

    /// Wait up to `timeout` for the next packet written by the session.
    /// `Err` means the transport side was dropped.
    pub fn recv_write(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match self.writes.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::NotConnected),
        }
    }

    /// Report that the link dropped.
    pub fn disconnect(self) {
        let _ = self.events.send(SessionEvent::Disconnected);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every write; can be told to start refusing them.
    #[derive(Clone)]
    pub struct MockTransport {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub failing: Arc<AtomicBool>,
        pub closed: Arc<AtomicBool>,
        refused: Arc<Mutex<Vec<String>>>,
        framing: Framing,
        all_off_reliable: bool,
    }

    impl MockTransport {
        pub fn packet() -> Self {
            Self::with(Framing::Packet, true)
        }

        pub fn serial_like() -> Self {
            Self::with(Framing::Line, false)
        }

        fn with(framing: Framing, all_off_reliable: bool) -> Self {
            Self {
                writes: Arc::new(Mutex::new(Vec::new())),
                failing: Arc::new(AtomicBool::new(false)),
                closed: Arc::new(AtomicBool::new(false)),
                refused: Arc::new(Mutex::new(Vec::new())),
                framing,
                all_off_reliable,
            }
        }

        pub fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Refuse every write of exactly this command.
        pub fn refuse(&self, command: &str) {
            self.refused.lock().unwrap().push(command.to_owned());
        }

        /// Writes so far, as text without framing.
        pub fn sent(&self) -> Vec<String> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|w| String::from_utf8_lossy(w).trim_end().to_owned())
                .collect()
        }

        pub fn clear(&self) {
            self.writes.lock().unwrap().clear();
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::WriteFailure("mock refused".to_owned()));
            }
            let text = String::from_utf8_lossy(bytes);
            if self.refused.lock().unwrap().iter().any(|r| r == text.trim_end()) {
                return Err(TransportError::WriteFailure(format!("mock refused {r}", r = text.trim_end())));
            }
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn framing(&self) -> Framing {
            self.framing
        }

        fn all_off_reliable(&self) -> bool {
            self.all_off_reliable
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
