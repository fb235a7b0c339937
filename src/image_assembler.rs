//! Reassembles camera images from the chunked frame stream.
//!
//! The assembler is a two-state machine, Idle and Receiving. An image-start
//! frame always clears the buffer and (re)arms the reception timer, even when
//! another image is still in flight; the partial image is dropped without
//! reporting a failure. An image-end frame validates the buffer as a JPEG and
//! returns to Idle. If the end marker never shows up the timer fires and the
//! assembler gives up on that image.
//!
//! The buffer is not capped at the declared size. A peer that sends more
//! bytes than it announced grows the buffer until the end marker or timeout.

use crate::error::ImageError;
use crate::frame_decoder::Frame;
use crate::timer::Timer;

use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// How long to wait for the end marker after an image-start frame.
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_millis(15_000);

/// JPEG start-of-image marker every valid payload begins with.
pub const JPEG_SIGNATURE: [u8; 2] = [0xFF, 0xD8];

/// Whether an image is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceptionState {
    Idle,
    Receiving { expected_size: u32 },
}

/// What the assembler reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerEvent {
    ReceptionStarted { expected_size: u32 },
    ImageComplete { bytes: Vec<u8> },
    ImageFailed(ImageError),
}

/// Accumulates image payloads between start and end markers.
#[derive(Debug)]
pub struct ImageAssembler {
    state: ReceptionState,
    buffer: Vec<u8>,
    timeout: Timer,
}

impl Default for ImageAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_TIMEOUT)
    }
}

impl ImageAssembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ReceptionState::Idle,
            buffer: Vec::new(),
            timeout: Timer::new(timeout),
        }
    }

    pub fn state(&self) -> ReceptionState {
        self.state
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self.state, ReceptionState::Receiving { .. })
    }

    /// Number of payload bytes accumulated so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// When the reception timeout will fire, if an image is in flight.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.deadline()
    }

    /// Feed one decoded frame. Text and unknown frames are not the
    /// assembler's concern and produce nothing.
    pub fn handle(&mut self, frame: Frame, now: Instant) -> Option<AssemblerEvent> {
        match (frame, self.state) {
            (Frame::ImageStart { expected_size }, state) => {
                if let ReceptionState::Receiving { .. } = state {
                    debug!(
                        "image restarted, dropping {} buffered bytes",
                        self.buffer.len()
                    );
                }
                self.buffer.clear();
                self.timeout.arm(now);
                self.state = ReceptionState::Receiving { expected_size };
                info!("receiving image: {} bytes", expected_size);
                Some(AssemblerEvent::ReceptionStarted { expected_size })
            }
            (Frame::ImageChunk { bytes }, ReceptionState::Receiving { .. }) => {
                self.buffer.extend_from_slice(&bytes);
                None
            }
            (Frame::ImageEnd, ReceptionState::Receiving { .. }) => Some(self.finish()),
            (Frame::ImageEnd, ReceptionState::Idle) => {
                debug!("image end marker while idle, ignoring");
                None
            }
            _ => None,
        }
    }

    /// Check the reception timeout. Emits exactly one failure per expired
    /// image.
    pub fn poll(&mut self, now: Instant) -> Option<AssemblerEvent> {
        if !self.timeout.fire(now) {
            return None;
        }
        let ReceptionState::Receiving { expected_size } = self.state else {
            return None;
        };
        let error = ImageError::Timeout {
            received: self.buffer.len(),
            expected: expected_size,
        };
        warn!("{}", error);
        self.reset();
        Some(AssemblerEvent::ImageFailed(error))
    }

    /// Abandon any image in flight without reporting it, e.g. on disconnect.
    pub fn reset(&mut self) {
        self.timeout.cancel();
        self.buffer = Vec::new();
        self.state = ReceptionState::Idle;
    }

    fn finish(&mut self) -> AssemblerEvent {
        self.timeout.cancel();
        self.state = ReceptionState::Idle;
        let bytes = std::mem::take(&mut self.buffer);

        if bytes.len() < JPEG_SIGNATURE.len() {
            let error = ImageError::TooSmall { len: bytes.len() };
            warn!("{}", error);
            return AssemblerEvent::ImageFailed(error);
        }
        if bytes[..2] != JPEG_SIGNATURE {
            let error = ImageError::HeaderInvalid {
                first: [bytes[0], bytes[1]],
            };
            warn!("{}", error);
            return AssemblerEvent::ImageFailed(error);
        }

        info!("image complete: {} bytes", bytes.len());
        AssemblerEvent::ImageComplete { bytes }
    }
}
