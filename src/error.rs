//! Error types shared across the device-communication layer.
//!
//! None of these are fatal to a [`Session`](crate::session::Session): they
//! are logged, written to the activity log, and the session carries on with
//! its last-known-good state.

use std::{borrow::Cow, error::Error, fmt, io};

/// Failures of the byte-delivery channel.
#[derive(Debug)]
pub enum TransportError {
    /// The platform has no way to reach the device over this transport.
    Unavailable(String),

    /// Opening the channel failed; the connect attempt is aborted.
    ConnectionFailure(String),

    /// A single write was refused. The session keeps running.
    WriteFailure(String),

    /// A command was issued while no transport was attached.
    NotConnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TransportError as TE;
        match self {
            TE::Unavailable(why) => write!(f, "transport unavailable: {why}"),
            TE::ConnectionFailure(why) => write!(f, "connection failed: {why}"),
            TE::WriteFailure(why) => write!(f, "write failed: {why}"),
            TE::NotConnected => write!(f, "not connected to device"),
        }
    }
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::WriteFailure(value.to_string())
    }
}

/// Reasons an image reception ended without a usable picture. Each one only
/// aborts the current image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Fewer than two bytes arrived before the end marker.
    TooSmall { len: usize },

    /// The payload does not start with the JPEG start-of-image marker.
    HeaderInvalid { first: [u8; 2] },

    /// No end marker arrived before the reception deadline.
    Timeout { received: usize, expected: u32 },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::TooSmall { len } => write!(f, "image too small ({len} bytes)"),
            ImageError::HeaderInvalid { first } => write!(
                f,
                "invalid image header {:02X} {:02X}, expected FF D8",
                first[0], first[1]
            ),
            ImageError::Timeout { received, expected } => write!(
                f,
                "image timed out after {received} of {expected} bytes"
            ),
        }
    }
}

impl Error for ImageError {}

/// Errors returned by the command dispatcher.
#[derive(Debug)]
pub enum DispatchError {
    /// The transport refused the write, or none is attached.
    Transport(TransportError),

    /// Frequency was not an integer in 1..=200. Nothing was transmitted.
    InvalidFrequency(String),

    /// Motor number outside 1..=3. Nothing was transmitted.
    InvalidMotor(String),

    /// Text that does not name any known command.
    UnknownCommand(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use DispatchError as DE;
        let msg = match self {
            DE::Transport(error) => Cow::from(error.to_string()),
            DE::InvalidFrequency(raw) => Cow::from(format!(
                "invalid frequency {raw:?}, expected an integer between 1 and 200"
            )),
            DE::InvalidMotor(raw) => Cow::from(format!("invalid motor {raw:?}, expected 1, 2 or 3")),
            DE::UnknownCommand(raw) => Cow::from(format!("unknown command {raw:?}")),
        };

        write!(f, "{}", msg)
    }
}

impl Error for DispatchError {}

impl From<TransportError> for DispatchError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

/// Errors while reading or validating a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// Returned when the file could not be read.
    IoError(io::Error),

    /// Returned when the file is not valid RON.
    RonSpannedError(ron::de::SpannedError),

    /// Returned when a value parses but is out of range.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(error) => write!(f, "io error: {}", error),
            ConfigError::RonSpannedError(error) => write!(f, "ron spanning error: {}", error),
            ConfigError::Invalid(why) => write!(f, "invalid configuration: {}", why),
        }
    }
}

impl Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::de::SpannedError> for ConfigError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

/// Errors on the detection feed channel.
#[derive(Debug)]
pub enum FeedError {
    /// A message could not be decoded.
    Json(serde_json::Error),

    /// The feed reported a failure of its own.
    Remote(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Json(error) => write!(f, "malformed feed message: {}", error),
            FeedError::Remote(message) => write!(f, "detection feed error: {}", message),
        }
    }
}

impl Error for FeedError {}

impl From<serde_json::Error> for FeedError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
