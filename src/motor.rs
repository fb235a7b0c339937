//! The three vibration motors and what we believe each one is doing.

use crate::error::DispatchError;

use std::fmt;
use std::time::Instant;

/// Lowest frequency the firmware accepts, in Hz.
pub const MIN_FREQUENCY: u16 = 1;
/// Highest frequency the firmware accepts, in Hz.
pub const MAX_FREQUENCY: u16 = 200;
/// Frequency every motor starts with after connect or disconnect.
pub const DEFAULT_FREQUENCY: u16 = 50;

/// A motor number, always 1, 2 or 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MotorId(u8);

impl MotorId {
    pub const ALL: [MotorId; 3] = [MotorId(1), MotorId(2), MotorId(3)];

    pub fn new(n: u8) -> Option<Self> {
        (1..=3).contains(&n).then_some(Self(n))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for MotorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vibration frequency in Hz, always within 1..=200.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frequency(u16);

impl Frequency {
    pub fn new(hz: u16) -> Result<Self, DispatchError> {
        if (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&hz) {
            Ok(Self(hz))
        } else {
            Err(DispatchError::InvalidFrequency(hz.to_string()))
        }
    }

    /// Parse user-entered text. Anything that is not an integer in range is
    /// rejected with the original text in the error.
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        raw.trim()
            .parse::<u16>()
            .ok()
            .and_then(|hz| Self::new(hz).ok())
            .ok_or_else(|| DispatchError::InvalidFrequency(raw.to_owned()))
    }

    pub fn hz(self) -> u16 {
        self.0
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self(DEFAULT_FREQUENCY)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What we last successfully told one motor to do. `on` means the command was
/// accepted by the transport, not that the motor is confirmed running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotorState {
    pub on: bool,
    pub frequency: Frequency,
    pub last_command: String,
    pub last_sent: Option<Instant>,
}

impl MotorState {
    fn with_frequency(frequency: Frequency) -> Self {
        Self {
            on: false,
            frequency,
            last_command: String::new(),
            last_sent: None,
        }
    }
}

/// Tracked state for motors 1 through 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotorTable {
    default_frequency: Frequency,
    motors: [MotorState; 3],
}

impl Default for MotorTable {
    fn default() -> Self {
        Self::new(Frequency::default())
    }
}

impl MotorTable {
    pub fn new(default_frequency: Frequency) -> Self {
        Self {
            default_frequency,
            motors: std::array::from_fn(|_| MotorState::with_frequency(default_frequency)),
        }
    }

    pub fn get(&self, id: MotorId) -> &MotorState {
        &self.motors[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: MotorId) -> &mut MotorState {
        &mut self.motors[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (MotorId, &MotorState)> {
        MotorId::ALL.into_iter().zip(self.motors.iter())
    }

    /// Back to everything off at the default frequency.
    pub fn reset(&mut self) {
        *self = Self::new(self.default_frequency);
    }
}
