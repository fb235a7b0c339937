//! The ASCII command set understood by the wearable's firmware.

use crate::error::DispatchError;
use crate::motor::{Frequency, MotorId};

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map, rest, value},
    sequence::{pair, preceded},
    Finish, IResult,
};
use std::{fmt, str::FromStr};

/// How the transport expects commands to be delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Byte stream: every command ends with `\n`.
    Line,
    /// Message-oriented: each write is one command, sent as-is.
    Packet,
}

/// One outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    MotorOn(MotorId),
    MotorOff(MotorId),
    MotorFrequency(MotorId, Frequency),
    AllOff,
    CamStart,
    CamStop,
    CamSnap,
    CamPing,
}

impl Command {
    /// The motor this command targets, if any.
    pub fn motor(&self) -> Option<MotorId> {
        match self {
            Command::MotorOn(id) | Command::MotorOff(id) | Command::MotorFrequency(id, _) => {
                Some(*id)
            }
            _ => None,
        }
    }

    /// Serialize for the given transport framing.
    pub fn encode(&self, framing: Framing) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        if framing == Framing::Line {
            bytes.push(b'\n');
        }
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::MotorOn(id) => write!(f, "motor{id}_on"),
            Command::MotorOff(id) => write!(f, "motor{id}_off"),
            Command::MotorFrequency(id, hz) => write!(f, "motor{id}_freq={hz}"),
            Command::AllOff => write!(f, "all_off"),
            Command::CamStart => write!(f, "CAM START"),
            Command::CamStop => write!(f, "CAM STOP"),
            Command::CamSnap => write!(f, "CAM SNAP"),
            Command::CamPing => write!(f, "CAM PING"),
        }
    }
}

// Shape of a command before its numbers are validated.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RawCommand<'a> {
    Fixed(Command),
    Motor(&'a str, MotorAction<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MotorAction<'a> {
    On,
    Off,
    Frequency(&'a str),
}

fn parse_fixed(s: &str) -> IResult<&str, RawCommand> {
    map(
        all_consuming(alt((
            value(Command::AllOff, tag("all_off")),
            value(Command::CamStart, tag("CAM START")),
            value(Command::CamStop, tag("CAM STOP")),
            value(Command::CamSnap, tag("CAM SNAP")),
            value(Command::CamPing, tag("CAM PING")),
        ))),
        RawCommand::Fixed,
    )(s)
}

fn parse_motor_action(s: &str) -> IResult<&str, MotorAction> {
    alt((
        all_consuming(value(MotorAction::On, tag("_on"))),
        all_consuming(value(MotorAction::Off, tag("_off"))),
        map(preceded(tag("_freq="), rest), MotorAction::Frequency),
    ))(s)
}

fn parse_motor(s: &str) -> IResult<&str, RawCommand> {
    map(
        pair(preceded(tag("motor"), digit1), parse_motor_action),
        |(n, action)| RawCommand::Motor(n, action),
    )(s)
}

impl FromStr for Command {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let raw = match alt((parse_fixed, parse_motor))(trimmed).finish() {
            Ok((_remaining, raw)) => raw,
            Err(_) => return Err(DispatchError::UnknownCommand(trimmed.to_owned())),
        };

        match raw {
            RawCommand::Fixed(command) => Ok(command),
            RawCommand::Motor(n, action) => {
                let id = n
                    .parse::<u8>()
                    .ok()
                    .and_then(MotorId::new)
                    .ok_or_else(|| DispatchError::InvalidMotor(n.to_owned()))?;
                Ok(match action {
                    MotorAction::On => Command::MotorOn(id),
                    MotorAction::Off => Command::MotorOff(id),
                    MotorAction::Frequency(hz) => {
                        Command::MotorFrequency(id, Frequency::parse(hz)?)
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(n: u8) -> MotorId {
        MotorId::new(n).unwrap()
    }

    #[test]
    fn encodes_fixed_format_ascii() {
        let hz = Frequency::new(75).unwrap();
        assert_eq!(Command::MotorOn(m(1)).to_string(), "motor1_on");
        assert_eq!(Command::MotorOff(m(3)).to_string(), "motor3_off");
        assert_eq!(Command::MotorFrequency(m(2), hz).to_string(), "motor2_freq=75");
        assert_eq!(Command::AllOff.to_string(), "all_off");
        assert_eq!(Command::CamSnap.to_string(), "CAM SNAP");
    }

    #[test]
    fn line_framing_appends_newline() {
        assert_eq!(Command::CamStop.encode(Framing::Line), b"CAM STOP\n".to_vec());
        assert_eq!(Command::CamStop.encode(Framing::Packet), b"CAM STOP".to_vec());
    }

    #[test]
    fn parses_every_command() {
        let hz = Frequency::new(120).unwrap();
        let cases = [
            ("motor1_on", Command::MotorOn(m(1))),
            ("motor2_off\n", Command::MotorOff(m(2))),
            ("motor3_freq=120", Command::MotorFrequency(m(3), hz)),
            ("all_off", Command::AllOff),
            ("CAM START", Command::CamStart),
            ("CAM STOP", Command::CamStop),
            ("CAM SNAP", Command::CamSnap),
            ("CAM PING", Command::CamPing),
        ];
        for (text, expected) in cases {
            assert_eq!(text.parse::<Command>().unwrap(), expected, "{text}");
        }
    }

    #[test]
    fn bad_frequencies_are_rejected() {
        for text in ["motor2_freq=0", "motor2_freq=abc", "motor2_freq=", "motor2_freq=201"] {
            assert!(
                matches!(text.parse::<Command>(), Err(DispatchError::InvalidFrequency(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn bad_motor_numbers_are_rejected() {
        assert!(matches!(
            "motor4_on".parse::<Command>(),
            Err(DispatchError::InvalidMotor(n)) if n == "4"
        ));
        assert!(matches!(
            "motor0_freq=10".parse::<Command>(),
            Err(DispatchError::InvalidMotor(_))
        ));
    }

    #[test]
    fn garbage_is_unknown() {
        for text in ["", "motor_on", "motor1_onn", "cam start", "all_off please"] {
            assert!(
                matches!(text.parse::<Command>(), Err(DispatchError::UnknownCommand(_))),
                "{text}"
            );
        }
    }
}
