//! Turns raw inbound chunks from the wearable into [`Frame`]s.
//!
//! The wearable speaks a tiny marker protocol. Each chunk delivered by the
//! transport is classified by its leading bytes:
//!
//! - `T:` followed by anything is a text line from the firmware
//! - `I` followed by a little-endian `u32` announces an image of that size
//! - a lone `E` ends the image in flight
//!
//! Anything else is image payload while an image is being received, and
//! unknown data otherwise. Markers are only recognised at the start of a
//! chunk; a marker split across two chunks is not reassembled.

use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::{all_consuming, map, rest},
    number::complete::le_u32,
    sequence::preceded,
    IResult,
};

/// First byte of an image-start frame.
pub const IMAGE_START_MARKER: u8 = b'I';
/// The whole of an image-end frame.
pub const IMAGE_END_MARKER: u8 = b'E';
/// Prefix of a text frame.
pub const TEXT_MARKER: &[u8] = b"T:";

/// One semantic unit decoded from a transport chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    TextLine { text: String },
    ImageStart { expected_size: u32 },
    ImageChunk { bytes: Vec<u8> },
    ImageEnd,
    Unknown { bytes: Vec<u8> },
}

impl Frame {
    /// Best-effort text rendering of an unknown frame, for the log.
    pub fn lossy_text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).trim().to_owned()
    }
}

fn parse_text_line(input: &[u8]) -> IResult<&[u8], Frame> {
    map(preceded(tag(TEXT_MARKER), rest), |body: &[u8]| {
        Frame::TextLine {
            text: String::from_utf8_lossy(body).trim_end().to_owned(),
        }
    })(input)
}

// Bytes after the declared size are ignored.
fn parse_image_start(input: &[u8]) -> IResult<&[u8], Frame> {
    map(
        preceded(tag(&[IMAGE_START_MARKER][..]), le_u32),
        |expected_size| Frame::ImageStart { expected_size },
    )(input)
}

fn parse_image_end(input: &[u8]) -> IResult<&[u8], Frame> {
    map(all_consuming(tag(&[IMAGE_END_MARKER][..])), |_| Frame::ImageEnd)(input)
}

/// Classifies one inbound chunk. `receiving` is whether an image is
/// currently in flight. Pure: all state changes are the caller's business.
pub fn decode(chunk: &[u8], receiving: bool) -> Frame {
    match alt((parse_text_line, parse_image_start, parse_image_end))(chunk) {
        Ok((_remaining, frame)) => frame,
        Err(_) if receiving => Frame::ImageChunk {
            bytes: chunk.to_vec(),
        },
        Err(_) => Frame::Unknown {
            bytes: chunk.to_vec(),
        },
    }
}
