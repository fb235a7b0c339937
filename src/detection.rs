//! Results from the external sound-detection feed, and the mapper that
//! drives the motors from them.
//!
//! The feed is a bidirectional event channel. We push audio and camera
//! frames at it ([`FeedSignal`]) and it answers, whenever it likes, with
//! [`FeedEvent`]s. Messages are JSON objects of the form
//! `{"event": "<name>", "data": {...}}`.

use crate::command::Command;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, FeedError};
use crate::localizer::{angle_from_bbox, motor_powers_for_angle, Camera, Degrees, MotorPowers, CAMERA_FOV};
use crate::motor::{MotorId, MotorTable};

use base64::{engine::general_purpose::STANDARD, Engine};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Power above which a motor should be running.
pub const DEFAULT_POWER_THRESHOLD: f64 = 0.3;

/// Extra detail about what the feed saw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionInfo {
    pub camera: Option<Camera>,
    pub confidence: Option<String>,
    pub object_description: Option<String>,
    /// `[x_min, y_min, x_max, y_max]` in pixels.
    pub bbox: Option<[f64; 4]>,
    /// `[width, height]` of the frame the box was found in.
    pub image_dimensions: Option<[f64; 2]>,
}

impl DetectionInfo {
    /// Bearing of the detected object, worked out from where its bounding
    /// box sits in the camera frame.
    pub fn bearing(&self) -> Option<Degrees> {
        let camera = self.camera?.bearing()?;
        let [x_min, _, x_max, _] = self.bbox?;
        let [width, _] = self.image_dimensions?;
        if width <= 0.0 {
            return None;
        }
        Some(angle_from_bbox((x_min + x_max) / 2.0, width, CAMERA_FOV, camera))
    }
}

/// Body of a `result` event as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub sound: String,
    #[serde(default)]
    pub angle: Option<Degrees>,
    #[serde(default)]
    pub motor_powers: Option<MotorPowers>,
    #[serde(default)]
    pub detection_info: Option<DetectionInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Something the feed sent us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    Result(ResultPayload),
    Error(ErrorPayload),
    /// Greeting sent once the feed accepts the connection.
    ConnectionResponse { status: String },
    /// Acknowledges a forwarded camera frame.
    ImageReceived { camera: Camera, size: usize },
}

impl FeedEvent {
    /// Decode one JSON message.
    pub fn parse(message: &str) -> Result<Self, FeedError> {
        Ok(serde_json::from_str(message)?)
    }

    /// The detection carried by this event, or the feed's own error.
    /// Acknowledgements carry neither.
    pub fn into_result(self) -> Result<Option<DetectionResult>, FeedError> {
        match self {
            FeedEvent::Result(payload) => Ok(Some(DetectionResult::from(payload))),
            FeedEvent::Error(ErrorPayload { message }) => Err(FeedError::Remote(message)),
            FeedEvent::ConnectionResponse { .. } | FeedEvent::ImageReceived { .. } => Ok(None),
        }
    }
}

/// Something we send to the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FeedSignal {
    StartAudioStream,
    StopAudioStream,
    AudioChunk { data: String },
    ProcessAudioBuffer,
    ImageStream { camera: Camera, image: String },
}

impl FeedSignal {
    pub fn audio_chunk(samples: &[u8]) -> Self {
        FeedSignal::AudioChunk {
            data: STANDARD.encode(samples),
        }
    }

    pub fn image(camera: Camera, jpeg: &[u8]) -> Self {
        FeedSignal::ImageStream {
            camera,
            image: STANDARD.encode(jpeg),
        }
    }

    pub fn to_json(&self) -> Result<String, FeedError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The latest thing the feed heard, flattened for display and for the
/// mapper.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub sound: String,
    pub angle: Option<Degrees>,
    pub object: String,
    pub confidence: String,
    /// `None` when the feed could not place the sound at all.
    pub motor_powers: Option<MotorPowers>,
    pub error: Option<String>,
}

impl From<ResultPayload> for DetectionResult {
    fn from(payload: ResultPayload) -> Self {
        let info = payload.detection_info.unwrap_or_default();
        // Fill in whatever placement the feed left out.
        let angle = payload.angle.or_else(|| info.bearing());
        let motor_powers = payload
            .motor_powers
            .or_else(|| angle.map(motor_powers_for_angle));
        Self {
            sound: payload.sound,
            angle,
            object: info.object_description.unwrap_or_default(),
            confidence: info.confidence.unwrap_or_default(),
            motor_powers,
            error: payload.error,
        }
    }
}

/// Pairs each motor with the power channel that drives it.
pub fn channel_powers(powers: &MotorPowers) -> [(MotorId, f64); 3] {
    let [m1, m2, m3] = MotorId::ALL;
    [
        (m1, powers.channel300),
        (m2, powers.channel180),
        (m3, powers.channel60),
    ]
}

/// Switches motors on and off from detection results.
///
/// A command is only issued when the wanted state differs from the tracked
/// state, so a steady stream of identical results sends nothing after the
/// first. The same threshold is used in both directions.
#[derive(Debug, Clone, Copy)]
pub struct DetectionPowerMapper {
    threshold: f64,
}

impl Default for DetectionPowerMapper {
    fn default() -> Self {
        Self::new(DEFAULT_POWER_THRESHOLD)
    }
}

impl DetectionPowerMapper {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The commands needed to bring `motors` in line with `powers`.
    pub fn plan(&self, powers: &MotorPowers, motors: &MotorTable) -> Vec<Command> {
        channel_powers(powers)
            .into_iter()
            .filter_map(|(id, power)| {
                let wanted_on = power > self.threshold;
                match (wanted_on, motors.get(id).on) {
                    (true, false) => Some(Command::MotorOn(id)),
                    (false, true) => Some(Command::MotorOff(id)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Plan against the dispatcher's current state and send the result.
    pub fn drive(
        &self,
        powers: &MotorPowers,
        dispatcher: &mut Dispatcher,
        now: Instant,
    ) -> Vec<(Command, Result<(), DispatchError>)> {
        let plan = self.plan(powers, dispatcher.motors());
        if !plan.is_empty() {
            debug!("detection mapper issuing {} command(s)", plan.len());
        }
        plan.into_iter()
            .map(|command| (command, dispatcher.send(command, now)))
            .collect()
    }
}
