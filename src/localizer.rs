//! Turns a sound bearing into per-motor vibration power.
//!
//! The three motors sit on the wearer at fixed bearings (60°, 180° and 300°,
//! clockwise from straight ahead). A source at some bearing is spread over
//! the motors by inverse-square angular distance, so the closest motor
//! buzzes hardest and the three powers add up to one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bearing in degrees, clockwise from straight ahead.
pub type Degrees = f64;

/// Motor bearings, in channel order.
pub const MOTOR_BEARINGS: [Degrees; 3] = [60.0, 180.0, 300.0];

/// Horizontal field of view of each camera.
pub const CAMERA_FOV: Degrees = 80.0;

/// Power assigned to each motor channel, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorPowers {
    #[serde(rename = "motor_60")]
    pub channel60: f64,
    #[serde(rename = "motor_180")]
    pub channel180: f64,
    #[serde(rename = "motor_300")]
    pub channel300: f64,
}

impl MotorPowers {
    fn from_array([channel60, channel180, channel300]: [f64; 3]) -> Self {
        Self {
            channel60,
            channel180,
            channel300,
        }
    }

    pub fn total(&self) -> f64 {
        self.channel60 + self.channel180 + self.channel300
    }
}

/// Which camera saw the sound source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Camera {
    Front,
    Back,
    None,
}

impl Camera {
    pub fn bearing(self) -> Option<Degrees> {
        match self {
            Camera::Front => Some(0.0),
            Camera::Back => Some(180.0),
            Camera::None => None,
        }
    }
}

/// Coarse quadrant of a bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Front,
    Right,
    Back,
    Left,
}

impl Direction {
    pub fn from_angle(angle: Degrees) -> Self {
        let angle = normalize(angle);
        if !(45.0..315.0).contains(&angle) {
            Direction::Front
        } else if angle < 135.0 {
            Direction::Right
        } else if angle < 225.0 {
            Direction::Back
        } else {
            Direction::Left
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Front => "front",
            Direction::Right => "right",
            Direction::Back => "back",
            Direction::Left => "left",
        };
        write!(f, "{name}")
    }
}

/// Fold any bearing into `[0, 360)`.
pub fn normalize(angle: Degrees) -> Degrees {
    angle.rem_euclid(360.0)
}

/// Shortest way round the circle between two bearings, in `[0, 180]`.
pub fn angular_distance(a: Degrees, b: Degrees) -> Degrees {
    let diff = (normalize(a) - normalize(b)).abs();
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Bearing of a detected object from the horizontal centre of its bounding
/// box, given the camera it was seen in.
pub fn angle_from_bbox(center_x: f64, image_width: f64, fov: Degrees, camera: Degrees) -> Degrees {
    let offset = (center_x / image_width - 0.5) * fov;
    normalize(camera + offset)
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Spread a source at `angle` over the three motors.
pub fn motor_powers_for_angle(angle: Degrees) -> MotorPowers {
    let distances = MOTOR_BEARINGS.map(|bearing| angular_distance(angle, bearing));

    // Dead on a motor: that one gets everything.
    if distances.iter().any(|&d| d == 0.0) {
        return MotorPowers::from_array(distances.map(|d| if d == 0.0 { 1.0 } else { 0.0 }));
    }

    let weights = distances.map(|d| 1.0 / d.powi(2));
    let total: f64 = weights.iter().sum();
    MotorPowers::from_array(weights.map(|w| round3(w / total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_on_a_motor_gets_full_power() {
        assert_eq!(
            motor_powers_for_angle(180.0),
            MotorPowers {
                channel60: 0.0,
                channel180: 1.0,
                channel300: 0.0
            }
        );
        assert_eq!(motor_powers_for_angle(-60.0).channel300, 1.0);
        assert_eq!(motor_powers_for_angle(420.0).channel60, 1.0);
    }

    #[test]
    fn straight_ahead_splits_between_front_motors() {
        let powers = motor_powers_for_angle(0.0);
        assert_eq!(powers.channel60, powers.channel300);
        assert!(powers.channel180 < powers.channel60);
        // 1/60² each against 1/180²: 9 : 1 : 9
        assert_eq!(powers.channel60, 0.474);
        assert_eq!(powers.channel180, 0.053);
    }

    #[test]
    fn powers_sum_to_about_one() {
        for angle in [1.0, 33.3, 90.0, 150.0, 222.0, 271.5, 359.0] {
            let total = motor_powers_for_angle(angle).total();
            assert!((total - 1.0).abs() < 0.005, "{angle}: {total}");
        }
    }

    #[test]
    fn closest_motor_dominates() {
        let powers = motor_powers_for_angle(100.0);
        assert!(powers.channel60 > powers.channel180);
        assert!(powers.channel180 > powers.channel300);
    }

    #[test]
    fn distance_wraps_around() {
        assert_eq!(angular_distance(350.0, 10.0), 20.0);
        assert_eq!(angular_distance(0.0, 180.0), 180.0);
        assert_eq!(angular_distance(-90.0, 270.0), 0.0);
    }

    #[test]
    fn bbox_angle_for_each_camera() {
        // Centered in the front camera: straight ahead.
        assert_eq!(angle_from_bbox(960.0, 1920.0, CAMERA_FOV, 0.0), 0.0);
        // Left edge of the front camera.
        assert_eq!(angle_from_bbox(0.0, 1920.0, CAMERA_FOV, 0.0), 320.0);
        // Right edge of the back camera.
        assert_eq!(angle_from_bbox(1920.0, 1920.0, CAMERA_FOV, 180.0), 220.0);
        assert_eq!(Camera::Back.bearing(), Some(180.0));
        assert_eq!(Camera::None.bearing(), None);
    }

    #[test]
    fn quadrants() {
        assert_eq!(Direction::from_angle(0.0), Direction::Front);
        assert_eq!(Direction::from_angle(320.0), Direction::Front);
        assert_eq!(Direction::from_angle(45.0), Direction::Right);
        assert_eq!(Direction::from_angle(180.0), Direction::Back);
        assert_eq!(Direction::from_angle(225.0), Direction::Left);
        assert_eq!(Direction::from_angle(-100.0), Direction::Left);
        assert_eq!(Direction::from_angle(100.0).to_string(), "right");
    }
}
