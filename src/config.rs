//! Runtime settings, read from a [RON](ron) file.
//!
//! Every field is optional in the file and falls back to its default, so a
//! config may be as small as `(power_threshold: 0.4)`.

use crate::activity_log::DEFAULT_LOG_CAPACITY;
use crate::detection::DEFAULT_POWER_THRESHOLD;
use crate::dispatcher::DispatchSettings;
use crate::error::ConfigError;
use crate::motor::{Frequency, DEFAULT_FREQUENCY};
use crate::transport::DEFAULT_BAUD_RATE;

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Longest accepted image or snapshot timeout: one hour.
pub const MAX_TIMEOUT_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long to wait for an image's end marker.
    pub image_timeout_ms: u64,
    /// How long to wait for a snapshot acknowledgment.
    pub snapshot_timeout_ms: u64,
    /// Pause between commands sent in a burst.
    pub inter_command_delay_ms: u64,
    /// Detection power above which a motor is switched on.
    pub power_threshold: f64,
    /// Entries kept in the activity log.
    pub log_capacity: usize,
    pub baud_rate: u32,
    /// Frequency motors start at, in Hz.
    pub default_frequency: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image_timeout_ms: 15_000,
            snapshot_timeout_ms: 10_000,
            inter_command_delay_ms: 50,
            power_threshold: DEFAULT_POWER_THRESHOLD,
            log_capacity: DEFAULT_LOG_CAPACITY,
            baud_rate: DEFAULT_BAUD_RATE,
            default_frequency: DEFAULT_FREQUENCY,
        }
    }
}

impl Config {
    /// Read and validate a config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Config = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.power_threshold) {
            return Err(ConfigError::Invalid(format!(
                "power_threshold {} is outside 0..=1",
                self.power_threshold
            )));
        }
        for (name, value) in [
            ("image_timeout_ms", self.image_timeout_ms),
            ("snapshot_timeout_ms", self.snapshot_timeout_ms),
        ] {
            if !(1..=MAX_TIMEOUT_MS).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} {value} is outside 1..={MAX_TIMEOUT_MS}"
                )));
            }
        }
        if self.inter_command_delay_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "inter_command_delay_ms {} is longer than {MAX_TIMEOUT_MS}",
                self.inter_command_delay_ms
            )));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::Invalid("log_capacity must be at least 1".to_owned()));
        }
        Frequency::new(self.default_frequency).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            inter_command_delay: Duration::from_millis(self.inter_command_delay_ms),
            snapshot_timeout: Duration::from_millis(self.snapshot_timeout_ms),
            default_frequency: Frequency::new(self.default_frequency).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_is_all_defaults() {
        assert_eq!(Config::from_ron("()").unwrap(), Config::default());
    }

    #[test]
    fn partial_config_overrides_some_fields() {
        let config = Config::from_ron("(power_threshold: 0.45, baud_rate: 9600)").unwrap();
        assert_eq!(config.power_threshold, 0.45);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.image_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for text in [
            "(power_threshold: 1.5)",
            "(log_capacity: 0)",
            "(default_frequency: 0)",
            "(default_frequency: 250)",
            "(image_timeout_ms: 0)",
            "(image_timeout_ms: 18446744073709551615)",
            "(snapshot_timeout_ms: 0)",
            "(snapshot_timeout_ms: 18446744073709551615)",
            "(inter_command_delay_ms: 3600001)",
        ] {
            assert!(
                matches!(Config::from_ron(text), Err(ConfigError::Invalid(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn longest_timeouts_are_accepted() {
        let config = Config::from_ron("(image_timeout_ms: 3600000, snapshot_timeout_ms: 3600000)")
            .unwrap();
        assert_eq!(config.image_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn malformed_ron_is_a_ron_error() {
        assert!(matches!(
            Config::from_ron("(power_threshold: )"),
            Err(ConfigError::RonSpannedError(_))
        ));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(inter_command_delay_ms: 0, default_frequency: 40)").unwrap();

        let config = Config::from_path(file.path()).unwrap();
        let settings = config.dispatch_settings();
        assert_eq!(settings.inter_command_delay, Duration::ZERO);
        assert_eq!(settings.default_frequency.hz(), 40);

        assert!(matches!(
            Config::from_path("/nonexistent/hearless.ron"),
            Err(ConfigError::IoError(_))
        ));
    }
}
