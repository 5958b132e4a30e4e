//! Configuration file support for steplink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (STEPLINK_*)
//! 3. Local config file (./steplink.toml)
//! 4. Global config file (~/.config/steplink/config.toml)

use anyhow::{Result, bail};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use steplink::{LinkConfig, MotorConfig, Pin, TemperatureSensor, Topology};

/// Step time used when `[globals]` does not set one.
pub const DEFAULT_STEP_TIME_US: u32 = 50;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// One axis and the motors that move it together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Motors in slot order.
    #[serde(default)]
    pub motor: Vec<MotorConfig>,
}

/// Controller-wide settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalsConfig {
    /// Status LED.
    pub led: Option<Pin>,
    /// Hardware time per step sample, in microseconds.
    pub step_time_us: Option<u32>,
}

impl GlobalsConfig {
    /// Configured step time or the default.
    pub fn step_time(&self) -> u32 {
        self.step_time_us.unwrap_or(DEFAULT_STEP_TIME_US)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Retry budgets for the link.
    #[serde(default)]
    pub retry: LinkConfig,
    /// Motor topology.
    #[serde(default)]
    pub axis: Vec<AxisConfig>,
    /// Temperature sensor bindings.
    #[serde(default)]
    pub sensor: Vec<TemperatureSensor>,
    /// Controller-wide settings.
    #[serde(default)]
    pub globals: GlobalsConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new("steplink.toml")) {
            debug!("Loaded local config from steplink.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "steplink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    ///
    /// Scalars are overridden when set. A file that declares any axis or
    /// sensor replaces the whole list; machines are not assembled from
    /// fragments of several files.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.retry != LinkConfig::default() {
            self.retry = other.retry;
        }

        if !other.axis.is_empty() {
            self.axis = other.axis;
        }
        if !other.sensor.is_empty() {
            self.sensor = other.sensor;
        }

        if other.globals.led.is_some() {
            self.globals.led = other.globals.led;
        }
        if other.globals.step_time_us.is_some() {
            self.globals.step_time_us = other.globals.step_time_us;
        }
    }

    /// Build the motor topology described by `[[axis]]`.
    pub fn to_topology(&self) -> Result<Topology> {
        for (index, axis) in self.axis.iter().enumerate() {
            if axis.motor.is_empty() {
                bail!("axis {index} has no motors");
            }
        }
        Ok(Topology::new(
            self.axis
                .iter()
                .map(|axis| axis.motor.clone())
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steplink::RetryPolicy;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert_eq!(config.retry, LinkConfig::default());
        assert!(config.axis.is_empty());
        assert!(config.sensor.is_empty());
        assert!(config.globals.led.is_none());
        assert_eq!(config.globals.step_time(), DEFAULT_STEP_TIME_US);
    }

    #[test]
    fn test_config_merge_connection() {
        let mut config = Config::default();
        let other = Config {
            connection: ConnectionConfig {
                serial: Some("/dev/ttyACM0".to_string()),
                baud: Some(250000),
            },
            ..Default::default()
        };
        config.merge(other);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud, Some(250000));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut config = Config::default();
        config.connection.serial = Some("COM3".to_string());
        config.globals.step_time_us = Some(40);
        config.merge(Config::default());
        assert_eq!(config.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(config.globals.step_time(), 40);
    }

    #[test]
    fn test_config_merge_replaces_axes() {
        let mut config = Config {
            axis: vec![AxisConfig::default(), AxisConfig::default()],
            ..Default::default()
        };
        let other = Config {
            axis: vec![AxisConfig {
                motor: vec![MotorConfig::default()],
            }],
            ..Default::default()
        };
        config.merge(other);
        assert_eq!(config.axis.len(), 1);
        assert_eq!(config.axis[0].motor.len(), 1);

        config.merge(Config::default());
        assert_eq!(config.axis.len(), 1);
    }

    #[test]
    fn test_config_merge_retry() {
        let mut config = Config::default();
        let mut other = Config::default();
        other.retry.reply = RetryPolicy {
            max_rounds: 4,
            round_timeout_ms: 50,
            resend_every: 2,
        };
        config.merge(other);
        assert_eq!(config.retry.reply.max_rounds, 4);
        assert_eq!(config.retry.send, RetryPolicy::SEND);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyACM0"
baud = 115200

[globals]
led = { index = 13 }
step_time_us = 60

[[axis]]
[[axis.motor]]
step = { index = 2 }
dir = { index = 3, inverted = true }
limit_min = { index = 9 }
steps_per_unit = 80.0

[[axis.motor]]
step = { index = 4 }
dir = { index = 5 }

[[axis]]
[[axis.motor]]
step = { index = 6 }
dir = { index = 7 }

[[sensor]]
id = 1
thermistor_pin = 0
power_pin = 8
active = true
calibration = 1000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.globals.led, Some(Pin::new(13)));
        assert_eq!(config.globals.step_time(), 60);

        assert_eq!(config.axis.len(), 2);
        let first = &config.axis[0].motor[0];
        assert_eq!(first.step, Some(Pin::new(2)));
        assert_eq!(first.dir, Some(Pin::inverted(3)));
        assert_eq!(first.limit_min, Some(Pin::new(9)));
        assert!(first.limit_max.is_none());
        assert!((first.steps_per_unit - 80.0).abs() < f64::EPSILON);
        assert!((config.axis[0].motor[1].steps_per_unit - 1.0).abs() < f64::EPSILON);

        assert_eq!(config.sensor.len(), 1);
        assert_eq!(config.sensor[0].power_pin, Some(8));
        assert!(config.sensor[0].active);
        assert!(!config.sensor[0].inverted);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.axis.is_empty());
        assert_eq!(config.retry, LinkConfig::default());
    }

    #[test]
    fn test_config_partial_retry_keeps_defaults() {
        let toml_str = r#"
[retry.handshake]
max_rounds = 20
round_timeout_ms = 25
resend_every = 0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.handshake.max_rounds, 20);
        assert_eq!(config.retry.reply, RetryPolicy::REPLY);
    }

    #[test]
    fn test_to_topology() {
        let config = Config {
            axis: vec![
                AxisConfig {
                    motor: vec![MotorConfig::default(), MotorConfig::default()],
                },
                AxisConfig {
                    motor: vec![MotorConfig::default()],
                },
            ],
            ..Default::default()
        };
        let topology = config.to_topology().unwrap();
        assert_eq!(topology.motor_count(), 3);
        assert_eq!(topology.slot(1, 0), Some(2));
    }

    #[test]
    fn test_to_topology_rejects_empty_axis() {
        let config = Config {
            axis: vec![AxisConfig::default()],
            ..Default::default()
        };
        assert!(config.to_topology().is_err());
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.toml");
        fs::write(
            &path,
            "[connection]\nserial = \"/dev/ttyUSB1\"\n\n[[axis]]\n[[axis.motor]]\nstep = { index = 2 }\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.axis.len(), 1);
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[[axis]\nthis is not toml").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.axis.is_empty());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/steplink.toml"));
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path_is_some() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
