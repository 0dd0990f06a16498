//! Configuration for the current-probe logger using Figment
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults (the reference behaviour of the CurrentRanger logger)
//! 2. An optional TOML file (e.g. `config/ranger_daq.toml`)
//! 3. Environment variables prefixed with `RANGER_DAQ_`, nested with `__`
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use ranger_daq::config::AppConfig;
//!
//! let config = AppConfig::load_from(Some("config/ranger_daq.toml"))?;
//! println!("Port: {}", config.session.port);
//! # Ok::<(), ranger_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "RANGER_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Output and logging settings
    #[serde(default)]
    pub logger: LoggerConfig,
    /// Streaming session settings
    #[serde(default)]
    pub session: SessionConfig,
}

/// Output and logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Device name used as the prefix of every hourly CSV file
    pub device: String,
    /// Root directory; records go to `<output_dir>/CurrentRanger/`
    pub output_dir: PathBuf,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            device: "CurrentRanger".to_string(),
            output_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
        }
    }
}

/// Streaming session settings, handed to the session controller as one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port path (e.g. "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Communication speed
    pub baud_rate: u32,
    /// Net above-threshold samples needed to latch an activation
    pub activation_threshold: u32,
    /// Per-sample amperage at or above which a sample counts towards activation
    pub activation_value: f64,
    /// How long to wait for the first sample before giving up
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    /// Granularity at which a supervisor polls for startup
    #[serde(with = "humantime_serde")]
    pub startup_poll_interval: Duration,
    /// Staleness of the last good sample that, combined with a high error
    /// count, means the link has failed
    #[serde(with = "humantime_serde")]
    pub data_timeout_threshold: Duration,
    /// Malformed lines tolerated before the staleness check applies
    pub error_count_limit: u64,
    /// Upper bound on bytes requested per transport read
    pub read_chunk_size: usize,
    /// Transport read timeout; bounds how long a stop request can go unnoticed
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Longest accepted frame; longer lines are classified as malformed.
    /// `None` leaves the frame buffer unbounded.
    pub max_frame_len: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            activation_threshold: 5,
            activation_value: 0.250,
            startup_timeout: Duration::from_secs(1),
            startup_poll_interval: Duration::from_millis(10),
            data_timeout_threshold: Duration::from_millis(500),
            error_count_limit: 100,
            read_chunk_size: 4096,
            read_timeout: Duration::from_millis(100),
            max_frame_len: Some(4096),
        }
    }
}

impl SessionConfig {
    /// Session settings for `port` with every other option at its default.
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Check semantic constraints that deserialization cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if self.port.trim().is_empty() {
            return Err(DaqError::Configuration("port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(DaqError::Configuration("baud_rate must be > 0".into()));
        }
        if self.activation_threshold == 0 {
            return Err(DaqError::Configuration(
                "activation_threshold must be > 0".into(),
            ));
        }
        if !self.activation_value.is_finite() {
            return Err(DaqError::Configuration(format!(
                "activation_value must be finite, got {}",
                self.activation_value
            )));
        }
        if self.read_chunk_size == 0 {
            return Err(DaqError::Configuration(
                "read_chunk_size must be > 0".into(),
            ));
        }
        for (name, value) in [
            ("startup_timeout", self.startup_timeout),
            ("startup_poll_interval", self.startup_poll_interval),
            ("data_timeout_threshold", self.data_timeout_threshold),
            ("read_timeout", self.read_timeout),
        ] {
            if value.is_zero() {
                return Err(DaqError::Configuration(format!("{name} must be > 0")));
            }
        }
        if self.max_frame_len == Some(0) {
            return Err(DaqError::Configuration(
                "max_frame_len must be > 0 when set".into(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// Environment variables override the file, e.g.
    /// `RANGER_DAQ_SESSION__PORT=/dev/ttyACM1`.
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path.as_ref()));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading and command-line overrides.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logger.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.logger.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.logger.device.trim().is_empty() {
            return Err(DaqError::Configuration("device must not be empty".into()));
        }
        self.session.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_behaviour() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.activation_threshold, 5);
        assert_eq!(cfg.activation_value, 0.250);
        assert_eq!(cfg.startup_timeout, Duration::from_secs(1));
        assert_eq!(cfg.data_timeout_threshold, Duration::from_millis(500));
        assert_eq!(cfg.error_count_limit, 100);
        assert_eq!(cfg.read_chunk_size, 4096);
    }

    #[test]
    fn empty_port_is_rejected() {
        let cfg = SessionConfig::default();
        assert!(matches!(cfg.validate(), Err(DaqError::Configuration(_))));
        assert!(SessionConfig::for_port("/dev/ttyACM0").validate().is_ok());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let cfg = SessionConfig {
            activation_threshold: 0,
            ..SessionConfig::for_port("COM3")
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_read_timeout_is_rejected() {
        let cfg = SessionConfig {
            read_timeout: Duration::ZERO,
            ..SessionConfig::for_port("COM3")
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("read_timeout"));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.session.port = "COM3".into();
        cfg.logger.log_level = "chatty".into();
        assert!(cfg.validate().is_err());
        cfg.logger.log_level = "DEBUG".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn loads_toml_file_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [logger]
            device = "FPS-07"

            [session]
            port = "/dev/ttyACM3"
            data_timeout_threshold = "750ms"
            max_frame_len = 128
            "#
        )
        .unwrap();

        let cfg = AppConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(cfg.logger.device, "FPS-07");
        assert_eq!(cfg.session.port, "/dev/ttyACM3");
        assert_eq!(cfg.session.data_timeout_threshold, Duration::from_millis(750));
        assert_eq!(cfg.session.max_frame_len, Some(128));
        // Untouched keys keep their defaults
        assert_eq!(cfg.session.error_count_limit, 100);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load_from(Some("does/not/exist.toml")).unwrap();
        assert_eq!(cfg.session.baud_rate, 9600);
    }
}
