//! Configuration loading using Figment
//!
//! Settings are merged from:
//! 1. Built-in defaults
//! 2. A TOML file (`config/tcube.toml` unless a path is given)
//! 3. Environment variables prefixed with `RUST_TCUBE_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! RUST_TCUBE_SERIAL__PORT=/dev/ttyUSB1
//! RUST_TCUBE_CALIBRATION__MAX_VOLTAGE=150
//! RUST_TCUBE_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! # Example file
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//!
//! [address]
//! destination = 0x50
//! channel = 1
//!
//! [calibration]
//! max_voltage = 75
//! max_position_um = 30.0
//!
//! [piezo]
//! control_mode = 4
//! proportional = 120
//! integral = 120
//! ```

use crate::error::{AppResult, TcubeError};
use crate::protocol::catalog::{ControlMode, FeedbackSource, InputSource};
use crate::protocol::Address;
use crate::scaling::{Calibration, MaxVoltage};
use crate::session::Timing;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/tcube.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RUST_TCUBE_";

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link
    #[serde(default)]
    pub serial: SerialConfig,
    /// Frame addressing
    #[serde(default)]
    pub address: Address,
    /// Calibration limits
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Response timing
    #[serde(default)]
    pub timing: TimingConfig,
    /// Piezo driver start-up configuration
    #[serde(default)]
    pub piezo: PiezoConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Port read slice; a gap this long ends a response
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Calibration limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Output voltage limit: 75, 100 or 150
    #[serde(default = "default_max_voltage")]
    pub max_voltage: u16,
    /// Piezo travel in micrometers
    #[serde(default = "default_max_position")]
    pub max_position_um: f64,
}

/// Response timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Delay between a query and reading its response
    #[serde(default = "default_response_delay")]
    pub response_delay_ms: u64,
    /// Read deadline
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Piezo driver settings applied by [`crate::hardware::kpz101::Kpz101::configure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiezoConfig {
    /// Feedback routing code (1 = hub A, 2 = hub B, 3 = SMA)
    #[serde(default = "default_feedback_source")]
    pub feedback_source: u8,
    /// Control mode code (1-4)
    #[serde(default = "default_control_mode")]
    pub control_mode: u8,
    /// Input source code (0-3)
    #[serde(default)]
    pub input_source: u8,
    /// Proportional gain (0-255)
    #[serde(default = "default_gain")]
    pub proportional: u32,
    /// Integral gain (0-255)
    #[serde(default = "default_gain")]
    pub integral: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_poll_interval() -> u64 {
    20
}
fn default_max_voltage() -> u16 {
    75
}
fn default_max_position() -> f64 {
    30.0
}
fn default_response_delay() -> u64 {
    100
}
fn default_read_timeout() -> u64 {
    1000
}
fn default_feedback_source() -> u8 {
    0x03
}
fn default_control_mode() -> u8 {
    0x04
}
fn default_gain() -> u32 {
    120
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            max_voltage: default_max_voltage(),
            max_position_um: default_max_position(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_delay_ms: default_response_delay(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Default for PiezoConfig {
    fn default() -> Self {
        Self {
            feedback_source: default_feedback_source(),
            control_mode: default_control_mode(),
            input_source: 0x00,
            proportional: default_gain(),
            integral: default_gain(),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] (if present) plus environment.
    pub fn load() -> AppResult<Self> {
        Self::from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` (skipped if missing) plus environment.
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> AppResult<()> {
        self.calibration().map_err(|e| TcubeError::Configuration(e.to_string()))?;
        self.piezo
            .feedback()
            .and(self.piezo.mode())
            .and(self.piezo.input())
            .map_err(|e| TcubeError::Configuration(e.to_string()))?;
        if self.piezo.proportional > 255 || self.piezo.integral > 255 {
            return Err(TcubeError::Configuration(format!(
                "PI gains must be 0-255, got {}/{}",
                self.piezo.proportional, self.piezo.integral
            )));
        }
        if self.serial.port.is_empty() {
            return Err(TcubeError::Configuration("serial.port is empty".to_string()));
        }
        for (key, value) in [
            ("serial.baud_rate", u64::from(self.serial.baud_rate)),
            ("serial.poll_interval_ms", self.serial.poll_interval_ms),
            ("timing.read_timeout_ms", self.timing.read_timeout_ms),
        ] {
            if value == 0 {
                return Err(TcubeError::Configuration(format!("{key} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Calibration built from the configured limits.
    pub fn calibration(&self) -> AppResult<Calibration> {
        let max_voltage = MaxVoltage::try_from(self.calibration.max_voltage)?;
        Calibration::new(max_voltage, self.calibration.max_position_um)
    }

    /// Session timing.
    pub fn timing(&self) -> Timing {
        Timing {
            response_delay: Duration::from_millis(self.timing.response_delay_ms),
            read_timeout: Duration::from_millis(self.timing.read_timeout_ms),
        }
    }
}

impl PiezoConfig {
    /// Typed feedback routing.
    pub fn feedback(&self) -> AppResult<FeedbackSource> {
        FeedbackSource::try_from(self.feedback_source)
    }

    /// Typed control mode.
    pub fn mode(&self) -> AppResult<ControlMode> {
        ControlMode::try_from(self.control_mode)
    }

    /// Typed input source.
    pub fn input(&self) -> AppResult<InputSource> {
        InputSource::try_from(self.input_source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_when_file_missing() {
        let settings = Settings::from_path("/nonexistent/tcube.toml").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.address, Address::default());
        assert_eq!(settings.timing().response_delay, Duration::from_millis(100));
    }

    #[test]
    #[serial]
    fn test_file_values_override_defaults() {
        let file = write_config(
            r#"
[serial]
port = "/dev/ttyUSB3"

[address]
channel = 2

[calibration]
max_voltage = 150
max_position_um = 20.0

[piezo]
control_mode = 2
"#,
        );
        let settings = Settings::from_path(file.path()).unwrap();
        assert_eq!(settings.serial.port, "/dev/ttyUSB3");
        assert_eq!(settings.address.channel, 2);
        assert_eq!(settings.address.destination, 0x50);
        let cal = settings.calibration().unwrap();
        assert_eq!(cal.max_voltage(), MaxVoltage::V150);
        assert_eq!(cal.max_position_um(), 20.0);
        assert_eq!(settings.piezo.mode().unwrap(), ControlMode::ClosedLoop);
    }

    #[test]
    #[serial]
    fn test_rejects_unsupported_voltage_limit() {
        let file = write_config("[calibration]\nmax_voltage = 120\n");
        let err = Settings::from_path(file.path()).unwrap_err();
        assert!(matches!(err, TcubeError::Configuration(_)));
    }

    #[test]
    #[serial]
    fn test_rejects_bad_codes() {
        let file = write_config("[piezo]\nfeedback_source = 7\n");
        assert!(Settings::from_path(file.path()).is_err());

        let file = write_config("[piezo]\nproportional = 300\n");
        assert!(Settings::from_path(file.path()).is_err());
    }

    #[test]
    #[serial]
    fn test_rejects_zero_timing() {
        for content in [
            "[timing]\nread_timeout_ms = 0\n",
            "[serial]\npoll_interval_ms = 0\n",
            "[serial]\nbaud_rate = 0\n",
        ] {
            let file = write_config(content);
            let err = Settings::from_path(file.path()).unwrap_err();
            assert!(matches!(err, TcubeError::Configuration(_)), "{content}");
        }

        // a zero settle delay is fine
        let file = write_config("[timing]\nresponse_delay_ms = 0\n");
        assert!(Settings::from_path(file.path()).is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("RUST_TCUBE_SERIAL__PORT", "/dev/ttyUSB9");
        let result = Settings::from_path("/nonexistent/tcube.toml");
        std::env::remove_var("RUST_TCUBE_SERIAL__PORT");
        assert_eq!(result.unwrap().serial.port, "/dev/ttyUSB9");
    }
}
