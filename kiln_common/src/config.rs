//! Configuration loading for the kiln server.
//!
//! One TOML file describes the whole deployment: the listener the remote
//! client connects to, the two device links, and the initial regulation
//! parameters. Every section carries a `validate()` that is run after
//! deserialization, so a bad file fails at startup rather than mid-session.
//!
//! # Usage
//!
//! ```rust,no_run
//! use kiln_common::config::{ConfigLoader, ServerConfig};
//! use std::path::Path;
//!
//! let config = ServerConfig::load(Path::new("config/kiln.toml")).unwrap();
//! config.validate().unwrap();
//! println!("Service: {}", config.shared.service_name);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

/// Common configuration fields shared by every kiln binary.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "kiln-lab-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// TCP listener for the remote command client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind. Loopback by default; the lab network otherwise.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    65432
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl ListenerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.is_empty() {
            return Err(ConfigError::ValidationError(
                "listener.bind cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "listener.port cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bench power supply link and hardware limits.
///
/// `max_voltage` / `max_current` are the hardware maxima of the supply;
/// software limits reset to these values and can never exceed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyConfig {
    /// `host:port` of the supply's SCPI socket.
    pub addr: String,

    /// Output channel driving the heater (1-based).
    #[serde(default = "default_channel")]
    pub channel: u8,

    /// Hardware maximum voltage [V].
    pub max_voltage: f64,

    /// Hardware maximum current [A].
    pub max_current: f64,

    /// Per-call read timeout on the SCPI socket [ms].
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

const fn default_channel() -> u8 {
    1
}

const fn default_io_timeout_ms() -> u64 {
    500
}

impl SupplyConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.is_empty() {
            return Err(ConfigError::ValidationError(
                "supply.addr cannot be empty".to_string(),
            ));
        }
        if self.channel == 0 || self.channel > 2 {
            return Err(ConfigError::ValidationError(format!(
                "supply.channel must be 1 or 2, got {}",
                self.channel
            )));
        }
        if self.max_voltage <= 0.0 || self.max_current <= 0.0 {
            return Err(ConfigError::ValidationError(
                "supply.max_voltage and supply.max_current must be positive".to_string(),
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "supply.io_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Framed temperature probe link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// `host:port` of the probe's byte-stream bridge.
    pub addr: String,

    /// Per-call read timeout on the probe link [ms].
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Acknowledgment retry cap before a query fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

const fn default_max_attempts() -> u32 {
    5
}

impl ProbeConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.is_empty() {
            return Err(ConfigError::ValidationError(
                "probe.addr cannot be empty".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "probe.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "probe.io_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Initial regulation parameters.
///
/// All of these are live-adjustable over the wire protocol; the file only
/// sets the state the server boots with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Target temperature [°C].
    pub set_point: f64,

    /// Controller sample period [s]. Must be positive.
    #[serde(default = "default_sample_period_s")]
    pub sample_period_s: f64,

    /// Proportional gain.
    pub kp: f64,

    /// Integral gain (0 = disabled).
    pub ki: f64,

    /// Derivative gain (0 = disabled).
    pub kd: f64,

    /// Actuator command clamp [V]. The heater drive is unipolar, so the
    /// controller output is clamped to `[0, out_max]`.
    pub out_max: f64,
}

const fn default_sample_period_s() -> f64 {
    2.0
}

impl ControlConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_s <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "control.sample_period_s must be positive, got {}",
                self.sample_period_s
            )));
        }
        if self.out_max <= 0.0 {
            return Err(ConfigError::ValidationError(
                "control.out_max must be positive".to_string(),
            ));
        }
        if self.kp < 0.0 || self.ki < 0.0 || self.kd < 0.0 {
            return Err(ConfigError::ValidationError(
                "control gains cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Shared fields (log level, service name).
    pub shared: SharedConfig,

    /// Command listener.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Power supply link.
    pub supply: SupplyConfig,

    /// Temperature probe link.
    pub probe: ProbeConfig,

    /// Initial regulation parameters.
    pub control: ControlConfig,
}

impl ServerConfig {
    /// Run semantic validation over every section.
    ///
    /// # Errors
    /// Returns the first `ConfigError::ValidationError` encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.listener.validate()?;
        self.supply.validate()?;
        self.probe.validate()?;
        self.control.validate()?;
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Semantic validation is a separate, explicit `validate()` call
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            shared: SharedConfig {
                log_level: LogLevel::Info,
                service_name: "kiln-test".to_string(),
            },
            listener: ListenerConfig::default(),
            supply: SupplyConfig {
                addr: "10.176.42.121:5025".to_string(),
                channel: 1,
                max_voltage: 32.0,
                max_current: 3.3,
                io_timeout_ms: 500,
            },
            probe: ProbeConfig {
                addr: "10.176.42.200:54211".to_string(),
                io_timeout_ms: 500,
                max_attempts: 5,
            },
            control: ControlConfig {
                set_point: 40.0,
                sample_period_s: 2.0,
                kp: 1.0,
                ki: 0.1,
                kd: 0.0,
                out_max: 30.0,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_service_name_rejected() {
        let mut config = valid_config();
        config.shared.service_name.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn zero_sample_period_rejected() {
        let mut config = valid_config();
        config.control.sample_period_s = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn supply_channel_out_of_range_rejected() {
        let mut config = valid_config();
        config.supply.channel = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_cap_rejected() {
        let mut config = valid_config();
        config.probe.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn listener_defaults_to_loopback() {
        let listener = ListenerConfig::default();
        assert_eq!(listener.bind, "127.0.0.1");
        assert_eq!(listener.port, 65432);
    }

    #[test]
    fn log_level_round_trips_lowercase() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }

        let toml_str = toml::to_string(&Wrapper {
            level: LogLevel::Debug,
        })
        .unwrap();
        assert!(toml_str.contains("debug"));

        let back: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(back.level, LogLevel::Warn);
    }
}
