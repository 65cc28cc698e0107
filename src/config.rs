//! Configuration module for the Powerwall-MQTT bridge
//!
//! Loads configuration from a TOML file with the following sections:
//! - [default] - General settings (log_level)
//! - [powerwall] - Gateway connection and polling settings
//! - [energy] - Energy integrators
//! - [sensors] - Which topic groups get published
//! - [mqtt] - MQTT broker settings

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::energy::EnergyChannel;
use crate::reading::PowerUnit;

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);

/// Log level for the application
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing LevelFilter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
    pub powerwall: PowerwallConfig,
    #[serde(default)]
    pub energy: EnergyConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    pub mqtt: MqttConfig,
}

/// General application settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DefaultConfig {
    /// Log level: TRACE, DEBUG, INFO, WARN, ERROR
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Powerwall gateway configuration
#[derive(Deserialize, Clone)]
pub struct PowerwallConfig {
    /// Gateway base URL, e.g. "https://192.168.91.1" (required)
    pub host: String,

    /// Tesla account email (required)
    pub email: String,

    /// Site timezone, e.g. "America/New_York"
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Bearer token for the gateway API, if it requires one
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Polling interval (e.g., "30s", "1m")
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Unit the gateway reports power in
    #[serde(default)]
    pub unit: PowerUnit,

    /// Use the gateway's last communication time as the reading time
    #[serde(default = "default_true")]
    pub device_timestamp: bool,

    /// The gateway ships a self-signed certificate
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for PowerwallConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PowerwallConfig")
            .field("host", &self.host)
            .field("email", &self.email)
            .field("timezone", &self.timezone)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "***REDACTED***"),
            )
            .field("interval", &self.interval)
            .field("request_timeout", &self.request_timeout)
            .field("unit", &self.unit)
            .field("device_timestamp", &self.device_timestamp)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Energy integrator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EnergyConfig {
    /// Enabled integrators
    #[serde(default = "default_channels")]
    pub channels: Vec<EnergyChannel>,

    /// Minimum time between two reported values (e.g., "1h")
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub report_interval: Duration,
}

fn default_channels() -> Vec<EnergyChannel> {
    EnergyChannel::ALL.to_vec()
}

fn default_report_interval() -> Duration {
    Duration::from_secs(3600)
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            report_interval: default_report_interval(),
        }
    }
}

/// Topic groups to publish
#[derive(Debug, Deserialize, Clone)]
pub struct SensorsConfig {
    #[serde(default = "default_true")]
    pub power: bool,

    #[serde(default = "default_true")]
    pub energy: bool,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            power: true,
            energy: true,
        }
    }
}

/// MQTT broker configuration
#[derive(Deserialize, Clone)]
pub struct MqttConfig {
    /// MQTT root topic (e.g., "pw3")
    #[serde(default = "default_mqtt_root")]
    pub root: String,

    /// MQTT broker hostname
    #[serde(default)]
    pub host: Option<String>,

    /// MQTT broker port (default 1883)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Unix socket path, takes precedence over host
    #[serde(default)]
    pub socket: Option<String>,

    /// MQTT username
    #[serde(default)]
    pub username: String,

    /// MQTT password
    #[serde(default)]
    pub password: String,

    /// Device segment of every topic
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// How often snapshot and energy values are published
    #[serde(default = "default_publish_interval", with = "humantime_serde")]
    pub publish_interval: Duration,
}

fn default_mqtt_root() -> String {
    "pw3".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_device_id() -> String {
    "powerwall".to_string()
}

fn default_publish_interval() -> Duration {
    Duration::from_secs(30)
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("root", &self.root)
            .field("device_id", &self.device_id)
            .field("publish_interval", &self.publish_interval)
            .finish()
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the config.toml file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(
                path.to_string_lossy().to_string(),
            ));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration logic (semantic validation beyond type checks)
    fn validate(&self) -> Result<(), ConfigError> {
        if self.powerwall.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "powerwall.host must not be empty".to_string(),
            ));
        }

        if !self.powerwall.email.contains('@') {
            return Err(ConfigError::ValidationError(format!(
                "powerwall.email '{}' is not a valid email address",
                self.powerwall.email
            )));
        }

        let interval = self.powerwall.interval;
        if !(MIN_POLL_INTERVAL..=MAX_POLL_INTERVAL).contains(&interval) {
            return Err(ConfigError::ValidationError(format!(
                "powerwall.interval {:?} must be between {:?} and {:?}",
                interval, MIN_POLL_INTERVAL, MAX_POLL_INTERVAL
            )));
        }

        if self.mqtt.publish_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "mqtt.publish_interval must not be zero".to_string(),
            ));
        }

        if self.energy.report_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "energy.report_interval must not be zero".to_string(),
            ));
        }

        if self.mqtt.socket.is_none() && self.mqtt.host.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::ValidationError(
                "mqtt.host or mqtt.socket must be set".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
