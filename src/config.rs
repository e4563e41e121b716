//! # Configuration Management
//!
//! Centralized configuration for the telescope control server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment variable overrides via `from_env()`
//!
//! ## Security Considerations
//! - The default shared secret is a placeholder and fails strict validation
//! - The master key is optional; an empty key never matches

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed payload size (32 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Shared secret shipped in the default configuration. Servers must replace it.
pub const DEFAULT_SHARED_SECRET: &str = "change-me";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TelescopeConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Station description
    #[serde(default)]
    pub station: StationConfig,

    /// Control handshake keys
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TelescopeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields of an existing configuration from environment variables
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("TELESCOPE_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Ok(max) = std::env::var("TELESCOPE_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                self.server.max_connections = val;
            }
        }

        if let Ok(capacity) = std::env::var("TELESCOPE_WRITER_QUEUE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                self.server.writer_queue_capacity = val;
            }
        }

        if let Ok(interval) = std::env::var("TELESCOPE_ACQUISITION_POLL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                self.server.acquisition_poll_interval = Duration::from_millis(val);
            }
        }

        if let Ok(id) = std::env::var("TELESCOPE_STATION_ID") {
            self.station.station_id = id;
        }

        if let Ok(secret) = std::env::var("TELESCOPE_SHARED_SECRET") {
            self.auth.shared_secret = secret;
        }

        if let Ok(key) = std::env::var("TELESCOPE_MASTER_KEY") {
            self.auth.master_key = Some(key);
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.station.validate());
        errors.extend(self.auth.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:1234")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// How often the spectrometer is polled while acquisition is active
    #[serde(with = "duration_serde")]
    pub acquisition_poll_interval: Duration,

    /// Log frames whose payload checksum does not match. They are processed either way.
    #[serde(default = "default_true")]
    pub log_checksum_mismatch: bool,

    /// Frames buffered per connection before further frames to it are dropped
    #[serde(default = "default_writer_queue_capacity")]
    pub writer_queue_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_writer_queue_capacity() -> usize {
    crate::transport::DEFAULT_WRITER_QUEUE_CAPACITY
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:1234"),
            max_connections: 64,
            shutdown_timeout: Duration::from_secs(10),
            acquisition_poll_interval: Duration::from_millis(500),
            log_checksum_mismatch: true,
            writer_queue_capacity: default_writer_queue_capacity(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:1234')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 10_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.writer_queue_capacity == 0 {
            errors.push("Writer queue capacity must be greater than 0".to_string());
        } else if self.writer_queue_capacity > 65_536 {
            errors.push(format!(
                "Writer queue capacity too large: {} (maximum: 65536 frames)",
                self.writer_queue_capacity
            ));
        }

        if self.acquisition_poll_interval.as_millis() < 10 {
            errors.push("Acquisition poll interval too short (minimum: 10ms)".to_string());
        } else if self.acquisition_poll_interval.as_secs() > 3600 {
            errors.push("Acquisition poll interval too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Station description
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StationConfig {
    /// Identifier the control digest is computed over
    pub station_id: String,

    /// Latitude in degrees, north positive
    pub latitude: f64,

    /// Longitude in degrees, east positive
    pub longitude: f64,

    /// Altitude in metres
    pub altitude: i32,

    /// Live video stream offered to clients
    #[serde(default)]
    pub video_uri: Option<String>,

    /// Horizon profile file, one "az el" pair per line
    #[serde(default)]
    pub horizon_file: Option<String>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            station_id: String::from("telescope"),
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0,
            video_uri: None,
            horizon_file: None,
        }
    }
}

impl StationConfig {
    /// Validate station configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.station_id.is_empty() {
            errors.push("Station id cannot be empty".to_string());
        }

        if !(-90.0..=90.0).contains(&self.latitude) {
            errors.push(format!(
                "Latitude out of range: {} (valid range: -90..90)",
                self.latitude
            ));
        }

        if !(-180.0..=180.0).contains(&self.longitude) {
            errors.push(format!(
                "Longitude out of range: {} (valid range: -180..180)",
                self.longitude
            ));
        }

        if let Some(ref uri) = self.video_uri {
            if uri.is_empty() {
                errors.push("Video URI cannot be empty when set".to_string());
            } else if uri.len() > u16::MAX as usize {
                errors.push("Video URI too long for a text payload".to_string());
            }
        }

        if let Some(ref path) = self.horizon_file {
            if !Path::new(path).exists() {
                errors.push(format!("Horizon file does not exist: {path}"));
            }
        }

        errors
    }
}

/// Control handshake keys
#[derive(Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Secret keying the station digest
    pub shared_secret: String,

    /// Operator master key granting escalated control
    #[serde(default)]
    pub master_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secret: String::from(DEFAULT_SHARED_SECRET),
            master_key: None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("shared_secret", &"<redacted>")
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AuthConfig {
    /// Validate authentication configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.shared_secret.is_empty() {
            errors.push("Shared secret cannot be empty".to_string());
        } else if self.shared_secret == DEFAULT_SHARED_SECRET {
            errors.push(
                "WARNING: Shared secret is the shipped default - not suitable for production"
                    .to_string(),
            );
        }

        if let Some(ref key) = self.master_key {
            if key.len() < 8 {
                errors.push("Master key too short (minimum: 8 characters)".to_string());
            }
            if *key == self.shared_secret {
                errors.push("Master key must differ from the shared secret".to_string());
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("telescope-control"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
