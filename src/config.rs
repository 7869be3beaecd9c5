//! Configuration System using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the two production sensors, `output.txt`)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SENSOR_INGEST_` (nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use sensor_ingest::config::Settings;
//!
//! let settings = Settings::load_from("config/sensor_ingest.toml")?;
//! settings.validate()?;
//! for endpoint in &settings.endpoints {
//!     println!("{} -> {}", endpoint.name, endpoint.address());
//! }
//! # Ok::<(), sensor_ingest::error::IngestError>(())
//! ```

use crate::error::{IngestError, IngestResult};
use crate::reading::SensorKind;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Inter-stage queue settings
    #[serde(default)]
    pub queue: QueueConfig,
    /// Timeouts, backoff and flush cadence
    #[serde(default)]
    pub timing: TimingConfig,
    /// Wire protocol constants
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Sensor sources, one producer each
    pub endpoints: Vec<EndpointConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Append-only output file
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of readings buffered between producers and the consumer
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Socket connect/read/write timeout in milliseconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// Delay before a producer reconnects after a failure
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// How long the consumer waits on an empty queue per iteration
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
    /// Periodic sink flush interval
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
    /// Upper bound on draining the queue during shutdown
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// ASCII token sent right after connecting
    #[serde(default = "default_auth_token")]
    pub auth_token: String,
    /// ASCII command sent before every packet read
    #[serde(default = "default_request_command")]
    pub request_command: String,
    /// Size of the buffer used to swallow the handshake reply
    #[serde(default = "default_handshake_buffer")]
    pub handshake_buffer: usize,
}

/// One sensor source.
///
/// Built once at startup and never mutated; each producer gets its own clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Name used in logs
    pub name: String,
    pub host: String,
    pub port: u16,
    pub sensor_type: SensorKind,
    /// Defaults to the sensor type's fixed size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_size: Option<usize>,
}

impl EndpointConfig {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        sensor_type: SensorKind,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            sensor_type,
            packet_size: None,
        }
    }

    /// Expected packet size in bytes.
    pub fn packet_size(&self) -> usize {
        self.packet_size.unwrap_or_else(|| self.sensor_type.packet_size())
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Default value functions
fn default_queue_capacity() -> usize {
    1000
}

fn default_io_timeout() -> u64 {
    5000
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_poll_timeout() -> u64 {
    100
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_drain_timeout() -> u64 {
    5000
}

fn default_auth_token() -> String {
    "isu_pt".to_string()
}

fn default_request_command() -> String {
    "get".to_string()
}

fn default_handshake_buffer() -> usize {
    256
}

const DEFAULT_SENSOR_HOST: &str = "95.163.237.76";

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: default_io_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            poll_timeout_ms: default_poll_timeout(),
            flush_interval_ms: default_flush_interval(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            auth_token: default_auth_token(),
            request_command: default_request_command(),
            handshake_buffer: default_handshake_buffer(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "Sensor Ingest".to_string(),
                log_level: "info".to_string(),
                output_path: PathBuf::from("output.txt"),
            },
            queue: QueueConfig::default(),
            timing: TimingConfig::default(),
            protocol: ProtocolConfig::default(),
            endpoints: vec![
                EndpointConfig::new("weather", DEFAULT_SENSOR_HOST, 5123, SensorKind::Weather),
                EndpointConfig::new(
                    "coordinates",
                    DEFAULT_SENSOR_HOST,
                    5124,
                    SensorKind::Coordinates,
                ),
            ],
        }
    }
}

impl Settings {
    /// Defaults overlaid with `SENSOR_INGEST_*` environment variables.
    pub fn load() -> IngestResult<Self> {
        Self::figment(None).extract().map_err(IngestError::from)
    }

    /// Defaults, then the TOML file at `path`, then environment variables.
    ///
    /// A missing file is not an error; figment simply contributes nothing for it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> IngestResult<Self> {
        Self::figment(Some(path.as_ref()))
            .extract()
            .map_err(IngestError::from)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("SENSOR_INGEST_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> IngestResult<()> {
        let invalid = |msg: String| -> IngestResult<()> { Err(IngestError::Configuration(msg)) };

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.application.output_path.as_os_str().is_empty() {
            return invalid("output_path must not be empty".to_string());
        }

        if self.queue.capacity == 0 {
            return invalid("queue.capacity must be at least 1".to_string());
        }

        let timings = [
            ("io_timeout_ms", self.timing.io_timeout_ms),
            ("reconnect_delay_ms", self.timing.reconnect_delay_ms),
            ("poll_timeout_ms", self.timing.poll_timeout_ms),
            ("flush_interval_ms", self.timing.flush_interval_ms),
            ("drain_timeout_ms", self.timing.drain_timeout_ms),
        ];
        if let Some((name, _)) = timings.iter().find(|(_, value)| *value == 0) {
            return invalid(format!("timing.{name} must be greater than zero"));
        }

        if self.protocol.auth_token.is_empty() || self.protocol.request_command.is_empty() {
            return invalid("protocol auth_token and request_command must not be empty".to_string());
        }
        if self.protocol.handshake_buffer == 0 {
            return invalid("protocol.handshake_buffer must be at least 1".to_string());
        }

        if self.endpoints.is_empty() {
            return invalid("at least one endpoint must be configured".to_string());
        }

        // Validate endpoint names are unique
        let mut names = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !names.insert(&endpoint.name) {
                return invalid(format!("Duplicate endpoint name: {}", endpoint.name));
            }
            if endpoint.host.trim().is_empty() {
                return invalid(format!("Endpoint '{}' has an empty host", endpoint.name));
            }
            if endpoint.port == 0 {
                return invalid(format!("Endpoint '{}' has port 0", endpoint.name));
            }
            let fixed = endpoint.sensor_type.packet_size();
            if endpoint.packet_size() != fixed {
                return invalid(format!(
                    "Endpoint '{}': {} packets are {} bytes, configured {}",
                    endpoint.name,
                    endpoint.sensor_type,
                    fixed,
                    endpoint.packet_size()
                ));
            }
        }

        Ok(())
    }
}
