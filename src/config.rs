//! Reporter Configuration
//!
//! Resolved once at startup and handed to the engine by value. Settings can
//! come from defaults, environment variables or a TOML file.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ZABBIX_HOST` | `127.0.0.1` | Collector address |
//! | `ZABBIX_PORT` | `10051` | Collector port |
//! | `ZABBIX_HOSTNAME` | `` | Host label reported with every value |
//! | `ZABBIX_TIMESTAMPING` | `true` | Attach a clock to every value |
//! | `ZABBIX_BATCH_WINDOW_MS` | `1000` | Batch window length |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Error raised while building or validating configuration.
/// Always fatal: the engine refuses to start.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Metric name has no segments
    EmptyMetricName,
    /// A metric name segment does not match `^[a-zA-Z0-9_]+$`
    InvalidMetricName { name: String, segment: String },
    /// A metric has no event to listen on
    InvalidEventName { metric: String },
    /// A setting has an unusable value
    InvalidValue { field: &'static str, value: String },
    /// The configuration file could not be read
    Io(String),
    /// The configuration file is not valid TOML for this schema
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EmptyMetricName => write!(f, "metric name is empty"),
            ConfigError::InvalidMetricName { name, segment } => write!(
                f,
                "invalid metric name {:?}: segment {:?} must match ^[a-zA-Z0-9_]+$",
                name, segment
            ),
            ConfigError::InvalidEventName { metric } => {
                write!(f, "metric {:?} has no event name to listen on", metric)
            }
            ConfigError::InvalidValue { field, value } => {
                write!(f, "invalid value for {}: {:?}", field, value)
            }
            ConfigError::Io(msg) => write!(f, "config I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Settings for the batch engine and the collector connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Collector address (default: 127.0.0.1)
    pub host: String,
    /// Collector port (default: 10051)
    pub port: u16,
    /// Host label attached to every emitted value (default: empty)
    pub hostname: String,
    /// Attach a clock to every emitted value (default: true)
    pub timestamping: bool,
    /// Time between the first event of a window and its flush (default: 1000ms)
    #[serde(rename = "batch_window_ms", with = "duration_millis")]
    pub batch_window: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        ReporterConfig {
            host: "127.0.0.1".to_string(),
            port: 10051,
            hostname: String::new(),
            timestamping: true,
            batch_window: Duration::from_millis(1000),
        }
    }
}

impl ReporterConfig {
    /// Configuration for testing (short window)
    pub fn test() -> Self {
        ReporterConfig {
            hostname: "test-host".to_string(),
            batch_window: Duration::from_millis(50),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables. Unparseable values
    /// fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = ReporterConfig::default();
        ReporterConfig {
            host: std::env::var("ZABBIX_HOST").unwrap_or(defaults.host),
            port: std::env::var("ZABBIX_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            hostname: std::env::var("ZABBIX_HOSTNAME").unwrap_or(defaults.hostname),
            timestamping: std::env::var("ZABBIX_TIMESTAMPING")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.timestamping),
            batch_window: std::env::var("ZABBIX_BATCH_WINDOW_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_window),
        }
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ReporterConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host",
                value: self.host.clone(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port",
                value: self.port.to_string(),
            });
        }
        if self.batch_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "batch_window_ms",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// `host:port` of the collector
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Accepts `true`/`1`/`false`/`0`, anything else is unparseable
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
