//! Configuration for the Twitter Server exporter.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Statistics source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Prometheus endpoint settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how to fetch the statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL of the Twitter Server `metrics.json` endpoint. Required.
    #[serde(default)]
    pub url: String,

    /// TCP connection establishment timeout (seconds).
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout waiting for the response (seconds).
    #[serde(default = "default_timeout")]
    pub response_timeout_secs: u64,

    /// TCP keep-alive interval for pooled connections (seconds).
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Maximum idle pooled connections to the source.
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,

    /// Records buffered between the decoder and the HTTP response.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_timeout() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    10
}

fn default_max_idle_connections() -> usize {
    2
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_secs: default_timeout(),
            response_timeout_secs: default_timeout(),
            keepalive_secs: default_keepalive(),
            max_idle_connections: default_max_idle_connections(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to listen on (default: ":9100", all interfaces).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "twitterserver").
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_listen() -> String {
    ":9100".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_namespace() -> String {
    "twitterserver".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            namespace: default_namespace(),
        }
    }
}

impl WebConfig {
    /// Resolve the listen address.
    ///
    /// A bare `:port` binds every interface.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        };

        listen
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", self.listen)))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// The result is not validated, so command-line overrides can still fill
    /// in missing fields. Call [`validate`](Self::validate) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string, without validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.url.is_empty() {
            return Err(ConfigError::Validation(
                "source url is required".to_string(),
            ));
        }

        let url = reqwest::Url::parse(&self.source.url).map_err(|e| {
            ConfigError::Validation(format!("Invalid source url '{}': {}", self.source.url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Unsupported source url scheme: {}",
                url.scheme()
            )));
        }

        if self.source.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.source.response_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "response_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.source.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "channel_capacity must be > 0".to_string(),
            ));
        }

        self.web.listen_addr()?;

        // Validate path starts with /
        if !self.web.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if !self
            .web
            .namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        {
            return Err(ConfigError::Validation(format!(
                "Invalid metric namespace: {}",
                self.web.namespace
            )));
        }

        Ok(())
    }
}
