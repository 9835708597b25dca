//! Configuration types for news-ingest
//!
//! All settings are serde-deserializable with sensible defaults, so a
//! `Config::default()` works out of the box against a local backend.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Top-level configuration for the ingestion client
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Streaming transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Retry behavior for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Validate the configuration, returning a descriptive error for the
    /// first invalid setting found.
    pub fn validate(&self) -> Result<(), Error> {
        match self.transport.endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Config {
                    message: format!("endpoint scheme must be http or https, got '{other}'"),
                    key: Some("transport.endpoint".to_string()),
                });
            }
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: format!(
                    "backoff_multiplier must be >= 1.0, got {}",
                    self.retry.backoff_multiplier
                ),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }

        if self.retry.max_delay < self.retry.initial_delay {
            return Err(Error::Config {
                message: "max_delay must not be smaller than initial_delay".to_string(),
                key: Some("retry.max_delay".to_string()),
            });
        }

        Ok(())
    }
}

/// Streaming transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Endpoint of the streaming ingestion backend
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,

    /// Timeout for establishing the connection (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_ms_serde")]
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false, so delays follow the
    /// exact exponential sequence)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Cache preference forwarded to the backend when opening a stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePreference {
    /// Let the backend serve cached per-source results where fresh enough
    #[default]
    Allow,
    /// Force the backend to re-fetch every source
    Bypass,
}

impl CachePreference {
    /// Query-parameter value sent to the backend
    pub fn as_query_value(&self) -> &'static str {
        match self {
            CachePreference::Allow => "allow",
            CachePreference::Bypass => "bypass",
        }
    }
}

/// Per-session options passed to `start()`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Category filter (None = all categories)
    #[serde(default)]
    pub category: Option<String>,

    /// Cache preference for this session
    #[serde(default)]
    pub cache: CachePreference,
}

fn default_endpoint() -> Url {
    // Infallible: the literal is a valid URL
    #[allow(clippy::expect_used)]
    Url::parse("http://127.0.0.1:8900/ingest/stream").expect("default endpoint is a valid URL")
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
