//! Configuration types for cluster-dl
//!
//! All configuration is static: it is read once (from defaults, a TOML file and CLI
//! overrides) and never renegotiated at runtime.

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, time::Duration};

use crate::error::{Error, Result};
use crate::types::{DEFAULT_PORT, Endpoint};

/// Retry configuration for a bounded attempt loop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds; 0 retries immediately (default: 0)
    #[serde(default, with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Upper bound for the backoff delay (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to non-zero delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: Duration::ZERO,
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Attempt budget without any delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            jitter: false,
            ..Default::default()
        }
    }
}

/// Resilient Fetcher configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Longest silence tolerated while waiting for response headers or for the
    /// next body chunk (default: 30 seconds)
    ///
    /// Total transfer time is unbounded: a slow body that keeps arriving never
    /// fails an attempt, only a stalled one does.
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Timeout for establishing the TCP/TLS connection (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Disambiguate an existing destination as `name[1].ext` instead of skipping (default: false)
    #[serde(default)]
    pub allow_rename: bool,

    /// Maximum redirects followed per request (default: 10)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Attempt budget and backoff
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            connect_timeout: default_connect_timeout(),
            allow_rename: false,
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
        }
    }
}

/// Worker Service configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Address to listen on (default: 0.0.0.0:42069)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Number of concurrent fetch slots (default: 4)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a peer may take to deliver its message (default: 10 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,

    /// Largest accepted message in bytes (default: 64 KiB)
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Settings for the fetches run by the pool
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            pool_size: default_pool_size(),
            read_timeout: default_read_timeout(),
            max_message_bytes: default_max_message_bytes(),
            fetch: FetchConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Reject settings the Worker Service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::config("pool_size", "pool_size must be at least 1"));
        }
        if self.max_message_bytes == 0 {
            return Err(Error::config(
                "max_message_bytes",
                "max_message_bytes must be at least 1",
            ));
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(Error::config(
                "fetch.retry.max_attempts",
                "max_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Dispatcher configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Ordered worker endpoints; jobs are assigned round-robin in this order
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Attempts per job-to-endpoint send, each on a fresh connection (default: 3)
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,

    /// Timeout for connecting to an endpoint (default: 5 seconds)
    #[serde(default = "default_dispatch_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for writing the message and reading the acknowledgment (default: 10 seconds)
    #[serde(default = "default_ack_timeout", with = "duration_serde")]
    pub ack_timeout: Duration,

    /// Skip jobs whose destination already exists locally (default: false)
    ///
    /// Only meaningful when the dispatcher shares a filesystem with the workers.
    #[serde(default)]
    pub skip_existing: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            send_attempts: default_send_attempts(),
            connect_timeout: default_dispatch_connect_timeout(),
            ack_timeout: default_ack_timeout(),
            skip_existing: false,
        }
    }
}

impl DispatcherConfig {
    /// Reject settings the Dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::config(
                "endpoints",
                "at least one worker endpoint is required",
            ));
        }
        if self.send_attempts == 0 {
            return Err(Error::config(
                "send_attempts",
                "send_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file
///
/// ```toml
/// [worker]
/// bind_address = "0.0.0.0:42069"
/// pool_size = 4
///
/// [worker.fetch]
/// idle_timeout = 30
/// allow_rename = false
///
/// [worker.fetch.retry]
/// max_attempts = 3
///
/// [dispatcher]
/// endpoints = ["192.168.1.1", "192.168.1.2:42069"]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Worker Service settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_toml_str(&text)
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    concat!("cluster-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_pool_size() -> usize {
    4
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_send_attempts() -> u32 {
    3
}

fn default_dispatch_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(10)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
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
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
