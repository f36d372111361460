//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Outbound queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Task timings for the run handlers
    #[serde(default)]
    pub run: RunConfig,

    /// Entity event aggregation configuration
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Redis connection URL for the outbound queue
    #[serde(default = "default_queue_url")]
    pub url: String,

    /// List key messages are pushed to
    #[serde(default = "default_queue_key")]
    pub key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_queue_url(),
            key: default_queue_key(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

/// Simulated work durations for the named tasks started by the run handlers.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// TaskA duration (awaited; the response waits this long)
    #[serde(with = "humantime_serde", default = "default_task_a_delay")]
    pub task_a_delay: Duration,

    /// TaskB duration (detached)
    #[serde(with = "humantime_serde", default = "default_task_b_delay")]
    pub task_b_delay: Duration,

    /// TaskC duration (detached)
    #[serde(with = "humantime_serde", default = "default_task_c_delay")]
    pub task_c_delay: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task_a_delay: default_task_a_delay(),
            task_b_delay: default_task_b_delay(),
            task_c_delay: default_task_c_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Buffered-event count at which a batch dispatch is triggered
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Propagation lag applied before an event is recorded
    #[serde(with = "humantime_serde", default = "default_settle_delay")]
    pub settle_delay: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            settle_delay: default_settle_delay(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_queue_url() -> String { "redis://localhost:6379".to_string() }
fn default_queue_key() -> String { "afterglow:outbound".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_task_a_delay() -> Duration { Duration::from_millis(1000) }
fn default_task_b_delay() -> Duration { Duration::from_millis(2000) }
fn default_task_c_delay() -> Duration { Duration::from_millis(3000) }
fn default_threshold() -> usize { 10 }
fn default_settle_delay() -> Duration { Duration::from_millis(200) }

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AFTERGLOW").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("AFTERGLOW").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
