//! Configuration for the inference engine.
//!
//! `EngineConfig` covers the shared worker pool, both caches, the resource
//! monitor, and the queue/shutdown timing knobs. Unknown-at-startup concerns
//! (an unreachable distributed cache) degrade with a logged warning rather
//! than failing construction; genuinely invalid values fail `validate`.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size of the shared worker pool used for batch fan-out and inline
    /// real-time execution.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Capacity of the model cache (loaded handles, FIFO-evicted).
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Try the provider's accelerated load path first; fall back silently.
    #[serde(default)]
    pub enable_accelerated_execution: bool,

    /// Optional distributed prediction-cache endpoint (e.g. `redis://...`).
    /// Absence or connection failure degrades to local-cache-only mode.
    #[serde(default)]
    pub distributed_cache_endpoint: Option<String>,

    /// Prediction cache settings.
    #[serde(default)]
    pub prediction_cache: PredictionCacheConfig,

    /// Resource monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// How long a priority worker blocks on an empty queue before re-checking
    /// the running flag.
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    /// Bounded-channel depth between a stream producer and its consumer.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Bound on joining each worker during shutdown.
    #[serde(default = "default_shutdown_join_timeout_secs")]
    pub shutdown_join_timeout_secs: u64,
}

/// Prediction cache settings (local tier; the distributed tier shares the TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionCacheConfig {
    #[serde(default = "default_prediction_cache_entries")]
    pub max_entries: u64,

    /// Time-to-live for cached responses, both tiers.
    #[serde(default = "default_prediction_cache_ttl_secs")]
    pub ttl_secs: u64,
}

/// Resource monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// CPU utilization (percent) above which degradation handling runs.
    #[serde(default = "default_utilization_threshold")]
    pub cpu_threshold: f32,

    /// Memory utilization (percent) above which degradation handling runs.
    #[serde(default = "default_utilization_threshold")]
    pub memory_threshold: f32,

    /// Queue occupancy ratio above which a queue is called out in the
    /// degradation log.
    #[serde(default = "default_queue_alert_ratio")]
    pub queue_alert_ratio: f64,
}

fn default_max_workers() -> usize {
    10
}

fn default_cache_size() -> usize {
    10
}

fn default_queue_poll_interval_ms() -> u64 {
    100
}

fn default_stream_buffer() -> usize {
    32
}

fn default_shutdown_join_timeout_secs() -> u64 {
    5
}

fn default_prediction_cache_entries() -> u64 {
    1000
}

fn default_prediction_cache_ttl_secs() -> u64 {
    300
}

fn default_sample_interval_secs() -> u64 {
    60
}

fn default_utilization_threshold() -> f32 {
    90.0
}

fn default_queue_alert_ratio() -> f64 {
    0.8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            cache_size: default_cache_size(),
            enable_accelerated_execution: false,
            distributed_cache_endpoint: None,
            prediction_cache: PredictionCacheConfig::default(),
            monitor: MonitorConfig::default(),
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            stream_buffer: default_stream_buffer(),
            shutdown_join_timeout_secs: default_shutdown_join_timeout_secs(),
        }
    }
}

impl Default for PredictionCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_prediction_cache_entries(),
            ttl_secs: default_prediction_cache_ttl_secs(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            cpu_threshold: default_utilization_threshold(),
            memory_threshold: default_utilization_threshold(),
            queue_alert_ratio: default_queue_alert_ratio(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Builder method to set the shared pool size.
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    /// Builder method to set the model cache capacity.
    pub fn with_cache_size(mut self, n: usize) -> Self {
        self.cache_size = n;
        self
    }

    /// Builder method to configure the prediction cache.
    pub fn with_prediction_cache(mut self, max_entries: u64, ttl_secs: u64) -> Self {
        self.prediction_cache = PredictionCacheConfig {
            max_entries,
            ttl_secs,
        };
        self
    }

    /// Builder method to point at a distributed cache.
    pub fn with_distributed_cache(mut self, endpoint: impl Into<String>) -> Self {
        self.distributed_cache_endpoint = Some(endpoint.into());
        self
    }

    /// Builder method to request accelerated execution.
    pub fn with_accelerated_execution(mut self) -> Self {
        self.enable_accelerated_execution = true;
        self
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_join_timeout_secs)
    }

    pub fn prediction_ttl(&self) -> Duration {
        Duration::from_secs(self.prediction_cache.ttl_secs)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_workers == 0 {
            return Err(EngineError::Config("max_workers must be > 0".into()));
        }
        if self.cache_size == 0 {
            return Err(EngineError::Config("cache_size must be > 0".into()));
        }
        if self.prediction_cache.max_entries == 0 {
            return Err(EngineError::Config(
                "prediction_cache.max_entries must be > 0".into(),
            ));
        }
        if self.queue_poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "queue_poll_interval_ms must be > 0".into(),
            ));
        }
        for (name, value) in [
            ("cpu_threshold", self.monitor.cpu_threshold),
            ("memory_threshold", self.monitor.memory_threshold),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(EngineError::Config(format!(
                    "monitor.{name} must be in (0, 100], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_yaml() {
        let yaml = r#"
max_workers: 4
cache_size: 2
enable_accelerated_execution: true
distributed_cache_endpoint: redis://127.0.0.1:6379

prediction_cache:
  max_entries: 50
  ttl_secs: 60

monitor:
  sample_interval_secs: 5
  cpu_threshold: 85.0
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.cache_size, 2);
        assert!(config.enable_accelerated_execution);
        assert_eq!(
            config.distributed_cache_endpoint.as_deref(),
            Some("redis://127.0.0.1:6379")
        );
        assert_eq!(config.prediction_cache.max_entries, 50);
        assert_eq!(config.monitor.cpu_threshold, 85.0);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.monitor.memory_threshold, 90.0);
        assert_eq!(config.queue_poll_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.cache_size, 10);
        assert_eq!(config.prediction_cache.max_entries, 1000);
        assert_eq!(config.prediction_cache.ttl_secs, 300);
        assert_eq!(config.monitor.sample_interval_secs, 60);
        assert!(config.distributed_cache_endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::new()
            .with_max_workers(2)
            .with_cache_size(3)
            .with_prediction_cache(10, 5)
            .with_accelerated_execution();

        assert_eq!(config.max_workers, 2);
        assert_eq!(config.cache_size, 3);
        assert_eq!(config.prediction_cache.max_entries, 10);
        assert_eq!(config.prediction_cache.ttl_secs, 5);
        assert!(config.enable_accelerated_execution);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = EngineConfig::new().with_max_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = EngineConfig::default();
        config.monitor.cpu_threshold = 0.0;
        assert!(config.validate().is_err());
        config.monitor.cpu_threshold = 120.0;
        assert!(config.validate().is_err());
    }
}
