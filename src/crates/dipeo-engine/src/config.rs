//! Engine configuration
//!
//! Grouped settings with sensible defaults and `DIPEO_*` environment
//! variable overrides. Every field is optional in the environment; a value
//! that fails to parse falls back to the default with a warning rather
//! than aborting bootstrap.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = key, value = %raw, "unparseable env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// State store tuning
#[derive(Debug, Clone)]
pub struct StateSettings {
    /// Hot cache capacity (`DIPEO_STATE_CACHE_SIZE`)
    pub cache_size: usize,
    /// Node mutations between forced checkpoint flushes
    /// (`DIPEO_STATE_CHECKPOINT_INTERVAL`)
    pub checkpoint_interval: usize,
    /// Completed executions kept warm (`DIPEO_STATE_WARM_CACHE_SIZE`)
    pub warm_cache_size: usize,
    /// Longest a dirty execution waits before a flush
    /// (`DIPEO_STATE_PERSISTENCE_DELAY`, seconds)
    pub persistence_delay: Duration,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            cache_size: 1000,
            checkpoint_interval: 10,
            warm_cache_size: 20,
            persistence_delay: Duration::from_secs_f64(5.0),
        }
    }
}

impl StateSettings {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            cache_size: env_parse("DIPEO_STATE_CACHE_SIZE", default.cache_size),
            checkpoint_interval: env_parse(
                "DIPEO_STATE_CHECKPOINT_INTERVAL",
                default.checkpoint_interval,
            ),
            warm_cache_size: env_parse("DIPEO_STATE_WARM_CACHE_SIZE", default.warm_cache_size),
            persistence_delay: Duration::from_secs_f64(env_parse(
                "DIPEO_STATE_PERSISTENCE_DELAY",
                default.persistence_delay.as_secs_f64(),
            )),
        }
    }
}

/// Event bus tuning
#[derive(Debug, Clone)]
pub struct EventSettings {
    /// Bounded publish queue capacity (`DIPEO_EVENT_QUEUE_SIZE`)
    pub queue_size: usize,
    /// Tap events into the append-only store (`DIPEO_ENABLE_EVENT_STORE`)
    pub enable_event_store: bool,
    /// Event store retention (`DIPEO_EVENT_STORE_TTL`, seconds)
    pub event_store_ttl: Duration,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_size: 10_000,
            enable_event_store: false,
            event_store_ttl: Duration::from_secs(300),
        }
    }
}

impl EventSettings {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            queue_size: env_parse("DIPEO_EVENT_QUEUE_SIZE", default.queue_size),
            enable_event_store: env_bool("DIPEO_ENABLE_EVENT_STORE", default.enable_event_store),
            event_store_ttl: Duration::from_secs(env_parse(
                "DIPEO_EVENT_STORE_TTL",
                default.event_store_ttl.as_secs(),
            )),
        }
    }
}

/// Message routing tuning
#[derive(Debug, Clone)]
pub struct MessagingSettings {
    /// Maximum events per broadcast batch (`DIPEO_MSG_BATCH_MAX`)
    pub batch_max: usize,
    /// Batch/poll interval (`DIPEO_MSG_BATCH_INTERVAL`, milliseconds)
    pub batch_interval: Duration,
    /// Buffered frames per subscriber (`DIPEO_MSG_BUFFER_MAX`)
    pub buffer_max: usize,
    /// Keepalive interval for streams (`DIPEO_WS_KEEPALIVE_SEC`, seconds)
    pub keepalive: Duration,
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            batch_max: 25,
            batch_interval: Duration::from_millis(50),
            buffer_max: 50,
            keepalive: Duration::from_secs(25),
        }
    }
}

impl MessagingSettings {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            batch_max: env_parse("DIPEO_MSG_BATCH_MAX", default.batch_max),
            batch_interval: Duration::from_millis(env_parse(
                "DIPEO_MSG_BATCH_INTERVAL",
                default.batch_interval.as_millis() as u64,
            )),
            buffer_max: env_parse("DIPEO_MSG_BUFFER_MAX", default.buffer_max),
            keepalive: Duration::from_secs(env_parse(
                "DIPEO_WS_KEEPALIVE_SEC",
                default.keepalive.as_secs(),
            )),
        }
    }
}

/// Execution loop tuning
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Concurrent node executions (`DIPEO_EXECUTION_PARALLELISM`)
    pub parallelism: usize,
    /// Global scheduler iteration cap (`DIPEO_MAX_ITERATIONS`)
    pub max_iterations: u32,
    /// Per-node handler timeout (`DIPEO_NODE_TIMEOUT`, seconds)
    pub node_timeout: Duration,
    /// Whole-execution timeout (`DIPEO_EXECUTION_TIMEOUT`, seconds)
    pub execution_timeout: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            parallelism: 15,
            max_iterations: 150,
            node_timeout: Duration::from_secs(100),
            execution_timeout: Duration::from_secs(3600),
        }
    }
}

impl ExecutionSettings {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            parallelism: env_parse("DIPEO_EXECUTION_PARALLELISM", default.parallelism),
            max_iterations: env_parse("DIPEO_MAX_ITERATIONS", default.max_iterations),
            node_timeout: Duration::from_secs(env_parse(
                "DIPEO_NODE_TIMEOUT",
                default.node_timeout.as_secs(),
            )),
            execution_timeout: Duration::from_secs(env_parse(
                "DIPEO_EXECUTION_TIMEOUT",
                default.execution_timeout.as_secs(),
            )),
        }
    }
}

/// Storage backend selection for bootstrap code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

/// Storage-related settings
///
/// The engine itself never touches blob storage; these feed the adapters
/// registered at bootstrap.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// `DIPEO_STORAGE_BACKEND` (`local` or `s3`)
    pub backend: StorageBackend,
    /// `DIPEO_BASE_DIR`
    pub base_dir: Option<String>,
    /// `DIPEO_S3_BUCKET`
    pub s3_bucket: Option<String>,
    /// `DIPEO_S3_REGION`
    pub s3_region: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            base_dir: None,
            s3_bucket: None,
            s3_region: None,
        }
    }
}

impl StorageSettings {
    pub fn from_env() -> Self {
        let backend = match std::env::var("DIPEO_STORAGE_BACKEND").as_deref() {
            Ok("s3") => StorageBackend::S3,
            _ => StorageBackend::Local,
        };
        Self {
            backend,
            base_dir: std::env::var("DIPEO_BASE_DIR").ok(),
            s3_bucket: std::env::var("DIPEO_S3_BUCKET").ok(),
            s3_region: std::env::var("DIPEO_S3_REGION").ok(),
        }
    }
}

/// All engine settings, grouped
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub state: StateSettings,
    pub events: EventSettings,
    pub messaging: MessagingSettings,
    pub execution: ExecutionSettings,
    pub storage: StorageSettings,
}

impl EngineSettings {
    /// Build settings from the environment, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            state: StateSettings::from_env(),
            events: EventSettings::from_env(),
            messaging: MessagingSettings::from_env(),
            execution: ExecutionSettings::from_env(),
            storage: StorageSettings::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let settings = EngineSettings::default();
        assert_eq!(settings.state.cache_size, 1000);
        assert_eq!(settings.state.checkpoint_interval, 10);
        assert_eq!(settings.state.warm_cache_size, 20);
        assert_eq!(settings.events.queue_size, 10_000);
        assert!(!settings.events.enable_event_store);
        assert_eq!(settings.messaging.buffer_max, 50);
        assert_eq!(settings.messaging.keepalive, Duration::from_secs(25));
        assert_eq!(settings.execution.parallelism, 15);
        assert_eq!(settings.execution.max_iterations, 150);
        assert_eq!(settings.execution.node_timeout, Duration::from_secs(100));
        assert_eq!(settings.storage.backend, StorageBackend::Local);
    }

    #[test]
    fn test_env_override_and_bad_value_fallback() {
        std::env::set_var("DIPEO_MAX_ITERATIONS", "42");
        std::env::set_var("DIPEO_EXECUTION_PARALLELISM", "not-a-number");

        let settings = ExecutionSettings::from_env();
        assert_eq!(settings.max_iterations, 42);
        assert_eq!(settings.parallelism, 15);

        std::env::remove_var("DIPEO_MAX_ITERATIONS");
        std::env::remove_var("DIPEO_EXECUTION_PARALLELISM");
    }
}
