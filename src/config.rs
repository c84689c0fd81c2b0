//! Engine configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`aiwrite.toml`, `[engine]` table)
//! 2. Environment variables (with `AIWRITE_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [engine]
//! worker_pool_size = 8
//! invoke_timeout_secs = 600
//!
//! [engine.retry]
//! max_retries = 5
//! base_delay_ms = 1000
//!
//! [engine.estimator]
//! alpha = 0.2
//!
//! [engine.estimator.default_secs]
//! draft = 120.0
//!
//! [engine.llm]
//! max_tokens = 8192
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dispatcher::DispatcherConfig;
use crate::estimator::EstimatorConfig;
use crate::gateway::{LlmOptions, RetryConfig};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "aiwrite.toml";

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Workers in the pool, and so the cap on concurrent model calls.
    pub worker_pool_size: usize,
    /// Live event buffer per scope.
    pub event_channel_capacity: usize,
    /// Per-attempt model call timeout in seconds.
    pub invoke_timeout_secs: u64,
    /// Poll interval of an export waiting on content, in milliseconds.
    pub dependency_poll_ms: u64,
    /// Refresh interval of running tasks' timing, in milliseconds.
    pub progress_tick_ms: u64,
    /// Retry schedule for transient model failures.
    pub retry: RetryConfig,
    /// Duration model.
    pub estimator: EstimatorConfig,
    /// Sampling options.
    pub llm: LlmOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            event_channel_capacity: crate::events::DEFAULT_CHANNEL_CAPACITY,
            invoke_timeout_secs: crate::gateway::DEFAULT_INVOKE_TIMEOUT.as_secs(),
            dependency_poll_ms: 250,
            progress_tick_ms: 1000,
            retry: RetryConfig::default(),
            estimator: EstimatorConfig::default(),
            llm: LlmOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `aiwrite.toml` in the working directory
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for a malformed file, [`ConfigError::Invalid`]
    /// when the merged values fail [`validate`](Self::validate).
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(CONFIG_FILE) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then the environment.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as for
    /// [`load`](Self::load).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or mistyped values.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::config::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml("[engine]\nworker_pool_size = 2\n").unwrap();
    /// assert_eq!(config.worker_pool_size, 2);
    /// assert_eq!(config.retry.max_retries, 3);
    ///
    /// // No [engine] table means defaults.
    /// assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            engine: EngineConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(full.engine)
    }

    /// Apply `AIWRITE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source; unparsable values are
    /// ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::config::EngineConfig;
    ///
    /// let mut config = EngineConfig::default();
    /// config.apply_overrides(|name| match name {
    ///     "AIWRITE_WORKER_POOL_SIZE" => Some("16".to_string()),
    ///     "AIWRITE_MAX_RETRIES" => Some("not a number".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.worker_pool_size, 16);
    /// assert_eq!(config.retry.max_retries, 3);
    /// ```
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn set<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            target: &mut T,
        ) {
            if let Some(value) = lookup(name).and_then(|v| v.trim().parse().ok()) {
                *target = value;
            }
        }

        set(&lookup, "AIWRITE_WORKER_POOL_SIZE", &mut self.worker_pool_size);
        set(&lookup, "AIWRITE_EVENT_CHANNEL_CAPACITY", &mut self.event_channel_capacity);
        set(&lookup, "AIWRITE_INVOKE_TIMEOUT_SECS", &mut self.invoke_timeout_secs);
        set(&lookup, "AIWRITE_MAX_RETRIES", &mut self.retry.max_retries);
        set(&lookup, "AIWRITE_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        set(&lookup, "AIWRITE_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);
        set(&lookup, "AIWRITE_LLM_MAX_TOKENS", &mut self.llm.max_tokens);
        set(&lookup, "AIWRITE_LLM_TEMPERATURE", &mut self.llm.temperature);
    }

    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid("worker_pool_size must be at least 1".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_channel_capacity must be at least 1".into(),
            ));
        }
        if !(self.estimator.alpha > 0.0 && self.estimator.alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "estimator.alpha must be in (0, 1], got {}",
                self.estimator.alpha
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            pool_size: self.worker_pool_size,
            invoke_timeout: Duration::from_secs(self.invoke_timeout_secs),
            dependency_poll: Duration::from_millis(self.dependency_poll_ms),
            progress_tick: Duration::from_millis(self.progress_tick_ms),
            llm: self.llm,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading configuration file.
    #[error("failed to read config file '{path}': {error}")]
    Io {
        /// Path to the configuration file.
        path: String,
        /// Error message.
        error: String,
    },

    /// Parse error in configuration.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value outside its allowed range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.invoke_timeout_secs, 300);
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[test]
    fn nested_tables_parse() {
        let config = EngineConfig::from_toml(
            r#"
            [engine.retry]
            max_retries = 5
            [engine.estimator.default_secs]
            draft = 120.0
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.estimator.default_for(crate::TaskKind::Draft), 120.0);
    }

    #[test]
    fn mistyped_value_is_a_parse_error() {
        let err = EngineConfig::from_toml("[engine]\nworker_pool_size = \"four\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.worker_pool_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.estimator.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.retry.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn dispatcher_settings_follow_config() {
        let mut config = EngineConfig::default();
        config.invoke_timeout_secs = 10;
        config.progress_tick_ms = 50;
        let dispatcher = config.dispatcher();
        assert_eq!(dispatcher.invoke_timeout, Duration::from_secs(10));
        assert_eq!(dispatcher.progress_tick, Duration::from_millis(50));
    }
}
