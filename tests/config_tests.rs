//! Integration tests for engine configuration loading.

use std::io::Write;
use std::time::Duration;

use aiwrite_tasks::config::{ConfigError, EngineConfig};
use aiwrite_tasks::TaskKind;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

mod file_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_the_engine_table() {
        let file = write_config(
            r#"
            [engine]
            worker_pool_size = 8
            invoke_timeout_secs = 120
            dependency_poll_ms = 50

            [engine.retry]
            max_retries = 5
            base_delay_ms = 200

            [engine.estimator]
            alpha = 0.5

            [engine.estimator.default_secs]
            draft = 45.0

            [engine.llm]
            max_tokens = 2048
            "#,
        );

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker_pool_size, 8);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.estimator.alpha, 0.5);
        assert_eq!(config.estimator.default_for(TaskKind::Draft), 45.0);
        assert_eq!(config.llm.max_tokens, 2048);

        let dispatcher = config.dispatcher();
        assert_eq!(dispatcher.pool_size, 8);
        assert_eq!(dispatcher.invoke_timeout, Duration::from_secs(120));
        assert_eq!(dispatcher.dependency_poll, Duration::from_millis(50));
    }

    #[test]
    fn unrelated_tables_are_ignored() {
        let file = write_config("[server]\nport = 8080\n");
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker_pool_size, EngineConfig::default().worker_pool_size);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = EngineConfig::from_file(&path).unwrap_err();
        match err {
            ConfigError::Io { path: reported, .. } => {
                assert!(reported.ends_with("absent.toml"));
            },
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let file = write_config("[engine\nworker_pool_size = ");
        let err = EngineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err:?}");
    }

    #[test]
    fn mistyped_value_is_a_parse_error() {
        let file = write_config("[engine]\nworker_pool_size = \"many\"\n");
        let err = EngineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err:?}");
    }
}

mod validation_tests {
    use super::*;

    fn invalid(toml: &str) -> String {
        let file = write_config(toml);
        match EngineConfig::from_file(file.path()) {
            Err(ConfigError::Invalid(reason)) => reason,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn zero_workers_are_rejected() {
        assert!(invalid("[engine]\nworker_pool_size = 0\n").contains("worker_pool_size"));
    }

    #[test]
    fn zero_event_capacity_is_rejected() {
        assert!(invalid("[engine]\nevent_channel_capacity = 0\n").contains("event_channel_capacity"));
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        assert!(invalid("[engine.estimator]\nalpha = 0.0\n").contains("alpha"));
        assert!(invalid("[engine.estimator]\nalpha = 1.5\n").contains("alpha"));
    }

    #[test]
    fn base_delay_above_cap_is_rejected() {
        let reason = invalid("[engine.retry]\nbase_delay_ms = 5000\nmax_delay_ms = 100\n");
        assert!(reason.contains("base_delay_ms"));
    }
}

mod override_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn overrides_apply_on_top_of_file_values() {
        let mut config = EngineConfig::from_toml("[engine]\nworker_pool_size = 2\n").unwrap();
        config.apply_overrides(|name| match name {
            "AIWRITE_WORKER_POOL_SIZE" => Some(" 12 ".to_string()),
            "AIWRITE_RETRY_MAX_DELAY_MS" => Some("9000".to_string()),
            "AIWRITE_LLM_TEMPERATURE" => Some("0.7".to_string()),
            _ => None,
        });
        assert_eq!(config.worker_pool_size, 12);
        assert_eq!(config.retry.max_delay_ms, 9000);
        assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
        config.validate().unwrap();
    }

    #[test]
    fn an_override_can_make_the_config_invalid() {
        let mut config = EngineConfig::default();
        config.apply_overrides(|name| {
            (name == "AIWRITE_WORKER_POOL_SIZE").then(|| "0".to_string())
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
