use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_parallel: {0}. Must be between 1 and 64")]
    InvalidMaxParallel(usize),

    #[error("Invalid flaky threshold: {0}. Must be within (0.0, 1.0]")]
    InvalidFlakyThreshold(f64),

    #[error("Invalid confidence floor: {0}. Must be within [0.0, 1.0]")]
    InvalidConfidenceFloor(f64),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("Invalid session spacing: {0}. Must be at least 3 (one port per service)")]
    InvalidSessionSpacing(u16),

    #[error("Invalid port scan retries: {0}. Cannot be 0")]
    InvalidScanRetries(u32),

    #[error(
        "Invalid memory thresholds: alert ({0}) must be below critical ({1}) and both within (0, 1]"
    )]
    InvalidMemoryThresholds(f64, f64),

    #[error("Invalid min_savings: {0}. Must be within [0.0, 1.0)")]
    InvalidMinSavings(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Simulator command cannot be empty")]
    EmptySimulatorCommand,

    #[error("Test runner command cannot be empty")]
    EmptyRunnerCommand,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .helmsman/config.yaml (project config)
    /// 3. .helmsman/local.yaml (project local overrides, optional)
    /// 4. Environment variables (HELMSMAN_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".helmsman/config.yaml"))
            .merge(Yaml::file(".helmsman/local.yaml"))
            .merge(Env::prefixed("HELMSMAN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("HELMSMAN_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.session.max_parallel == 0 || config.session.max_parallel > 64 {
            return Err(ConfigError::InvalidMaxParallel(config.session.max_parallel));
        }

        if config.session.runner_command.is_empty() {
            return Err(ConfigError::EmptyRunnerCommand);
        }

        if config.simulator.command.is_empty() {
            return Err(ConfigError::EmptySimulatorCommand);
        }

        if config.flaky.threshold <= 0.0 || config.flaky.threshold > 1.0 {
            return Err(ConfigError::InvalidFlakyThreshold(config.flaky.threshold));
        }

        if !(0.0..=1.0).contains(&config.flaky.confidence_floor) {
            return Err(ConfigError::InvalidConfidenceFloor(
                config.flaky.confidence_floor,
            ));
        }

        if config.flaky.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.flaky.max_retries));
        }

        if config.ports.session_spacing < 3 {
            return Err(ConfigError::InvalidSessionSpacing(
                config.ports.session_spacing,
            ));
        }

        if config.ports.max_scan_retries == 0 {
            return Err(ConfigError::InvalidScanRetries(config.ports.max_scan_retries));
        }

        let alert = config.resources.memory_alert_threshold;
        let critical = config.resources.memory_critical_threshold;
        if alert <= 0.0 || critical > 1.0 || alert >= critical {
            return Err(ConfigError::InvalidMemoryThresholds(alert, critical));
        }

        if !(0.0..1.0).contains(&config.selection.min_savings) {
            return Err(ConfigError::InvalidMinSavings(config.selection.min_savings));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.state_dir.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "state_dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.session.max_parallel, 4);
        assert!((config.flaky.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.ports.data_stream_base, 10110);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
session:
  max_parallel: 8
  timeout_secs: 120
flaky:
  threshold: 0.9
  max_retries: 5
ports:
  data_stream_base: 11000
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.session.max_parallel, 8);
        assert_eq!(config.session.timeout_secs, 120);
        assert!((config.flaky.threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.flaky.max_retries, 5);
        assert_eq!(config.ports.data_stream_base, 11000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_parallel() {
        let mut config = Config::default();
        config.session.max_parallel = 0;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidMaxParallel(0)
        ));
    }

    #[test]
    fn test_validate_flaky_threshold_above_one() {
        let mut config = Config::default();
        config.flaky.threshold = 1.5;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidFlakyThreshold(_)
        ));
    }

    #[test]
    fn test_validate_zero_max_retries() {
        let mut config = Config::default();
        config.flaky.max_retries = 0;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidMaxRetries(0)
        ));
    }

    #[test]
    fn test_validate_inverted_memory_thresholds() {
        let mut config = Config::default();
        config.resources.memory_alert_threshold = 0.95;
        config.resources.memory_critical_threshold = 0.8;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidMemoryThresholds(_, _)
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "shout".to_string();

        let result = ConfigLoader::validate(&config);
        match result.unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "shout"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_narrow_session_spacing() {
        let mut config = Config::default();
        config.ports.session_spacing = 2;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidSessionSpacing(2)
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "session:\n  max_parallel: 2\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "session:\n  max_parallel: 6\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.session.max_parallel, 6, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }

    #[test]
    fn test_env_override() {
        temp_env::with_vars(
            [
                ("HELMSMAN_SESSION__MAX_PARALLEL", Some("12")),
                ("HELMSMAN_FLAKY__THRESHOLD", Some("0.75")),
            ],
            || {
                let config: Config = Figment::new()
                    .merge(Serialized::defaults(Config::default()))
                    .merge(Env::prefixed("HELMSMAN_").split("__"))
                    .extract()
                    .unwrap();

                assert_eq!(config.session.max_parallel, 12);
                assert!((config.flaky.threshold - 0.75).abs() < f64::EPSILON);
            },
        );
    }
}
