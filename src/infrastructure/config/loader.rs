use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid poll_interval_ms: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid {name}: {value}. Must be at least 1 second")]
    InvalidTimeout { name: &'static str, value: u64 },

    #[error(
        "Invalid timeouts: short ({short}s) <= medium ({medium}s) <= long ({long}s) must hold"
    )]
    UnorderedTimeouts { short: u64, medium: u64, long: u64 },

    #[error("Machine API namespace cannot be empty")]
    EmptyNamespace,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),
}

const ENV_PREFIX: &str = "SETTLE_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .settle/config.yaml
    /// 3. .settle/local.yaml (optional, developer overrides)
    /// 4. Environment variables (SETTLE_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".settle")
    }

    /// Same as [`ConfigLoader::load`] with the two YAML files read from `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment variables still
    /// take precedence over the file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let waits = &config.waits;
        if waits.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(waits.poll_interval_ms));
        }

        for (name, value) in [
            ("short_timeout_secs", waits.short_timeout_secs),
            ("medium_timeout_secs", waits.medium_timeout_secs),
            ("long_timeout_secs", waits.long_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidTimeout { name, value });
            }
        }

        if waits.short_timeout_secs > waits.medium_timeout_secs
            || waits.medium_timeout_secs > waits.long_timeout_secs
        {
            return Err(ConfigError::UnorderedTimeouts {
                short: waits.short_timeout_secs,
                medium: waits.medium_timeout_secs,
                long: waits.long_timeout_secs,
            });
        }

        if config.cluster.machine_api_namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::{NamedTempFile, TempDir};

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.waits.poll_interval_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidPollInterval(0)
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.waits.medium_timeout_secs = 0;
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidTimeout { name, .. } => assert_eq!(name, "medium_timeout_secs"),
            other => panic!("Expected InvalidTimeout, got {other}"),
        }
    }

    #[test]
    fn test_validate_unordered_timeouts() {
        let mut config = Config::default();
        config.waits.short_timeout_secs = 600;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::UnorderedTimeouts { short: 600, .. }
        ));
    }

    #[test]
    fn test_validate_logging() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogLevel(_)
        ));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(_)
        ));

        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidRotation(_)
        ));
    }

    #[test]
    fn test_validate_empty_namespace() {
        let mut config = Config::default();
        config.cluster.machine_api_namespace = " ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyNamespace
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "waits:\n  poll_interval_ms: 1000\n  short_timeout_secs: 30\nlogging:\n  format: json\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("local.yaml"),
            "waits:\n  poll_interval_ms: 250\n",
        )
        .unwrap();

        let config = temp_env::with_vars_unset(
            ["SETTLE_WAITS__POLL_INTERVAL_MS", "SETTLE_LOGGING__LEVEL"],
            || ConfigLoader::load_from_dir(dir.path()).unwrap(),
        );

        assert_eq!(config.waits.poll_interval_ms, 250, "local.yaml should win");
        assert_eq!(config.waits.short_timeout_secs, 30);
        assert_eq!(config.waits.long_timeout_secs, 900, "default should persist");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_env_override() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "logging:\n  level: warn\n").unwrap();

        let config = temp_env::with_vars(
            [
                ("SETTLE_LOGGING__LEVEL", Some("debug")),
                ("SETTLE_CLUSTER__MACHINE_API_NAMESPACE", Some("machines")),
            ],
            || ConfigLoader::load_from_dir(dir.path()).unwrap(),
        );

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.cluster.machine_api_namespace, "machines");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "cluster:\n  kube_context: staging").unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.cluster.kube_context.as_deref(), Some("staging"));

        assert!(ConfigLoader::load_from_file("/definitely/not/here.yaml").is_err());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "waits:\n  poll_interval_ms: 0").unwrap();
        file.flush().unwrap();

        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }
}
