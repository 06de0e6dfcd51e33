//! Study configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flashcards::algorithm::MAX_INTERVAL_DAYS;
use crate::flashcards::SchedulerParams;
use crate::storage::{FileStorage, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Cannot find config directory")]
    NoConfigDir,
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Settings read from `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Daily cap on new cards for decks without their own setting
    pub new_cards_per_day: usize,
    pub desired_retention: f64,
    /// Days
    pub maximum_interval: f64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub data_dir: Option<PathBuf>,
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            new_cards_per_day: 20,
            desired_retention: 0.9,
            maximum_interval: 36_500.0,
            retry_attempts: 3,
            retry_backoff_ms: 50,
            data_dir: None,
            remote_url: None,
            remote_api_key: None,
        }
    }
}

impl StudyConfig {
    /// Load configuration from `path`, or the default location.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            log::debug!("config: {} not found, using defaults", config_path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let config: StudyConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("recall").join("config.toml"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.desired_retention > 0.0 && self.desired_retention < 1.0) {
            return Err(ConfigError::Invalid {
                key: "desired_retention",
                message: format!("{} is not between 0 and 1", self.desired_retention),
            });
        }
        if !(self.maximum_interval >= 1.0 && self.maximum_interval <= MAX_INTERVAL_DAYS) {
            return Err(ConfigError::Invalid {
                key: "maximum_interval",
                message: format!(
                    "{} is not between 1 and {} days",
                    self.maximum_interval, MAX_INTERVAL_DAYS
                ),
            });
        }
        Ok(())
    }

    /// Directory for local storage, falling back to the platform data dir
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| FileStorage::default_data_dir().ok())
    }

    pub fn scheduler_params(&self) -> SchedulerParams {
        SchedulerParams {
            desired_retention: self.desired_retention,
            maximum_interval: self.maximum_interval,
            ..SchedulerParams::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config() {
        let config = StudyConfig::load(Some(Path::new("/nonexistent/path/config.toml"))).unwrap();
        assert_eq!(config, StudyConfig::default());
        assert_eq!(config.new_cards_per_day, 20);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "new_cards_per_day = 10\nremote_url = \"https://db.example.com/rest/v1\"\n",
        )
        .unwrap();

        let config = StudyConfig::load(Some(&path)).unwrap();
        assert_eq!(config.new_cards_per_day, 10);
        assert_eq!(config.desired_retention, 0.9);
        assert_eq!(
            config.remote_url.as_deref(),
            Some("https://db.example.com/rest/v1")
        );
    }

    #[test]
    fn test_rejects_out_of_range_retention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "desired_retention = 1.5\n").unwrap();

        let err = StudyConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "desired_retention",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_unbounded_maximum_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "maximum_interval = 1e15\n").unwrap();

        let err = StudyConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "maximum_interval",
                ..
            }
        ));
    }

    #[test]
    fn test_builds_scheduler_and_retry_settings() {
        let config = StudyConfig {
            desired_retention: 0.85,
            retry_attempts: 5,
            retry_backoff_ms: 10,
            ..Default::default()
        };

        let params = config.scheduler_params();
        assert_eq!(params.desired_retention, 0.85);
        assert_eq!(params.maximum_interval, 36_500.0);

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.backoff, Duration::from_millis(10));
    }
}
