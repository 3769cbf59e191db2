//! Trial run configuration.
//!
//! A [`RunConfig`] holds every hyperparameter and path a training trial
//! needs. Values come from three layers, lowest precedence first: built-in
//! defaults, an optional JSON file (`--config`), and explicit CLI flags.

use hptune_training::{HpoConfig, TrainerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for a [`RunConfig`].
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Hyperparameters and paths for one training trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Input batch size for training.
    pub batch_size: usize,
    /// Input batch size for evaluation.
    pub val_batch_size: usize,
    /// Number of epochs to train.
    pub epochs: u64,
    /// SGD learning rate.
    pub lr: f64,
    /// SGD momentum.
    pub momentum: f64,
    /// How many iterations to wait before logging the training loss.
    pub log_interval: u64,
    /// Validation metric reported to the tuning service.
    pub metric_tag: String,
    /// Directory holding the MNIST IDX files; synthetic digits when unset.
    pub data_dir: Option<PathBuf>,
    /// Overrides the metrics file from the environment.
    pub metric_file: Option<PathBuf>,
    /// Overrides the trial id from the environment.
    pub trial_id: Option<String>,
    /// Seed for shuffling and synthetic data.
    pub seed: u64,
    /// Number of synthetic training examples.
    pub synthetic_train_size: usize,
    /// Number of synthetic validation examples.
    pub synthetic_val_size: usize,
    /// Caps the number of training examples used.
    pub max_train_examples: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            val_batch_size: 1000,
            epochs: 10,
            lr: 0.01,
            momentum: 0.5,
            log_interval: 10,
            metric_tag: "nll".to_string(),
            data_dir: None,
            metric_file: None,
            trial_id: None,
            seed: 0,
            synthetic_train_size: 6000,
            synthetic_val_size: 1000,
            max_train_examples: None,
        }
    }
}

impl RunConfig {
    /// Loads a configuration from a JSON file; missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks that every hyperparameter is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.val_batch_size == 0 {
            return Err(ConfigError::Invalid("batch sizes must be > 0".into()));
        }
        if self.epochs == 0 {
            return Err(ConfigError::Invalid("epochs must be > 0".into()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "lr must be a positive number, got {}",
                self.lr
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::Invalid(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }
        if self.metric_tag.trim().is_empty() {
            return Err(ConfigError::Invalid("metric_tag must not be empty".into()));
        }
        if self.data_dir.is_none() && self.synthetic_train_size == 0 {
            return Err(ConfigError::Invalid(
                "synthetic_train_size must be > 0 without a data_dir".into(),
            ));
        }
        Ok(())
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig::default()
            .with_max_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_val_batch_size(self.val_batch_size)
            .with_seed(self.seed)
    }

    /// Applies this run's metrics-file and trial overrides on top of `base`.
    pub fn hpo_config(&self, base: HpoConfig) -> HpoConfig {
        let mut config = base;
        if let Some(path) = &self.metric_file {
            config.metric_path = path.clone();
        }
        if let Some(trial) = &self.trial_id {
            config.trial_id = trial.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_script() {
        let config = RunConfig::default();
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.val_batch_size, 1000);
        assert_eq!(config.epochs, 10);
        assert_eq!(config.lr, 0.01);
        assert_eq!(config.momentum, 0.5);
        assert_eq!(config.log_interval, 10);
        assert_eq!(config.metric_tag, "nll");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"lr": 0.05, "epochs": 2, "metric_tag": "accuracy"}"#).unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.lr, 0.05);
        assert_eq!(config.epochs, 2);
        assert_eq!(config.metric_tag, "accuracy");
        assert_eq!(config.batch_size, 64);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RunConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"learning_rate": 0.1}"#).unwrap();
        assert!(matches!(
            RunConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            RunConfig {
                batch_size: 0,
                ..RunConfig::default()
            },
            RunConfig {
                epochs: 0,
                ..RunConfig::default()
            },
            RunConfig {
                lr: -1.0,
                ..RunConfig::default()
            },
            RunConfig {
                lr: f64::NAN,
                ..RunConfig::default()
            },
            RunConfig {
                momentum: 1.0,
                ..RunConfig::default()
            },
            RunConfig {
                metric_tag: " ".into(),
                ..RunConfig::default()
            },
            RunConfig {
                synthetic_train_size: 0,
                ..RunConfig::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_hpo_config_overrides() {
        let base = HpoConfig::default().with_trial_id("3");
        let unchanged = RunConfig::default().hpo_config(base.clone());
        assert_eq!(unchanged, base);

        let config = RunConfig {
            metric_file: Some(PathBuf::from("/tmp/x.metrics")),
            trial_id: Some("9".into()),
            ..RunConfig::default()
        };
        let hpo = config.hpo_config(base);
        assert_eq!(hpo.metric_path, PathBuf::from("/tmp/x.metrics"));
        assert_eq!(hpo.trial_id, "9");
    }

    #[test]
    fn test_trainer_config_mapping() {
        let config = RunConfig {
            epochs: 3,
            batch_size: 16,
            val_batch_size: 32,
            seed: 5,
            ..RunConfig::default()
        };
        let trainer = config.trainer_config();
        assert_eq!(trainer.max_epochs, 3);
        assert_eq!(trainer.batch_size, 16);
        assert_eq!(trainer.val_batch_size, 32);
        assert_eq!(trainer.seed, 5);
    }
}
