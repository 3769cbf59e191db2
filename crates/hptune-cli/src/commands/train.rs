//! Train Command Implementation
//!
//! Runs one tuning trial: trains the digit classifier and, after every
//! epoch, appends the chosen validation metric to the tuning metrics file.

use crate::config::RunConfig;
use anyhow::{Context, Result};
use clap::Args;
use hptune_training::{
    load_mnist, synthetic_digits, Dataset, HpoConfig, HpoMetricHook, HpoReporter, LoggingHook,
    SoftmaxClassifier, TimerHook, TrainSummary, Trainer, NUM_CLASSES,
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Train the digit classifier as one hyperparameter-tuning trial
///
/// Every flag overrides the matching field of `--config`, which in turn
/// overrides the built-in default.
///
/// # Example
///
/// ```bash
/// hptune train --lr 0.05 --momentum 0.9 --epochs 5 --metric-tag accuracy
/// ```
#[derive(Args, Debug, Clone, Default)]
pub struct TrainCommand {
    /// Path to a run configuration file (JSON format)
    #[arg(long, short = 'c', env = "HPTUNE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input batch size for training [default: 64]
    #[arg(long, short = 'b')]
    pub batch_size: Option<usize>,

    /// Input batch size for validation [default: 1000]
    #[arg(long)]
    pub val_batch_size: Option<usize>,

    /// Number of epochs to train [default: 10]
    #[arg(long, short = 'e')]
    pub epochs: Option<u64>,

    /// Learning rate [default: 0.01]
    #[arg(long)]
    pub lr: Option<f64>,

    /// SGD momentum [default: 0.5]
    #[arg(long)]
    pub momentum: Option<f64>,

    /// Iterations between training loss logs [default: 10]
    #[arg(long)]
    pub log_interval: Option<u64>,

    /// Validation metric reported to the tuning service [default: nll]
    #[arg(long)]
    pub metric_tag: Option<String>,

    /// Directory with the MNIST IDX files; synthetic digits when omitted
    #[arg(long, short = 'd', env = "HPTUNE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Metrics file to append to [default: $CLOUD_ML_HP_METRIC_FILE]
    #[arg(long)]
    pub metric_file: Option<PathBuf>,

    /// Trial id written into every record [default: $CLOUD_ML_TRIAL_ID]
    #[arg(long)]
    pub trial_id: Option<String>,

    /// Seed for shuffling and synthetic data [default: 0]
    #[arg(long)]
    pub seed: Option<u64>,

    /// Use at most this many training examples
    #[arg(long)]
    pub max_train_examples: Option<usize>,
}

impl TrainCommand {
    /// Merges defaults, the config file and the flags into one [`RunConfig`].
    pub fn resolve(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading config from: {:?}", path);
                RunConfig::load(path)?
            }
            None => RunConfig::default(),
        };

        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(val_batch_size) = self.val_batch_size {
            config.val_batch_size = val_batch_size;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(lr) = self.lr {
            config.lr = lr;
        }
        if let Some(momentum) = self.momentum {
            config.momentum = momentum;
        }
        if let Some(log_interval) = self.log_interval {
            config.log_interval = log_interval;
        }
        if let Some(tag) = &self.metric_tag {
            config.metric_tag = tag.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir.clone();
        }
        if self.metric_file.is_some() {
            config.metric_file = self.metric_file.clone();
        }
        if self.trial_id.is_some() {
            config.trial_id = self.trial_id.clone();
        }
        if self.max_train_examples.is_some() {
            config.max_train_examples = self.max_train_examples;
        }

        config.validate()?;
        Ok(config)
    }

    /// Execute the train command
    pub fn run(&self) -> Result<()> {
        let config = self.resolve()?;
        let summary = run_trial(&config, HpoConfig::from_env())?;
        if let Some(metrics) = &summary.state.eval_metrics {
            info!(
                "Final validation {}: {:?}",
                config.metric_tag,
                metrics.get(&config.metric_tag)
            );
        }
        Ok(())
    }
}

/// Runs one trial with `config`, reporting through `base` plus the run's overrides.
pub fn run_trial(config: &RunConfig, base: HpoConfig) -> Result<TrainSummary> {
    let (train, val) = load_datasets(config)?;
    let hpo = config.hpo_config(base);

    info!("Starting training...");
    info!(
        "Epochs: {}, batch size: {}, lr: {}, momentum: {}",
        config.epochs, config.batch_size, config.lr, config.momentum
    );
    info!(
        "Reporting '{}' for trial {} to {:?}",
        config.metric_tag, hpo.trial_id, hpo.metric_path
    );

    let reporter =
        HpoReporter::with_config(hpo, config.metric_tag.clone()).context("Invalid metric tag")?;
    let model = SoftmaxClassifier::new(train.num_features(), NUM_CLASSES, config.lr, config.momentum);

    let mut trainer = Trainer::new(config.trainer_config(), model);
    trainer.add_hook(LoggingHook::new(config.log_interval));
    trainer.add_hook(TimerHook::new());
    trainer.add_hook(HpoMetricHook::new(reporter));

    let summary = trainer.run(&train, &val).context("Training failed")?;
    if summary.stopped_early {
        warn!("Training stopped early at epoch {}", summary.state.epoch);
    }
    info!("Training completed successfully");
    Ok(summary)
}

fn load_datasets(config: &RunConfig) -> Result<(Dataset, Dataset)> {
    let (mut train, val) = match &config.data_dir {
        Some(dir) => load_mnist(dir)
            .with_context(|| format!("Failed to load MNIST from {}", dir.display()))?,
        None => {
            warn!(
                "No data directory provided, using {} synthetic digits",
                config.synthetic_train_size
            );
            (
                synthetic_digits(config.synthetic_train_size, config.seed, config.seed.wrapping_add(1)),
                synthetic_digits(config.synthetic_val_size, config.seed, config.seed.wrapping_add(2)),
            )
        }
    };
    if let Some(max) = config.max_train_examples {
        train.truncate(max);
    }
    Ok((train, val))
}
