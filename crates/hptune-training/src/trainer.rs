//! Epoch-based training loop with evaluation and hooks.
//!
//! The [`Trainer`] runs a [`ModelFn`] over a training [`Dataset`] for a fixed
//! number of epochs. After every epoch it evaluates the model on the training
//! and validation sets and hands the resulting [`EngineState`] to its hooks,
//! which is where metric reporting to the tuning service happens.
//!
//! ```text
//! for each epoch:
//!     before_epoch
//!     for each batch: before_step -> train_step -> after_step
//!     evaluate(train) -> state.train_metrics
//!     evaluate(val)   -> state.eval_metrics
//!     after_epoch
//! end
//! ```

use crate::data::{DataError, Dataset};
use crate::hooks::{Hook, HookAction, HookError, HookList};
use crate::metrics::{Metrics, MetricsRecorder, ACCURACY, LOSS, NLL};
use crate::model::{BatchEval, ModelError, ModelFn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during training.
#[derive(Debug, Error)]
pub enum TrainError {
    /// A hook failed.
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// The model failed on a batch.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// The training data is unusable.
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// The trainer configuration is invalid.
    #[error("Invalid trainer config: {0}")]
    InvalidConfig(String),
}

/// Result type for training operations.
pub type TrainResult<T> = Result<T, TrainError>;

/// Configuration for the [`Trainer`].
///
/// # Examples
///
/// ```
/// use hptune_training::trainer::TrainerConfig;
///
/// let config = TrainerConfig::default()
///     .with_max_epochs(3)
///     .with_batch_size(128)
///     .with_seed(7);
/// assert_eq!(config.max_epochs, 3);
/// assert_eq!(config.val_batch_size, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of passes over the training set.
    pub max_epochs: u64,
    /// Training batch size.
    pub batch_size: usize,
    /// Batch size used by both evaluation passes.
    pub val_batch_size: usize,
    /// Shuffle the training set every epoch.
    pub shuffle: bool,
    /// Seed for shuffling.
    pub seed: u64,
    /// Also evaluate on the training set after every epoch.
    pub evaluate_train: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 10,
            batch_size: 64,
            val_batch_size: 1000,
            shuffle: true,
            seed: 0,
            evaluate_train: true,
        }
    }
}

impl TrainerConfig {
    pub fn with_max_epochs(mut self, epochs: u64) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_val_batch_size(mut self, batch_size: usize) -> Self {
        self.val_batch_size = batch_size;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_evaluate_train(mut self, evaluate_train: bool) -> Self {
        self.evaluate_train = evaluate_train;
        self
    }

    /// Checks that the epoch count and batch sizes are non-zero.
    pub fn validate(&self) -> TrainResult<()> {
        if self.max_epochs == 0 {
            return Err(TrainError::InvalidConfig("max_epochs must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(TrainError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.val_batch_size == 0 {
            return Err(TrainError::InvalidConfig(
                "val_batch_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Training state visible to hooks.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    /// Current epoch, 1-based; 0 before the first epoch starts.
    pub epoch: u64,
    pub max_epochs: u64,
    /// Iterations run so far across all epochs, 1-based.
    pub iteration: u64,
    /// Loss of the most recent training step.
    pub last_loss: Option<f64>,
    /// Sample-weighted mean training loss of the current epoch.
    pub epoch_loss: Option<f64>,
    /// Evaluator results on the training set for the current epoch.
    pub train_metrics: Option<Metrics>,
    /// Evaluator results on the validation set for the current epoch.
    pub eval_metrics: Option<Metrics>,
}

/// Outcome of [`Trainer::run`].
#[derive(Debug, Clone)]
pub struct TrainSummary {
    /// State after the last completed epoch.
    pub state: EngineState,
    /// Whether a hook stopped training before `max_epochs`.
    pub stopped_early: bool,
}

/// Evaluates `model` over `dataset`, producing `accuracy` and `nll`.
///
/// An empty dataset yields empty metrics.
pub fn evaluate<M>(
    model: &M,
    dataset: &Dataset,
    batch_size: usize,
    global_step: u64,
) -> TrainResult<Metrics>
where
    M: ModelFn + ?Sized,
{
    let mut totals = BatchEval::default();
    for batch in dataset.batches(batch_size, None) {
        totals.merge(model.evaluate_batch(&batch)?);
    }

    let mut metrics = Metrics::new(global_step);
    if totals.count == 0 {
        warn!("Evaluation ran over an empty dataset");
        return Ok(metrics);
    }
    metrics.insert(ACCURACY, totals.correct as f64 / totals.count as f64);
    metrics.insert(NLL, totals.nll_sum / totals.count as f64);
    Ok(metrics)
}

/// Drives a model through epochs of training and evaluation.
pub struct Trainer<M: ModelFn> {
    config: TrainerConfig,
    model: M,
    hooks: HookList,
    state: EngineState,
    rng: StdRng,
}

impl<M: ModelFn> Trainer<M> {
    /// Creates a trainer with the given configuration and model.
    pub fn new(config: TrainerConfig, model: M) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let state = EngineState {
            max_epochs: config.max_epochs,
            ..EngineState::default()
        };
        Self {
            config,
            model,
            hooks: HookList::new(),
            state,
            rng,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Adds a training hook. Hooks run in the order they were added.
    pub fn add_hook<H: Hook + 'static>(&mut self, hook: H) {
        self.hooks.add(hook);
    }

    /// Runs training from the current state up to `max_epochs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the training set is
    /// empty, the model fails, or any hook fails. A failing hook aborts the
    /// run immediately; `end` hooks are not called in that case.
    pub fn run(&mut self, train: &Dataset, val: &Dataset) -> TrainResult<TrainSummary> {
        self.config.validate()?;
        if train.is_empty() {
            return Err(TrainError::Data(DataError::Empty));
        }

        info!(
            "Starting training for {} epochs ({} iterations per epoch)",
            self.config.max_epochs,
            train.num_batches(self.config.batch_size)
        );

        let mut stopped_early = false;
        let mut recorder = MetricsRecorder::new();
        'epochs: while self.state.epoch < self.config.max_epochs {
            self.state.epoch += 1;
            self.state.train_metrics = None;
            self.state.eval_metrics = None;
            self.hooks.before_epoch(&self.state)?;

            let rng = self.config.shuffle.then_some(&mut self.rng);
            for batch in train.batches(self.config.batch_size, rng) {
                self.state.iteration += 1;
                let iteration = self.state.iteration;
                self.hooks.before_step(iteration)?;

                let loss = self.model.train_step(&batch)?;
                self.state.last_loss = Some(loss);
                let metrics = Metrics::new(iteration).with(LOSS, loss);
                recorder.record_all(&metrics, batch.len() as u64);

                if self.hooks.after_step(iteration, &metrics)? == HookAction::Stop {
                    info!("Training stopped by hook at iteration {}", iteration);
                    stopped_early = true;
                    break 'epochs;
                }
            }
            let epoch = self.state.epoch;
            self.state.epoch_loss = recorder.aggregate(epoch).get(LOSS);
            recorder.reset();

            if self.config.evaluate_train {
                self.state.train_metrics = Some(evaluate(
                    &self.model,
                    train,
                    self.config.val_batch_size,
                    epoch,
                )?);
            }
            self.state.eval_metrics = Some(evaluate(
                &self.model,
                val,
                self.config.val_batch_size,
                epoch,
            )?);
            debug!(epoch, "Epoch evaluation complete");

            if self.hooks.after_epoch(&self.state)? == HookAction::Stop {
                info!("Training stopped by hook after epoch {}", epoch);
                stopped_early = true;
                break;
            }
        }

        self.hooks.end(&self.state)?;

        Ok(TrainSummary {
            state: self.state.clone(),
            stopped_early,
        })
    }
}
