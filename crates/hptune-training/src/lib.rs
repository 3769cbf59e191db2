//! Training loop and hyperparameter-tuning metric reporting for hptune.
//!
//! This crate runs a small handwritten-digit classifier and reports its
//! validation metric to Vertex AI hyperparameter tuning after every epoch:
//!
//! - **Trainer**: an epoch loop with train/validation evaluation
//! - **Hooks**: callbacks for logging, timing and metric reporting
//! - **Metrics**: named scalar metrics and the [`MetricSource`] view
//! - **HPO reporting**: [`HpoReporter`] appends one `cloudml-hypertune`
//!   record per epoch to the file the tuning service tails
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Trainer                          │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────────────────┐ │
//! │  │ ModelFn  │   │ evaluate  │   │ HookList             │ │
//! │  └──────────┘   └───────────┘   │  LoggingHook         │ │
//! │                                 │  TimerHook           │ │
//! │                                 │  HpoMetricHook ──────┼─┼──► output.metrics
//! │                                 └──────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hptune_training::{
//!     synthetic_digits, HpoMetricHook, HpoReporter, LoggingHook, SoftmaxClassifier, Trainer,
//!     TrainerConfig, NUM_CLASSES,
//! };
//!
//! let train = synthetic_digits(1000, 0, 1);
//! let val = synthetic_digits(200, 0, 2);
//!
//! let model = SoftmaxClassifier::new(train.num_features(), NUM_CLASSES, 0.01, 0.5);
//! let mut trainer = Trainer::new(TrainerConfig::default().with_max_epochs(3), model);
//! trainer.add_hook(LoggingHook::new(10));
//! trainer.add_hook(HpoMetricHook::new(HpoReporter::new("nll").unwrap()));
//!
//! let summary = trainer.run(&train, &val).unwrap();
//! assert_eq!(summary.state.epoch, 3);
//! ```

pub mod data;
pub mod hooks;
pub mod hpo;
pub mod metrics;
pub mod model;
pub mod trainer;

// Re-export main types for convenience
pub use data::{
    load_mnist, synthetic_digits, Batch, DataError, Dataset, NUM_CLASSES, NUM_FEATURES,
};
pub use hooks::{Hook, HookAction, HookError, HookList, HookResult, LoggingHook, TimerHook};
pub use hpo::{
    format_metric_value, read_reports, HpoConfig, HpoError, HpoMetricHook, HpoReporter,
    HpoResult, MetricReport, DEFAULT_METRIC_FILE, METRIC_FILE_ENV, TRIAL_ID_ENV,
};
pub use metrics::{MetricSource, Metrics, MetricsRecorder};
pub use model::{BatchEval, ModelError, ModelFn, SoftmaxClassifier};
pub use trainer::{
    evaluate, EngineState, TrainError, TrainResult, TrainSummary, Trainer, TrainerConfig,
};
