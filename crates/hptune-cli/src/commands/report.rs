//! Report Command Implementation
//!
//! Appends a single metric record, for trials whose metric is computed
//! outside of `hptune train`.

use anyhow::{Context, Result};
use clap::Args;
use hptune_training::{HpoConfig, HpoReporter, MetricReport};
use std::path::PathBuf;
use tracing::info;

/// Append one metric record to the metrics file
///
/// # Example
///
/// ```bash
/// hptune report --tag accuracy --value 0.93 --step 12
/// ```
#[derive(Args, Debug, Clone)]
pub struct ReportCommand {
    /// Metric name to report
    #[arg(long, short = 't')]
    pub tag: String,

    /// Metric value
    #[arg(long, short = 'v', allow_hyphen_values = true)]
    pub value: f64,

    /// Global step (epoch) the value belongs to
    #[arg(long, short = 's', default_value = "0")]
    pub step: u64,

    /// Metrics file to append to [default: $CLOUD_ML_HP_METRIC_FILE]
    #[arg(long)]
    pub metric_file: Option<PathBuf>,

    /// Trial id written into the record [default: $CLOUD_ML_TRIAL_ID]
    #[arg(long)]
    pub trial_id: Option<String>,

    /// Checkpoint location written into the record
    #[arg(long)]
    pub checkpoint_path: Option<String>,

    /// Flush the record to disk with fsync
    #[arg(long, default_value = "false")]
    pub sync: bool,
}

impl ReportCommand {
    /// Builds the reporter configuration on top of `base`.
    pub fn hpo_config(&self, base: HpoConfig) -> HpoConfig {
        let mut config = base.with_sync_data(self.sync);
        if let Some(path) = &self.metric_file {
            config.metric_path = path.clone();
        }
        if let Some(trial) = &self.trial_id {
            config.trial_id = trial.clone();
        }
        if let Some(checkpoint) = &self.checkpoint_path {
            config.checkpoint_path = checkpoint.clone();
        }
        config
    }

    /// Appends the record using `base` as the starting configuration.
    pub fn report(&self, base: HpoConfig) -> Result<MetricReport> {
        let reporter = HpoReporter::with_config(self.hpo_config(base), self.tag.clone())
            .context("Invalid metric tag")?;
        let report = reporter
            .report_value(self.value, self.step)
            .with_context(|| format!("Failed to report to {}", reporter.metric_path().display()))?;
        Ok(report)
    }

    /// Execute the report command
    pub fn run(&self) -> Result<()> {
        let report = self.report(HpoConfig::from_env())?;
        info!(
            "Reported {}={} at step {} for trial {}",
            report.metric_tag, report.value, report.global_step, report.trial
        );
        Ok(())
    }
}
