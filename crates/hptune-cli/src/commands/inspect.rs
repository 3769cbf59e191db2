//! Inspect Command Implementation

use anyhow::{Context, Result};
use clap::Args;
use hptune_training::{format_metric_value, read_reports, HpoConfig, MetricReport};
use std::path::PathBuf;

/// Print the records of a metrics file
///
/// # Example
///
/// ```bash
/// hptune inspect --metric-file /tmp/hypertune/output.metrics --tag nll --last 3
/// ```
#[derive(Args, Debug, Clone, Default)]
pub struct InspectCommand {
    /// Metrics file to read [default: $CLOUD_ML_HP_METRIC_FILE]
    #[arg(long)]
    pub metric_file: Option<PathBuf>,

    /// Only show records for this metric
    #[arg(long, short = 't')]
    pub tag: Option<String>,

    /// Only show the last N matching records
    #[arg(long, short = 'n')]
    pub last: Option<usize>,

    /// Print records as JSON lines instead of a table
    #[arg(long, default_value = "false")]
    pub json: bool,
}

impl InspectCommand {
    fn metric_path(&self) -> PathBuf {
        self.metric_file
            .clone()
            .unwrap_or_else(|| HpoConfig::from_env().metric_path)
    }

    /// Reads the file and applies the tag and `--last` filters.
    pub fn collect(&self) -> Result<Vec<MetricReport>> {
        let path = self.metric_path();
        let mut records = read_reports(&path)
            .with_context(|| format!("Failed to read metrics file {}", path.display()))?;

        if let Some(tag) = &self.tag {
            records.retain(|r| &r.metric_tag == tag);
        }
        if let Some(last) = self.last {
            let skip = records.len().saturating_sub(last);
            records = records.split_off(skip);
        }
        Ok(records)
    }

    /// Execute the inspect command
    pub fn run(&self) -> Result<()> {
        let records = self.collect()?;
        if self.json {
            for record in &records {
                print!("{}", record.to_line()?);
            }
            return Ok(());
        }

        println!(
            "{:<8} {:>6} {:<16} {:>24} {:>18}",
            "trial", "step", "metric", "value", "timestamp"
        );
        for r in &records {
            println!(
                "{:<8} {:>6} {:<16} {:>24} {:>18.3}",
                r.trial,
                r.global_step,
                r.metric_tag,
                format_metric_value(r.value),
                r.timestamp
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hptune_training::HpoReporter;

    fn write_records(path: &std::path::Path) {
        let config = HpoConfig::default().with_metric_path(path);
        let nll = HpoReporter::with_config(config.clone(), "nll").unwrap();
        let acc = HpoReporter::with_config(config, "accuracy").unwrap();
        for step in 1..=4 {
            nll.report_value(1.0 / step as f64, step).unwrap();
            acc.report_value(0.5 + 0.1 * step as f64, step).unwrap();
        }
    }

    #[test]
    fn test_collect_filters_by_tag_and_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.metrics");
        write_records(&path);

        let all = InspectCommand {
            metric_file: Some(path.clone()),
            ..InspectCommand::default()
        };
        assert_eq!(all.collect().unwrap().len(), 8);

        let nll = InspectCommand {
            metric_file: Some(path.clone()),
            tag: Some("nll".into()),
            last: Some(2),
            ..InspectCommand::default()
        };
        let records = nll.collect().unwrap();
        assert_eq!(
            records.iter().map(|r| r.global_step).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert!(records.iter().all(|r| r.metric_tag == "nll"));
    }

    #[test]
    fn test_last_larger_than_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.metrics");
        write_records(&path);

        let cmd = InspectCommand {
            metric_file: Some(path),
            last: Some(100),
            ..InspectCommand::default()
        };
        assert_eq!(cmd.collect().unwrap().len(), 8);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = InspectCommand {
            metric_file: Some(dir.path().join("absent.metrics")),
            ..InspectCommand::default()
        };
        assert!(cmd.collect().is_err());
    }
}
