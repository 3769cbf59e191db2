//! Metric reporting for Vertex AI hyperparameter tuning.
//!
//! A tuning job runs each trial in a container and learns the trial's
//! objective by tailing a metrics file inside it. Every line of that file is
//! one JSON object in the `cloudml-hypertune` layout:
//!
//! ```text
//! {"timestamp":1700000000.25,"trial":"3","nll":"0.27","global_step":"1","checkpoint_path":""}
//! ```
//!
//! The key named after the metric tag (here `nll`) must match the `metricId`
//! of the study spec. Values and steps are written as strings.
//!
//! [`HpoReporter`] appends one such line per call. [`HpoMetricHook`] wires a
//! reporter to the end of every epoch of a [`Trainer`](crate::trainer::Trainer).

use crate::hooks::{Hook, HookAction, HookResult};
use crate::metrics::MetricSource;
use crate::trainer::EngineState;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable overriding the metrics file location.
pub const METRIC_FILE_ENV: &str = "CLOUD_ML_HP_METRIC_FILE";
/// Environment variable carrying the trial id assigned by the tuning service.
pub const TRIAL_ID_ENV: &str = "CLOUD_ML_TRIAL_ID";
/// Metrics file polled by the tuning service when no override is set.
pub const DEFAULT_METRIC_FILE: &str = "/tmp/hypertune/output.metrics";
pub const DEFAULT_TRIAL_ID: &str = "0";

const TIMESTAMP_KEY: &str = "timestamp";
const TRIAL_KEY: &str = "trial";
const GLOBAL_STEP_KEY: &str = "global_step";
const CHECKPOINT_PATH_KEY: &str = "checkpoint_path";
const RESERVED_KEYS: [&str; 4] = [TIMESTAMP_KEY, TRIAL_KEY, GLOBAL_STEP_KEY, CHECKPOINT_PATH_KEY];

/// Errors raised while reporting or reading HPO metrics.
#[derive(Debug, Error)]
pub enum HpoError {
    /// The requested metric was never computed by the evaluator.
    #[error("metric '{tag}' is not present in the evaluator state (available: {available:?})")]
    MissingMetric {
        /// The tag the reporter was configured with.
        tag: String,
        /// Metric names that were available.
        available: Vec<String>,
    },

    /// The metric tag cannot be used as a record key.
    #[error("invalid metric tag '{0}': must be non-empty and not a reserved record key")]
    InvalidTag(String),

    /// The metrics file or its parent directory could not be created or written.
    #[error("metrics file I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A record could not be encoded.
    #[error("failed to encode metric record: {0}")]
    Encode(#[from] serde_json::Error),

    /// A line of an existing metrics file is not a valid record.
    #[error("malformed metric record at {}:{line}: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Result type for HPO reporting.
pub type HpoResult<T> = Result<T, HpoError>;

/// Where and as which trial metrics are reported.
///
/// # Examples
///
/// ```
/// use hptune_training::hpo::HpoConfig;
///
/// let config = HpoConfig::from_lookup(|key| match key {
///     "CLOUD_ML_TRIAL_ID" => Some("7".to_string()),
///     _ => None,
/// });
/// assert_eq!(config.trial_id, "7");
/// assert_eq!(config.metric_path.to_str(), Some("/tmp/hypertune/output.metrics"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HpoConfig {
    /// File the tuning service tails.
    pub metric_path: PathBuf,
    /// Trial id written into every record.
    pub trial_id: String,
    /// Optional checkpoint location written into every record.
    #[serde(default)]
    pub checkpoint_path: String,
    /// Whether to `fsync` the file after each append.
    #[serde(default)]
    pub sync_data: bool,
}

impl Default for HpoConfig {
    fn default() -> Self {
        Self {
            metric_path: PathBuf::from(DEFAULT_METRIC_FILE),
            trial_id: DEFAULT_TRIAL_ID.to_string(),
            checkpoint_path: String::new(),
            sync_data: false,
        }
    }
}

impl HpoConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; empty values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(path) = non_empty(METRIC_FILE_ENV) {
            config.metric_path = PathBuf::from(path);
        }
        if let Some(trial) = non_empty(TRIAL_ID_ENV) {
            config.trial_id = trial;
        }
        config
    }

    pub fn with_metric_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metric_path = path.into();
        self
    }

    pub fn with_trial_id(mut self, trial_id: impl Into<String>) -> Self {
        self.trial_id = trial_id.into();
        self
    }

    pub fn with_checkpoint_path(mut self, checkpoint_path: impl Into<String>) -> Self {
        self.checkpoint_path = checkpoint_path.into();
        self
    }

    pub fn with_sync_data(mut self, sync_data: bool) -> Self {
        self.sync_data = sync_data;
        self
    }
}

/// One line of the metrics file.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReport {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub trial: String,
    /// Key under which `value` is stored.
    pub metric_tag: String,
    pub value: f64,
    pub global_step: u64,
    pub checkpoint_path: String,
}

impl Serialize for MetricReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry(TIMESTAMP_KEY, &self.timestamp)?;
        map.serialize_entry(TRIAL_KEY, &self.trial)?;
        map.serialize_entry(&self.metric_tag, &format_metric_value(self.value))?;
        map.serialize_entry(GLOBAL_STEP_KEY, &self.global_step.to_string())?;
        map.serialize_entry(CHECKPOINT_PATH_KEY, &self.checkpoint_path)?;
        map.end()
    }
}

impl MetricReport {
    /// Encodes the record as a single newline-terminated JSON line.
    pub fn to_line(&self) -> HpoResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parses one line of a metrics file.
    ///
    /// The metric tag is the single key outside the fixed record fields.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let object: Map<String, Value> =
            serde_json::from_str(line.trim()).map_err(|e| e.to_string())?;

        let mut tags = object
            .keys()
            .filter(|key| !RESERVED_KEYS.contains(&key.as_str()));
        let metric_tag = match (tags.next(), tags.next()) {
            (Some(tag), None) => tag.clone(),
            (None, _) => return Err("record carries no metric value".to_string()),
            (Some(_), Some(_)) => return Err("record carries more than one metric".to_string()),
        };

        let timestamp = object
            .get(TIMESTAMP_KEY)
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("missing or non-numeric '{TIMESTAMP_KEY}'"))?;
        let trial = match object.get(TRIAL_KEY) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(format!("missing '{TRIAL_KEY}'")),
        };
        let value = scalar_field(&object, &metric_tag)?
            .parse::<f64>()
            .map_err(|e| format!("invalid value for '{metric_tag}': {e}"))?;
        let global_step = match object.get(GLOBAL_STEP_KEY) {
            None => 0,
            Some(_) => scalar_field(&object, GLOBAL_STEP_KEY)?
                .parse::<u64>()
                .map_err(|e| format!("invalid '{GLOBAL_STEP_KEY}': {e}"))?,
        };
        let checkpoint_path = object
            .get(CHECKPOINT_PATH_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            timestamp,
            trial,
            metric_tag,
            value,
            global_step,
            checkpoint_path,
        })
    }
}

fn scalar_field(object: &Map<String, Value>, key: &str) -> Result<String, String> {
    match object.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("'{key}' must be a string or number, got {other}")),
        None => Err(format!("missing '{key}'")),
    }
}

/// Formats a metric value so that it parses back to the identical `f64`.
///
/// Integral values keep a trailing `.0` and non-finite values use the
/// spellings `nan`, `inf` and `-inf`, matching what the tuning service's
/// Python-side parser produces and accepts.
///
/// # Examples
///
/// ```
/// use hptune_training::hpo::format_metric_value;
///
/// assert_eq!(format_metric_value(0.27), "0.27");
/// assert_eq!(format_metric_value(1.0), "1.0");
/// assert_eq!(format_metric_value(f64::NEG_INFINITY), "-inf");
/// ```
pub fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let formatted = value.to_string();
    if formatted.contains('.') {
        formatted
    } else {
        format!("{formatted}.0")
    }
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Appends one metric record per call to the tuning service's metrics file.
///
/// The reporter holds no handle between calls: each report opens the file in
/// append mode, writes the whole line with one `write_all`, flushes and closes.
/// The parent directory and the file are created on first use.
///
/// # Examples
///
/// ```no_run
/// use hptune_training::hpo::HpoReporter;
/// use hptune_training::metrics::Metrics;
///
/// let reporter = HpoReporter::new("nll").unwrap();
/// let state = Metrics::new(1).with("accuracy", 0.91).with("nll", 0.27);
/// reporter.report(&state, 1).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HpoReporter {
    config: HpoConfig,
    metric_tag: String,
}

impl HpoReporter {
    /// Creates a reporter for `metric_tag` configured from the environment.
    pub fn new(metric_tag: impl Into<String>) -> HpoResult<Self> {
        Self::with_config(HpoConfig::from_env(), metric_tag)
    }

    /// Creates a reporter for `metric_tag` with an explicit configuration.
    pub fn with_config(config: HpoConfig, metric_tag: impl Into<String>) -> HpoResult<Self> {
        let metric_tag = metric_tag.into();
        if metric_tag.trim().is_empty() || RESERVED_KEYS.contains(&metric_tag.as_str()) {
            return Err(HpoError::InvalidTag(metric_tag));
        }
        Ok(Self { config, metric_tag })
    }

    pub fn metric_tag(&self) -> &str {
        &self.metric_tag
    }

    pub fn metric_path(&self) -> &Path {
        &self.config.metric_path
    }

    pub fn config(&self) -> &HpoConfig {
        &self.config
    }

    /// Reads the configured metric from `source` and appends one record.
    ///
    /// Fails with [`HpoError::MissingMetric`] before touching the filesystem
    /// when the metric is absent.
    pub fn report<S>(&self, source: &S, global_step: u64) -> HpoResult<MetricReport>
    where
        S: MetricSource + ?Sized,
    {
        let value = source
            .metric(&self.metric_tag)
            .ok_or_else(|| HpoError::MissingMetric {
                tag: self.metric_tag.clone(),
                available: source.metric_names(),
            })?;
        self.report_value(value, global_step)
    }

    /// Appends one record for an already-read metric value.
    pub fn report_value(&self, value: f64, global_step: u64) -> HpoResult<MetricReport> {
        let report = MetricReport {
            timestamp: unix_timestamp(),
            trial: self.config.trial_id.clone(),
            metric_tag: self.metric_tag.clone(),
            value,
            global_step,
            checkpoint_path: self.config.checkpoint_path.clone(),
        };
        let line = report.to_line()?;
        self.append_line(&line)?;

        debug!(
            tag = %self.metric_tag,
            value,
            global_step,
            path = %self.config.metric_path.display(),
            "Reported HPO metric"
        );
        Ok(report)
    }

    fn append_line(&self, line: &str) -> HpoResult<()> {
        let path = &self.config.metric_path;
        let io_err = |source| HpoError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| HpoError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        if self.config.sync_data {
            file.sync_data().map_err(io_err)?;
        }
        Ok(())
    }
}

/// Reads every record of a metrics file, in file order.
///
/// Blank lines are skipped; any other unparseable line is an error.
pub fn read_reports(path: impl AsRef<Path>) -> HpoResult<Vec<MetricReport>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| HpoError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            MetricReport::parse_line(line).map_err(|reason| HpoError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                reason,
            })
        })
        .collect()
}

/// Reports the validation metric to the tuning service after every epoch.
///
/// The metric is read from the evaluator state the trainer hands to
/// [`Hook::after_epoch`], and the epoch number is used as the global step.
/// Any reporting failure aborts training.
#[derive(Debug)]
pub struct HpoMetricHook {
    reporter: HpoReporter,
    reported: u64,
}

impl HpoMetricHook {
    pub fn new(reporter: HpoReporter) -> Self {
        Self {
            reporter,
            reported: 0,
        }
    }

    /// Number of records appended so far.
    pub fn reported(&self) -> u64 {
        self.reported
    }

    pub fn reporter(&self) -> &HpoReporter {
        &self.reporter
    }
}

impl Hook for HpoMetricHook {
    fn name(&self) -> &str {
        "hpo_metric_hook"
    }

    fn after_epoch(&mut self, state: &EngineState) -> HookResult<HookAction> {
        let report = match state.eval_metrics.as_ref() {
            Some(metrics) => self.reporter.report(metrics, state.epoch)?,
            None => {
                return Err(HpoError::MissingMetric {
                    tag: self.reporter.metric_tag().to_string(),
                    available: Vec::new(),
                }
                .into())
            }
        };
        self.reported += 1;

        info!(
            epoch = state.epoch,
            trial = %report.trial,
            "HPO metric {} = {}",
            report.metric_tag,
            format_metric_value(report.value)
        );
        Ok(HookAction::Continue)
    }
}
