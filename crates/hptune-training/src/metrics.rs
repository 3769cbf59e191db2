//! Named scalar metrics and the read-only view the HPO reporter consumes.
//!
//! [`Metrics`] is the state an evaluation pass leaves behind (for example
//! `{"accuracy": 0.91, "nll": 0.27}`). [`MetricsRecorder`] accumulates
//! sample-weighted sums across batches and produces a [`Metrics`] at the end
//! of a pass. [`MetricSource`] is the narrow lookup interface that
//! [`HpoReporter`](crate::hpo::HpoReporter) reads from.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Metric name for classification accuracy.
pub const ACCURACY: &str = "accuracy";
/// Metric name for mean negative log-likelihood.
pub const NLL: &str = "nll";
/// Metric name for the training loss of a single step.
pub const LOSS: &str = "loss";

/// Read-only access to the current value of named metrics.
pub trait MetricSource {
    /// Returns the current value of `name`, or `None` if it was not computed.
    fn metric(&self, name: &str) -> Option<f64>;

    /// Names of all metrics currently available.
    fn metric_names(&self) -> Vec<String>;
}

/// Metrics recorded at a point in training, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Metric values keyed by name.
    pub values: BTreeMap<String, f64>,
    /// The global step (iteration or epoch) these metrics belong to.
    pub global_step: u64,
}

impl Metrics {
    /// Creates an empty set of metrics for the given step.
    ///
    /// # Examples
    ///
    /// ```
    /// use hptune_training::metrics::Metrics;
    ///
    /// let metrics = Metrics::new(3).with("nll", 0.27);
    /// assert_eq!(metrics.get("nll"), Some(0.27));
    /// assert_eq!(metrics.global_step, 3);
    /// ```
    pub fn new(global_step: u64) -> Self {
        Self {
            values: BTreeMap::new(),
            global_step,
        }
    }

    /// Adds a metric value.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Inserts or replaces a metric value.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Returns a metric value by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MetricSource for Metrics {
    fn metric(&self, name: &str) -> Option<f64> {
        self.get(name)
    }

    fn metric_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

impl MetricSource for BTreeMap<String, f64> {
    fn metric(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }

    fn metric_names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

impl MetricSource for HashMap<String, f64> {
    fn metric(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }

    fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Accumulates sample-weighted metric sums over a pass.
///
/// Each recorded value carries the number of samples it was averaged over, so
/// a short final batch does not skew the result.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    sums: BTreeMap<String, f64>,
    weights: BTreeMap<String, u64>,
}

impl MetricsRecorder {
    /// Creates a new empty `MetricsRecorder`.
    ///
    /// # Examples
    ///
    /// ```
    /// use hptune_training::metrics::MetricsRecorder;
    ///
    /// let recorder = MetricsRecorder::new();
    /// assert!(recorder.aggregate(0).is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a per-sample mean `value` for `name` measured over `samples`
    /// samples.
    ///
    /// # Examples
    ///
    /// ```
    /// use hptune_training::metrics::MetricsRecorder;
    ///
    /// let mut recorder = MetricsRecorder::new();
    /// recorder.record("nll", 0.5, 10);
    /// recorder.record("nll", 0.2, 30);
    /// assert!((recorder.average("nll").unwrap() - 0.275).abs() < 1e-12);
    /// ```
    pub fn record(&mut self, name: &str, value: f64, samples: u64) {
        if samples == 0 {
            return;
        }
        *self.sums.entry(name.to_string()).or_insert(0.0) += value * samples as f64;
        *self.weights.entry(name.to_string()).or_insert(0) += samples;
    }

    /// Records every value in `metrics`, each weighted by `samples`.
    pub fn record_all(&mut self, metrics: &Metrics, samples: u64) {
        for (name, value) in &metrics.values {
            self.record(name, *value, samples);
        }
    }

    /// Returns the sample-weighted average of `name`, if it was recorded.
    pub fn average(&self, name: &str) -> Option<f64> {
        match (self.sums.get(name), self.weights.get(name)) {
            (Some(&sum), Some(&weight)) if weight > 0 => Some(sum / weight as f64),
            _ => None,
        }
    }

    /// Computes averaged metrics at the given global step.
    pub fn aggregate(&self, global_step: u64) -> Metrics {
        let mut metrics = Metrics::new(global_step);
        for name in self.sums.keys() {
            if let Some(avg) = self.average(name) {
                metrics.insert(name.clone(), avg);
            }
        }
        metrics
    }

    /// Resets the recorder to its initial state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_builder() {
        let metrics = Metrics::new(2).with(ACCURACY, 0.91).with(NLL, 0.27);

        assert_eq!(metrics.get(ACCURACY), Some(0.91));
        assert_eq!(metrics.get(NLL), Some(0.27));
        assert_eq!(metrics.get("auc"), None);
        assert_eq!(metrics.global_step, 2);
    }

    #[test]
    fn test_metric_source_for_metrics() {
        let metrics = Metrics::new(0).with(NLL, 0.27).with(ACCURACY, 0.91);
        let source: &dyn MetricSource = &metrics;

        assert_eq!(source.metric(NLL), Some(0.27));
        assert_eq!(source.metric("missing"), None);
        assert_eq!(source.metric_names(), vec!["accuracy", "nll"]);
    }

    #[test]
    fn test_metric_source_for_maps() {
        let mut hashed = HashMap::new();
        hashed.insert("nll".to_string(), 0.27);
        hashed.insert("accuracy".to_string(), 0.91);
        assert_eq!(hashed.metric("nll"), Some(0.27));
        assert_eq!(hashed.metric_names(), vec!["accuracy", "nll"]);

        let ordered: BTreeMap<String, f64> = hashed.into_iter().collect();
        assert_eq!(ordered.metric("accuracy"), Some(0.91));
        assert_eq!(ordered.metric("loss"), None);
    }

    #[test]
    fn test_metrics_recorder_empty() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.average(NLL).is_none());
        assert!(recorder.aggregate(0).is_empty());
    }

    #[test]
    fn test_metrics_recorder_weighted_average() {
        let mut recorder = MetricsRecorder::new();
        recorder.record(ACCURACY, 1.0, 3);
        recorder.record(ACCURACY, 0.0, 1);
        recorder.record(NLL, 0.4, 2);
        recorder.record(NLL, 9.0, 0);

        assert!((recorder.average(ACCURACY).unwrap() - 0.75).abs() < 1e-12);
        assert!((recorder.average(NLL).unwrap() - 0.4).abs() < 1e-12);

        let agg = recorder.aggregate(7);
        assert_eq!(agg.global_step, 7);
        assert_eq!(agg.metric_names(), vec!["accuracy", "nll"]);
    }

    #[test]
    fn test_metrics_recorder_reset() {
        let mut recorder = MetricsRecorder::new();
        recorder.record_all(&Metrics::new(1).with(LOSS, 0.5), 4);
        recorder.reset();
        assert!(recorder.aggregate(2).is_empty());
        assert!(recorder.average(LOSS).is_none());
    }
}
