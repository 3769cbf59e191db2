use hptune_training::{read_reports, HpoConfig, HpoError, HpoReporter, MetricSource, Metrics};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn reporter(path: &Path, tag: &str) -> HpoReporter {
    HpoReporter::with_config(HpoConfig::default().with_metric_path(path), tag).unwrap()
}

fn evaluator_state(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn nll_scenario_appends_exact_value() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("hypertune").join("output.metrics");
    let state = evaluator_state(&[("accuracy", 0.91), ("nll", 0.27)]);

    reporter(&path, "nll").report(&state, 1).unwrap();

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.ends_with('\n'));
    assert!(content.contains(r#""nll":"0.27""#));

    let records = read_reports(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metric_tag, "nll");
    assert_eq!(records[0].value, 0.27);
    assert_eq!(records[0].trial, "0");
}

#[test]
fn missing_metric_does_not_create_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("hypertune").join("output.metrics");
    let state = evaluator_state(&[("accuracy", 0.91)]);

    let err = reporter(&path, "nll").report(&state, 1).unwrap_err();
    assert!(matches!(err, HpoError::MissingMetric { ref tag, .. } if tag == "nll"));
    assert!(!path.exists());
}

#[test]
fn missing_metric_leaves_existing_file_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("output.metrics");
    let nll = reporter(&path, "nll");
    nll.report(&evaluator_state(&[("nll", 0.5)]), 1).unwrap();
    let before = fs::read(&path).unwrap();

    assert!(nll.report(&evaluator_state(&[("accuracy", 0.9)]), 2).is_err());
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn n_reports_produce_n_parseable_records() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("output.metrics");
    let reporter = reporter(&path, "nll");

    let values: Vec<f64> = (1..=25).map(|i| 1.0 / f64::from(i)).collect();
    for (step, value) in values.iter().enumerate() {
        let state = Metrics::new(step as u64).with("nll", *value).with("accuracy", 0.5);
        reporter.report(&state, step as u64 + 1).unwrap();
    }

    let records = read_reports(&path).unwrap();
    assert_eq!(records.len(), values.len());
    for (i, (record, value)) in records.iter().zip(&values).enumerate() {
        assert_eq!(record.value.to_bits(), value.to_bits());
        assert_eq!(record.global_step, i as u64 + 1);
    }
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn appends_after_existing_content() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("output.metrics");
    reporter(&path, "nll").report_value(0.4, 1).unwrap();

    // A second reporter for the same file must not truncate it.
    reporter(&path, "nll").report_value(0.3, 2).unwrap();

    let steps: Vec<u64> = read_reports(&path)
        .unwrap()
        .into_iter()
        .map(|r| r.global_step)
        .collect();
    assert_eq!(steps, vec![1, 2]);
}

#[test]
fn lazily_creates_nested_parent_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("a").join("b").join("c").join("output.metrics");
    assert!(!path.parent().unwrap().exists());

    reporter(&path, "accuracy")
        .report(&evaluator_state(&[("accuracy", 0.91)]), 1)
        .unwrap();

    assert!(path.exists());
    assert_eq!(read_reports(&path).unwrap()[0].value, 0.91);
}

#[test]
fn trait_object_sources_are_accepted() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("output.metrics");
    let metrics = Metrics::new(0).with("nll", 0.125);
    let source: &dyn MetricSource = &metrics;

    let report = reporter(&path, "nll").report(source, 4).unwrap();
    assert_eq!(report.value, 0.125);
    assert_eq!(report.global_step, 4);
}

#[test]
fn trial_and_checkpoint_are_written() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("output.metrics");
    let config = HpoConfig::default()
        .with_metric_path(&path)
        .with_trial_id("17")
        .with_checkpoint_path("gs://bucket/ckpt")
        .with_sync_data(true);
    HpoReporter::with_config(config, "nll")
        .unwrap()
        .report_value(0.2, 3)
        .unwrap();

    let record = &read_reports(&path).unwrap()[0];
    assert_eq!(record.trial, "17");
    assert_eq!(record.checkpoint_path, "gs://bucket/ckpt");
}
