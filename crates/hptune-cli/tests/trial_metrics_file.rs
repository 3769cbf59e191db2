use hptune_cli::{run_trial, InspectCommand, ReportCommand, RunConfig};
use hptune_training::{read_reports, HpoConfig};

#[test]
fn train_then_inspect_reads_every_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    let metric_file = tmp.path().join("hypertune").join("output.metrics");
    let config = RunConfig {
        epochs: 3,
        batch_size: 32,
        val_batch_size: 64,
        lr: 0.001,
        metric_tag: "accuracy".into(),
        synthetic_train_size: 192,
        synthetic_val_size: 64,
        metric_file: Some(metric_file.clone()),
        ..RunConfig::default()
    };

    let summary = run_trial(&config, HpoConfig::default().with_trial_id("21")).unwrap();
    let final_accuracy = summary
        .state
        .eval_metrics
        .as_ref()
        .and_then(|m| m.get("accuracy"))
        .unwrap();

    let inspect = InspectCommand {
        metric_file: Some(metric_file.clone()),
        tag: Some("accuracy".into()),
        last: Some(1),
        json: false,
    };
    let last = inspect.collect().unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].global_step, 3);
    assert_eq!(last[0].trial, "21");
    assert_eq!(last[0].value.to_bits(), final_accuracy.to_bits());
}

#[test]
fn manual_report_appends_to_trial_file() {
    let tmp = tempfile::tempdir().unwrap();
    let metric_file = tmp.path().join("output.metrics");
    let config = RunConfig {
        epochs: 1,
        lr: 0.001,
        synthetic_train_size: 64,
        synthetic_val_size: 32,
        metric_file: Some(metric_file.clone()),
        ..RunConfig::default()
    };
    run_trial(&config, HpoConfig::default()).unwrap();

    let report = ReportCommand {
        tag: "nll".into(),
        value: 0.5,
        step: 2,
        metric_file: Some(metric_file.clone()),
        trial_id: None,
        checkpoint_path: Some("/ckpt/2".into()),
        sync: true,
    };
    report.report(HpoConfig::default()).unwrap();

    let records = read_reports(&metric_file).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].value, 0.5);
    assert_eq!(records[1].checkpoint_path, "/ckpt/2");
    assert_eq!(records[0].global_step, 1);
}

#[test]
fn unknown_metric_tag_fails_the_trial_without_writing() {
    let tmp = tempfile::tempdir().unwrap();
    let metric_file = tmp.path().join("output.metrics");
    let config = RunConfig {
        epochs: 2,
        metric_tag: "auc".into(),
        synthetic_train_size: 32,
        synthetic_val_size: 16,
        metric_file: Some(metric_file.clone()),
        ..RunConfig::default()
    };

    let err = run_trial(&config, HpoConfig::default()).unwrap_err();
    assert!(format!("{err:#}").contains("auc"));
    assert!(!metric_file.exists());
}
