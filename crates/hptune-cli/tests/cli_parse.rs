use clap::Parser;
use hptune_cli::{Cli, Commands};

#[test]
fn cli_parses_train_flags() {
    let cli = Cli::parse_from([
        "hptune",
        "train",
        "--lr",
        "0.05",
        "--momentum",
        "0.9",
        "--epochs",
        "3",
        "--metric-tag",
        "accuracy",
        "--trial-id",
        "5",
    ]);
    let Commands::Train(cmd) = cli.command else {
        panic!("expected train");
    };
    assert_eq!(cmd.lr, Some(0.05));
    assert_eq!(cmd.momentum, Some(0.9));
    assert_eq!(cmd.epochs, Some(3));
    assert_eq!(cmd.batch_size, None);

    let config = cmd.resolve().unwrap();
    assert_eq!(config.metric_tag, "accuracy");
    assert_eq!(config.trial_id.as_deref(), Some("5"));
    assert_eq!(config.batch_size, 64);
}

#[test]
fn cli_parses_negative_report_value() {
    let cli = Cli::parse_from([
        "hptune", "report", "--tag", "reward", "--value", "-1.5", "--step", "7",
    ]);
    let Commands::Report(cmd) = cli.command else {
        panic!("expected report");
    };
    assert_eq!(cmd.tag, "reward");
    assert_eq!(cmd.value, -1.5);
    assert_eq!(cmd.step, 7);
}

#[test]
fn cli_parses_inspect_flags() {
    let cli = Cli::parse_from([
        "hptune",
        "inspect",
        "--metric-file",
        "/tmp/out.metrics",
        "--tag",
        "nll",
        "--last",
        "2",
    ]);
    let Commands::Inspect(cmd) = cli.command else {
        panic!("expected inspect");
    };
    assert_eq!(cmd.tag.as_deref(), Some("nll"));
    assert_eq!(cmd.last, Some(2));
    assert!(!cmd.json);
}

#[test]
fn cli_rejects_report_without_value() {
    assert!(Cli::try_parse_from(["hptune", "report", "--tag", "nll"]).is_err());
}
