// tests/cli_run.rs

mod common;
use crate::common::init_tracing;

use std::path::PathBuf;

use caseflow::cli::CliArgs;
use clap::Parser;

fn demo(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
        .display()
        .to_string()
}

fn args(argv: &[&str]) -> CliArgs {
    CliArgs::try_parse_from(argv).expect("valid command line")
}

#[tokio::test]
async fn validate_prints_the_demo_model() {
    init_tracing();
    let model = demo("claim.toml");
    caseflow::run(args(&["caseflow", "validate", &model]))
        .await
        .unwrap();
}

#[tokio::test]
async fn run_applies_steps_through_the_runtime() {
    init_tracing();
    let model = demo("claim.toml");
    caseflow::run(args(&[
        "caseflow",
        "run",
        &model,
        "--var",
        "amount=2500",
        "--step",
        "trigger:assess",
        "--step",
        "jobs",
        "--step",
        "trigger:payout",
        "--history",
    ]))
    .await
    .unwrap();
}

#[tokio::test]
async fn run_reports_a_step_on_an_ended_item() {
    init_tracing();
    let model = demo("claim.toml");
    let err = caseflow::run(args(&[
        "caseflow",
        "run",
        &model,
        "--step",
        "trigger:withdrawn",
        "--step",
        "trigger:assess",
    ]))
    .await
    .unwrap_err();

    assert!(format!("{err:#}").contains("assess"), "{err:#}");
}

#[tokio::test]
async fn run_rejects_an_unknown_case_key() {
    init_tracing();
    let model = demo("claim.toml");
    let err = caseflow::run(args(&["caseflow", "run", &model, "--case", "nope"]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no case 'nope'"), "{err}");
}
