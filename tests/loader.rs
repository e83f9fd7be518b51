// tests/loader.rs

mod common;
use crate::common::init_tracing;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use caseflow::config::loader::{load_and_validate, load_from_path, parse_and_validate};
use caseflow::errors::CaseError;
use caseflow::model::PlanItemKind;
use caseflow::types::{ExitScope, ExitType, PlanItemTransition};
use tempfile::NamedTempFile;

fn write_model(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(contents.as_bytes()).expect("write model");
    file
}

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
}

#[test]
fn loads_a_model_file_from_disk() {
    init_tracing();
    let file = write_model(
        r#"
[engine]
max_concurrent_delegates = 8
repetition_counter_variable = "round"

[[case]]
key = "onboarding"

[[case.item]]
id = "collect"
kind = "human_task"

[[case.item]]
id = "verify"
kind = "service_task"
delegate = "kyc"

[[case.item.entry]]
id = "afterCollect"
on = [{ source = "collect", transition = "complete" }]
"#,
    );

    let model = load_and_validate(file.path()).unwrap();

    assert_eq!(model.engine.max_concurrent_delegates, 8);
    assert_eq!(model.engine.repetition_counter_variable, "round");
    assert_eq!(model.engine.max_agenda_operations, 10_000);
    let case = model.case("onboarding").unwrap();
    assert_eq!(case.name, "onboarding");
    let verify = case.find("verify").unwrap();
    assert!(matches!(&verify.kind, PlanItemKind::ServiceTask { delegate, .. } if delegate == "kyc"));
    assert_eq!(verify.entry_criteria.len(), 1);
    assert_eq!(verify.entry_criteria[0].id, "afterCollect");
}

#[test]
fn demo_claim_model_is_valid() {
    init_tracing();
    let model = load_and_validate(demo("claim.toml")).unwrap();

    assert_eq!(model.keys().collect::<Vec<_>>(), vec!["claim", "fraudCheck"]);
    assert_eq!(model.engine.job_poll_interval, Duration::from_millis(100));

    let claim = model.case("claim").unwrap();
    assert_eq!(claim.exit_criteria.len(), 1);
    assert_eq!(claim.exit_criteria[0].exit_type, ExitType::Terminate);
    let reminder = claim.find("reminder").unwrap();
    assert!(matches!(
        reminder.kind,
        PlanItemKind::TimerEventListener { delay } if delay == Duration::from_secs(48 * 3600)
    ));
    assert!(claim.find("attachPhotos").unwrap().is_repeatable());
    assert_eq!(claim.find("assess").unwrap().depth, 1);
}

#[test]
fn unknown_keys_are_rejected() {
    let file = write_model(
        r#"
[[case]]
key = "typo"

[[case.item]]
id = "work"
kind = "human_task"
requried = true
"#,
    );

    let err = load_from_path(file.path()).unwrap_err();
    assert!(matches!(err, CaseError::TomlError(_)), "got {err:?}");
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, CaseError::IoError(_)), "got {err:?}");
}

#[test]
fn empty_file_needs_a_case() {
    let err = parse_and_validate("").unwrap_err();
    assert!(err.to_string().contains("at least one [[case]]"), "{err}");
}

#[test]
fn duplicate_case_keys_are_rejected() {
    let err = parse_and_validate(
        r#"
[[case]]
key = "twice"

[[case]]
key = "twice"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate case key 'twice'"), "{err}");
}

#[test]
fn case_refs_must_resolve_within_the_file() {
    let err = parse_and_validate(
        r#"
[[case]]
key = "parent"

[[case.item]]
id = "sub"
kind = "case_task"
case_ref = "elsewhere"
"#,
    )
    .unwrap_err();
    assert!(
        err.to_string()
            .contains("case 'parent' references unknown case 'elsewhere'"),
        "{err}"
    );
}

#[test]
fn engine_limits_must_be_positive() {
    let err = parse_and_validate(
        r#"
[engine]
max_concurrent_delegates = 0

[[case]]
key = "c"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, CaseError::ConfigError(_)), "got {err:?}");
    assert!(err.to_string().contains("max_concurrent_delegates"), "{err}");
}

#[test]
fn stage_cycles_are_reported() {
    let err = parse_and_validate(
        r#"
[[case]]
key = "loop"

[[case.item]]
id = "a"
kind = "stage"
parent = "b"

[[case.item]]
id = "b"
kind = "stage"
parent = "a"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, CaseError::ModelCycle(_)), "got {err:?}");
}

#[test]
fn bad_expressions_fail_validation() {
    let err = parse_and_validate(
        r#"
[[case]]
key = "expr"

[[case.item]]
id = "work"
kind = "human_task"

[[case.item.entry]]
id = "broken"
if_part = "${amount >}"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, CaseError::ConfigError(_)), "got {err:?}");
    assert!(err.to_string().contains("broken"), "{err}");
}

#[test]
fn transitions_and_exit_types_parse_in_snake_case() {
    let model = parse_and_validate(
        r#"
[[case]]
key = "snake"

[[case.item]]
id = "phase"
kind = "stage"

[[case.item.exit]]
id = "wrapUp"
on = [{ source = "done", transition = "occur" }]
exit_type = "complete_if_completable"
exit_scope = "active_and_enabled_instances"

[[case.item]]
id = "done"
kind = "user_event_listener"

[[case.item]]
id = "work"
kind = "human_task"
parent = "phase"
"#,
    )
    .unwrap();

    let case = model.case("snake").unwrap();
    let exit = &case.find("phase").unwrap().exit_criteria[0];
    assert_eq!(exit.exit_type, ExitType::CompleteIfCompletable);
    assert_eq!(exit.exit_scope, ExitScope::ActiveAndEnabledInstances);
    let on_part = &case.sentry(exit.sentry).on_parts[0];
    assert_eq!(on_part.transition, PlanItemTransition::Occur);
    assert_eq!(case.item(on_part.source).id, "done");
}
