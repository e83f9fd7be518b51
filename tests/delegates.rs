// tests/delegates.rs

mod common;
use crate::common::{CaseModelBuilder, ItemBuilder, SentryBuilder, TestEngine, init_tracing, vars};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use caseflow::delegate::{DelegateContext, DelegateRegistry, DelegateResult};
use caseflow::errors::CaseError;
use caseflow::jobs::JobQueue;
use caseflow::store::CaseStore;
use caseflow::types::{CaseState, PlanItemState, PlanItemTransition, VariableMap};
use caseflow_test_utils::delegates::{FailingDelegate, FutureDelegate, RecordingDelegate};
use serde_json::json;

use PlanItemState::*;

#[test]
fn completed_delegate_writes_its_output_to_the_case() {
    init_tracing();
    let model = CaseModelBuilder::new("scoring")
        .item(ItemBuilder::service_task("score", "scorer"))
        .item(
            ItemBuilder::human_task("escalate")
                .entry(SentryBuilder::new("highScore").if_part("${score > 40}")),
        )
        .build();
    let scorer = RecordingDelegate::with_output(vars([("score", json!(42))]));
    let mut registry = DelegateRegistry::with_builtins();
    registry.register("scorer", scorer.clone());
    let engine = TestEngine::with_delegates([model], registry);

    let case = engine.start("scoring");

    assert_eq!(scorer.calls(), vec!["score".to_string()]);
    assert_eq!(engine.state(case.id, "score"), Completed);
    assert_eq!(engine.case(case.id).variables.get("score"), Some(&json!(42)));
    assert_eq!(engine.state(case.id, "escalate"), Active);
}

#[test]
fn delegate_sees_the_item_scope() {
    init_tracing();
    let model = CaseModelBuilder::new("scoped")
        .item(ItemBuilder::human_task("prepare"))
        .item(
            ItemBuilder::service_task("echo", "echo")
                .entry(SentryBuilder::new("afterPrepare").on("prepare", PlanItemTransition::Complete)),
        )
        .build();
    let mut registry = DelegateRegistry::with_builtins();
    registry.register(
        "echo",
        |context: &DelegateContext| -> anyhow::Result<DelegateResult> {
            let seen = context.variables.get("applicant").cloned().unwrap_or_default();
            Ok(DelegateResult::Completed(vars([("echoed", seen)])))
        },
    );
    let engine = TestEngine::with_delegates([model], registry);
    let case = engine.start_with("scoped", vars([("applicant", json!("ada"))]));

    engine.trigger(case.id, "prepare").unwrap();

    assert_eq!(engine.case(case.id).variables.get("echoed"), Some(&json!("ada")));
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
}

#[test]
fn failing_delegate_rolls_back_the_whole_cycle() {
    init_tracing();
    let model = CaseModelBuilder::new("failing")
        .item(ItemBuilder::human_task("prepare"))
        .item(
            ItemBuilder::service_task("charge", "payments")
                .entry(SentryBuilder::new("afterPrepare").on("prepare", PlanItemTransition::Complete)),
        )
        .build();
    let mut registry = DelegateRegistry::with_builtins();
    registry.register("payments", FailingDelegate::new("card declined"));
    let engine = TestEngine::with_delegates([model], registry);
    let case = engine.start("failing");
    let events_before = engine.events_for(case.id).len();

    let err = engine.trigger(case.id, "prepare").unwrap_err();

    match &err {
        CaseError::DelegateFailure { delegate, source } => {
            assert_eq!(delegate, "payments");
            assert_eq!(source.to_string(), "card declined");
        }
        other => panic!("expected DelegateFailure, got {other:?}"),
    }
    assert_eq!(engine.state(case.id, "prepare"), Active);
    assert_eq!(engine.state(case.id, "charge"), Available);
    assert_eq!(engine.events_for(case.id).len(), events_before);
}

#[test]
fn failing_delegate_at_start_stores_no_case() {
    init_tracing();
    let model = CaseModelBuilder::new("brokenStart")
        .item(ItemBuilder::service_task("boom", "boom"))
        .build();
    let mut registry = DelegateRegistry::with_builtins();
    registry.register("boom", FailingDelegate::new("boom"));
    let engine = TestEngine::with_delegates([model], registry);

    let err = engine
        .service
        .start_case("brokenStart", VariableMap::new())
        .unwrap_err();

    assert!(matches!(err, CaseError::DelegateFailure { .. }), "got {err:?}");
    assert!(engine.service.store().case_ids().is_empty());
    assert!(engine.history.events().is_empty());
}

#[test]
fn unregistered_delegate_is_object_not_found() {
    init_tracing();
    let model = CaseModelBuilder::new("missing")
        .item(ItemBuilder::service_task("call", "nobody"))
        .build();
    let engine = TestEngine::new([model]);

    let err = engine
        .service
        .start_case("missing", VariableMap::new())
        .unwrap_err();

    assert!(matches!(err, CaseError::ObjectNotFound(_)), "got {err:?}");
}

#[test]
fn wait_delegate_keeps_the_task_active_until_triggered() {
    init_tracing();
    let model = CaseModelBuilder::new("waiting")
        .item(ItemBuilder::service_task("approve", "wait"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("waiting");
    assert_eq!(engine.state(case.id, "approve"), Active);

    engine.trigger(case.id, "approve").unwrap();

    assert_eq!(engine.state(case.id, "approve"), Completed);
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
}

#[test]
fn ready_future_completes_within_the_blocking_cycle() {
    init_tracing();
    let model = CaseModelBuilder::new("future")
        .item(ItemBuilder::service_task("fetch", "fetcher"))
        .item(
            ItemBuilder::human_task("use")
                .entry(SentryBuilder::new("afterFetch").on("fetch", PlanItemTransition::Complete)),
        )
        .build();
    let mut registry = DelegateRegistry::with_builtins();
    registry.register("fetcher", FutureDelegate::ready(vars([("rows", json!(3))])));
    let engine = TestEngine::with_delegates([model], registry);

    let case = engine.start("future");

    let variables = engine.case(case.id).variables;
    assert_eq!(variables.get("rows"), Some(&json!(3)));
    assert_eq!(variables.get("fetchDone"), Some(&json!(true)));
    assert_eq!(engine.state(case.id, "fetch"), Completed);
    assert_eq!(engine.state(case.id, "use"), Active);
}

#[test]
fn decision_task_runs_the_registered_decision() {
    init_tracing();
    let model = CaseModelBuilder::new("decide")
        .item(ItemBuilder::decision_task("route", "routing"))
        .item(
            ItemBuilder::human_task("manualReview")
                .entry(SentryBuilder::new("needsReview").if_part("${route == \"manual\"}")),
        )
        .build();
    let routing = RecordingDelegate::with_output(vars([("route", json!("manual"))]));
    let mut registry = DelegateRegistry::with_builtins();
    registry.register("routing", routing.clone());
    let engine = TestEngine::with_delegates([model], registry);

    let case = engine.start("decide");

    assert_eq!(routing.calls(), vec!["route".to_string()]);
    assert_eq!(engine.state(case.id, "route"), Completed);
    assert_eq!(engine.state(case.id, "manualReview"), Active);
}

#[test]
fn async_service_task_runs_through_the_job_queue() {
    init_tracing();
    let model = CaseModelBuilder::new("asyncCall")
        .item(ItemBuilder::service_task("notify", "notifier").async_activation())
        .build();
    let notifier = RecordingDelegate::new();
    let mut registry = DelegateRegistry::with_builtins();
    registry.register("notifier", notifier.clone());
    let engine = TestEngine::with_delegates([model], registry);

    let case = engine.start("asyncCall");

    assert_eq!(engine.state(case.id, "notify"), AsyncActive);
    assert!(notifier.calls().is_empty());
    assert_eq!(engine.jobs.len(), 1);

    assert_eq!(engine.run_all_jobs(), 1);

    assert_eq!(notifier.calls(), vec!["notify".to_string()]);
    assert_eq!(engine.state(case.id, "notify"), Completed);
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
    assert!(engine.jobs.is_empty());
}

#[test]
fn failed_async_job_stays_queued_for_a_retry() {
    init_tracing();
    let model = CaseModelBuilder::new("flaky")
        .item(ItemBuilder::service_task("notify", "notifier").async_activation())
        .build();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let mut registry = DelegateRegistry::with_builtins();
    registry.register(
        "notifier",
        move |_: &DelegateContext| -> anyhow::Result<DelegateResult> {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("mail server unavailable");
            }
            Ok(DelegateResult::completed())
        },
    );
    let engine = TestEngine::with_delegates([model], registry);
    let case = engine.start("flaky");

    assert_eq!(engine.run_all_jobs(), 0);
    assert_eq!(engine.state(case.id, "notify"), AsyncActive);
    assert_eq!(engine.jobs.len(), 1);

    assert_eq!(engine.run_all_jobs(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(engine.state(case.id, "notify"), Completed);
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
    assert!(engine.jobs.is_empty());
}
