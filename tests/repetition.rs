// tests/repetition.rs

mod common;
use crate::common::{CaseModelBuilder, ItemBuilder, SentryBuilder, TestEngine, init_tracing};

use caseflow::delegate::DelegateRegistry;
use caseflow::engine::EngineConfig;
use caseflow::plan::{CaseInstanceId, PlanItemInstance};
use caseflow::types::{CaseState, PlanItemState, PlanItemTransition};
use serde_json::json;

use PlanItemState::*;

fn summary(items: &[PlanItemInstance]) -> Vec<(u32, PlanItemState)> {
    items
        .iter()
        .map(|item| (item.repetition_counter, item.state))
        .collect()
}

fn complete_newest(engine: &TestEngine, case_id: CaseInstanceId, definition_id: &str) {
    engine.trigger(case_id, definition_id).unwrap();
}

#[test]
fn repeatable_task_is_recreated_until_the_instance_limit() {
    init_tracing();
    let model = CaseModelBuilder::new("repeat")
        .item(ItemBuilder::human_task("review").repeatable().max_instances(3))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("repeat");

    let first = engine.item(case.id, "review");
    assert_eq!(first.repetition_counter, 1);
    assert_eq!(first.local_variables["repetitionCounter"], json!(1));

    complete_newest(&engine, case.id, "review");
    let second = engine.item(case.id, "review");
    assert_eq!(second.state, Active);
    assert_eq!(second.local_variables["repetitionCounter"], json!(2));

    complete_newest(&engine, case.id, "review");
    complete_newest(&engine, case.id, "review");

    assert_eq!(
        summary(&engine.instances(case.id, "review")),
        vec![(1, Completed), (2, Completed), (3, Completed)]
    );
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
}

#[test]
fn repetition_condition_sees_the_item_counter() {
    init_tracing();
    let model = CaseModelBuilder::new("counted")
        .item(ItemBuilder::human_task("attempt").repeat_if("${repetitionCounter < 2}"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("counted");

    complete_newest(&engine, case.id, "attempt");
    complete_newest(&engine, case.id, "attempt");

    assert_eq!(
        summary(&engine.instances(case.id, "attempt")),
        vec![(1, Completed), (2, Completed)]
    );
}

#[test]
fn repeated_item_with_entry_criteria_waits_for_its_sentry() {
    init_tracing();
    let model = CaseModelBuilder::new("requests")
        .item(ItemBuilder::user_listener("request").repeatable())
        .item(
            ItemBuilder::human_task("handle")
                .repeatable()
                .entry(SentryBuilder::new("onRequest").on("request", PlanItemTransition::Occur)),
        )
        .item(ItemBuilder::human_task("keep"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("requests");
    assert_eq!(engine.state(case.id, "handle"), Available);

    complete_newest(&engine, case.id, "request");
    assert_eq!(
        summary(&engine.instances(case.id, "request")),
        vec![(1, Completed), (2, Available)]
    );
    assert_eq!(
        summary(&engine.instances(case.id, "handle")),
        vec![(1, Active)]
    );

    complete_newest(&engine, case.id, "handle");
    assert_eq!(
        summary(&engine.instances(case.id, "handle")),
        vec![(1, Completed), (2, WaitingForRepetition)]
    );

    complete_newest(&engine, case.id, "request");
    assert_eq!(
        summary(&engine.instances(case.id, "handle")),
        vec![(1, Completed), (2, Active)]
    );
}

#[test]
fn exit_repeats_but_completion_stops_when_ignoring_after_first_completion() {
    init_tracing();
    let model = CaseModelBuilder::new("retry")
        .item(ItemBuilder::user_listener("skip"))
        .item(
            ItemBuilder::human_task("work")
                .repeatable()
                .ignore_after_first_completion()
                .exit(SentryBuilder::new("onSkip").on("skip", PlanItemTransition::Occur)),
        )
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("retry");

    complete_newest(&engine, case.id, "skip");
    assert_eq!(
        summary(&engine.instances(case.id, "work")),
        vec![(1, Terminated), (2, Active)]
    );
    assert_eq!(
        engine.instances(case.id, "work")[0].exit_criterion_id.as_deref(),
        Some("onSkip")
    );

    complete_newest(&engine, case.id, "work");
    assert_eq!(
        summary(&engine.instances(case.id, "work")),
        vec![(1, Terminated), (2, Completed)]
    );
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
}

#[test]
fn manual_termination_does_not_repeat() {
    init_tracing();
    let model = CaseModelBuilder::new("stop")
        .item(ItemBuilder::human_task("loop").repeatable())
        .item(ItemBuilder::human_task("keep"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("stop");

    engine
        .service
        .terminate_plan_item(engine.id(case.id, "loop"))
        .unwrap();

    assert_eq!(
        summary(&engine.instances(case.id, "loop")),
        vec![(1, Terminated)]
    );
}

#[test]
fn counter_variable_name_is_configurable() {
    init_tracing();
    let model = CaseModelBuilder::new("rounds")
        .item(ItemBuilder::human_task("round").repeatable().max_instances(2))
        .build();
    let config = EngineConfig {
        repetition_counter_variable: "round".to_string(),
        ..EngineConfig::default()
    };
    let engine = TestEngine::with_config([model], DelegateRegistry::with_builtins(), config);
    let case = engine.start("rounds");

    complete_newest(&engine, case.id, "round");

    let latest = engine.item(case.id, "round");
    assert_eq!(latest.local_variables.get("round"), Some(&json!(2)));
    assert!(!latest.local_variables.contains_key("repetitionCounter"));
}

#[test]
fn variable_only_exit_ends_a_repeatable_item_for_good() {
    init_tracing();
    let model = CaseModelBuilder::new("stopper")
        .item(
            ItemBuilder::human_task("work")
                .repeatable()
                .exit(SentryBuilder::new("stopIt").if_part("${stop}")),
        )
        .item(ItemBuilder::human_task("keep"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("stopper");

    engine
        .service
        .set_variable(case.id, "stop", json!(true))
        .unwrap();

    assert_eq!(
        summary(&engine.instances(case.id, "work")),
        vec![(1, Terminated)]
    );
    assert_eq!(
        engine.instances(case.id, "work")[0].exit_criterion_id.as_deref(),
        Some("stopIt")
    );
    assert_eq!(engine.state(case.id, "keep"), Active);
    assert_eq!(engine.case(case.id).state, CaseState::Active);
}

#[test]
fn repeatable_milestone_on_a_variable_only_entry_occurs_once() {
    init_tracing();
    let model = CaseModelBuilder::new("threshold")
        .item(
            ItemBuilder::milestone("reached")
                .repeatable()
                .entry(SentryBuilder::new("overLimit").if_part("${total > 100}")),
        )
        .item(ItemBuilder::human_task("keep"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("threshold");

    engine
        .service
        .set_variable(case.id, "total", json!(150))
        .unwrap();

    assert_eq!(
        summary(&engine.instances(case.id, "reached")),
        vec![(1, Completed)]
    );
    assert_eq!(engine.state(case.id, "keep"), Active);
}
