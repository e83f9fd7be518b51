// tests/stage_completion.rs

mod common;
use crate::common::{CaseModelBuilder, ItemBuilder, SentryBuilder, TestEngine, init_tracing, vars};

use caseflow::errors::CaseError;
use caseflow::model::CaseDefinition;
use caseflow::plan::{CompletionVerdict, Container};
use caseflow::types::{CaseState, PlanItemState, PlanItemTransition};
use serde_json::json;

use PlanItemState::*;

/// Stage A holds an optional manual task A and a required task B; task C
/// is a required sibling of the stage. Stage auto-complete follows the
/// `enableStageAutoComplete` variable.
fn stage_model() -> CaseDefinition {
    CaseModelBuilder::new("stageCompletion")
        .item(ItemBuilder::stage("stageA").auto_complete_if("${enableStageAutoComplete}"))
        .item(
            ItemBuilder::human_task("taskA")
                .parent("stageA")
                .manual_activation(),
        )
        .item(ItemBuilder::human_task("taskB").parent("stageA").required())
        .item(ItemBuilder::human_task("taskC").required())
        .build()
}

fn states(engine: &TestEngine, case_id: caseflow::plan::CaseInstanceId) -> Vec<(String, PlanItemState)> {
    engine.states(case_id)
}

fn expected(pairs: &[(&str, PlanItemState)]) -> Vec<(String, PlanItemState)> {
    pairs.iter().map(|(id, state)| (id.to_string(), *state)).collect()
}

#[test]
fn start_activates_everything_without_entry_criteria() {
    init_tracing();
    let engine = TestEngine::new([stage_model()]);
    let case = engine.start_with("stageCompletion", vars([("enableStageAutoComplete", json!(false))]));

    assert_eq!(
        states(&engine, case.id),
        expected(&[
            ("stageA", Active),
            ("taskA", Enabled),
            ("taskB", Active),
            ("taskC", Active),
        ])
    );
}

#[test]
fn enabled_optional_task_keeps_stage_open_without_auto_complete() {
    init_tracing();
    let engine = TestEngine::new([stage_model()]);
    let case = engine.start_with("stageCompletion", vars([("enableStageAutoComplete", json!(false))]));

    engine.trigger(case.id, "taskB").unwrap();

    assert_eq!(
        states(&engine, case.id),
        expected(&[
            ("stageA", Active),
            ("taskA", Enabled),
            ("taskB", Completed),
            ("taskC", Active),
        ])
    );
    let stage = engine.id(case.id, "stageA");
    assert_eq!(
        engine
            .service
            .completion_verdict(case.id, Container::Stage(stage))
            .unwrap(),
        CompletionVerdict::Completable
    );

    // Completable on request: the enabled task is terminated with it.
    engine.service.complete_stage(stage).unwrap();
    assert_eq!(engine.state(case.id, "stageA"), Completed);
    assert_eq!(engine.state(case.id, "taskA"), Terminated);
    assert_eq!(engine.case(case.id).state, CaseState::Active);

    engine.trigger(case.id, "taskC").unwrap();
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
    assert_eq!(engine.finished_cases(), 1);
}

#[test]
fn auto_complete_stage_completes_once_required_work_is_done() {
    init_tracing();
    let engine = TestEngine::new([stage_model()]);
    let case = engine.start_with("stageCompletion", vars([("enableStageAutoComplete", json!(true))]));

    engine.trigger(case.id, "taskB").unwrap();

    assert_eq!(engine.state(case.id, "stageA"), Completed);
    assert_eq!(engine.state(case.id, "taskA"), Terminated);
    let live: Vec<String> = engine
        .live(case.id)
        .into_iter()
        .map(|item| item.definition_id)
        .collect();
    assert_eq!(live, vec!["taskC".to_string()]);
}

#[test]
fn manual_completion_names_the_blocking_item() {
    init_tracing();
    let engine = TestEngine::new([stage_model()]);
    let case = engine.start_with("stageCompletion", vars([("enableStageAutoComplete", json!(false))]));
    let stage = engine.id(case.id, "stageA");
    let before = states(&engine, case.id);

    let err = engine.service.complete_stage(stage).unwrap_err();
    assert!(matches!(err, CaseError::IllegalArgument(_)), "got {err:?}");
    assert!(
        err.to_string().contains(
            "Can only complete a stage plan item instance which is marked as completable. \
             The plan item 'taskB' prevented it from completion."
        ),
        "unexpected message: {err}"
    );
    assert_eq!(
        engine.service.completion_blocker(stage).unwrap().as_deref(),
        Some("The plan item 'taskB' prevented it from completion.")
    );
    // Nothing of the refused cycle was committed.
    assert_eq!(states(&engine, case.id), before);

    let err = engine.service.complete_case(case.id).unwrap_err();
    assert!(
        err.to_string().contains(
            "Can only complete a case instance which is marked as completable. \
             The plan item 'stageA' prevented it from completion."
        ),
        "unexpected message: {err}"
    );
}

#[test]
fn force_completion_terminates_running_children() {
    init_tracing();
    let engine = TestEngine::new([stage_model()]);
    let case = engine.start_with("stageCompletion", vars([("enableStageAutoComplete", json!(false))]));

    engine
        .service
        .force_complete_stage(engine.id(case.id, "stageA"))
        .unwrap();
    assert_eq!(
        states(&engine, case.id),
        expected(&[
            ("stageA", Completed),
            ("taskA", Terminated),
            ("taskB", Terminated),
            ("taskC", Active),
        ])
    );

    let ended = engine.service.force_complete_case(case.id).unwrap();
    assert_eq!(ended.state, CaseState::Completed);
    assert!(engine.live(case.id).is_empty());
    assert_eq!(engine.state(case.id, "taskC"), Terminated);
}

#[test]
fn required_enabled_item_blocks_even_an_auto_completing_stage() {
    init_tracing();
    let model = CaseModelBuilder::new("requiredEnabled")
        .item(ItemBuilder::stage("stage").auto_complete(true))
        .item(
            ItemBuilder::human_task("mustDo")
                .parent("stage")
                .required()
                .manual_activation(),
        )
        .item(ItemBuilder::human_task("other").parent("stage"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("requiredEnabled");

    engine.trigger(case.id, "other").unwrap();

    let stage = engine.id(case.id, "stage");
    assert_eq!(engine.state(case.id, "stage"), Active);
    assert!(matches!(
        engine
            .service
            .completion_verdict(case.id, Container::Stage(stage))
            .unwrap(),
        CompletionVerdict::NotCompletable { ref blocker_name, .. } if blocker_name == "mustDo"
    ));

    // Starting and finishing the required item lets the stage go.
    engine.trigger(case.id, "mustDo").unwrap();
    assert_eq!(engine.state(case.id, "mustDo"), Active);
    engine.trigger(case.id, "mustDo").unwrap();
    assert_eq!(engine.state(case.id, "stage"), Completed);
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
}

fn neutral_model(neutral: bool) -> CaseDefinition {
    let mut waiting = ItemBuilder::human_task("later")
        .parent("stage")
        .entry(SentryBuilder::new("onGo").on("go", PlanItemTransition::Occur));
    if neutral {
        waiting = waiting.completion_neutral();
    }
    CaseModelBuilder::new("neutral")
        .item(ItemBuilder::stage("stage"))
        .item(ItemBuilder::human_task("work").parent("stage"))
        .item(waiting)
        .item(ItemBuilder::user_listener("go").parent("stage"))
        .item(ItemBuilder::human_task("outside"))
        .build()
}

#[test]
fn available_optional_item_holds_back_natural_completion() {
    init_tracing();
    let engine = TestEngine::new([neutral_model(false)]);
    let case = engine.start("neutral");

    engine.trigger(case.id, "work").unwrap();

    assert_eq!(engine.state(case.id, "later"), Available);
    assert_eq!(engine.state(case.id, "go"), Available);
    assert_eq!(engine.state(case.id, "stage"), Active);
}

#[test]
fn completion_neutral_items_and_listeners_do_not_hold_back_completion() {
    init_tracing();
    let engine = TestEngine::new([neutral_model(true)]);
    let case = engine.start("neutral");

    engine.trigger(case.id, "work").unwrap();

    assert_eq!(engine.state(case.id, "stage"), Completed);
    assert_eq!(engine.state(case.id, "later"), Terminated);
    assert_eq!(engine.state(case.id, "go"), Terminated);
    assert_eq!(engine.state(case.id, "outside"), Active);
}

#[test]
fn active_case_page_does_not_block_and_completes_with_its_stage() {
    init_tracing();
    let model = CaseModelBuilder::new("pages")
        .item(ItemBuilder::stage("stage"))
        .item(ItemBuilder::case_page("overview").parent("stage"))
        .item(ItemBuilder::human_task("work").parent("stage"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("pages");
    assert_eq!(engine.state(case.id, "overview"), Active);

    engine.trigger(case.id, "work").unwrap();

    assert_eq!(engine.state(case.id, "stage"), Completed);
    assert_eq!(engine.state(case.id, "overview"), Completed);
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
}

#[test]
fn nested_stages_complete_innermost_first() {
    init_tracing();
    let model = CaseModelBuilder::new("nested")
        .item(ItemBuilder::stage("outer"))
        .item(ItemBuilder::stage("inner").parent("outer"))
        .item(ItemBuilder::human_task("work").parent("inner"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("nested");

    engine.trigger(case.id, "work").unwrap();

    let order: Vec<String> = engine
        .events_for(case.id)
        .into_iter()
        .filter_map(|event| match event {
            caseflow::history::HistoryEvent::PlanItemTransitioned {
                definition_id,
                transition: PlanItemTransition::Complete,
                ..
            } => Some(definition_id),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["work", "inner", "outer"]);
    assert_eq!(engine.case(case.id).state, CaseState::Completed);
}

#[test]
fn switching_auto_complete_on_completes_a_completable_stage_in_the_same_call() {
    init_tracing();
    let engine = TestEngine::new([stage_model()]);
    let case = engine.start_with("stageCompletion", vars([("enableStageAutoComplete", json!(false))]));
    engine.trigger(case.id, "taskB").unwrap();
    assert_eq!(engine.state(case.id, "stageA"), Active);

    engine
        .service
        .set_variable(case.id, "enableStageAutoComplete", json!(true))
        .unwrap();

    assert_eq!(engine.state(case.id, "stageA"), Completed);
    assert_eq!(engine.state(case.id, "taskA"), Terminated);
    assert_eq!(engine.state(case.id, "taskC"), Active);
    assert_eq!(engine.case(case.id).state, CaseState::Active);
}

#[test]
fn case_page_that_never_started_is_terminated_with_its_stage() {
    init_tracing();
    let model = CaseModelBuilder::new("latePage")
        .item(ItemBuilder::stage("stage"))
        .item(ItemBuilder::human_task("work").parent("stage"))
        .item(
            ItemBuilder::case_page("summary")
                .parent("stage")
                .entry(SentryBuilder::new("onPublish").if_part("${published}")),
        )
        .item(ItemBuilder::human_task("keep"))
        .build();
    let engine = TestEngine::new([model]);
    let case = engine.start("latePage");
    engine.trigger(case.id, "work").unwrap();
    assert_eq!(engine.state(case.id, "summary"), Available);

    engine
        .service
        .complete_stage(engine.id(case.id, "stage"))
        .unwrap();

    assert_eq!(engine.state(case.id, "stage"), Completed);
    let summary = engine.item(case.id, "summary");
    assert_eq!(summary.state, Terminated);
    assert_eq!(summary.last_transition, PlanItemTransition::ParentTerminate);
}
