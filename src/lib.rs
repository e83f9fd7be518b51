// src/lib.rs

pub mod cli;
pub mod config;
pub mod delegate;
pub mod engine;
pub mod errors;
pub mod expr;
pub mod history;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod plan;
pub mod store;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, Step};
use crate::config::loader::load_and_validate;
use crate::config::model::ModelFile;
use crate::delegate::{DelegateRegistry, WaitDelegate};
use crate::engine::{CaseCommand, CaseService, Runtime, RuntimeHandle};
use crate::history::{CompositeHistory, HistorySink, MemoryHistory, TracingHistory};
use crate::model::{CaseDefinition, InMemoryModelProvider, PlanItemDefId, PlanItemKind};
use crate::plan::{CaseInstance, CaseInstanceId, PlanItemInstanceId};
use crate::types::VariableMap;

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Validate { model } => {
            let file = load_model(&model)?;
            print_model(&file);
            Ok(())
        }
        Command::Run {
            model,
            case_key,
            vars,
            steps,
            history,
        } => {
            let file = load_model(&model)?;
            let variables: VariableMap = vars.into_iter().collect();
            run_case(file, case_key, variables, &steps, history).await
        }
    }
}

fn load_model(path: &Path) -> Result<ModelFile> {
    load_and_validate(path).with_context(|| format!("loading model {}", path.display()))
}

/// Starts one case on an in-memory engine behind the async runtime, applies
/// the steps in order and prints the resulting plan item table.
///
/// Delegates the model names that are not built in are registered as
/// waiting delegates, so `trigger:<item>` completes them.
async fn run_case(
    file: ModelFile,
    case_key: Option<String>,
    variables: VariableMap,
    steps: &[Step],
    print_history: bool,
) -> Result<()> {
    let key = match case_key {
        Some(key) => key,
        None => file
            .keys()
            .next()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("model file has no cases"))?,
    };
    if file.case(&key).is_none() {
        bail!("model file has no case '{key}'");
    }

    let mut delegates = DelegateRegistry::with_builtins();
    for name in file.cases.iter().flat_map(delegate_names) {
        if !delegates.contains(&name) {
            debug!(delegate = %name, "stubbing delegate with a wait state");
            delegates.register(name, WaitDelegate);
        }
    }

    let models = Arc::new(InMemoryModelProvider::new());
    models.deploy_all(file.cases.iter().cloned())?;
    let memory = Arc::new(MemoryHistory::new());
    let history: Arc<dyn HistorySink> = Arc::new(CompositeHistory::new(vec![
        Arc::new(TracingHistory) as Arc<dyn HistorySink>,
        Arc::clone(&memory) as Arc<dyn HistorySink>,
    ]));

    let service = Arc::new(
        CaseService::builder(models)
            .history(history)
            .delegates(delegates)
            .config(file.engine.clone())
            .build(),
    );
    let (runtime, handle) = Runtime::new(Arc::clone(&service), 16);
    let runtime_task = tokio::spawn(runtime.run());

    let outcome = drive_steps(&service, &handle, &key, variables, steps).await;

    handle.shutdown().await;
    runtime_task
        .await
        .map_err(|err| anyhow!("runtime task panicked: {err}"))??;

    let case = outcome?;
    print_case(&service, &case)?;
    if print_history {
        println!();
        println!("history:");
        for event in memory.events() {
            println!("  {}", serde_json::to_string(&event)?);
        }
    }
    Ok(())
}

async fn drive_steps(
    service: &CaseService,
    handle: &RuntimeHandle,
    key: &str,
    variables: VariableMap,
    steps: &[Step],
) -> Result<CaseInstance> {
    let case = handle
        .submit(CaseCommand::StartCase {
            definition_key: key.to_string(),
            business_key: None,
            variables,
        })
        .await?;
    info!(case_id = %case.id, case = %key, "case started");

    for step in steps {
        debug!(?step, "applying step");
        let command = step_command(service, case.id, step)?;
        match command {
            Some(command) => {
                handle
                    .submit(command)
                    .await
                    .with_context(|| format!("step {step:?}"))?;
            }
            None => {
                for job in service.jobs().take_due(DateTime::<Utc>::MAX_UTC) {
                    handle
                        .submit(CaseCommand::ExecuteJob { job })
                        .await
                        .with_context(|| format!("step {step:?}"))?;
                }
            }
        }
    }

    Ok(service.case_instance(case.id)?)
}

/// Command for a step; `None` for [`Step::Jobs`].
fn step_command(
    service: &CaseService,
    case_id: CaseInstanceId,
    step: &Step,
) -> Result<Option<CaseCommand>> {
    let item = |id: &str| resolve_item(service, case_id, id);
    let command = match step {
        Step::Trigger(id) => CaseCommand::Trigger {
            plan_item: item(id.as_str())?,
        },
        Step::Start(id) => CaseCommand::StartPlanItem {
            plan_item: item(id.as_str())?,
        },
        Step::Enable(id) => CaseCommand::EnablePlanItem {
            plan_item: item(id.as_str())?,
        },
        Step::Disable(id) => CaseCommand::DisablePlanItem {
            plan_item: item(id.as_str())?,
        },
        Step::Suspend(id) => CaseCommand::SuspendPlanItem {
            plan_item: item(id.as_str())?,
        },
        Step::Resume(id) => CaseCommand::ResumePlanItem {
            plan_item: item(id.as_str())?,
        },
        Step::Terminate(id) => CaseCommand::TerminatePlanItem {
            plan_item: item(id.as_str())?,
        },
        Step::CompleteStage(id) => CaseCommand::CompleteStage {
            stage: item(id.as_str())?,
            force: false,
        },
        Step::ForceCompleteStage(id) => CaseCommand::CompleteStage {
            stage: item(id.as_str())?,
            force: true,
        },
        Step::Set(name, value) => CaseCommand::SetVariables {
            case_id,
            variables: VariableMap::from([(name.clone(), value.clone())]),
        },
        Step::Signal(name) => CaseCommand::Signal {
            case_id,
            name: name.clone(),
        },
        Step::Jobs => return Ok(None),
        Step::CompleteCase => CaseCommand::CompleteCase {
            case_id,
            force: false,
        },
        Step::ForceCompleteCase => CaseCommand::CompleteCase {
            case_id,
            force: true,
        },
        Step::TerminateCase => CaseCommand::TerminateCase { case_id },
    };
    Ok(Some(command))
}

/// Newest live instance of a model item.
fn resolve_item(
    service: &CaseService,
    case_id: CaseInstanceId,
    definition_id: &str,
) -> Result<PlanItemInstanceId> {
    service
        .plan_items_by_definition(case_id, definition_id)?
        .into_iter()
        .rev()
        .find(|item| item.is_live())
        .map(|item| item.id)
        .ok_or_else(|| anyhow!("no live instance of plan item '{definition_id}'"))
}

fn delegate_names(definition: &CaseDefinition) -> Vec<String> {
    definition
        .items()
        .filter_map(|item| match &item.kind {
            PlanItemKind::ServiceTask { delegate, .. } => Some(delegate.clone()),
            PlanItemKind::DecisionTask { decision } => Some(decision.clone()),
            _ => None,
        })
        .collect()
}

/// Plan item tree of every case in the file.
fn print_model(file: &ModelFile) {
    println!("caseflow model");
    println!(
        "  engine.max_agenda_operations = {}",
        file.engine.max_agenda_operations
    );
    println!(
        "  engine.max_concurrent_delegates = {}",
        file.engine.max_concurrent_delegates
    );
    println!();

    for case in file.cases.iter() {
        println!("case {} ({} items):", case.key, case.items.len());
        for criterion in case.exit_criteria.iter() {
            println!("  exit {} [{:?}]", criterion.id, criterion.exit_type);
        }
        print_children(case, None);
    }

    debug!("validation complete (no execution)");
}

fn print_children(case: &CaseDefinition, parent: Option<PlanItemDefId>) {
    for idx in case.children_of(parent) {
        let item = case.item(*idx);
        let indent = "  ".repeat(item.depth + 1);
        let mut flags = Vec::new();
        if item.required {
            flags.push("required");
        }
        if item.is_repeatable() {
            flags.push("repeatable");
        }
        if item.completion_neutral {
            flags.push("completion_neutral");
        }
        if !item.manual_activation.is_constant_false() {
            flags.push("manual_activation");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{indent}- {} ({}){flags}", item.id, item.kind.type_name());
        for criterion in item.entry_criteria.iter() {
            println!("{indent}    entry {}", criterion.id);
        }
        for criterion in item.exit_criteria.iter() {
            println!("{indent}    exit {} [{:?}]", criterion.id, criterion.exit_type);
        }
        print_children(case, Some(item.index));
    }
}

fn print_case(service: &CaseService, case: &CaseInstance) -> Result<()> {
    println!("case {} ({}) {}", case.definition_key, case.id, case.state);
    if !case.variables.is_empty() {
        println!("  variables: {}", serde_json::to_string(&case.variables)?);
    }
    println!();
    println!("{:<24} {:<24} {:<24} {:>4}", "ITEM", "KIND", "STATE", "REP");
    for item in service.plan_items(case.id)? {
        println!(
            "{:<24} {:<24} {:<24} {:>4}",
            item.definition_id, item.kind, item.state, item.repetition_counter
        );
    }
    Ok(())
}
