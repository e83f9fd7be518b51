// src/engine/service.rs

//! Case instance controller.
//!
//! Every public operation opens exactly one cycle: load the case (or create
//! it), queue the operation the command implies, drain the agenda to a
//! settle point and commit the working copy with an optimistic version
//! check. History and jobs are published only after the commit succeeded.
//! Work for other cases (child case start, termination, completion
//! reporting) runs afterwards as separate cycles.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::delegate::DelegateRegistry;
use crate::errors::{CaseError, Result};
use crate::expr::{BuiltinEvaluator, ExpressionEvaluator};
use crate::history::{HistorySink, TracingHistory};
use crate::jobs::{Job, JobKind, JobQueue, MemoryJobQueue};
use crate::model::{CaseDefinition, ModelProvider};
use crate::plan::{
    Behavior, CaseInstance, CaseInstanceId, CompletionArbiter, CompletionVerdict, Container,
    ParentLink, PlanItemInstance, PlanItemInstanceId,
};
use crate::store::{CaseStore, MemoryStore};
use crate::types::{CompletionMode, PlanItemState, PlanItemTransition, VariableMap};

use super::agenda::Operation;
use super::execution::{CaseExecution, ExecutionContext};
use super::{DrainOutcome, EngineConfig, FollowUp};

/// An external request against the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseCommand {
    StartCase {
        definition_key: String,
        business_key: Option<String>,
        variables: VariableMap,
    },
    /// Start an `ENABLED` item, complete an `ACTIVE` one, or make an
    /// `AVAILABLE` event listener occur.
    Trigger { plan_item: PlanItemInstanceId },
    StartPlanItem { plan_item: PlanItemInstanceId },
    EnablePlanItem { plan_item: PlanItemInstanceId },
    DisablePlanItem { plan_item: PlanItemInstanceId },
    SuspendPlanItem { plan_item: PlanItemInstanceId },
    ResumePlanItem { plan_item: PlanItemInstanceId },
    TerminatePlanItem { plan_item: PlanItemInstanceId },
    CompleteStage { stage: PlanItemInstanceId, force: bool },
    CompleteCase { case_id: CaseInstanceId, force: bool },
    SetVariables {
        case_id: CaseInstanceId,
        variables: VariableMap,
    },
    SetLocalVariables {
        plan_item: PlanItemInstanceId,
        variables: VariableMap,
    },
    TerminateCase { case_id: CaseInstanceId },
    EvaluateCriteria { case_id: CaseInstanceId },
    Signal { case_id: CaseInstanceId, name: String },
    ExecuteJob { job: Job },
}

impl CaseCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CaseCommand::StartCase { .. } => "start_case",
            CaseCommand::Trigger { .. } => "trigger",
            CaseCommand::StartPlanItem { .. } => "start",
            CaseCommand::EnablePlanItem { .. } => "enable",
            CaseCommand::DisablePlanItem { .. } => "disable",
            CaseCommand::SuspendPlanItem { .. } => "suspend",
            CaseCommand::ResumePlanItem { .. } => "resume",
            CaseCommand::TerminatePlanItem { .. } => "terminate",
            CaseCommand::CompleteStage { .. } => "complete_stage",
            CaseCommand::CompleteCase { .. } => "complete_case",
            CaseCommand::SetVariables { .. } => "set_variables",
            CaseCommand::SetLocalVariables { .. } => "set_local_variables",
            CaseCommand::TerminateCase { .. } => "terminate_case",
            CaseCommand::EvaluateCriteria { .. } => "evaluate_criteria",
            CaseCommand::Signal { .. } => "signal",
            CaseCommand::ExecuteJob { .. } => "execute_job",
        }
    }
}

/// Removes its case from the set of cases in a cycle when dropped.
#[derive(Debug)]
struct CycleGuard {
    active: Arc<Mutex<HashSet<CaseInstanceId>>>,
    case_id: CaseInstanceId,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        match self.active.lock() {
            Ok(mut active) => {
                active.remove(&self.case_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.case_id);
            }
        }
    }
}

/// An opened cycle: the working copy plus exclusive use of its case for
/// this controller.
#[derive(Debug)]
pub struct Cycle {
    execution: CaseExecution,
    new_case: bool,
    _guard: CycleGuard,
}

impl Cycle {
    pub fn execution(&self) -> &CaseExecution {
        &self.execution
    }

    pub fn execution_mut(&mut self) -> &mut CaseExecution {
        &mut self.execution
    }
}

/// Drain a cycle, resolving delegate futures on the calling thread.
pub fn drive_blocking(execution: &mut CaseExecution) -> Result<()> {
    loop {
        match execution.drain()? {
            DrainOutcome::Settled => return Ok(()),
            DrainOutcome::Suspended { pending } => {
                let delegates = execution.take_pending_delegates();
                if delegates.is_empty() {
                    return Err(CaseError::Other(anyhow!(
                        "cycle suspended on {pending} delegates but no future is available"
                    )));
                }
                for delegate in delegates {
                    debug!(plan_item = %delegate.plan_item, delegate = %delegate.delegate, "awaiting delegate future");
                    let result = futures::executor::block_on(delegate.future);
                    execution.resume_delegate(delegate.plan_item, result)?;
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct CaseService {
    models: Arc<dyn ModelProvider>,
    store: Arc<dyn CaseStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    history: Arc<dyn HistorySink>,
    jobs: Arc<dyn JobQueue>,
    delegates: Arc<DelegateRegistry>,
    config: EngineConfig,
    active: Arc<Mutex<HashSet<CaseInstanceId>>>,
}

#[derive(Debug)]
pub struct CaseServiceBuilder {
    models: Arc<dyn ModelProvider>,
    store: Option<Arc<dyn CaseStore>>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    history: Option<Arc<dyn HistorySink>>,
    jobs: Option<Arc<dyn JobQueue>>,
    delegates: Option<DelegateRegistry>,
    config: EngineConfig,
}

impl CaseServiceBuilder {
    pub fn store(mut self, store: Arc<dyn CaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn jobs(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn delegates(mut self, delegates: DelegateRegistry) -> Self {
        self.delegates = Some(delegates);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Unset collaborators default to the in-memory store and job queue,
    /// the built-in evaluator, tracing history and the built-in delegates.
    pub fn build(self) -> CaseService {
        CaseService {
            models: self.models,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            evaluator: self.evaluator.unwrap_or_else(|| Arc::new(BuiltinEvaluator)),
            history: self.history.unwrap_or_else(|| Arc::new(TracingHistory)),
            jobs: self.jobs.unwrap_or_else(|| Arc::new(MemoryJobQueue::new())),
            delegates: Arc::new(self.delegates.unwrap_or_else(DelegateRegistry::with_builtins)),
            config: self.config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl CaseService {
    pub fn builder(models: Arc<dyn ModelProvider>) -> CaseServiceBuilder {
        CaseServiceBuilder {
            models,
            store: None,
            evaluator: None,
            history: None,
            jobs: None,
            delegates: None,
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    pub fn jobs(&self) -> &Arc<dyn JobQueue> {
        &self.jobs
    }

    pub fn models(&self) -> &Arc<dyn ModelProvider> {
        &self.models
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Run a command as one cycle, resolving delegate futures inline, then
    /// run the follow-up cycles it caused.
    pub fn execute(&self, command: CaseCommand) -> Result<CaseInstance> {
        let mut cycle = self.prepare(command)?;
        drive_blocking(cycle.execution_mut())?;
        let (case, follow_ups) = self.commit(cycle)?;
        self.run_follow_ups(follow_ups);
        Ok(case)
    }

    pub fn start_case(&self, definition_key: &str, variables: VariableMap) -> Result<CaseInstance> {
        self.execute(CaseCommand::StartCase {
            definition_key: definition_key.to_string(),
            business_key: None,
            variables,
        })
    }

    pub fn start_case_with_business_key(
        &self,
        definition_key: &str,
        business_key: impl Into<String>,
        variables: VariableMap,
    ) -> Result<CaseInstance> {
        self.execute(CaseCommand::StartCase {
            definition_key: definition_key.to_string(),
            business_key: Some(business_key.into()),
            variables,
        })
    }

    pub fn trigger(&self, plan_item: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::Trigger { plan_item }).map(drop)
    }

    pub fn start_plan_item(&self, plan_item: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::StartPlanItem { plan_item }).map(drop)
    }

    pub fn enable(&self, plan_item: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::EnablePlanItem { plan_item }).map(drop)
    }

    pub fn disable(&self, plan_item: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::DisablePlanItem { plan_item }).map(drop)
    }

    pub fn suspend(&self, plan_item: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::SuspendPlanItem { plan_item }).map(drop)
    }

    pub fn resume(&self, plan_item: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::ResumePlanItem { plan_item }).map(drop)
    }

    pub fn terminate_plan_item(&self, plan_item: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::TerminatePlanItem { plan_item }).map(drop)
    }

    /// Complete an active stage. Fails with `IllegalArgument` naming the
    /// blocking child when the stage is not completable.
    pub fn complete_stage(&self, stage: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::CompleteStage { stage, force: false })
            .map(drop)
    }

    /// Complete an active stage, terminating whatever still runs in it.
    pub fn force_complete_stage(&self, stage: PlanItemInstanceId) -> Result<()> {
        self.execute(CaseCommand::CompleteStage { stage, force: true })
            .map(drop)
    }

    pub fn complete_case(&self, case_id: CaseInstanceId) -> Result<CaseInstance> {
        self.execute(CaseCommand::CompleteCase {
            case_id,
            force: false,
        })
    }

    pub fn force_complete_case(&self, case_id: CaseInstanceId) -> Result<CaseInstance> {
        self.execute(CaseCommand::CompleteCase {
            case_id,
            force: true,
        })
    }

    pub fn set_variable(
        &self,
        case_id: CaseInstanceId,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut variables = VariableMap::new();
        variables.insert(name.into(), value);
        self.set_variables(case_id, variables)
    }

    pub fn set_variables(&self, case_id: CaseInstanceId, variables: VariableMap) -> Result<()> {
        self.execute(CaseCommand::SetVariables { case_id, variables })
            .map(drop)
    }

    pub fn set_local_variable(
        &self,
        plan_item: PlanItemInstanceId,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut variables = VariableMap::new();
        variables.insert(name.into(), value);
        self.execute(CaseCommand::SetLocalVariables {
            plan_item,
            variables,
        })
        .map(drop)
    }

    pub fn terminate_case(&self, case_id: CaseInstanceId) -> Result<CaseInstance> {
        self.execute(CaseCommand::TerminateCase { case_id })
    }

    /// Re-check every sentry of the case against current variables.
    pub fn evaluate_criteria(&self, case_id: CaseInstanceId) -> Result<()> {
        self.execute(CaseCommand::EvaluateCriteria { case_id })
            .map(drop)
    }

    pub fn signal(&self, case_id: CaseInstanceId, name: impl Into<String>) -> Result<()> {
        self.execute(CaseCommand::Signal {
            case_id,
            name: name.into(),
        })
        .map(drop)
    }

    pub fn execute_job(&self, job: Job) -> Result<()> {
        self.execute(CaseCommand::ExecuteJob { job }).map(drop)
    }

    /// Execute every job due at `now`. Failed jobs go back on the queue
    /// for a later pass. Returns the number of jobs that ran successfully.
    pub fn run_due_jobs(&self, now: DateTime<Utc>) -> usize {
        let mut executed = 0;
        for job in self.jobs.take_due(now) {
            match self.execute_job(job.clone()) {
                Ok(()) => executed += 1,
                Err(err) => self.requeue_failed_job(job, &err),
            }
        }
        executed
    }

    /// Put a job whose cycle failed back on the queue. The failed cycle
    /// committed nothing, so the item still waits for it. Jobs of cases
    /// that no longer exist are dropped.
    pub fn requeue_failed_job(&self, job: Job, err: &CaseError) {
        if self.store.load(job.case_id).is_err() {
            warn!(job_id = %job.id, case_id = %job.case_id, error = %err, "job failed for a missing case; dropped");
            return;
        }
        warn!(job_id = %job.id, error = %err, "job failed; requeued");
        self.jobs.schedule(job);
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn case_instance(&self, case_id: CaseInstanceId) -> Result<CaseInstance> {
        Ok(self.store.load(case_id)?.case)
    }

    /// Every plan item instance of a case, ended ones included, in
    /// declaration order.
    pub fn plan_items(&self, case_id: CaseInstanceId) -> Result<Vec<PlanItemInstance>> {
        let record = self.store.load(case_id)?;
        Ok(record.tree.ordered().into_iter().cloned().collect())
    }

    pub fn live_plan_items(&self, case_id: CaseInstanceId) -> Result<Vec<PlanItemInstance>> {
        let record = self.store.load(case_id)?;
        Ok(record.tree.live().into_iter().cloned().collect())
    }

    /// Instances of one model item, in creation order.
    pub fn plan_items_by_definition(
        &self,
        case_id: CaseInstanceId,
        definition_id: &str,
    ) -> Result<Vec<PlanItemInstance>> {
        Ok(self
            .plan_items(case_id)?
            .into_iter()
            .filter(|item| item.definition_id == definition_id)
            .collect())
    }

    pub fn plan_item(&self, plan_item: PlanItemInstanceId) -> Result<PlanItemInstance> {
        let case_id = self.store.find_case_for_plan_item(plan_item)?;
        let record = self.store.load(case_id)?;
        record.tree.require(plan_item).cloned()
    }

    pub fn completion_verdict(
        &self,
        case_id: CaseInstanceId,
        container: Container,
    ) -> Result<CompletionVerdict> {
        let record = self.store.load(case_id)?;
        let definition = self.models.load_case_definition(&record.case.definition_key)?;
        if let Container::Stage(stage) = container {
            record.tree.require(stage)?;
        }
        Ok(CompletionArbiter::new(&definition, self.evaluator.as_ref()).evaluate(
            &record.case,
            &record.tree,
            container,
        ))
    }

    /// Message naming the child that keeps a stage from completing, if any.
    pub fn completion_blocker(&self, stage: PlanItemInstanceId) -> Result<Option<String>> {
        let case_id = self.store.find_case_for_plan_item(stage)?;
        Ok(self
            .completion_verdict(case_id, Container::Stage(stage))?
            .blocker_message())
    }

    // ---------------------------------------------------------------------
    // Cycle plumbing, shared with the async runtime
    // ---------------------------------------------------------------------

    /// Open a cycle for a command and queue its operation. Validation
    /// failures surface here, before anything ran.
    pub fn prepare(&self, command: CaseCommand) -> Result<Cycle> {
        debug!(command = command.name(), "preparing cycle");
        match command {
            CaseCommand::StartCase {
                definition_key,
                business_key,
                variables,
            } => self.open_new(&definition_key, variables, None, None, business_key),
            CaseCommand::Trigger { plan_item } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                let def = execution.definition().item(item.definition);
                match Behavior::of(&def.kind).trigger_transition(item.state) {
                    Some(PlanItemTransition::ManualStart) => Ok(Operation::StartPlanItem { plan_item }),
                    Some(_) => Ok(Operation::CompletePlanItem { plan_item }),
                    None => Err(illegal_item_state(
                        item,
                        "ENABLED, ACTIVE, or AVAILABLE for event listeners",
                        "trigger",
                    )),
                }
            }),
            CaseCommand::StartPlanItem { plan_item } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                expect_state(item, &[PlanItemState::Enabled], "ENABLED", "start")?;
                Ok(Operation::StartPlanItem { plan_item })
            }),
            CaseCommand::EnablePlanItem { plan_item } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                expect_state(item, &[PlanItemState::Disabled], "DISABLED", "enable")?;
                Ok(Operation::ChangePlanItemState {
                    plan_item,
                    transition: PlanItemTransition::Enable,
                })
            }),
            CaseCommand::DisablePlanItem { plan_item } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                expect_state(item, &[PlanItemState::Enabled], "ENABLED", "disable")?;
                Ok(Operation::ChangePlanItemState {
                    plan_item,
                    transition: PlanItemTransition::Disable,
                })
            }),
            CaseCommand::SuspendPlanItem { plan_item } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                let is_stage = execution.definition().item(item.definition).kind.is_stage();
                if is_stage {
                    return Err(illegal_item_state(item, "ACTIVE (stages cannot be suspended)", "suspend"));
                }
                expect_state(item, &[PlanItemState::Active], "ACTIVE", "suspend")?;
                Ok(Operation::ChangePlanItemState {
                    plan_item,
                    transition: PlanItemTransition::Suspend,
                })
            }),
            CaseCommand::ResumePlanItem { plan_item } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                expect_state(item, &[PlanItemState::Suspended], "SUSPENDED", "resume")?;
                Ok(Operation::ChangePlanItemState {
                    plan_item,
                    transition: PlanItemTransition::Resume,
                })
            }),
            CaseCommand::TerminatePlanItem { plan_item } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                if !item.is_live() {
                    return Err(illegal_item_state(item, "a non-terminal state", "terminate"));
                }
                Ok(Operation::TerminatePlanItem { plan_item })
            }),
            CaseCommand::CompleteStage { stage, force } => self.open_for_plan_item(stage, |execution| {
                let item = execution.tree().require(stage)?;
                if !execution.definition().item(item.definition).kind.is_stage() {
                    return Err(CaseError::IllegalArgument(format!(
                        "plan item '{}' ({stage}) is not a stage",
                        item.name
                    )));
                }
                expect_state(item, &[PlanItemState::Active], "ACTIVE", "complete")?;
                Ok(Operation::CompleteContainer {
                    container: Container::Stage(stage),
                    mode: completion_mode(force),
                    criterion: None,
                })
            }),
            CaseCommand::CompleteCase { case_id, force } => self.open_existing(case_id, |execution| {
                expect_active_case(execution.case(), "complete")?;
                Ok(Operation::CompleteContainer {
                    container: Container::Case,
                    mode: completion_mode(force),
                    criterion: None,
                })
            }),
            CaseCommand::SetVariables { case_id, variables } => self.open_existing(case_id, |execution| {
                expect_active_case(execution.case(), "set variables on")?;
                Ok(Operation::SetVariables {
                    plan_item: None,
                    variables,
                })
            }),
            CaseCommand::SetLocalVariables {
                plan_item,
                variables,
            } => self.open_for_plan_item(plan_item, |execution| {
                let item = execution.tree().require(plan_item)?;
                if !item.is_live() {
                    return Err(illegal_item_state(item, "a non-terminal state", "set variables on"));
                }
                Ok(Operation::SetVariables {
                    plan_item: Some(plan_item),
                    variables,
                })
            }),
            CaseCommand::TerminateCase { case_id } => self.open_existing(case_id, |execution| {
                expect_active_case(execution.case(), "terminate")?;
                Ok(Operation::TerminateCase { criterion: None })
            }),
            CaseCommand::EvaluateCriteria { case_id } => self.open_existing(case_id, |execution| {
                expect_active_case(execution.case(), "evaluate criteria of")?;
                Ok(Operation::EvaluateCriteria { events: Vec::new() })
            }),
            CaseCommand::Signal { case_id, name } => self.open_existing(case_id, |execution| {
                expect_active_case(execution.case(), "signal")?;
                Ok(Operation::Signal { name })
            }),
            CaseCommand::ExecuteJob { job } => self.open_existing(job.case_id, |_| {
                debug!(job_id = %job.id, kind = ?job.kind, "executing job");
                Ok(match job.kind {
                    JobKind::AsyncActivation { plan_item } => Operation::ActivateAsync { plan_item },
                    JobKind::TimerElapsed { plan_item } => Operation::TimerElapsed { plan_item },
                })
            }),
        }
    }

    /// Store the settled working copy, then publish its history and jobs.
    /// Returns the committed case and the follow-up work for other cases.
    pub fn commit(&self, cycle: Cycle) -> Result<(CaseInstance, Vec<FollowUp>)> {
        let Cycle {
            execution,
            new_case,
            _guard,
        } = cycle;
        if !execution.is_settled() {
            return Err(CaseError::Other(anyhow!(
                "cycle of case {} committed before it settled",
                execution.case().id
            )));
        }

        let (record, effects) = execution.finish();
        let case = record.case.clone();
        let version = if new_case {
            self.store.insert(record)?
        } else {
            self.store.update(record)?
        };
        drop(_guard);

        debug!(
            case_id = %case.id,
            version,
            events = effects.history.len(),
            jobs = effects.jobs.len(),
            follow_ups = effects.follow_ups.len(),
            "cycle committed"
        );
        for event in &effects.history {
            self.history.record(event);
        }
        for job in effects.jobs {
            self.jobs.schedule(job);
        }
        Ok((case, effects.follow_ups))
    }

    /// Open the cycle a follow-up asks for, or `None` when its target case
    /// is gone or already ended.
    pub fn prepare_follow_up(&self, follow_up: FollowUp) -> Result<Option<Cycle>> {
        match follow_up {
            FollowUp::StartCase {
                case_id,
                definition_key,
                variables,
                parent,
            } => self
                .open_new(&definition_key, variables, Some(case_id), Some(parent), None)
                .map(Some),
            FollowUp::TerminateCase { case_id } => {
                if !self.is_active_case(case_id)? {
                    return Ok(None);
                }
                self.open_existing(case_id, |_| Ok(Operation::TerminateCase { criterion: None }))
                    .map(Some)
            }
            FollowUp::ChildCaseEnded { parent, state } => {
                if !self.is_active_case(parent.case_id)? {
                    return Ok(None);
                }
                self.open_existing(parent.case_id, |_| {
                    Ok(Operation::ChildCaseEnded {
                        plan_item: parent.plan_item_id,
                        state,
                    })
                })
                .map(Some)
            }
        }
    }

    fn run_follow_ups(&self, follow_ups: Vec<FollowUp>) {
        let mut queue: VecDeque<FollowUp> = follow_ups.into();
        while let Some(follow_up) = queue.pop_front() {
            debug!(?follow_up, "running follow-up");
            let outcome = self.prepare_follow_up(follow_up).and_then(|cycle| match cycle {
                Some(mut cycle) => {
                    drive_blocking(cycle.execution_mut())?;
                    self.commit(cycle).map(|(_, more)| more)
                }
                None => Ok(Vec::new()),
            });
            match outcome {
                Ok(more) => queue.extend(more),
                Err(err) => warn!(error = %err, "follow-up cycle failed"),
            }
        }
    }

    fn is_active_case(&self, case_id: CaseInstanceId) -> Result<bool> {
        match self.store.load(case_id) {
            Ok(record) => Ok(record.case.is_active()),
            Err(CaseError::ObjectNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn enter(&self, case_id: CaseInstanceId) -> Result<CycleGuard> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| CaseError::Other(anyhow!("active cycle set poisoned")))?;
        if !active.insert(case_id) {
            return Err(CaseError::illegal_state(
                format!("case {case_id}"),
                "IN_CYCLE",
                "no cycle in progress",
                "re-enter",
            ));
        }
        Ok(CycleGuard {
            active: Arc::clone(&self.active),
            case_id,
        })
    }

    fn context(&self, definition: Arc<CaseDefinition>) -> ExecutionContext {
        ExecutionContext {
            definition,
            evaluator: Arc::clone(&self.evaluator),
            delegates: Arc::clone(&self.delegates),
            models: Arc::clone(&self.models),
            config: self.config.clone(),
        }
    }

    fn open_new(
        &self,
        definition_key: &str,
        variables: VariableMap,
        case_id: Option<CaseInstanceId>,
        parent: Option<ParentLink>,
        business_key: Option<String>,
    ) -> Result<Cycle> {
        let definition = self.models.load_case_definition(definition_key)?;
        let case_id = case_id.unwrap_or_default();
        let guard = self.enter(case_id)?;

        let mut case = CaseInstance::new(
            case_id,
            definition_key,
            definition.name.clone(),
            variables,
            Utc::now(),
        );
        case.parent = parent;
        case.business_key = business_key;
        info!(%case_id, definition_key, "starting case");

        Ok(Cycle {
            execution: CaseExecution::start(self.context(definition), case),
            new_case: true,
            _guard: guard,
        })
    }

    fn open_existing<F>(&self, case_id: CaseInstanceId, seed: F) -> Result<Cycle>
    where
        F: FnOnce(&CaseExecution) -> Result<Operation>,
    {
        let guard = self.enter(case_id)?;
        let record = self.store.load(case_id)?;
        let definition = self.models.load_case_definition(&record.case.definition_key)?;
        let mut execution = CaseExecution::new(self.context(definition), record);
        let operation = seed(&execution)?;
        execution.push(operation);
        Ok(Cycle {
            execution,
            new_case: false,
            _guard: guard,
        })
    }

    fn open_for_plan_item<F>(&self, plan_item: PlanItemInstanceId, seed: F) -> Result<Cycle>
    where
        F: FnOnce(&CaseExecution) -> Result<Operation>,
    {
        let case_id = self.store.find_case_for_plan_item(plan_item)?;
        self.open_existing(case_id, seed)
    }
}

fn completion_mode(force: bool) -> CompletionMode {
    if force {
        CompletionMode::Force
    } else {
        CompletionMode::Manual
    }
}

fn illegal_item_state(item: &PlanItemInstance, required: &str, operation: &str) -> CaseError {
    CaseError::illegal_state(
        format!("{} ({})", item.name, item.id),
        item.state,
        required,
        operation,
    )
}

fn expect_state(
    item: &PlanItemInstance,
    allowed: &[PlanItemState],
    required: &str,
    operation: &str,
) -> Result<()> {
    if allowed.contains(&item.state) {
        Ok(())
    } else {
        Err(illegal_item_state(item, required, operation))
    }
}

fn expect_active_case(case: &CaseInstance, operation: &str) -> Result<()> {
    if case.is_active() {
        Ok(())
    } else {
        Err(CaseError::illegal_state(
            format!("case {}", case.id),
            case.state,
            "ACTIVE",
            operation,
        ))
    }
}
