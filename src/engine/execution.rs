// src/engine/execution.rs

//! One agenda drain cycle over a working copy of a case.
//!
//! A [`CaseExecution`] owns a clone of the stored [`CaseRecord`]. Operations
//! mutate the clone and buffer their side effects (history events, jobs,
//! follow-up work for other cases). Nothing leaves the execution until the
//! caller takes it apart with [`CaseExecution::finish`] and commits; on any
//! error the execution is dropped and the stored case is untouched.
//!
//! The execution has no channels, no Tokio types and performs no IO. Delegate
//! futures are handed out through [`CaseExecution::take_pending_delegates`]
//! and their results fed back with [`CaseExecution::resume_delegate`].

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{debug, trace};

use crate::delegate::DelegateRegistry;
use crate::errors::{CaseError, Result};
use crate::expr::ExpressionEvaluator;
use crate::history::HistoryEvent;
use crate::jobs::Job;
use crate::model::{CaseDefinition, ModelProvider};
use crate::plan::state_machine::apply_transition;
use crate::plan::{
    CaseInstance, CompletionArbiter, CompletionVerdict, Container, PlanItemInstanceId,
    PlanItemTree,
};
use crate::store::CaseRecord;
use crate::types::{CompletionMode, PlanItemState, PlanItemTransition, VariableMap};

use super::agenda::{Agenda, OnPartEvent, Operation};
use super::{DrainOutcome, EngineConfig, FollowUp};

/// Collaborators shared by every cycle of one case definition.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub definition: Arc<CaseDefinition>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub delegates: Arc<DelegateRegistry>,
    pub models: Arc<dyn ModelProvider>,
    pub config: EngineConfig,
}

/// Side effects buffered until commit.
#[derive(Debug, Default)]
pub struct Effects {
    pub history: Vec<HistoryEvent>,
    pub jobs: Vec<Job>,
    pub follow_ups: Vec<FollowUp>,
}

/// A delegate future the cycle is suspended on.
pub struct PendingDelegate {
    pub plan_item: PlanItemInstanceId,
    pub delegate: String,
    pub future: BoxFuture<'static, anyhow::Result<VariableMap>>,
}

impl fmt::Debug for PendingDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDelegate")
            .field("plan_item", &self.plan_item)
            .field("delegate", &self.delegate)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct CaseExecution {
    pub(crate) ctx: ExecutionContext,
    pub(crate) case: CaseInstance,
    pub(crate) tree: PlanItemTree,
    version: u64,
    pub(crate) agenda: Agenda,
    pub(crate) effects: Effects,
    /// On-part events raised by the operation currently running.
    pub(crate) events: Vec<OnPartEvent>,
    /// Items with an `ActivatePlanItem` already queued.
    pub(crate) pending_entry: HashSet<PlanItemInstanceId>,
    /// Items with an `ExitPlanItem` already queued.
    pub(crate) pending_exit: HashSet<PlanItemInstanceId>,
    /// A case plan model exit is queued.
    pub(crate) pending_case_exit: bool,
    /// Items waiting on a delegate future, by delegate name.
    pub(crate) awaiting: HashMap<PlanItemInstanceId, String>,
    pub(crate) pending_delegates: Vec<PendingDelegate>,
}

impl CaseExecution {
    /// Execution over a loaded case. The agenda starts empty.
    pub fn new(ctx: ExecutionContext, record: CaseRecord) -> Self {
        let agenda = Agenda::new(ctx.config.max_agenda_operations);
        Self {
            ctx,
            case: record.case,
            tree: record.tree,
            version: record.version,
            agenda,
            effects: Effects::default(),
            events: Vec::new(),
            pending_entry: HashSet::new(),
            pending_exit: HashSet::new(),
            pending_case_exit: false,
            awaiting: HashMap::new(),
            pending_delegates: Vec::new(),
        }
    }

    /// Execution for a case that does not exist yet, seeded with
    /// `InitializeCase`.
    pub fn start(ctx: ExecutionContext, case: CaseInstance) -> Self {
        let mut execution = Self::new(ctx, CaseRecord::new(case, PlanItemTree::new()));
        execution.push(Operation::InitializeCase);
        execution
    }

    pub fn case(&self) -> &CaseInstance {
        &self.case
    }

    pub fn tree(&self) -> &PlanItemTree {
        &self.tree
    }

    pub fn definition(&self) -> &CaseDefinition {
        &self.ctx.definition
    }

    pub fn push(&mut self, operation: Operation) {
        self.agenda.push(operation);
    }

    /// Run operations until the agenda is empty and no container completes
    /// on its own any more.
    ///
    /// Natural completion is only arbitrated at that settle point: active
    /// stages deepest first, then the case plan model. Each auto-completing
    /// container is queued and the drain continues.
    pub fn drain(&mut self) -> Result<DrainOutcome> {
        loop {
            while let Some(operation) = self.agenda.pop()? {
                debug!(
                    case_id = %self.case.id,
                    operation = operation.name(),
                    "executing operation"
                );
                self.execute(operation)?;
                self.flush_events();
            }

            if !self.awaiting.is_empty() {
                return Ok(DrainOutcome::Suspended {
                    pending: self.awaiting.len(),
                });
            }

            match self.next_natural_completion() {
                Some(container) => {
                    trace!(%container, "container auto-completes");
                    self.agenda.push(Operation::CompleteContainer {
                        container,
                        mode: CompletionMode::Natural,
                        criterion: None,
                    });
                }
                None => {
                    debug!(
                        case_id = %self.case.id,
                        operations = self.agenda.executed(),
                        "cycle settled"
                    );
                    return Ok(DrainOutcome::Settled);
                }
            }
        }
    }

    /// Nothing queued and no delegate outstanding.
    pub fn is_settled(&self) -> bool {
        self.agenda.is_empty() && self.awaiting.is_empty()
    }

    /// Futures produced by delegates since the last call.
    pub fn take_pending_delegates(&mut self) -> Vec<PendingDelegate> {
        std::mem::take(&mut self.pending_delegates)
    }

    /// Feed a resolved delegate future back into the cycle. The item
    /// completes on the next drain; a failed future fails the cycle.
    ///
    /// Results for items that ended in the meantime are dropped.
    pub fn resume_delegate(
        &mut self,
        plan_item: PlanItemInstanceId,
        result: anyhow::Result<VariableMap>,
    ) -> Result<()> {
        let Some(delegate) = self.awaiting.remove(&plan_item) else {
            debug!(%plan_item, "dropping delegate result for an item that is no longer waiting");
            return Ok(());
        };
        let variables = result.map_err(|source| CaseError::DelegateFailure {
            delegate,
            source,
        })?;
        self.agenda.push(Operation::ResumeDelegate {
            plan_item,
            variables,
        });
        Ok(())
    }

    /// Split into the record to store and the effects to publish.
    pub fn finish(self) -> (CaseRecord, Effects) {
        let record = CaseRecord {
            case: self.case,
            tree: self.tree,
            version: self.version,
        };
        (record, self.effects)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Apply a transition to an instance, buffering its history event and
    /// on-part event. Returns the new state.
    pub(crate) fn transition(
        &mut self,
        id: PlanItemInstanceId,
        transition: PlanItemTransition,
    ) -> Result<PlanItemState> {
        let now = self.now();
        let case_id = self.case.id;
        let item = self.tree.require_mut(id)?;
        let from = apply_transition(item, transition, now)?;

        self.events.push(OnPartEvent {
            plan_item: id,
            definition: item.definition,
            stage: item.stage,
            transition,
        });
        self.effects.history.push(HistoryEvent::PlanItemTransitioned {
            case_id,
            plan_item_id: id,
            definition_id: item.definition_id.clone(),
            from: Some(from),
            to: item.state,
            transition,
            at: now,
        });
        Ok(item.state)
    }

    /// Everything raised by one operation is evaluated by one follow-up
    /// `EvaluateCriteria`.
    fn flush_events(&mut self) {
        if self.events.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.events);
        self.agenda.push(Operation::EvaluateCriteria { events });
    }

    fn next_natural_completion(&self) -> Option<Container> {
        if !self.case.is_active() {
            return None;
        }
        let arbiter = CompletionArbiter::new(&self.ctx.definition, self.ctx.evaluator.as_ref());

        let mut stages: Vec<PlanItemInstanceId> = self
            .tree
            .live()
            .into_iter()
            .filter(|item| {
                item.state == PlanItemState::Active
                    && self.ctx.definition.item(item.definition).kind.is_stage()
            })
            .map(|item| item.id)
            .collect();
        // Stable sort keeps declaration order within one depth.
        stages.sort_by_key(|id| Reverse(self.tree.depth(*id)));

        stages
            .into_iter()
            .map(Container::Stage)
            .chain(std::iter::once(Container::Case))
            .find(|container| {
                arbiter.evaluate(&self.case, &self.tree, *container)
                    == CompletionVerdict::AutoCompletable
            })
    }
}
