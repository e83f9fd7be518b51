// src/engine/handlers.rs

//! Operation handlers.
//!
//! Handlers for internal operations are lenient: an operation aimed at an
//! instance that has meanwhile moved on (ended, already started, ...) is
//! skipped. External commands are validated by the controller before they
//! are queued.

use std::sync::Arc;

use chrono::TimeDelta;
use serde_json::json;
use tracing::{debug, trace};

use crate::delegate::{DelegateContext, DelegateResult};
use crate::errors::{CaseError, Result};
use crate::expr::evaluate_condition;
use crate::history::HistoryEvent;
use crate::jobs::{Job, JobKind};
use crate::model::{PlanItemDef, PlanItemKind};
use crate::plan::state_machine::next_state;
use crate::plan::{
    Behavior, CaseInstanceId, CompletionArbiter, CompletionVerdict, Container, CreateEffect,
    ParentEnd, ParentLink, PlanItemInstance, PlanItemInstanceId, StartEffect,
};
use crate::types::{
    CaseState, CompletionMode, ExitScope, ExitType, PlanItemState, PlanItemTransition, VariableMap,
};

use super::FollowUp;
use super::agenda::{OnPartEvent, Operation};
use super::execution::{CaseExecution, PendingDelegate};

impl CaseExecution {
    pub(crate) fn execute(&mut self, operation: Operation) -> Result<()> {
        match operation {
            Operation::InitializeCase => self.initialize_case(),
            Operation::CreateChildren { container } => self.create_children(container),
            Operation::ActivatePlanItem {
                plan_item,
                criterion,
            } => self.activate_plan_item(plan_item, criterion),
            Operation::StartPlanItem { plan_item } => self.start_plan_item(plan_item),
            Operation::CompletePlanItem { plan_item } => self.complete_plan_item(plan_item),
            Operation::ChangePlanItemState {
                plan_item,
                transition,
            } => self.change_plan_item_state(plan_item, transition),
            Operation::TerminatePlanItem { plan_item } => self.terminate_plan_item(plan_item),
            Operation::ExitPlanItem {
                plan_item,
                criterion,
                exit_type,
                exit_scope,
            } => self.exit_plan_item(plan_item, criterion, exit_type, exit_scope),
            Operation::CompleteContainer {
                container,
                mode,
                criterion,
            } => self.complete_container(container, mode, criterion),
            Operation::TerminateCase { criterion } => self.terminate_case(criterion),
            Operation::EvaluateCriteria { events } => self.evaluate_criteria(events),
            Operation::SetVariables {
                plan_item,
                variables,
            } => self.set_variables(plan_item, variables),
            Operation::ActivateAsync { plan_item } => self.activate_async(plan_item),
            Operation::TimerElapsed { plan_item } => self.timer_elapsed(plan_item),
            Operation::Signal { name } => self.signal(&name),
            Operation::ResumeDelegate {
                plan_item,
                variables,
            } => self.resume_after_delegate(plan_item, variables),
            Operation::ChildCaseEnded { plan_item, state } => {
                self.child_case_ended(plan_item, state)
            }
        }
    }

    fn initialize_case(&mut self) -> Result<()> {
        let now = self.now();
        self.effects.history.push(HistoryEvent::CaseStarted {
            case_id: self.case.id,
            definition_key: self.case.definition_key.clone(),
            at: now,
        });
        self.agenda.push(Operation::CreateChildren {
            container: Container::Case,
        });
        Ok(())
    }

    /// Instantiate the children of an active container as `AVAILABLE` and
    /// activate those that have nothing to wait for.
    fn create_children(&mut self, container: Container) -> Result<()> {
        let parent_def = match container {
            Container::Case => {
                if !self.case.is_active() {
                    return Ok(());
                }
                None
            }
            Container::Stage(id) => {
                let stage = self.tree.require(id)?;
                if stage.state != PlanItemState::Active {
                    trace!(stage = %id, "stage no longer active; skipping child creation");
                    return Ok(());
                }
                Some(stage.definition)
            }
        };

        let definition = Arc::clone(&self.ctx.definition);
        let mut ready = Vec::new();
        for &child in definition.children_of(parent_def) {
            let def = definition.item(child);
            let first_counter = u32::from(def.is_repeatable());
            let id = self.create_instance(
                def,
                container.stage_id(),
                PlanItemState::Available,
                first_counter,
            )?;
            if def.entry_criteria.is_empty() && !def.kind.is_event_listener() {
                ready.push(id);
            }
        }

        for id in ready {
            self.queue_activation(id, None);
        }
        // If-part-only sentries may already hold for the new instances.
        self.agenda.push(Operation::EvaluateCriteria { events: Vec::new() });
        Ok(())
    }

    pub(crate) fn queue_activation(&mut self, id: PlanItemInstanceId, criterion: Option<String>) {
        if self.pending_entry.insert(id) {
            self.agenda.push(Operation::ActivatePlanItem {
                plan_item: id,
                criterion,
            });
        }
    }

    fn create_instance(
        &mut self,
        def: &PlanItemDef,
        stage: Option<PlanItemInstanceId>,
        state: PlanItemState,
        repetition_counter: u32,
    ) -> Result<PlanItemInstanceId> {
        let now = self.now();
        let case_id = self.case.id;
        let mut instance = PlanItemInstance::new(case_id, def, stage, state, now);
        instance.repetition_counter = repetition_counter;
        if def.is_repeatable() {
            instance.local_variables.insert(
                self.ctx.config.repetition_counter_variable.clone(),
                json!(repetition_counter),
            );
        }
        let id = self.tree.insert(instance);

        self.events.push(OnPartEvent {
            plan_item: id,
            definition: def.index,
            stage,
            transition: PlanItemTransition::Create,
        });
        self.effects.history.push(HistoryEvent::PlanItemTransitioned {
            case_id,
            plan_item_id: id,
            definition_id: def.id.clone(),
            from: None,
            to: state,
            transition: PlanItemTransition::Create,
            at: now,
        });

        if let CreateEffect::ScheduleTimer(delay) = Behavior::of(&def.kind).on_create() {
            let delay = TimeDelta::from_std(delay).map_err(|err| {
                CaseError::IllegalArgument(format!("timer delay of '{}' out of range: {err}", def.id))
            })?;
            let due = now.checked_add_signed(delay).ok_or_else(|| {
                CaseError::IllegalArgument(format!("timer of '{}' is due too far in the future", def.id))
            })?;
            self.effects
                .jobs
                .push(Job::new(case_id, JobKind::TimerElapsed { plan_item: id }, due));
        }

        debug!(plan_item = %def.id, %id, %state, "created plan item instance");
        Ok(id)
    }

    /// Entry reached: occur, enable, async-start or start the item.
    fn activate_plan_item(&mut self, id: PlanItemInstanceId, criterion: Option<String>) -> Result<()> {
        self.pending_entry.remove(&id);
        let item = self.tree.require(id)?;
        if !item.state.awaits_entry() {
            trace!(plan_item = %id, state = %item.state, "not awaiting entry; skipping activation");
            return Ok(());
        }

        let definition = Arc::clone(&self.ctx.definition);
        let def = definition.item(item.definition);
        let behavior = Behavior::of(&def.kind);
        self.tree.require_mut(id)?.record_entry_criterion(criterion.as_deref());

        if !behavior.is_startable() {
            self.transition(id, PlanItemTransition::Occur)?;
            return self.after_end(id, PlanItemTransition::Occur, false);
        }

        let manual = {
            let scope = self.tree.scope_for(Some(id), &self.case.variables);
            evaluate_condition(self.ctx.evaluator.as_ref(), &def.manual_activation, &scope)
        };
        if manual {
            self.transition(id, PlanItemTransition::Enable)?;
            return Ok(());
        }
        if behavior.starts_async() {
            return self.begin_async(id);
        }

        self.transition(id, PlanItemTransition::Start)?;
        self.run_start_effect(id)
    }

    fn begin_async(&mut self, id: PlanItemInstanceId) -> Result<()> {
        self.transition(id, PlanItemTransition::AsyncActivate)?;
        let job = Job::new(self.case.id, JobKind::AsyncActivation { plan_item: id }, self.now());
        self.effects.jobs.push(job);
        Ok(())
    }

    /// Manual start of an `ENABLED` item.
    fn start_plan_item(&mut self, id: PlanItemInstanceId) -> Result<()> {
        let item = self.tree.require(id)?;
        if item.state != PlanItemState::Enabled {
            trace!(plan_item = %id, state = %item.state, "not enabled; skipping start");
            return Ok(());
        }
        let definition = Arc::clone(&self.ctx.definition);
        if Behavior::of(&definition.item(item.definition).kind).starts_async() {
            return self.begin_async(id);
        }
        self.transition(id, PlanItemTransition::ManualStart)?;
        self.run_start_effect(id)
    }

    fn activate_async(&mut self, id: PlanItemInstanceId) -> Result<()> {
        let item = self.tree.require(id)?;
        if item.state != PlanItemState::AsyncActive {
            trace!(plan_item = %id, state = %item.state, "not async active; skipping");
            return Ok(());
        }
        self.transition(id, PlanItemTransition::Start)?;
        self.run_start_effect(id)
    }

    fn run_start_effect(&mut self, id: PlanItemInstanceId) -> Result<()> {
        let definition = Arc::clone(&self.ctx.definition);
        let def = definition.item(self.tree.require(id)?.definition);

        match Behavior::of(&def.kind).on_start() {
            StartEffect::CreateChildren => {
                self.agenda.push(Operation::CreateChildren {
                    container: Container::Stage(id),
                });
                Ok(())
            }
            StartEffect::WaitForTrigger => Ok(()),
            StartEffect::CompleteImmediately => self.complete_plan_item(id),
            StartEffect::InvokeDelegate { delegate } => self.invoke_delegate(id, &delegate),
            StartEffect::StartChildCase { case_ref, blocking } => {
                self.start_child_case(id, &case_ref, blocking)
            }
        }
    }

    /// Flattened view of an item's scope: case variables overlaid by
    /// enclosing stage locals (outermost first) and the item's own locals.
    fn flattened_variables(&self, id: PlanItemInstanceId) -> Result<VariableMap> {
        let item = self.tree.require(id)?;
        let mut variables = self.case.variables.clone();
        for stage in self.tree.ancestors(id).into_iter().rev() {
            if let Some(stage) = self.tree.get(stage) {
                variables.extend(stage.local_variables.clone());
            }
        }
        variables.extend(item.local_variables.clone());
        Ok(variables)
    }

    fn invoke_delegate(&mut self, id: PlanItemInstanceId, name: &str) -> Result<()> {
        let delegate = self.ctx.delegates.get(name)?;
        let item = self.tree.require(id)?;
        let context = DelegateContext {
            case_id: self.case.id,
            plan_item_id: id,
            definition_id: item.definition_id.clone(),
            name: item.name.clone(),
            variables: self.flattened_variables(id)?,
        };

        debug!(plan_item = %context.definition_id, delegate = name, "invoking delegate");
        let result = delegate
            .execute(&context)
            .map_err(|source| CaseError::DelegateFailure {
                delegate: name.to_string(),
                source,
            })?;

        match result {
            DelegateResult::Completed(variables) => {
                self.write_variables(None, variables)?;
                self.complete_plan_item(id)
            }
            DelegateResult::Waiting => Ok(()),
            DelegateResult::Pending(future) => {
                debug!(plan_item = %context.definition_id, delegate = name, "delegate pending");
                self.awaiting.insert(id, name.to_string());
                self.pending_delegates.push(PendingDelegate {
                    plan_item: id,
                    delegate: name.to_string(),
                    future,
                });
                Ok(())
            }
        }
    }

    fn resume_after_delegate(&mut self, id: PlanItemInstanceId, variables: VariableMap) -> Result<()> {
        if self.tree.require(id)?.state != PlanItemState::Active {
            trace!(plan_item = %id, "delegate finished for an item that is no longer active");
            return Ok(());
        }
        self.write_variables(None, variables)?;
        self.complete_plan_item(id)
    }

    fn start_child_case(&mut self, id: PlanItemInstanceId, case_ref: &str, blocking: bool) -> Result<()> {
        // Unknown models fail the cycle before anything is committed.
        self.ctx.models.load_case_definition(case_ref)?;

        let child_id = CaseInstanceId::new();
        let variables = self.flattened_variables(id)?;
        let item = self.tree.require_mut(id)?;
        item.reference_type = Some("case".to_string());
        item.reference_id = Some(child_id.to_string());

        self.effects.follow_ups.push(FollowUp::StartCase {
            case_id: child_id,
            definition_key: case_ref.to_string(),
            variables,
            parent: ParentLink {
                case_id: self.case.id,
                plan_item_id: id,
                blocking,
            },
        });
        debug!(plan_item = %id, child = %child_id, case_ref, blocking, "child case requested");

        if blocking {
            Ok(())
        } else {
            self.complete_plan_item(id)
        }
    }

    /// The item finished its own work: complete (or occur for listeners and
    /// milestones). Stages go through the arbiter instead.
    fn complete_plan_item(&mut self, id: PlanItemInstanceId) -> Result<()> {
        let item = self.tree.require(id)?;
        let definition = Arc::clone(&self.ctx.definition);
        let def = definition.item(item.definition);

        if def.kind.is_stage() {
            return self.complete_container(Container::Stage(id), CompletionMode::Manual, None);
        }

        let transition = Behavior::of(&def.kind).completion_transition();
        if next_state(item.state, transition).is_none() {
            trace!(plan_item = %id, state = %item.state, %transition, "cannot complete; skipping");
            return Ok(());
        }
        self.transition(id, transition)?;
        self.after_end(id, transition, false)
    }

    fn change_plan_item_state(&mut self, id: PlanItemInstanceId, transition: PlanItemTransition) -> Result<()> {
        let item = self.tree.require(id)?;
        if next_state(item.state, transition).is_none() {
            trace!(plan_item = %id, state = %item.state, %transition, "transition not applicable; skipping");
            return Ok(());
        }
        self.transition(id, transition)?;
        Ok(())
    }

    fn terminate_plan_item(&mut self, id: PlanItemInstanceId) -> Result<()> {
        if !self.tree.require(id)?.is_live() {
            return Ok(());
        }
        self.end_descendants(Some(id), ParentEnd::Terminate)?;
        self.transition(id, PlanItemTransition::Terminate)?;
        self.after_end(id, PlanItemTransition::Terminate, false)
    }

    fn exit_plan_item(
        &mut self,
        id: PlanItemInstanceId,
        criterion: String,
        exit_type: ExitType,
        exit_scope: ExitScope,
    ) -> Result<()> {
        self.pending_exit.remove(&id);
        let item = self.tree.require(id)?;
        if !exit_scope.applies_to(item.state) {
            trace!(plan_item = %id, state = %item.state, "out of exit scope; skipping");
            return Ok(());
        }

        let is_active_stage = item.state == PlanItemState::Active
            && self.ctx.definition.item(item.definition).kind.is_stage();
        if is_active_stage {
            let mode = match exit_type {
                ExitType::Terminate => None,
                ExitType::Complete => Some(CompletionMode::Manual),
                ExitType::CompleteIfCompletable => Some(CompletionMode::IfCompletable),
                ExitType::ForceComplete => Some(CompletionMode::Force),
            };
            if let Some(mode) = mode {
                return self.complete_container(Container::Stage(id), mode, Some(criterion));
            }
        }

        self.tree.require_mut(id)?.record_exit_criterion(Some(&criterion));
        self.end_descendants(Some(id), ParentEnd::Terminate)?;
        self.transition(id, PlanItemTransition::Exit)?;
        self.after_end(id, PlanItemTransition::Exit, false)
    }

    /// Complete a stage or the case plan model according to `mode`.
    fn complete_container(
        &mut self,
        container: Container,
        mode: CompletionMode,
        criterion: Option<String>,
    ) -> Result<()> {
        if container == Container::Case {
            self.pending_case_exit = false;
        }
        let live = match container {
            Container::Case => self.case.is_active(),
            Container::Stage(id) => self.tree.require(id)?.state == PlanItemState::Active,
        };
        if !live {
            trace!(%container, "container already ended; skipping completion");
            return Ok(());
        }

        let verdict = CompletionArbiter::new(&self.ctx.definition, self.ctx.evaluator.as_ref())
            .evaluate(&self.case, &self.tree, container);
        let proceed = match mode {
            CompletionMode::Natural => verdict == CompletionVerdict::AutoCompletable,
            CompletionMode::IfCompletable => verdict.is_completable(),
            CompletionMode::Force => true,
            CompletionMode::Manual => {
                if let Some(blocker) = verdict.blocker_message() {
                    let what = match container {
                        Container::Case => "case instance",
                        Container::Stage(_) => "stage plan item instance",
                    };
                    return Err(CaseError::IllegalArgument(format!(
                        "Can only complete a {what} which is marked as completable. {blocker}"
                    )));
                }
                true
            }
        };
        if !proceed {
            debug!(%container, ?mode, "container not completable; left as is");
            return Ok(());
        }

        let parent_end = if mode == CompletionMode::Force {
            ParentEnd::ForceComplete
        } else {
            ParentEnd::Complete
        };

        match container {
            Container::Stage(id) => {
                self.end_descendants(Some(id), parent_end)?;
                self.tree.require_mut(id)?.record_exit_criterion(criterion.as_deref());
                self.transition(id, PlanItemTransition::Complete)?;
                self.after_end(id, PlanItemTransition::Complete, false)
            }
            Container::Case => {
                let state = if mode == CompletionMode::Natural {
                    self.natural_end_state()
                } else {
                    CaseState::Completed
                };
                self.end_descendants(None, parent_end)?;
                if self.case.exit_criterion_id.is_none() {
                    self.case.exit_criterion_id = criterion;
                }
                self.end_case(state)
            }
        }
    }

    /// A case that runs out of work completes, unless every direct child
    /// was terminated.
    fn natural_end_state(&self) -> CaseState {
        let children = self.tree.children_of(None);
        let all_terminated = !children.is_empty()
            && children
                .iter()
                .all(|child| child.state == PlanItemState::Terminated);
        if all_terminated {
            CaseState::Terminated
        } else {
            CaseState::Completed
        }
    }

    fn terminate_case(&mut self, criterion: Option<String>) -> Result<()> {
        self.pending_case_exit = false;
        if !self.case.is_active() {
            return Ok(());
        }
        self.end_descendants(None, ParentEnd::Terminate)?;
        if self.case.exit_criterion_id.is_none() {
            self.case.exit_criterion_id = criterion;
        }
        self.end_case(CaseState::Terminated)
    }

    fn end_case(&mut self, state: CaseState) -> Result<()> {
        let now = self.now();
        self.case.state = state;
        self.case.ended_at = Some(now);
        self.pending_entry.clear();
        self.pending_exit.clear();
        self.effects.history.push(HistoryEvent::CaseEnded {
            case_id: self.case.id,
            state,
            at: now,
        });
        if let Some(parent) = self.case.parent.filter(|parent| parent.blocking) {
            self.effects
                .follow_ups
                .push(FollowUp::ChildCaseEnded { parent, state });
        }
        debug!(case_id = %self.case.id, %state, "case ended");
        Ok(())
    }

    /// End every live descendant of a container, children before parents,
    /// with the transition each kind maps the parent's ending to.
    fn end_descendants(&mut self, stage: Option<PlanItemInstanceId>, parent_end: ParentEnd) -> Result<()> {
        let definition = Arc::clone(&self.ctx.definition);
        for id in self.tree.live_descendants_post_order(stage) {
            let item = self.tree.require(id)?;
            let transition =
                Behavior::of(&definition.item(item.definition).kind).end_transition(parent_end, item.state);
            if next_state(item.state, transition).is_none() {
                continue;
            }
            self.transition(id, transition)?;
            self.after_end(id, transition, false)?;
        }
        Ok(())
    }

    /// Bookkeeping once an instance reached a terminal state: drop queued
    /// work for it, stop its child case and spawn the next repetition.
    fn after_end(&mut self, id: PlanItemInstanceId, transition: PlanItemTransition, child_ended: bool) -> Result<()> {
        self.pending_entry.remove(&id);
        self.pending_exit.remove(&id);
        if self.awaiting.remove(&id).is_some() {
            self.pending_delegates.retain(|pending| pending.plan_item != id);
        }

        let item = self.tree.require(id)?;
        let definition = Arc::clone(&self.ctx.definition);
        let def = definition.item(item.definition);

        let running_child = match (&def.kind, child_ended) {
            (PlanItemKind::CaseTask { blocking: true, .. }, false) => item.reference_id.as_deref(),
            _ => None,
        };
        if let Some(reference) = running_child {
            let case_id = reference.parse::<CaseInstanceId>().map_err(|err| {
                CaseError::IllegalArgument(format!("bad child case reference '{reference}': {err}"))
            })?;
            self.effects.follow_ups.push(FollowUp::TerminateCase { case_id });
        }

        self.repeat_if_needed(id, def, transition)
    }

    /// Spawn the next instance of a repeatable item.
    fn repeat_if_needed(&mut self, id: PlanItemInstanceId, def: &PlanItemDef, transition: PlanItemTransition) -> Result<()> {
        let Some(rule) = &def.repetition else {
            return Ok(());
        };
        let completed = matches!(
            transition,
            PlanItemTransition::Complete | PlanItemTransition::Occur
        );
        if !completed && transition != PlanItemTransition::Exit {
            return Ok(());
        }

        let item = self.tree.require(id)?;
        if self.sentry_refires_at_once(item, def, transition) {
            debug!(plan_item = %def.id, %transition, "ended by an if-part only sentry; not repeating");
            return Ok(());
        }
        let stage = item.stage;
        let counter = item.repetition_counter;
        let container_active = match stage {
            Some(stage) => self.tree.require(stage)?.state == PlanItemState::Active,
            None => self.case.is_active(),
        };
        if !container_active {
            return Ok(());
        }

        if rule.ignore_after_first_completion {
            let completed_before = completed
                || self.tree.children_of(stage).iter().any(|other| {
                    other.definition == def.index && other.state == PlanItemState::Completed
                });
            if completed_before {
                debug!(plan_item = %def.id, "repetition ignored after first completion");
                return Ok(());
            }
        }
        let at_max = rule
            .max_instance_count
            .is_some_and(|max| self.tree.instance_count(def.index, stage) >= max as usize);
        if at_max {
            debug!(plan_item = %def.id, "maximum instance count reached");
            return Ok(());
        }

        let repeat = {
            let scope = self.tree.scope_for(Some(id), &self.case.variables);
            evaluate_condition(self.ctx.evaluator.as_ref(), &rule.condition, &scope)
        };
        if !repeat {
            return Ok(());
        }

        let next_counter = counter.saturating_add(1);
        if def.entry_criteria.is_empty() {
            let next = self.create_instance(def, stage, PlanItemState::Available, next_counter)?;
            if !def.kind.is_event_listener() {
                self.queue_activation(next, None);
            }
        } else {
            self.create_instance(def, stage, PlanItemState::WaitingForRepetition, next_counter)?;
        }
        debug!(plan_item = %def.id, counter = next_counter, "repeated plan item");
        Ok(())
    }

    /// Whether the sentry behind this ending has no on-parts. A fresh
    /// instance starts with empty sentry memory, so such a sentry would
    /// hold for it again in the same cycle: exit criteria for an exit,
    /// entry criteria for an item that occurs on entry.
    fn sentry_refires_at_once(
        &self,
        item: &PlanItemInstance,
        def: &PlanItemDef,
        transition: PlanItemTransition,
    ) -> bool {
        let (criterion, criteria) = match transition {
            PlanItemTransition::Exit => (item.exit_criterion_id.as_deref(), &def.exit_criteria),
            PlanItemTransition::Occur => (item.entry_criterion_id.as_deref(), &def.entry_criteria),
            _ => return false,
        };
        criterion
            .and_then(|id| criteria.iter().find(|criterion| criterion.id == id))
            .is_some_and(|criterion| {
                self.ctx
                    .definition
                    .sentry(criterion.sentry)
                    .on_parts
                    .is_empty()
            })
    }

    /// Write variables into the case scope or an item's local scope.
    /// Returns whether anything changed.
    pub(crate) fn write_variables(
        &mut self,
        plan_item: Option<PlanItemInstanceId>,
        variables: VariableMap,
    ) -> Result<bool> {
        let now = self.now();
        let case_id = self.case.id;
        let target = match plan_item {
            Some(id) => &mut self.tree.require_mut(id)?.local_variables,
            None => &mut self.case.variables,
        };

        let mut changed = false;
        for (name, value) in variables {
            if target.get(&name) == Some(&value) {
                continue;
            }
            target.insert(name.clone(), value.clone());
            self.effects.history.push(HistoryEvent::VariableUpdated {
                case_id,
                plan_item_id: plan_item,
                name,
                value,
                at: now,
            });
            changed = true;
        }
        Ok(changed)
    }

    fn set_variables(&mut self, plan_item: Option<PlanItemInstanceId>, variables: VariableMap) -> Result<()> {
        if self.write_variables(plan_item, variables)? {
            self.agenda.push(Operation::EvaluateCriteria { events: Vec::new() });
        }
        Ok(())
    }

    fn timer_elapsed(&mut self, id: PlanItemInstanceId) -> Result<()> {
        let item = self.tree.require(id)?;
        if item.state != PlanItemState::Available {
            trace!(plan_item = %id, state = %item.state, "timer no longer armed; skipping");
            return Ok(());
        }
        self.transition(id, PlanItemTransition::Occur)?;
        self.after_end(id, PlanItemTransition::Occur, false)
    }

    /// Every available signal listener for `name` occurs, in declaration
    /// order.
    fn signal(&mut self, name: &str) -> Result<()> {
        let definition = Arc::clone(&self.ctx.definition);
        let listeners: Vec<PlanItemInstanceId> = self
            .tree
            .live()
            .into_iter()
            .filter(|item| item.state == PlanItemState::Available)
            .filter(|item| {
                matches!(
                    &definition.item(item.definition).kind,
                    PlanItemKind::SignalEventListener { signal } if signal == name
                )
            })
            .map(|item| item.id)
            .collect();

        debug!(signal = name, listeners = listeners.len(), "signal received");
        for id in listeners {
            self.transition(id, PlanItemTransition::Occur)?;
            self.after_end(id, PlanItemTransition::Occur, false)?;
        }
        Ok(())
    }

    /// A blocking case task's child case ended; mirror its outcome.
    fn child_case_ended(&mut self, id: PlanItemInstanceId, state: CaseState) -> Result<()> {
        let item = self.tree.require(id)?;
        if item.state != PlanItemState::Active {
            trace!(plan_item = %id, state = %item.state, "case task no longer active; ignoring child end");
            return Ok(());
        }
        let transition = match state {
            CaseState::Completed => PlanItemTransition::Complete,
            CaseState::Terminated | CaseState::Active => PlanItemTransition::Terminate,
        };
        self.transition(id, transition)?;
        self.after_end(id, transition, true)
    }
}
