// src/engine/evaluation.rs

//! The `EvaluateCriteria` operation.
//!
//! One pass has three steps:
//! 1. remember the on-part events in the sentry memories that listen for
//!    them (entry memories of instances still awaiting entry, exit memories
//!    of live instances, and the case plan model's exit memory),
//! 2. queue activations for satisfied entry criteria, in declaration order,
//! 3. queue exits for satisfied exit criteria, in declaration order, then
//!    the case plan model's exit.
//!
//! A pass only queues operations; state changes happen when they run.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::errors::Result;
use crate::expr::VariableScope;
use crate::model::{CaseDefinition, CriterionDef, PlanItemDef, SentryId};
use crate::plan::{Container, CriterionEvaluator, PlanItemInstance, PlanItemInstanceId};
use crate::types::{CompletionMode, ExitType};

use super::agenda::{OnPartEvent, Operation};
use super::execution::CaseExecution;

impl CaseExecution {
    pub(crate) fn evaluate_criteria(&mut self, events: Vec<OnPartEvent>) -> Result<()> {
        if !self.case.is_active() {
            return Ok(());
        }
        let definition = Arc::clone(&self.ctx.definition);
        let evaluator = Arc::clone(&self.ctx.evaluator);
        let criteria = CriterionEvaluator::new(&definition, evaluator.as_ref());

        for event in &events {
            self.record_event(&definition, &criteria, event);
        }

        let entries = self.satisfied_entries(&definition, &criteria);
        for (id, criterion) in entries {
            debug!(plan_item = %id, %criterion, "entry criterion satisfied");
            self.queue_activation(id, Some(criterion));
        }

        let (exits, out_of_scope) = self.satisfied_exits(&definition, &criteria);
        for (id, sentry) in out_of_scope {
            if let Some(item) = self.tree.get_mut(id) {
                item.sentry_memory.reset(sentry);
            }
        }
        for (id, criterion) in exits {
            debug!(plan_item = %id, criterion = %criterion.id, "exit criterion satisfied");
            if let Some(item) = self.tree.get_mut(id) {
                item.sentry_memory.reset(criterion.sentry);
            }
            self.pending_exit.insert(id);
            self.agenda.push(Operation::ExitPlanItem {
                plan_item: id,
                criterion: criterion.id.clone(),
                exit_type: criterion.exit_type,
                exit_scope: criterion.exit_scope,
            });
        }

        self.evaluate_case_exit(&definition, &criteria);
        Ok(())
    }

    fn record_event(
        &mut self,
        definition: &CaseDefinition,
        criteria: &CriterionEvaluator<'_>,
        event: &OnPartEvent,
    ) {
        for id in self.tree.live_ids() {
            if id == event.plan_item {
                continue;
            }
            let Some(item) = self.tree.get(id) else {
                continue;
            };
            let def = definition.item(item.definition);
            if !in_scope(definition, item, def, event) {
                continue;
            }
            let awaits_entry = item.state.awaits_entry();

            let Some(item) = self.tree.get_mut(id) else {
                continue;
            };
            let mut changed = false;
            if awaits_entry {
                changed |= criteria.record(
                    &def.entry_criteria,
                    &mut item.sentry_memory,
                    event.definition,
                    event.transition,
                );
            }
            changed |= criteria.record(
                &def.exit_criteria,
                &mut item.sentry_memory,
                event.definition,
                event.transition,
            );
            if changed {
                trace!(plan_item = %id, source = %event.definition, transition = %event.transition, "on-part remembered");
            }
        }

        criteria.record(
            &definition.exit_criteria,
            &mut self.case.sentry_memory,
            event.definition,
            event.transition,
        );
    }

    fn satisfied_entries(
        &self,
        definition: &CaseDefinition,
        criteria: &CriterionEvaluator<'_>,
    ) -> Vec<(PlanItemInstanceId, String)> {
        let mut out = Vec::new();
        for item in self.tree.live() {
            if !item.state.awaits_entry() || self.pending_entry.contains(&item.id) {
                continue;
            }
            let def = definition.item(item.definition);
            if def.entry_criteria.is_empty() {
                continue;
            }
            let scope = self.tree.scope_for(Some(item.id), &self.case.variables);
            if let Some(criterion) =
                criteria.first_satisfied(&def.entry_criteria, &item.sentry_memory, &scope)
            {
                out.push((item.id, criterion.id.clone()));
            }
        }
        out
    }

    /// Satisfied exits, plus the sentries whose exit found the item out of
    /// its exit scope; those are forgotten without effect.
    #[allow(clippy::type_complexity)]
    fn satisfied_exits(
        &self,
        definition: &CaseDefinition,
        criteria: &CriterionEvaluator<'_>,
    ) -> (Vec<(PlanItemInstanceId, CriterionDef)>, Vec<(PlanItemInstanceId, SentryId)>) {
        let mut exits = Vec::new();
        let mut out_of_scope = Vec::new();
        for item in self.tree.live() {
            if self.pending_exit.contains(&item.id) {
                continue;
            }
            let def = definition.item(item.definition);
            if def.exit_criteria.is_empty() {
                continue;
            }
            let scope = self.tree.scope_for(Some(item.id), &self.case.variables);
            let Some(criterion) =
                criteria.first_satisfied(&def.exit_criteria, &item.sentry_memory, &scope)
            else {
                continue;
            };
            if criterion.exit_scope.applies_to(item.state) {
                exits.push((item.id, criterion.clone()));
            } else {
                trace!(plan_item = %item.id, state = %item.state, criterion = %criterion.id, "exit out of scope");
                out_of_scope.push((item.id, criterion.sentry));
            }
        }
        (exits, out_of_scope)
    }

    fn evaluate_case_exit(&mut self, definition: &CaseDefinition, criteria: &CriterionEvaluator<'_>) {
        if self.pending_case_exit || definition.exit_criteria.is_empty() {
            return;
        }
        let satisfied = {
            let scope = VariableScope::of(&self.case.variables);
            criteria
                .first_satisfied(&definition.exit_criteria, &self.case.sentry_memory, &scope)
                .cloned()
        };
        let Some(criterion) = satisfied else {
            return;
        };

        debug!(case_id = %self.case.id, criterion = %criterion.id, "case exit criterion satisfied");
        self.case.sentry_memory.reset(criterion.sentry);
        self.pending_case_exit = true;
        let criterion_id = Some(criterion.id);
        let operation = match criterion.exit_type {
            ExitType::Terminate => Operation::TerminateCase {
                criterion: criterion_id,
            },
            exit_type => Operation::CompleteContainer {
                container: Container::Case,
                mode: match exit_type {
                    ExitType::Complete => CompletionMode::Manual,
                    ExitType::CompleteIfCompletable => CompletionMode::IfCompletable,
                    _ => CompletionMode::Force,
                },
                criterion: criterion_id,
            },
        };
        self.agenda.push(operation);
    }
}

/// Whether an event concerns `owner`. Sources declared next to the owner
/// must live in the same stage instance; any other source matches from
/// anywhere in the case.
fn in_scope(
    definition: &CaseDefinition,
    owner: &PlanItemInstance,
    owner_def: &PlanItemDef,
    event: &OnPartEvent,
) -> bool {
    let source_def = definition.item(event.definition);
    if source_def.parent == owner_def.parent {
        owner.stage == event.stage
    } else {
        true
    }
}
