// src/engine/agenda.rs

use std::collections::VecDeque;

use tracing::trace;

use crate::errors::{CaseError, Result};
use crate::model::PlanItemDefId;
use crate::plan::{Container, PlanItemInstanceId};
use crate::types::{CaseState, CompletionMode, ExitScope, ExitType, PlanItemTransition, VariableMap};

/// "An instance of `definition` went through `transition`". Produced by
/// every state change and consumed by criteria evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnPartEvent {
    pub plan_item: PlanItemInstanceId,
    pub definition: PlanItemDefId,
    pub stage: Option<PlanItemInstanceId>,
    pub transition: PlanItemTransition,
}

/// A unit of work on the agenda.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    InitializeCase,
    CreateChildren {
        container: Container,
    },
    /// Entry reached: enable, start or async-start the item.
    ActivatePlanItem {
        plan_item: PlanItemInstanceId,
        criterion: Option<String>,
    },
    /// Manual start of an `ENABLED` item.
    StartPlanItem {
        plan_item: PlanItemInstanceId,
    },
    /// The item finished its own work (trigger, delegate done, listener
    /// occurred).
    CompletePlanItem {
        plan_item: PlanItemInstanceId,
    },
    /// Enable, disable, suspend or resume.
    ChangePlanItemState {
        plan_item: PlanItemInstanceId,
        transition: PlanItemTransition,
    },
    TerminatePlanItem {
        plan_item: PlanItemInstanceId,
    },
    ExitPlanItem {
        plan_item: PlanItemInstanceId,
        criterion: String,
        exit_type: ExitType,
        exit_scope: ExitScope,
    },
    CompleteContainer {
        container: Container,
        mode: CompletionMode,
        criterion: Option<String>,
    },
    TerminateCase {
        criterion: Option<String>,
    },
    EvaluateCriteria {
        events: Vec<OnPartEvent>,
    },
    SetVariables {
        plan_item: Option<PlanItemInstanceId>,
        variables: VariableMap,
    },
    ActivateAsync {
        plan_item: PlanItemInstanceId,
    },
    TimerElapsed {
        plan_item: PlanItemInstanceId,
    },
    Signal {
        name: String,
    },
    /// A delegate future resolved.
    ResumeDelegate {
        plan_item: PlanItemInstanceId,
        variables: VariableMap,
    },
    ChildCaseEnded {
        plan_item: PlanItemInstanceId,
        state: CaseState,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::InitializeCase => "initialize_case",
            Operation::CreateChildren { .. } => "create_children",
            Operation::ActivatePlanItem { .. } => "activate_plan_item",
            Operation::StartPlanItem { .. } => "start_plan_item",
            Operation::CompletePlanItem { .. } => "complete_plan_item",
            Operation::ChangePlanItemState { .. } => "change_plan_item_state",
            Operation::TerminatePlanItem { .. } => "terminate_plan_item",
            Operation::ExitPlanItem { .. } => "exit_plan_item",
            Operation::CompleteContainer { .. } => "complete_container",
            Operation::TerminateCase { .. } => "terminate_case",
            Operation::EvaluateCriteria { .. } => "evaluate_criteria",
            Operation::SetVariables { .. } => "set_variables",
            Operation::ActivateAsync { .. } => "activate_async",
            Operation::TimerElapsed { .. } => "timer_elapsed",
            Operation::Signal { .. } => "signal",
            Operation::ResumeDelegate { .. } => "resume_delegate",
            Operation::ChildCaseEnded { .. } => "child_case_ended",
        }
    }
}

/// FIFO of operations for one cycle.
///
/// Follow-up work is appended at the back, so the cascade runs breadth-first
/// and simultaneously satisfied sentries are handled in the order they were
/// found. `limit` bounds the number of operations a single cycle may run.
#[derive(Debug)]
pub struct Agenda {
    queue: VecDeque<Operation>,
    executed: usize,
    limit: usize,
}

impl Agenda {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            executed: 0,
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, operation: Operation) {
        trace!(operation = operation.name(), "agenda push");
        self.queue.push_back(operation);
    }

    pub fn extend(&mut self, operations: impl IntoIterator<Item = Operation>) {
        for operation in operations {
            self.push(operation);
        }
    }

    /// Next operation, or `AgendaLimitExceeded` once the cycle has run
    /// `limit` operations.
    pub fn pop(&mut self) -> Result<Option<Operation>> {
        if self.queue.is_empty() {
            return Ok(None);
        }
        if self.executed >= self.limit {
            return Err(CaseError::AgendaLimitExceeded(self.limit));
        }
        self.executed += 1;
        Ok(self.queue.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Operations run so far in this cycle.
    pub fn executed(&self) -> usize {
        self.executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let mut agenda = Agenda::new(10);
        agenda.push(Operation::InitializeCase);
        agenda.push(Operation::Signal { name: "a".into() });
        agenda.push(Operation::Signal { name: "b".into() });

        assert_eq!(agenda.pop().unwrap(), Some(Operation::InitializeCase));
        assert_eq!(agenda.pop().unwrap(), Some(Operation::Signal { name: "a".into() }));
        agenda.push(Operation::Signal { name: "c".into() });
        assert_eq!(agenda.pop().unwrap(), Some(Operation::Signal { name: "b".into() }));
        assert_eq!(agenda.pop().unwrap(), Some(Operation::Signal { name: "c".into() }));
        assert_eq!(agenda.pop().unwrap(), None);
        assert_eq!(agenda.executed(), 4);
    }

    #[test]
    fn limit_stops_runaway_cycles() {
        let mut agenda = Agenda::new(2);
        agenda.extend((0..5).map(|i| Operation::Signal { name: i.to_string() }));
        assert!(agenda.pop().unwrap().is_some());
        assert!(agenda.pop().unwrap().is_some());
        assert!(matches!(agenda.pop(), Err(CaseError::AgendaLimitExceeded(2))));
    }
}
