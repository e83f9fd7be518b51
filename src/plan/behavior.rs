// src/plan/behavior.rs

//! Per-kind plan item behaviour.
//!
//! Each hook is a small match over [`PlanItemKind`]; kinds only differ where
//! a hook says so.

use std::time::Duration;

use crate::model::PlanItemKind;
use crate::types::{PlanItemState, PlanItemTransition};

/// What happens when an instance is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateEffect {
    None,
    ScheduleTimer(Duration),
}

/// What happens right after an instance becomes `ACTIVE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartEffect {
    /// Instantiate the stage's children.
    CreateChildren,
    /// Wait for an external trigger.
    WaitForTrigger,
    /// Complete within the same operation.
    CompleteImmediately,
    /// Call a registered delegate.
    InvokeDelegate { delegate: String },
    /// Start a child case.
    StartChildCase { case_ref: String, blocking: bool },
}

/// How the parent of an item is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentEnd {
    Complete,
    Terminate,
    ForceComplete,
}

/// Behaviour hooks of one plan item kind.
#[derive(Debug, Clone, Copy)]
pub struct Behavior<'a> {
    kind: &'a PlanItemKind,
}

impl<'a> Behavior<'a> {
    pub fn of(kind: &'a PlanItemKind) -> Self {
        Self { kind }
    }

    pub fn on_create(&self) -> CreateEffect {
        match self.kind {
            PlanItemKind::TimerEventListener { delay } => CreateEffect::ScheduleTimer(*delay),
            _ => CreateEffect::None,
        }
    }

    /// Event listeners and milestones are never started; they occur.
    pub fn is_startable(&self) -> bool {
        !self.kind.is_event_listener() && !matches!(self.kind, PlanItemKind::Milestone)
    }

    /// Whether activation goes through `ASYNC_ACTIVE` and the job queue.
    pub fn starts_async(&self) -> bool {
        matches!(self.kind, PlanItemKind::ServiceTask { is_async: true, .. })
    }

    pub fn on_start(&self) -> StartEffect {
        match self.kind {
            PlanItemKind::Stage { .. } => StartEffect::CreateChildren,
            PlanItemKind::HumanTask | PlanItemKind::CasePage => StartEffect::WaitForTrigger,
            PlanItemKind::Task { blocking: true } => StartEffect::WaitForTrigger,
            PlanItemKind::Task { blocking: false } => StartEffect::CompleteImmediately,
            PlanItemKind::ServiceTask { delegate, .. } => StartEffect::InvokeDelegate {
                delegate: delegate.clone(),
            },
            PlanItemKind::DecisionTask { decision } => StartEffect::InvokeDelegate {
                delegate: decision.clone(),
            },
            PlanItemKind::CaseTask { case_ref, blocking } => StartEffect::StartChildCase {
                case_ref: case_ref.clone(),
                blocking: *blocking,
            },
            PlanItemKind::Milestone
            | PlanItemKind::UserEventListener
            | PlanItemKind::GenericEventListener
            | PlanItemKind::SignalEventListener { .. }
            | PlanItemKind::TimerEventListener { .. } => StartEffect::CompleteImmediately,
        }
    }

    /// Transition used when the item finishes its own work.
    pub fn completion_transition(&self) -> PlanItemTransition {
        if self.is_startable() {
            PlanItemTransition::Complete
        } else {
            PlanItemTransition::Occur
        }
    }

    /// Whether an `ACTIVE` instance keeps its container from completing.
    pub fn blocks_completion_when_active(&self) -> bool {
        !matches!(self.kind, PlanItemKind::CasePage)
    }

    /// Transition applied to a live instance in `state` when its parent
    /// ends.
    ///
    /// Case pages and case tasks that have started mirror a completing
    /// parent; everything else is terminated.
    pub fn end_transition(&self, parent: ParentEnd, state: PlanItemState) -> PlanItemTransition {
        let mirrors_parent = matches!(
            self.kind,
            PlanItemKind::CasePage | PlanItemKind::CaseTask { .. }
        ) && matches!(state, PlanItemState::Active | PlanItemState::Suspended);
        match parent {
            ParentEnd::Complete if mirrors_parent => PlanItemTransition::ParentComplete,
            _ => PlanItemTransition::ParentTerminate,
        }
    }

    /// Transition behind the `trigger` shorthand for an instance in `state`.
    pub fn trigger_transition(&self, state: PlanItemState) -> Option<PlanItemTransition> {
        match state {
            PlanItemState::Enabled => Some(PlanItemTransition::ManualStart),
            PlanItemState::Active if self.is_startable() && !self.kind.is_stage() => {
                Some(PlanItemTransition::Complete)
            }
            PlanItemState::Available if self.kind.is_event_listener() => {
                Some(PlanItemTransition::Occur)
            }
            _ => None,
        }
    }
}
