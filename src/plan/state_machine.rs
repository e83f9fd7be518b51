// src/plan/state_machine.rs

//! The plan item transition table.
//!
//! [`next_state`] is the single source of truth for which transitions are
//! legal from which state. [`apply_transition`] validates against it before
//! touching the instance, so a rejected transition never leaves partial
//! changes behind.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{CaseError, Result};
use crate::plan::instance::PlanItemInstance;
use crate::types::{PlanItemState, PlanItemTransition};

use PlanItemState::*;

/// Target state of `transition` from `current`, or `None` if illegal.
pub fn next_state(current: PlanItemState, transition: PlanItemTransition) -> Option<PlanItemState> {
    use PlanItemTransition as T;

    match (transition, current) {
        (T::Create, _) => None,
        (T::Start, Available | Enabled | AsyncActive | WaitingForRepetition) => Some(Active),
        (T::ManualStart, Enabled) => Some(Active),
        (T::AsyncActivate, Available | Enabled | WaitingForRepetition) => Some(AsyncActive),
        (T::Enable, Available | WaitingForRepetition | Disabled) => Some(Enabled),
        (T::Disable, Enabled) => Some(Disabled),
        (T::Complete, Active) => Some(Completed),
        (T::Occur, Available | Active | WaitingForRepetition) => Some(Completed),
        (T::Suspend, Active) => Some(Suspended),
        (T::Resume, Suspended) => Some(Active),
        (T::Exit | T::Terminate | T::ParentTerminate, state) if !state.is_terminal() => {
            Some(Terminated)
        }
        (T::ParentComplete, state) if !state.is_terminal() => Some(Completed),
        _ => None,
    }
}

/// Human readable list of the states a transition may start from.
pub fn required_states(transition: PlanItemTransition) -> &'static str {
    use PlanItemTransition as T;

    match transition {
        T::Create => "none",
        T::Start => "AVAILABLE, ENABLED, ASYNC_ACTIVE or WAITING_FOR_REPETITION",
        T::ManualStart => "ENABLED",
        T::AsyncActivate => "AVAILABLE, ENABLED or WAITING_FOR_REPETITION",
        T::Enable => "AVAILABLE, WAITING_FOR_REPETITION or DISABLED",
        T::Disable => "ENABLED",
        T::Complete => "ACTIVE",
        T::Occur => "AVAILABLE or ACTIVE",
        T::Suspend => "ACTIVE",
        T::Resume => "SUSPENDED",
        T::Exit | T::Terminate | T::ParentTerminate | T::ParentComplete => "a non-terminal state",
    }
}

/// Check a transition without applying it.
pub fn check_transition(instance: &PlanItemInstance, transition: PlanItemTransition) -> Result<PlanItemState> {
    next_state(instance.state, transition).ok_or_else(|| {
        CaseError::illegal_state(
            format!("{} ({})", instance.name, instance.id),
            instance.state,
            required_states(transition),
            transition.as_str(),
        )
    })
}

/// Apply a transition, updating state and timestamps. Returns the previous
/// state.
pub fn apply_transition(
    instance: &mut PlanItemInstance,
    transition: PlanItemTransition,
    now: DateTime<Utc>,
) -> Result<PlanItemState> {
    let target = check_transition(instance, transition)?;
    let previous = instance.state;

    instance.state = target;
    instance.last_transition = transition;
    match target {
        Active if instance.started_at.is_none() => instance.started_at = Some(now),
        Completed | Terminated => instance.ended_at = Some(now),
        _ => {}
    }

    debug!(
        plan_item = %instance.definition_id,
        id = %instance.id,
        from = %previous,
        to = %target,
        %transition,
        "plan item transition"
    );
    Ok(previous)
}
