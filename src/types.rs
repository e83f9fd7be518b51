// src/types.rs

//! Small shared enums used across the model, the plan item runtime and the
//! engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Variables of a case or plan item scope, ordered by name.
pub type VariableMap = BTreeMap<String, serde_json::Value>;

/// Runtime state of a single plan item instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemState {
    Available,
    Unavailable,
    Enabled,
    Disabled,
    AsyncActive,
    Active,
    Suspended,
    Completed,
    Terminated,
    WaitingForRepetition,
}

impl PlanItemState {
    /// `COMPLETED` and `TERMINATED` are the only end states.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanItemState::Completed | PlanItemState::Terminated)
    }

    /// States in which the item is doing work (and therefore always blocks
    /// the completion of its container, unless its kind says otherwise).
    pub fn is_active_like(self) -> bool {
        matches!(
            self,
            PlanItemState::Active | PlanItemState::AsyncActive | PlanItemState::Suspended
        )
    }

    /// States that still wait for an entry criterion.
    pub fn awaits_entry(self) -> bool {
        matches!(
            self,
            PlanItemState::Available | PlanItemState::WaitingForRepetition
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanItemState::Available => "AVAILABLE",
            PlanItemState::Unavailable => "UNAVAILABLE",
            PlanItemState::Enabled => "ENABLED",
            PlanItemState::Disabled => "DISABLED",
            PlanItemState::AsyncActive => "ASYNC_ACTIVE",
            PlanItemState::Active => "ACTIVE",
            PlanItemState::Suspended => "SUSPENDED",
            PlanItemState::Completed => "COMPLETED",
            PlanItemState::Terminated => "TERMINATED",
            PlanItemState::WaitingForRepetition => "WAITING_FOR_REPETITION",
        }
    }
}

impl fmt::Display for PlanItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a case instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Active,
    Completed,
    Terminated,
}

impl CaseState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CaseState::Active)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaseState::Active => "ACTIVE",
            CaseState::Completed => "COMPLETED",
            CaseState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Standard lifecycle transitions. On-parts listen for these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemTransition {
    Create,
    Start,
    AsyncActivate,
    Enable,
    Disable,
    ManualStart,
    Complete,
    Occur,
    Suspend,
    Resume,
    Exit,
    Terminate,
    ParentTerminate,
    ParentComplete,
}

impl PlanItemTransition {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanItemTransition::Create => "create",
            PlanItemTransition::Start => "start",
            PlanItemTransition::AsyncActivate => "async_activate",
            PlanItemTransition::Enable => "enable",
            PlanItemTransition::Disable => "disable",
            PlanItemTransition::ManualStart => "manual_start",
            PlanItemTransition::Complete => "complete",
            PlanItemTransition::Occur => "occur",
            PlanItemTransition::Suspend => "suspend",
            PlanItemTransition::Resume => "resume",
            PlanItemTransition::Exit => "exit",
            PlanItemTransition::Terminate => "terminate",
            PlanItemTransition::ParentTerminate => "parent_terminate",
            PlanItemTransition::ParentComplete => "parent_complete",
        }
    }
}

impl fmt::Display for PlanItemTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanItemTransition {
    type Err = String;

    /// Accepts `manual_start`, `manualStart` and `manual-start` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "create" => Ok(PlanItemTransition::Create),
            "start" => Ok(PlanItemTransition::Start),
            "asyncactivate" => Ok(PlanItemTransition::AsyncActivate),
            "enable" => Ok(PlanItemTransition::Enable),
            "disable" => Ok(PlanItemTransition::Disable),
            "manualstart" => Ok(PlanItemTransition::ManualStart),
            "complete" => Ok(PlanItemTransition::Complete),
            "occur" => Ok(PlanItemTransition::Occur),
            "suspend" => Ok(PlanItemTransition::Suspend),
            "resume" => Ok(PlanItemTransition::Resume),
            "exit" => Ok(PlanItemTransition::Exit),
            "terminate" => Ok(PlanItemTransition::Terminate),
            "parentterminate" => Ok(PlanItemTransition::ParentTerminate),
            "parentcomplete" => Ok(PlanItemTransition::ParentComplete),
            other => Err(format!("invalid plan item transition: {other}")),
        }
    }
}

/// What an exit criterion does to the stage (or case plan model) it guards.
///
/// For non-stage items only `Terminate` is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    Terminate,
    Complete,
    CompleteIfCompletable,
    ForceComplete,
}

impl Default for ExitType {
    fn default() -> Self {
        ExitType::Terminate
    }
}

impl FromStr for ExitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "terminate" => Ok(ExitType::Terminate),
            "complete" => Ok(ExitType::Complete),
            "complete_if_completable" | "completeifcompletable" => {
                Ok(ExitType::CompleteIfCompletable)
            }
            "force_complete" | "forcecomplete" => Ok(ExitType::ForceComplete),
            other => Err(format!("invalid exit type: {other}")),
        }
    }
}

/// Which instances of a (repeatable) item an exit criterion may end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitScope {
    /// Every non-terminal instance.
    Default,
    /// Only instances that are running (`ACTIVE`, `ASYNC_ACTIVE`, `SUSPENDED`).
    ActiveInstances,
    /// Running instances plus `ENABLED` ones.
    ActiveAndEnabledInstances,
}

impl Default for ExitScope {
    fn default() -> Self {
        ExitScope::Default
    }
}

impl ExitScope {
    /// Whether an instance in `state` is in reach of an exit with this scope.
    pub fn applies_to(self, state: PlanItemState) -> bool {
        if state.is_terminal() {
            return false;
        }
        match self {
            ExitScope::Default => true,
            ExitScope::ActiveInstances => state.is_active_like(),
            ExitScope::ActiveAndEnabledInstances => {
                state.is_active_like() || state == PlanItemState::Enabled
            }
        }
    }
}

/// How a stage or the case plan model is being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionMode {
    /// The arbiter found it completable at a settle point.
    Natural,
    /// Explicit request; fails when not completable.
    Manual,
    /// Explicit request that only completes when completable, otherwise no-op.
    IfCompletable,
    /// Completes unconditionally.
    Force,
}
