// src/model/definition.rs

//! Immutable case definition graph.
//!
//! Plan item definitions live in a flat arena (`CaseDefinition::items`) in
//! declaration order, which is a pre-order walk of the stage tree. Everything
//! that refers to another node (parents, children, on-part sources, sentries)
//! does so by index, never by pointer.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ExitScope, ExitType, PlanItemTransition};

/// Position of a plan item definition in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanItemDefId(pub usize);

impl fmt::Display for PlanItemDefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index into `CaseDefinition::sentries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SentryId(pub usize);

/// A boolean that is either fixed in the model or computed from variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Constant(bool),
    Expression(String),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Constant(false)
    }
}

impl Condition {
    pub fn is_constant_false(&self) -> bool {
        matches!(self, Condition::Constant(false))
    }
}

/// Repetition rule of a plan item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepetitionRule {
    pub condition: Condition,
    /// Never repeat once an instance has completed.
    pub ignore_after_first_completion: bool,
    /// Upper bound on instances per parent scope.
    pub max_instance_count: Option<u32>,
}

/// "Plan item `source` went through `transition`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnPartDef {
    pub source: PlanItemDefId,
    pub transition: PlanItemTransition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentryDef {
    pub id: SentryId,
    pub on_parts: Vec<OnPartDef>,
    pub if_part: Option<String>,
}

/// An entry or exit criterion: a sentry plus what happens when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriterionDef {
    pub id: String,
    pub sentry: SentryId,
    pub exit_type: ExitType,
    pub exit_scope: ExitScope,
}

/// Definition type of a plan item. Each variant has its own runtime
/// behaviour in `plan::behavior`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanItemKind {
    Stage { auto_complete: Condition },
    HumanTask,
    /// Generic task: a wait state when blocking, completes on start otherwise.
    Task { blocking: bool },
    ServiceTask { delegate: String, is_async: bool },
    DecisionTask { decision: String },
    CaseTask { case_ref: String, blocking: bool },
    CasePage,
    Milestone,
    UserEventListener,
    GenericEventListener,
    SignalEventListener { signal: String },
    TimerEventListener { delay: Duration },
}

impl PlanItemKind {
    pub fn is_stage(&self) -> bool {
        matches!(self, PlanItemKind::Stage { .. })
    }

    pub fn is_event_listener(&self) -> bool {
        matches!(
            self,
            PlanItemKind::UserEventListener
                | PlanItemKind::GenericEventListener
                | PlanItemKind::SignalEventListener { .. }
                | PlanItemKind::TimerEventListener { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PlanItemKind::Stage { .. } => "stage",
            PlanItemKind::HumanTask => "human_task",
            PlanItemKind::Task { .. } => "task",
            PlanItemKind::ServiceTask { .. } => "service_task",
            PlanItemKind::DecisionTask { .. } => "decision_task",
            PlanItemKind::CaseTask { .. } => "case_task",
            PlanItemKind::CasePage => "case_page",
            PlanItemKind::Milestone => "milestone",
            PlanItemKind::UserEventListener => "user_event_listener",
            PlanItemKind::GenericEventListener => "generic_event_listener",
            PlanItemKind::SignalEventListener { .. } => "signal_event_listener",
            PlanItemKind::TimerEventListener { .. } => "timer_event_listener",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanItemDef {
    pub index: PlanItemDefId,
    pub id: String,
    pub name: String,
    pub kind: PlanItemKind,
    /// `None` for direct children of the case plan model.
    pub parent: Option<PlanItemDefId>,
    pub children: Vec<PlanItemDefId>,
    /// Number of enclosing stages.
    pub depth: usize,
    pub entry_criteria: Vec<CriterionDef>,
    pub exit_criteria: Vec<CriterionDef>,
    pub manual_activation: Condition,
    pub required: bool,
    pub completion_neutral: bool,
    pub repetition: Option<RepetitionRule>,
}

impl PlanItemDef {
    pub fn is_repeatable(&self) -> bool {
        self.repetition.is_some()
    }
}

/// A deployed case model.
#[derive(Debug, Clone)]
pub struct CaseDefinition {
    pub key: String,
    pub name: String,
    pub auto_complete: Condition,
    pub exit_criteria: Vec<CriterionDef>,
    /// Direct children of the case plan model.
    pub children: Vec<PlanItemDefId>,
    pub items: Vec<PlanItemDef>,
    pub sentries: Vec<SentryDef>,
    pub by_id: HashMap<String, PlanItemDefId>,
}

impl CaseDefinition {
    pub fn item(&self, id: PlanItemDefId) -> &PlanItemDef {
        &self.items[id.0]
    }

    pub fn sentry(&self, id: SentryId) -> &SentryDef {
        &self.sentries[id.0]
    }

    pub fn find(&self, item_id: &str) -> Option<&PlanItemDef> {
        self.by_id.get(item_id).map(|idx| self.item(*idx))
    }

    /// Children of a stage, or of the case plan model for `None`.
    pub fn children_of(&self, parent: Option<PlanItemDefId>) -> &[PlanItemDefId] {
        match parent {
            Some(idx) => &self.item(idx).children,
            None => &self.children,
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &PlanItemDef> {
        self.items.iter()
    }

    /// Case task definitions pointing at other case keys.
    pub fn referenced_cases(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match &item.kind {
            PlanItemKind::CaseTask { case_ref, .. } => Some(case_ref.as_str()),
            _ => None,
        })
    }
}
