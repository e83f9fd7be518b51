// src/plan/mod.rs

//! Plan item runtime: instance records, the transition table, per-kind
//! behaviour, criterion evaluation and stage completion arbitration.
//!
//! Everything in here is synchronous and free of IO. The engine drives it.

pub mod arbiter;
pub mod behavior;
pub mod criteria;
pub mod instance;
pub mod state_machine;
pub mod tree;

use std::fmt;

pub use arbiter::{CompletionArbiter, CompletionVerdict};
pub use behavior::{Behavior, CreateEffect, ParentEnd, StartEffect};
pub use criteria::CriterionEvaluator;
pub use instance::{
    CaseInstance, CaseInstanceId, ParentLink, PlanItemInstance, PlanItemInstanceId, SentryMemory,
};
pub use tree::PlanItemTree;

/// Something that owns child plan items: the case plan model or a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Case,
    Stage(PlanItemInstanceId),
}

impl Container {
    pub fn stage_id(self) -> Option<PlanItemInstanceId> {
        match self {
            Container::Case => None,
            Container::Stage(id) => Some(id),
        }
    }

    pub fn of(stage: Option<PlanItemInstanceId>) -> Self {
        match stage {
            Some(id) => Container::Stage(id),
            None => Container::Case,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::Case => f.write_str("case plan model"),
            Container::Stage(id) => write!(f, "stage {id}"),
        }
    }
}
