// src/model/mod.rs

//! Read-only case model: the definition arena and where definitions come
//! from. Building definitions from files is the job of [`crate::config`].

pub mod definition;
pub mod provider;

pub use definition::{
    CaseDefinition, Condition, CriterionDef, OnPartDef, PlanItemDef, PlanItemDefId,
    PlanItemKind, RepetitionRule, SentryDef, SentryId,
};
pub use provider::{InMemoryModelProvider, ModelProvider};
