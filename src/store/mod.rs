// src/store/mod.rs

//! Persistence seam for case state.
//!
//! A case and its plan item instances are stored together as one
//! [`CaseRecord`] with a version counter. Writers pass the version they
//! loaded; a mismatch is an optimistic lock conflict and nothing is written.

use std::fmt::Debug;

use crate::errors::Result;
use crate::plan::{CaseInstance, CaseInstanceId, PlanItemInstanceId, PlanItemTree};

pub mod memory;

pub use memory::MemoryStore;

/// Everything persisted for one case instance.
#[derive(Debug, Clone)]
pub struct CaseRecord {
    pub case: CaseInstance,
    pub tree: PlanItemTree,
    pub version: u64,
}

impl CaseRecord {
    pub fn new(case: CaseInstance, tree: PlanItemTree) -> Self {
        Self {
            case,
            tree,
            version: 0,
        }
    }
}

pub trait CaseStore: Send + Sync + Debug {
    /// Store a new case. Fails if the id is already taken.
    fn insert(&self, record: CaseRecord) -> Result<u64>;

    /// Load a case; `ObjectNotFound` if unknown.
    fn load(&self, case_id: CaseInstanceId) -> Result<CaseRecord>;

    /// Replace a case if its stored version still equals `record.version`.
    /// Returns the new version.
    fn update(&self, record: CaseRecord) -> Result<u64>;

    fn delete(&self, case_id: CaseInstanceId) -> Result<()>;

    /// Case owning a plan item instance.
    fn find_case_for_plan_item(&self, plan_item: PlanItemInstanceId) -> Result<CaseInstanceId>;

    fn case_ids(&self) -> Vec<CaseInstanceId>;
}
