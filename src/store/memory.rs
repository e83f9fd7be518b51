// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use tracing::debug;

use super::{CaseRecord, CaseStore};
use crate::errors::{CaseError, Result};
use crate::plan::{CaseInstanceId, PlanItemInstanceId};

#[derive(Debug, Default)]
struct Inner {
    cases: HashMap<CaseInstanceId, CaseRecord>,
    plan_items: HashMap<PlanItemInstanceId, CaseInstanceId>,
}

impl Inner {
    fn index(&mut self, record: &CaseRecord) {
        for item in record.tree.ordered() {
            self.plan_items.insert(item.id, record.case.id);
        }
    }
}

/// In-process store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| CaseError::Other(anyhow!("case store lock poisoned")))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.cases.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CaseStore for MemoryStore {
    fn insert(&self, mut record: CaseRecord) -> Result<u64> {
        let mut inner = self.lock()?;
        let case_id = record.case.id;
        if inner.cases.contains_key(&case_id) {
            return Err(CaseError::IllegalArgument(format!(
                "case {case_id} already exists"
            )));
        }
        record.version = 1;
        inner.index(&record);
        inner.cases.insert(case_id, record);
        debug!(%case_id, "inserted case record");
        Ok(1)
    }

    fn load(&self, case_id: CaseInstanceId) -> Result<CaseRecord> {
        let inner = self.lock()?;
        inner
            .cases
            .get(&case_id)
            .cloned()
            .ok_or_else(|| CaseError::ObjectNotFound(format!("no case instance {case_id}")))
    }

    fn update(&self, mut record: CaseRecord) -> Result<u64> {
        let mut inner = self.lock()?;
        let case_id = record.case.id;
        let stored = inner
            .cases
            .get(&case_id)
            .map(|existing| existing.version)
            .ok_or_else(|| CaseError::ObjectNotFound(format!("no case instance {case_id}")))?;

        if stored != record.version {
            return Err(CaseError::OptimisticLockConflict {
                case_id: case_id.to_string(),
                expected: record.version,
                actual: stored,
            });
        }

        record.version = stored + 1;
        let version = record.version;
        inner.index(&record);
        inner.cases.insert(case_id, record);
        debug!(%case_id, version, "updated case record");
        Ok(version)
    }

    fn delete(&self, case_id: CaseInstanceId) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.cases.remove(&case_id).is_none() {
            return Err(CaseError::ObjectNotFound(format!("no case instance {case_id}")));
        }
        inner.plan_items.retain(|_, owner| *owner != case_id);
        Ok(())
    }

    fn find_case_for_plan_item(&self, plan_item: PlanItemInstanceId) -> Result<CaseInstanceId> {
        let inner = self.lock()?;
        inner
            .plan_items
            .get(&plan_item)
            .copied()
            .ok_or_else(|| CaseError::ObjectNotFound(format!("no plan item instance {plan_item}")))
    }

    fn case_ids(&self) -> Vec<CaseInstanceId> {
        match self.lock() {
            Ok(inner) => {
                let mut ids: Vec<CaseInstanceId> = inner.cases.keys().copied().collect();
                ids.sort_by_key(|id| {
                    inner
                        .cases
                        .get(id)
                        .map(|record| record.case.started_at)
                });
                ids
            }
            Err(_) => Vec::new(),
        }
    }
}
