// src/model/provider.rs

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use tracing::debug;

use crate::errors::{CaseError, Result};
use crate::model::CaseDefinition;

/// Source of deployed case definitions. Definitions are immutable once
/// handed out, so callers share them behind an `Arc`.
pub trait ModelProvider: Send + Sync + Debug {
    fn load_case_definition(&self, key: &str) -> Result<Arc<CaseDefinition>>;
}

/// Provider backed by an in-process map, filled by `deploy`.
#[derive(Debug, Default)]
pub struct InMemoryModelProvider {
    definitions: RwLock<HashMap<String, Arc<CaseDefinition>>>,
}

impl InMemoryModelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy (or redeploy) a definition under its key.
    pub fn deploy(&self, definition: CaseDefinition) -> Result<Arc<CaseDefinition>> {
        let definition = Arc::new(definition);
        let mut guard = self
            .definitions
            .write()
            .map_err(|_| anyhow!("model registry lock poisoned"))?;
        debug!(case = %definition.key, items = definition.items.len(), "deployed case definition");
        guard.insert(definition.key.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    pub fn deploy_all(&self, definitions: impl IntoIterator<Item = CaseDefinition>) -> Result<()> {
        for definition in definitions {
            self.deploy(definition)?;
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        match self.definitions.read() {
            Ok(guard) => {
                let mut keys: Vec<String> = guard.keys().cloned().collect();
                keys.sort();
                keys
            }
            Err(_) => Vec::new(),
        }
    }
}

impl ModelProvider for InMemoryModelProvider {
    fn load_case_definition(&self, key: &str) -> Result<Arc<CaseDefinition>> {
        let guard = self
            .definitions
            .read()
            .map_err(|_| anyhow!("model registry lock poisoned"))?;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| CaseError::ObjectNotFound(format!("no case definition with key '{key}'")))
    }
}
