// src/delegate.rs

//! User code run when service and decision tasks start.
//!
//! A delegate returns one of three outcomes: done (with output variables),
//! waiting (the item stays `ACTIVE` until triggered), or a future that the
//! engine suspends on and resumes once it resolves.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::errors::{CaseError, Result};
use crate::plan::{CaseInstanceId, PlanItemInstanceId};
use crate::types::VariableMap;

/// Read-only view handed to a delegate.
#[derive(Debug, Clone)]
pub struct DelegateContext {
    pub case_id: CaseInstanceId,
    pub plan_item_id: PlanItemInstanceId,
    pub definition_id: String,
    pub name: String,
    /// Flattened variable scope of the item (locals shadow case variables).
    pub variables: VariableMap,
}

pub enum DelegateResult {
    /// Work is done; the item completes and the variables are written to
    /// the case scope.
    Completed(VariableMap),
    /// The item stays `ACTIVE` until it is triggered.
    Waiting,
    /// Work continues elsewhere; the item completes when the future
    /// resolves.
    Pending(BoxFuture<'static, anyhow::Result<VariableMap>>),
}

impl DelegateResult {
    pub fn completed() -> Self {
        DelegateResult::Completed(VariableMap::new())
    }
}

impl fmt::Debug for DelegateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegateResult::Completed(vars) => f.debug_tuple("Completed").field(vars).finish(),
            DelegateResult::Waiting => f.write_str("Waiting"),
            DelegateResult::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

pub trait PlanItemDelegate: Send + Sync {
    fn execute(&self, context: &DelegateContext) -> anyhow::Result<DelegateResult>;
}

impl<F> PlanItemDelegate for F
where
    F: Fn(&DelegateContext) -> anyhow::Result<DelegateResult> + Send + Sync,
{
    fn execute(&self, context: &DelegateContext) -> anyhow::Result<DelegateResult> {
        self(context)
    }
}

/// Completes immediately without output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelegate;

impl PlanItemDelegate for NoopDelegate {
    fn execute(&self, _context: &DelegateContext) -> anyhow::Result<DelegateResult> {
        Ok(DelegateResult::completed())
    }
}

/// Leaves the item waiting for a trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitDelegate;

impl PlanItemDelegate for WaitDelegate {
    fn execute(&self, _context: &DelegateContext) -> anyhow::Result<DelegateResult> {
        Ok(DelegateResult::Waiting)
    }
}

/// Delegates by name. Service tasks look up their `delegate`, decision
/// tasks their `decision` key.
#[derive(Clone, Default)]
pub struct DelegateRegistry {
    delegates: HashMap<String, Arc<dyn PlanItemDelegate>>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `noop` and `wait` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("noop", NoopDelegate);
        registry.register("wait", WaitDelegate);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, delegate: impl PlanItemDelegate + 'static) {
        self.delegates.insert(name.into(), Arc::new(delegate));
    }

    pub fn register_arc(&mut self, name: impl Into<String>, delegate: Arc<dyn PlanItemDelegate>) {
        self.delegates.insert(name.into(), delegate);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.delegates.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PlanItemDelegate>> {
        self.delegates
            .get(name)
            .cloned()
            .ok_or_else(|| CaseError::ObjectNotFound(format!("no delegate registered as '{name}'")))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.delegates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DelegateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateRegistry")
            .field("delegates", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> DelegateContext {
        DelegateContext {
            case_id: CaseInstanceId::new(),
            plan_item_id: PlanItemInstanceId::new(),
            definition_id: "svc".into(),
            name: "Service".into(),
            variables: VariableMap::new(),
        }
    }

    #[test]
    fn closures_are_delegates() {
        let mut registry = DelegateRegistry::new();
        registry.register("double", |ctx: &DelegateContext| -> anyhow::Result<DelegateResult> {
            let mut out = VariableMap::new();
            out.insert("seen".into(), serde_json::json!(ctx.definition_id));
            Ok(DelegateResult::Completed(out))
        });

        let delegate = registry.get("double").unwrap();
        match delegate.execute(&context()).unwrap() {
            DelegateResult::Completed(vars) => assert_eq!(vars["seen"], "svc"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_delegate_is_object_not_found() {
        let registry = DelegateRegistry::with_builtins();
        assert!(registry.contains("noop"));
        assert!(matches!(
            registry.get("nope"),
            Err(CaseError::ObjectNotFound(_))
        ));
    }
}
