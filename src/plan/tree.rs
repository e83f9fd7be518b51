// src/plan/tree.rs

//! Arena of the plan item instances of one case.

use std::collections::HashMap;

use crate::errors::{CaseError, Result};
use crate::expr::VariableScope;
use crate::model::PlanItemDefId;
use crate::plan::instance::{PlanItemInstance, PlanItemInstanceId};
use crate::types::VariableMap;

/// All plan item instances of a case, including ended ones.
///
/// Instances are kept in creation order. Every ordered view sorts by
/// `(definition index, sequence)`, which is declaration order with repeated
/// instances of one definition in creation order.
#[derive(Debug, Clone, Default)]
pub struct PlanItemTree {
    items: Vec<PlanItemInstance>,
    index: HashMap<PlanItemInstanceId, usize>,
    next_sequence: u64,
}

impl PlanItemTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance, assigning its sequence number.
    pub fn insert(&mut self, mut instance: PlanItemInstance) -> PlanItemInstanceId {
        instance.sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = instance.id;
        self.index.insert(id, self.items.len());
        self.items.push(instance);
        id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: PlanItemInstanceId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: PlanItemInstanceId) -> Option<&PlanItemInstance> {
        self.index.get(&id).map(|pos| &self.items[*pos])
    }

    pub fn get_mut(&mut self, id: PlanItemInstanceId) -> Option<&mut PlanItemInstance> {
        match self.index.get(&id) {
            Some(pos) => self.items.get_mut(*pos),
            None => None,
        }
    }

    pub fn require(&self, id: PlanItemInstanceId) -> Result<&PlanItemInstance> {
        self.get(id)
            .ok_or_else(|| CaseError::ObjectNotFound(format!("no plan item instance {id}")))
    }

    pub fn require_mut(&mut self, id: PlanItemInstanceId) -> Result<&mut PlanItemInstance> {
        self.get_mut(id)
            .ok_or_else(|| CaseError::ObjectNotFound(format!("no plan item instance {id}")))
    }

    /// Every instance in declaration order.
    pub fn ordered(&self) -> Vec<&PlanItemInstance> {
        let mut all: Vec<&PlanItemInstance> = self.items.iter().collect();
        all.sort_by_key(|item| (item.definition, item.sequence));
        all
    }

    /// Non-terminal instances in declaration order.
    pub fn live(&self) -> Vec<&PlanItemInstance> {
        self.ordered().into_iter().filter(|item| item.is_live()).collect()
    }

    pub fn live_ids(&self) -> Vec<PlanItemInstanceId> {
        self.live().into_iter().map(|item| item.id).collect()
    }

    /// Direct children of a stage instance (`None`: the case plan model),
    /// in declaration order.
    pub fn children_of(&self, stage: Option<PlanItemInstanceId>) -> Vec<&PlanItemInstance> {
        self.ordered()
            .into_iter()
            .filter(|item| item.stage == stage)
            .collect()
    }

    /// Non-terminal descendants of a container, children before their
    /// parents, siblings in declaration order.
    pub fn live_descendants_post_order(
        &self,
        stage: Option<PlanItemInstanceId>,
    ) -> Vec<PlanItemInstanceId> {
        let mut out = Vec::new();
        self.collect_post_order(stage, &mut out);
        out
    }

    fn collect_post_order(&self, stage: Option<PlanItemInstanceId>, out: &mut Vec<PlanItemInstanceId>) {
        for child in self.children_of(stage) {
            self.collect_post_order(Some(child.id), out);
            if child.is_live() {
                out.push(child.id);
            }
        }
    }

    /// Number of instances of `definition` created inside `stage`.
    pub fn instance_count(&self, definition: PlanItemDefId, stage: Option<PlanItemInstanceId>) -> usize {
        self.items
            .iter()
            .filter(|item| item.definition == definition && item.stage == stage)
            .count()
    }

    /// Enclosing stage instances, innermost first.
    pub fn ancestors(&self, id: PlanItemInstanceId) -> Vec<PlanItemInstanceId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|item| item.stage);
        while let Some(stage) = current {
            out.push(stage);
            current = self.get(stage).and_then(|item| item.stage);
        }
        out
    }

    /// Number of enclosing stages of an instance.
    pub fn depth(&self, id: PlanItemInstanceId) -> usize {
        self.ancestors(id).len()
    }

    /// Variable scope seen from an instance: its own locals, then each
    /// enclosing stage's locals, then the case variables.
    pub fn scope_for<'a>(
        &'a self,
        id: Option<PlanItemInstanceId>,
        case_variables: &'a VariableMap,
    ) -> VariableScope<'a> {
        let mut scope = VariableScope::new();
        if let Some(id) = id {
            if let Some(item) = self.get(id) {
                scope = scope.with_layer(&item.local_variables);
            }
            for stage in self.ancestors(id) {
                if let Some(item) = self.get(stage) {
                    scope = scope.with_layer(&item.local_variables);
                }
            }
        }
        scope.with_layer(case_variables)
    }
}
