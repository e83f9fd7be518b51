// src/plan/criteria.rs

//! Criterion evaluator: decides whether a single entry or exit criterion is
//! satisfied, and records on-part occurrences into sentry memories.

use crate::expr::{ExpressionEvaluator, VariableScope, evaluate_predicate};
use crate::model::{CaseDefinition, CriterionDef, PlanItemDefId};
use crate::plan::instance::SentryMemory;
use crate::types::PlanItemTransition;

pub struct CriterionEvaluator<'a> {
    definition: &'a CaseDefinition,
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> CriterionEvaluator<'a> {
    pub fn new(definition: &'a CaseDefinition, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self {
            definition,
            evaluator,
        }
    }

    /// Remember every on-part of `criteria` that listens for
    /// `(source, transition)`. Returns true if anything new was remembered.
    pub fn record(
        &self,
        criteria: &[CriterionDef],
        memory: &mut SentryMemory,
        source: PlanItemDefId,
        transition: PlanItemTransition,
    ) -> bool {
        let mut changed = false;
        for criterion in criteria {
            let sentry = self.definition.sentry(criterion.sentry);
            for (idx, on_part) in sentry.on_parts.iter().enumerate() {
                if on_part.source == source && on_part.transition == transition {
                    changed |= memory.record(sentry.id, idx);
                }
            }
        }
        changed
    }

    /// Whether any on-part of `criteria` listens for `(source, transition)`.
    pub fn listens_for(
        &self,
        criteria: &[CriterionDef],
        source: PlanItemDefId,
        transition: PlanItemTransition,
    ) -> bool {
        criteria.iter().any(|criterion| {
            self.definition
                .sentry(criterion.sentry)
                .on_parts
                .iter()
                .any(|on_part| on_part.source == source && on_part.transition == transition)
        })
    }

    /// All on-parts remembered and the if-part (if any) true.
    pub fn is_satisfied(
        &self,
        criterion: &CriterionDef,
        memory: &SentryMemory,
        scope: &VariableScope<'_>,
    ) -> bool {
        let sentry = self.definition.sentry(criterion.sentry);
        let on_parts_fired = (0..sentry.on_parts.len()).all(|idx| memory.has_fired(sentry.id, idx));
        if !on_parts_fired {
            return false;
        }
        match &sentry.if_part {
            Some(expression) => evaluate_predicate(self.evaluator, expression, scope),
            None => true,
        }
    }

    /// First satisfied criterion in declaration order.
    pub fn first_satisfied<'c>(
        &self,
        criteria: &'c [CriterionDef],
        memory: &SentryMemory,
        scope: &VariableScope<'_>,
    ) -> Option<&'c CriterionDef> {
        criteria
            .iter()
            .find(|criterion| self.is_satisfied(criterion, memory, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BuiltinEvaluator;
    use crate::model::{Condition, OnPartDef, PlanItemDef, PlanItemKind, SentryDef, SentryId};
    use crate::types::{ExitScope, ExitType, VariableMap};
    use std::collections::HashMap;

    fn task(index: usize, id: &str) -> PlanItemDef {
        PlanItemDef {
            index: PlanItemDefId(index),
            id: id.into(),
            name: id.into(),
            kind: PlanItemKind::HumanTask,
            parent: None,
            children: Vec::new(),
            depth: 0,
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            manual_activation: Condition::default(),
            required: false,
            completion_neutral: false,
            repetition: None,
        }
    }

    /// `c` enters once both `a` and `b` complete and `go` is true.
    fn definition() -> (CaseDefinition, CriterionDef) {
        let criterion = CriterionDef {
            id: "c_entry".into(),
            sentry: SentryId(0),
            exit_type: ExitType::Terminate,
            exit_scope: ExitScope::Default,
        };
        let sentry = SentryDef {
            id: SentryId(0),
            on_parts: vec![
                OnPartDef {
                    source: PlanItemDefId(0),
                    transition: PlanItemTransition::Complete,
                },
                OnPartDef {
                    source: PlanItemDefId(1),
                    transition: PlanItemTransition::Complete,
                },
            ],
            if_part: Some("${go}".into()),
        };
        let mut c = task(2, "c");
        c.entry_criteria.push(criterion.clone());
        let items = vec![task(0, "a"), task(1, "b"), c];
        let by_id: HashMap<String, PlanItemDefId> =
            items.iter().map(|i| (i.id.clone(), i.index)).collect();
        let def = CaseDefinition {
            key: "case".into(),
            name: "case".into(),
            auto_complete: Condition::default(),
            exit_criteria: Vec::new(),
            children: items.iter().map(|i| i.index).collect(),
            items,
            sentries: vec![sentry],
            by_id,
        };
        (def, criterion)
    }

    #[test]
    fn on_parts_accumulate_independently() {
        let (def, criterion) = definition();
        let evaluator = BuiltinEvaluator;
        let eval = CriterionEvaluator::new(&def, &evaluator);
        let mut vars = VariableMap::new();
        vars.insert("go".into(), serde_json::json!(true));
        let scope = VariableScope::of(&vars);
        let criteria = std::slice::from_ref(&criterion);

        let mut memory = SentryMemory::default();
        assert!(eval.record(criteria, &mut memory, PlanItemDefId(1), PlanItemTransition::Complete));
        assert!(!eval.is_satisfied(&criterion, &memory, &scope));

        // Unrelated transitions are ignored.
        assert!(!eval.record(criteria, &mut memory, PlanItemDefId(0), PlanItemTransition::Terminate));

        assert!(eval.record(criteria, &mut memory, PlanItemDefId(0), PlanItemTransition::Complete));
        assert!(eval.is_satisfied(&criterion, &memory, &scope));
    }

    #[test]
    fn false_or_broken_if_part_blocks_the_sentry() {
        let (def, criterion) = definition();
        let evaluator = BuiltinEvaluator;
        let eval = CriterionEvaluator::new(&def, &evaluator);
        let criteria = std::slice::from_ref(&criterion);

        let mut memory = SentryMemory::default();
        eval.record(criteria, &mut memory, PlanItemDefId(0), PlanItemTransition::Complete);
        eval.record(criteria, &mut memory, PlanItemDefId(1), PlanItemTransition::Complete);

        let empty = VariableMap::new();
        assert!(!eval.is_satisfied(&criterion, &memory, &VariableScope::of(&empty)));

        let mut vars = VariableMap::new();
        vars.insert("go".into(), serde_json::json!("yes"));
        assert!(!eval.is_satisfied(&criterion, &memory, &VariableScope::of(&vars)));
    }
}
