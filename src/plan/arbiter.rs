// src/plan/arbiter.rs

//! Stage completion arbiter.
//!
//! Decides whether a stage or the case plan model may complete. The verdict
//! distinguishes "may be completed on request" from "completes on its own",
//! and names the first blocking child in declaration order.

use crate::expr::{ExpressionEvaluator, evaluate_condition};
use crate::model::{CaseDefinition, Condition, PlanItemKind};
use crate::plan::Container;
use crate::plan::behavior::Behavior;
use crate::plan::instance::{CaseInstance, PlanItemInstance, PlanItemInstanceId};
use crate::plan::tree::PlanItemTree;
use crate::types::PlanItemState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionVerdict {
    /// A child keeps the container from completing.
    NotCompletable {
        blocker: PlanItemInstanceId,
        blocker_name: String,
    },
    /// May be completed on request, but does not complete on its own.
    Completable,
    /// Completes on its own at the next settle point.
    AutoCompletable,
}

impl CompletionVerdict {
    pub fn is_completable(&self) -> bool {
        !matches!(self, CompletionVerdict::NotCompletable { .. })
    }

    /// Message used when a completion request is refused.
    pub fn blocker_message(&self) -> Option<String> {
        match self {
            CompletionVerdict::NotCompletable { blocker_name, .. } => Some(format!(
                "The plan item '{blocker_name}' prevented it from completion."
            )),
            _ => None,
        }
    }
}

/// How a single child affects its container's completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildBlock {
    None,
    /// Blocks natural completion unless the container auto-completes.
    Natural,
    /// Blocks every kind of completion except force-complete.
    Hard,
}

pub struct CompletionArbiter<'a> {
    definition: &'a CaseDefinition,
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> CompletionArbiter<'a> {
    pub fn new(definition: &'a CaseDefinition, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self {
            definition,
            evaluator,
        }
    }

    pub fn evaluate(
        &self,
        case: &CaseInstance,
        tree: &PlanItemTree,
        container: Container,
    ) -> CompletionVerdict {
        let stage = container.stage_id();
        let mut natural_block = false;

        for child in tree.children_of(stage) {
            match self.classify(child) {
                ChildBlock::Hard => {
                    return CompletionVerdict::NotCompletable {
                        blocker: child.id,
                        blocker_name: child.name.clone(),
                    };
                }
                ChildBlock::Natural => natural_block = true,
                ChildBlock::None => {}
            }
        }

        if !natural_block || self.auto_complete(case, tree, container) {
            CompletionVerdict::AutoCompletable
        } else {
            CompletionVerdict::Completable
        }
    }

    fn classify(&self, child: &PlanItemInstance) -> ChildBlock {
        let def = self.definition.item(child.definition);
        let state = child.state;

        if state.is_terminal() || state == PlanItemState::Disabled {
            return ChildBlock::None;
        }
        if state.is_active_like() {
            let neutral_page = state == PlanItemState::Active
                && !Behavior::of(&def.kind).blocks_completion_when_active();
            return if neutral_page {
                ChildBlock::None
            } else {
                ChildBlock::Hard
            };
        }
        // Available, Unavailable, Enabled or WaitingForRepetition.
        if def.completion_neutral || state == PlanItemState::WaitingForRepetition {
            return ChildBlock::None;
        }
        if def.required {
            return ChildBlock::Hard;
        }
        // Optional items still waiting to be started or entered keep a
        // non-auto-completing container open. Event listeners never do.
        if state == PlanItemState::Enabled || !def.kind.is_event_listener() {
            return ChildBlock::Natural;
        }
        ChildBlock::None
    }

    fn auto_complete(&self, case: &CaseInstance, tree: &PlanItemTree, container: Container) -> bool {
        let condition: &Condition = match container {
            Container::Case => &self.definition.auto_complete,
            Container::Stage(id) => {
                let stage_def = tree.get(id).map(|item| self.definition.item(item.definition));
                match stage_def.map(|def| &def.kind) {
                    Some(PlanItemKind::Stage { auto_complete }) => auto_complete,
                    _ => return false,
                }
            }
        };
        let scope = tree.scope_for(container.stage_id(), &case.variables);
        evaluate_condition(self.evaluator, condition, &scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BuiltinEvaluator;
    use crate::model::{PlanItemDef, PlanItemDefId};
    use crate::plan::instance::CaseInstanceId;
    use crate::types::VariableMap;
    use chrono::Utc;
    use std::collections::HashMap;

    use PlanItemState::*;

    fn def(index: usize, id: &str, kind: PlanItemKind) -> PlanItemDef {
        PlanItemDef {
            index: PlanItemDefId(index),
            id: id.to_string(),
            name: id.to_string(),
            kind,
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

    /// Case children: required task, optional task, listener, case page and
    /// a completion neutral task.
    fn definition(auto_complete: Condition) -> CaseDefinition {
        let mut required = def(0, "required", PlanItemKind::HumanTask);
        required.required = true;
        let mut neutral = def(4, "neutral", PlanItemKind::HumanTask);
        neutral.completion_neutral = true;
        let items = vec![
            required,
            def(1, "optional", PlanItemKind::HumanTask),
            def(2, "listener", PlanItemKind::UserEventListener),
            def(3, "page", PlanItemKind::CasePage),
            neutral,
        ];
        let by_id: HashMap<String, PlanItemDefId> =
            items.iter().map(|i| (i.id.clone(), i.index)).collect();
        CaseDefinition {
            key: "case".into(),
            name: "case".into(),
            auto_complete,
            exit_criteria: Vec::new(),
            children: items.iter().map(|i| i.index).collect(),
            items,
            sentries: Vec::new(),
            by_id,
        }
    }

    fn verdict(definition: &CaseDefinition, states: [PlanItemState; 5], variables: VariableMap) -> CompletionVerdict {
        let now = Utc::now();
        let case = CaseInstance::new(CaseInstanceId::new(), "case", "case", variables, now);
        let mut tree = PlanItemTree::new();
        for (item, state) in definition.items().zip(states) {
            tree.insert(PlanItemInstance::new(case.id, item, None, state, now));
        }
        CompletionArbiter::new(definition, &BuiltinEvaluator).evaluate(&case, &tree, Container::Case)
    }

    #[test]
    fn required_and_running_children_block_hard() {
        let def = definition(Condition::Constant(true));

        let v = verdict(&def, [Available, Completed, Available, Active, Available], VariableMap::new());
        assert!(matches!(v, CompletionVerdict::NotCompletable { ref blocker_name, .. } if blocker_name == "required"));

        let v = verdict(&def, [Completed, Suspended, Available, Active, Available], VariableMap::new());
        assert!(matches!(v, CompletionVerdict::NotCompletable { ref blocker_name, .. } if blocker_name == "optional"));
        assert_eq!(
            v.blocker_message().as_deref(),
            Some("The plan item 'optional' prevented it from completion.")
        );
    }

    #[test]
    fn pages_listeners_and_neutral_items_never_block() {
        let def = definition(Condition::Constant(false));
        let v = verdict(&def, [Completed, Terminated, Available, Active, Enabled], VariableMap::new());
        assert_eq!(v, CompletionVerdict::AutoCompletable);
    }

    #[test]
    fn waiting_optional_items_only_hold_back_natural_completion() {
        let def = definition(Condition::Constant(false));
        let v = verdict(&def, [Completed, Enabled, Available, Active, Available], VariableMap::new());
        assert_eq!(v, CompletionVerdict::Completable);
        assert!(v.is_completable());
        assert_eq!(v.blocker_message(), None);

        let v = verdict(&def, [Completed, Disabled, Available, Active, Available], VariableMap::new());
        assert_eq!(v, CompletionVerdict::AutoCompletable);

        let v = verdict(&def, [Completed, WaitingForRepetition, Available, Active, Available], VariableMap::new());
        assert_eq!(v, CompletionVerdict::AutoCompletable);
    }

    #[test]
    fn auto_complete_condition_reads_case_variables() {
        let def = definition(Condition::Expression("${autoComplete}".into()));
        let states = [Completed, Enabled, Available, Active, Available];

        assert_eq!(verdict(&def, states, VariableMap::new()), CompletionVerdict::Completable);

        let mut vars = VariableMap::new();
        vars.insert("autoComplete".into(), serde_json::json!(true));
        assert_eq!(verdict(&def, states, vars), CompletionVerdict::AutoCompletable);
    }
}
