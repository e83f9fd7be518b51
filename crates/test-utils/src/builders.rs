#![allow(dead_code)]

use std::time::Duration;

use caseflow::config::{RawCase, RawCriterion, RawItem, RawItemKind, RawOnPart, RawRepetition};
use caseflow::model::{CaseDefinition, Condition};
use caseflow::types::{ExitScope, ExitType, PlanItemTransition};

/// Builder for a validated `CaseDefinition`, going through the same
/// validation as model files.
pub struct CaseModelBuilder {
    case: RawCase,
}

impl CaseModelBuilder {
    pub fn new(key: &str) -> Self {
        Self {
            case: RawCase::new(key),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.case.name = Some(name.to_string());
        self
    }

    pub fn auto_complete(mut self, value: bool) -> Self {
        self.case.auto_complete = Condition::Constant(value);
        self
    }

    pub fn auto_complete_if(mut self, expression: &str) -> Self {
        self.case.auto_complete = Condition::Expression(expression.to_string());
        self
    }

    pub fn item(mut self, item: ItemBuilder) -> Self {
        self.case.item.push(item.build());
        self
    }

    /// Exit criterion of the case plan model.
    pub fn exit(mut self, sentry: SentryBuilder) -> Self {
        self.case.exit.push(sentry.build());
        self
    }

    /// The raw table, for tests that exercise validation failures.
    pub fn raw(self) -> RawCase {
        self.case
    }

    pub fn build(self) -> CaseDefinition {
        CaseDefinition::try_from(self.case).expect("Failed to build valid case model from builder")
    }
}

/// Builder for one `[[case.item]]`.
pub struct ItemBuilder {
    item: RawItem,
}

impl ItemBuilder {
    pub fn new(id: &str, kind: RawItemKind) -> Self {
        Self {
            item: RawItem::new(id, kind),
        }
    }

    pub fn stage(id: &str) -> Self {
        Self::new(id, RawItemKind::Stage)
    }

    pub fn human_task(id: &str) -> Self {
        Self::new(id, RawItemKind::HumanTask)
    }

    pub fn task(id: &str) -> Self {
        Self::new(id, RawItemKind::Task)
    }

    pub fn service_task(id: &str, delegate: &str) -> Self {
        let mut builder = Self::new(id, RawItemKind::ServiceTask);
        builder.item.delegate = Some(delegate.to_string());
        builder
    }

    pub fn decision_task(id: &str, decision: &str) -> Self {
        let mut builder = Self::new(id, RawItemKind::DecisionTask);
        builder.item.decision = Some(decision.to_string());
        builder
    }

    pub fn case_task(id: &str, case_ref: &str) -> Self {
        let mut builder = Self::new(id, RawItemKind::CaseTask);
        builder.item.case_ref = Some(case_ref.to_string());
        builder
    }

    pub fn case_page(id: &str) -> Self {
        Self::new(id, RawItemKind::CasePage)
    }

    pub fn milestone(id: &str) -> Self {
        Self::new(id, RawItemKind::Milestone)
    }

    pub fn user_listener(id: &str) -> Self {
        Self::new(id, RawItemKind::UserEventListener)
    }

    pub fn generic_listener(id: &str) -> Self {
        Self::new(id, RawItemKind::GenericEventListener)
    }

    pub fn signal_listener(id: &str, signal: &str) -> Self {
        let mut builder = Self::new(id, RawItemKind::SignalEventListener);
        builder.item.signal = Some(signal.to_string());
        builder
    }

    pub fn timer_listener(id: &str, delay: Duration) -> Self {
        let mut builder = Self::new(id, RawItemKind::TimerEventListener);
        builder.item.delay = Some(format!("{}ms", delay.as_millis()));
        builder
    }

    pub fn name(mut self, name: &str) -> Self {
        self.item.name = Some(name.to_string());
        self
    }

    pub fn parent(mut self, stage: &str) -> Self {
        self.item.parent = Some(stage.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.item.required = true;
        self
    }

    pub fn completion_neutral(mut self) -> Self {
        self.item.completion_neutral = true;
        self
    }

    pub fn manual_activation(mut self) -> Self {
        self.item.manual_activation = Condition::Constant(true);
        self
    }

    pub fn manual_activation_if(mut self, expression: &str) -> Self {
        self.item.manual_activation = Condition::Expression(expression.to_string());
        self
    }

    /// Repeat unconditionally.
    pub fn repeatable(mut self) -> Self {
        self.item.repetition.get_or_insert_with(RawRepetition::default);
        self
    }

    pub fn repeat_if(mut self, expression: &str) -> Self {
        self.item
            .repetition
            .get_or_insert_with(RawRepetition::default)
            .condition = Condition::Expression(expression.to_string());
        self
    }

    pub fn ignore_after_first_completion(mut self) -> Self {
        self.item
            .repetition
            .get_or_insert_with(RawRepetition::default)
            .ignore_after_first_completion = true;
        self
    }

    pub fn max_instances(mut self, max: u32) -> Self {
        self.item
            .repetition
            .get_or_insert_with(RawRepetition::default)
            .max_instance_count = Some(max);
        self
    }

    pub fn entry(mut self, sentry: SentryBuilder) -> Self {
        self.item.entry.push(sentry.build());
        self
    }

    pub fn exit(mut self, sentry: SentryBuilder) -> Self {
        self.item.exit.push(sentry.build());
        self
    }

    /// Stage auto-complete; constant.
    pub fn auto_complete(mut self, value: bool) -> Self {
        self.item.auto_complete = Some(Condition::Constant(value));
        self
    }

    pub fn auto_complete_if(mut self, expression: &str) -> Self {
        self.item.auto_complete = Some(Condition::Expression(expression.to_string()));
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.item.blocking = Some(blocking);
        self
    }

    pub fn async_activation(mut self) -> Self {
        self.item.is_async = Some(true);
        self
    }

    pub fn build(self) -> RawItem {
        self.item
    }
}

/// Builder for an entry or exit criterion.
pub struct SentryBuilder {
    criterion: RawCriterion,
}

impl SentryBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            criterion: RawCriterion::new(id),
        }
    }

    pub fn on(mut self, source: &str, transition: PlanItemTransition) -> Self {
        self.criterion.on.push(RawOnPart {
            source: source.to_string(),
            transition,
        });
        self
    }

    pub fn if_part(mut self, expression: &str) -> Self {
        self.criterion.if_part = Some(expression.to_string());
        self
    }

    pub fn exit_type(mut self, exit_type: ExitType) -> Self {
        self.criterion.exit_type = Some(exit_type);
        self
    }

    pub fn exit_scope(mut self, exit_scope: ExitScope) -> Self {
        self.criterion.exit_scope = Some(exit_scope);
        self
    }

    pub fn build(self) -> RawCriterion {
        self.criterion
    }
}
