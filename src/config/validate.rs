// src/config/validate.rs

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::config::model::{
    EngineSection, ModelFile, RawCase, RawCriterion, RawItem, RawItemKind, RawModelFile,
};
use crate::engine::EngineConfig;
use crate::errors::{CaseError, Result};
use crate::expr::parse_expression;
use crate::model::{
    CaseDefinition, Condition, CriterionDef, OnPartDef, PlanItemDef, PlanItemDefId, PlanItemKind,
    RepetitionRule, SentryDef, SentryId,
};
use crate::types::{ExitScope, ExitType};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("identifier pattern is valid")
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s*(ms|s|m|h)$").expect("duration pattern is valid")
});

impl TryFrom<RawModelFile> for ModelFile {
    type Error = CaseError;

    fn try_from(raw: RawModelFile) -> std::result::Result<Self, Self::Error> {
        let engine = EngineConfig::try_from(&raw.engine)?;
        ensure_has_cases(&raw)?;
        ensure_unique_case_keys(&raw)?;

        let cases = raw
            .case
            .into_iter()
            .map(CaseDefinition::try_from)
            .collect::<Result<Vec<_>>>()?;
        validate_case_refs(&cases)?;

        Ok(ModelFile::new_unchecked(engine, cases))
    }
}

impl TryFrom<&EngineSection> for EngineConfig {
    type Error = CaseError;

    fn try_from(section: &EngineSection) -> std::result::Result<Self, Self::Error> {
        if section.max_agenda_operations == 0 {
            return Err(CaseError::ConfigError(
                "[engine].max_agenda_operations must be >= 1 (got 0)".to_string(),
            ));
        }
        if section.max_concurrent_delegates == 0 {
            return Err(CaseError::ConfigError(
                "[engine].max_concurrent_delegates must be >= 1 (got 0)".to_string(),
            ));
        }
        if section.job_poll_interval_ms == 0 {
            return Err(CaseError::ConfigError(
                "[engine].job_poll_interval_ms must be >= 1 (got 0)".to_string(),
            ));
        }
        let counter = section.repetition_counter_variable.trim();
        if counter.is_empty() {
            return Err(CaseError::ConfigError(
                "[engine].repetition_counter_variable must not be empty".to_string(),
            ));
        }

        Ok(EngineConfig {
            max_agenda_operations: section.max_agenda_operations,
            max_concurrent_delegates: section.max_concurrent_delegates,
            repetition_counter_variable: counter.to_string(),
            job_poll_interval: Duration::from_millis(section.job_poll_interval_ms),
        })
    }
}

/// Validates one case and lays its items out in pre-order.
///
/// Case task references are not resolved here; [`ModelFile`] checks them
/// against the other cases of the same file.
impl TryFrom<RawCase> for CaseDefinition {
    type Error = CaseError;

    fn try_from(raw: RawCase) -> std::result::Result<Self, Self::Error> {
        validate_raw_case(&raw)?;
        build_definition(&raw)
    }
}

fn ensure_has_cases(raw: &RawModelFile) -> Result<()> {
    if raw.case.is_empty() {
        return Err(CaseError::ConfigError(
            "model file must contain at least one [[case]] table".to_string(),
        ));
    }
    Ok(())
}

fn ensure_unique_case_keys(raw: &RawModelFile) -> Result<()> {
    let mut seen = HashSet::new();
    for case in raw.case.iter() {
        if !seen.insert(case.key.as_str()) {
            return Err(CaseError::ConfigError(format!(
                "duplicate case key '{}'",
                case.key
            )));
        }
    }
    Ok(())
}

fn validate_case_refs(cases: &[CaseDefinition]) -> Result<()> {
    let keys: HashSet<&str> = cases.iter().map(|case| case.key.as_str()).collect();
    for case in cases {
        for case_ref in case.referenced_cases() {
            if !keys.contains(case_ref) {
                return Err(CaseError::ConfigError(format!(
                    "case '{}' references unknown case '{}' in `case_ref`",
                    case.key, case_ref
                )));
            }
        }
    }
    Ok(())
}

fn validate_raw_case(case: &RawCase) -> Result<()> {
    ensure_identifier("case key", &case.key)?;
    validate_condition(&case.key, "auto_complete", &case.auto_complete)?;

    let kinds = validate_item_ids(case)?;
    for item in case.item.iter() {
        validate_parent(case, item, &kinds)?;
        validate_item_fields(&case.key, item)?;
    }
    validate_stage_hierarchy(case)?;
    validate_criteria(case, &kinds)?;
    Ok(())
}

fn ensure_identifier(what: &str, value: &str) -> Result<()> {
    if !IDENTIFIER.is_match(value) {
        return Err(CaseError::ConfigError(format!(
            "{what} '{value}' is not a valid identifier"
        )));
    }
    Ok(())
}

fn validate_item_ids(case: &RawCase) -> Result<HashMap<&str, RawItemKind>> {
    let mut kinds = HashMap::new();
    for item in case.item.iter() {
        ensure_identifier("plan item id", &item.id)?;
        if kinds.insert(item.id.as_str(), item.kind).is_some() {
            return Err(CaseError::ConfigError(format!(
                "case '{}' declares plan item '{}' more than once",
                case.key, item.id
            )));
        }
    }
    Ok(kinds)
}

fn validate_parent(
    case: &RawCase,
    item: &RawItem,
    kinds: &HashMap<&str, RawItemKind>,
) -> Result<()> {
    let Some(parent) = item.parent.as_deref() else {
        return Ok(());
    };
    if parent == item.id {
        return Err(CaseError::ConfigError(format!(
            "plan item '{}' cannot be its own parent",
            item.id
        )));
    }
    match kinds.get(parent) {
        None => Err(CaseError::ConfigError(format!(
            "plan item '{}' in case '{}' has unknown parent '{}'",
            item.id, case.key, parent
        ))),
        Some(RawItemKind::Stage) => Ok(()),
        Some(_) => Err(CaseError::ConfigError(format!(
            "parent '{}' of plan item '{}' is not a stage",
            parent, item.id
        ))),
    }
}

fn validate_item_fields(case_key: &str, item: &RawItem) -> Result<()> {
    let id = item.id.as_str();
    let kind = item.kind;
    let reject = |field: &str| {
        CaseError::ConfigError(format!(
            "plan item '{id}' of kind {kind:?} does not accept `{field}`"
        ))
    };

    if item.auto_complete.is_some() && kind != RawItemKind::Stage {
        return Err(reject("auto_complete"));
    }
    if item.blocking.is_some() && !matches!(kind, RawItemKind::Task | RawItemKind::CaseTask) {
        return Err(reject("blocking"));
    }
    if (item.delegate.is_some() || item.is_async.is_some()) && kind != RawItemKind::ServiceTask {
        return Err(reject(if item.delegate.is_some() { "delegate" } else { "async" }));
    }
    if item.decision.is_some() && kind != RawItemKind::DecisionTask {
        return Err(reject("decision"));
    }
    if item.case_ref.is_some() && kind != RawItemKind::CaseTask {
        return Err(reject("case_ref"));
    }
    if item.signal.is_some() && kind != RawItemKind::SignalEventListener {
        return Err(reject("signal"));
    }
    if item.delay.is_some() && kind != RawItemKind::TimerEventListener {
        return Err(reject("delay"));
    }

    let missing = |field: &str| {
        CaseError::ConfigError(format!(
            "plan item '{id}' of kind {kind:?} requires `{field}`"
        ))
    };
    match kind {
        RawItemKind::ServiceTask if item.delegate.is_none() => return Err(missing("delegate")),
        RawItemKind::DecisionTask if item.decision.is_none() => return Err(missing("decision")),
        RawItemKind::CaseTask if item.case_ref.is_none() => return Err(missing("case_ref")),
        RawItemKind::SignalEventListener if item.signal.is_none() => {
            return Err(missing("signal"));
        }
        RawItemKind::TimerEventListener => match item.delay.as_deref() {
            None => return Err(missing("delay")),
            Some(delay) => {
                parse_duration(delay).map_err(|err| {
                    CaseError::ConfigError(format!("plan item '{id}': {err}"))
                })?;
            }
        },
        _ => {}
    }

    if is_event_listener(kind) && !item.entry.is_empty() {
        return Err(CaseError::ConfigError(format!(
            "event listener '{id}' cannot have entry criteria"
        )));
    }

    validate_condition(id, "manual_activation", &item.manual_activation)?;
    if let Some(condition) = &item.auto_complete {
        validate_condition(id, "auto_complete", condition)?;
    }
    if let Some(repetition) = &item.repetition {
        validate_condition(id, "repetition.condition", &repetition.condition)?;
        if repetition.max_instance_count == Some(0) {
            return Err(CaseError::ConfigError(format!(
                "plan item '{id}' in case '{case_key}': repetition.max_instance_count must be >= 1"
            )));
        }
    }
    Ok(())
}

fn validate_condition(owner: &str, field: &str, condition: &Condition) -> Result<()> {
    if let Condition::Expression(expression) = condition {
        parse_expression(expression)
            .map_err(|err| CaseError::ConfigError(format!("'{owner}' `{field}`: {err}")))?;
    }
    Ok(())
}

/// Stage nesting must form a tree.
fn validate_stage_hierarchy(case: &RawCase) -> Result<()> {
    // Edge direction: parent -> child.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for item in case.item.iter() {
        graph.add_node(item.id.as_str());
    }
    for item in case.item.iter() {
        if let Some(parent) = item.parent.as_deref() {
            graph.add_edge(parent, item.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(CaseError::ModelCycle(format!(
            "stage nesting in case '{}' loops through plan item '{}'",
            case.key,
            cycle.node_id()
        ))),
    }
}

fn validate_criteria(case: &RawCase, kinds: &HashMap<&str, RawItemKind>) -> Result<()> {
    let mut seen = HashSet::new();
    let mut check = |owner: &str,
                     criterion: &RawCriterion,
                     is_exit: bool,
                     owner_is_stage: bool|
     -> Result<()> {
        ensure_identifier("criterion id", &criterion.id)?;
        if !seen.insert(criterion.id.clone()) {
            return Err(CaseError::ConfigError(format!(
                "case '{}' declares criterion '{}' more than once",
                case.key, criterion.id
            )));
        }
        if criterion.on.is_empty() && criterion.if_part.is_none() {
            return Err(CaseError::ConfigError(format!(
                "criterion '{}' of '{owner}' needs at least one on-part or an if-part",
                criterion.id
            )));
        }
        for on_part in criterion.on.iter() {
            if !kinds.contains_key(on_part.source.as_str()) {
                return Err(CaseError::ConfigError(format!(
                    "criterion '{}' of '{owner}' listens to unknown plan item '{}'",
                    criterion.id, on_part.source
                )));
            }
        }
        if let Some(if_part) = &criterion.if_part {
            parse_expression(if_part).map_err(|err| {
                CaseError::ConfigError(format!("criterion '{}': {err}", criterion.id))
            })?;
        }
        if !is_exit && (criterion.exit_type.is_some() || criterion.exit_scope.is_some()) {
            return Err(CaseError::ConfigError(format!(
                "entry criterion '{}' of '{owner}' cannot set an exit type or scope",
                criterion.id
            )));
        }
        let exit_type = criterion.exit_type.unwrap_or_default();
        if exit_type != ExitType::Terminate && !owner_is_stage {
            return Err(CaseError::ConfigError(format!(
                "exit criterion '{}' of '{owner}' uses exit type {exit_type:?}, which only stages support",
                criterion.id
            )));
        }
        Ok(())
    };

    for criterion in case.exit.iter() {
        check(&case.key, criterion, true, true)?;
    }
    for item in case.item.iter() {
        let is_stage = item.kind == RawItemKind::Stage;
        for criterion in item.entry.iter() {
            check(&item.id, criterion, false, is_stage)?;
        }
        for criterion in item.exit.iter() {
            check(&item.id, criterion, true, is_stage)?;
        }
    }
    Ok(())
}

fn is_event_listener(kind: RawItemKind) -> bool {
    matches!(
        kind,
        RawItemKind::UserEventListener
            | RawItemKind::GenericEventListener
            | RawItemKind::SignalEventListener
            | RawItemKind::TimerEventListener
    )
}

/// Parse a duration string like `"3s"`, `"250ms"`, `"1m"` or `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    let captures = DURATION.captures(s).ok_or_else(|| {
        format!("invalid duration '{s}'; expected a number followed by ms, s, m, or h")
    })?;

    let value: u64 = captures[1]
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", &captures[1], e))?;
    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    };

    match &captures[2] {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => seconds(1),
        "m" => seconds(60),
        _ => seconds(60 * 60),
    }
}

/// Items in pre-order of the stage tree, siblings in declaration order.
fn pre_order(items: &[RawItem]) -> Vec<usize> {
    let mut children: HashMap<Option<&str>, Vec<usize>> = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        children.entry(item.parent.as_deref()).or_default().push(idx);
    }

    let mut order = Vec::with_capacity(items.len());
    let mut stack: Vec<usize> = children
        .get(&None)
        .map(|roots| roots.iter().rev().copied().collect())
        .unwrap_or_default();
    while let Some(idx) = stack.pop() {
        order.push(idx);
        if let Some(nested) = children.get(&Some(items[idx].id.as_str())) {
            stack.extend(nested.iter().rev().copied());
        }
    }
    order
}

struct DefinitionBuilder<'a> {
    index_of: HashMap<&'a str, PlanItemDefId>,
    sentries: Vec<SentryDef>,
}

impl<'a> DefinitionBuilder<'a> {
    fn lookup(&self, id: &str) -> Result<PlanItemDefId> {
        self.index_of
            .get(id)
            .copied()
            .ok_or_else(|| CaseError::ConfigError(format!("unknown plan item '{id}'")))
    }

    fn criterion(&mut self, raw: &RawCriterion) -> Result<CriterionDef> {
        let on_parts = raw
            .on
            .iter()
            .map(|on_part| {
                Ok(OnPartDef {
                    source: self.lookup(&on_part.source)?,
                    transition: on_part.transition,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let sentry = SentryId(self.sentries.len());
        self.sentries.push(SentryDef {
            id: sentry,
            on_parts,
            if_part: raw.if_part.clone(),
        });

        Ok(CriterionDef {
            id: raw.id.clone(),
            sentry,
            exit_type: raw.exit_type.unwrap_or_default(),
            exit_scope: raw.exit_scope.unwrap_or(ExitScope::Default),
        })
    }

    fn criteria(&mut self, raw: &[RawCriterion]) -> Result<Vec<CriterionDef>> {
        raw.iter().map(|criterion| self.criterion(criterion)).collect()
    }
}

fn item_kind(item: &RawItem) -> Result<PlanItemKind> {
    let kind = match item.kind {
        RawItemKind::Stage => PlanItemKind::Stage {
            auto_complete: item.auto_complete.clone().unwrap_or_default(),
        },
        RawItemKind::HumanTask => PlanItemKind::HumanTask,
        RawItemKind::Task => PlanItemKind::Task {
            blocking: item.blocking.unwrap_or(true),
        },
        RawItemKind::ServiceTask => PlanItemKind::ServiceTask {
            delegate: item.delegate.clone().unwrap_or_default(),
            is_async: item.is_async.unwrap_or(false),
        },
        RawItemKind::DecisionTask => PlanItemKind::DecisionTask {
            decision: item.decision.clone().unwrap_or_default(),
        },
        RawItemKind::CaseTask => PlanItemKind::CaseTask {
            case_ref: item.case_ref.clone().unwrap_or_default(),
            blocking: item.blocking.unwrap_or(true),
        },
        RawItemKind::CasePage => PlanItemKind::CasePage,
        RawItemKind::Milestone => PlanItemKind::Milestone,
        RawItemKind::UserEventListener => PlanItemKind::UserEventListener,
        RawItemKind::GenericEventListener => PlanItemKind::GenericEventListener,
        RawItemKind::SignalEventListener => PlanItemKind::SignalEventListener {
            signal: item.signal.clone().unwrap_or_default(),
        },
        RawItemKind::TimerEventListener => PlanItemKind::TimerEventListener {
            delay: parse_duration(item.delay.as_deref().unwrap_or_default())
                .map_err(|err| CaseError::ConfigError(format!("plan item '{}': {err}", item.id)))?,
        },
    };
    Ok(kind)
}

fn build_definition(raw: &RawCase) -> Result<CaseDefinition> {
    let order = pre_order(&raw.item);
    let mut builder = DefinitionBuilder {
        index_of: order
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (raw.item[idx].id.as_str(), PlanItemDefId(pos)))
            .collect(),
        sentries: Vec::new(),
    };

    let exit_criteria = builder.criteria(&raw.exit)?;

    let mut items: Vec<PlanItemDef> = Vec::with_capacity(order.len());
    for (pos, &idx) in order.iter().enumerate() {
        let item = &raw.item[idx];
        let parent = item
            .parent
            .as_deref()
            .map(|parent| builder.lookup(parent))
            .transpose()?;
        // Parents precede their children in pre-order.
        let depth = parent.map_or(0, |p| items[p.0].depth + 1);

        items.push(PlanItemDef {
            index: PlanItemDefId(pos),
            id: item.id.clone(),
            name: item.name.clone().unwrap_or_else(|| item.id.clone()),
            kind: item_kind(item)?,
            parent,
            children: Vec::new(),
            depth,
            entry_criteria: builder.criteria(&item.entry)?,
            exit_criteria: builder.criteria(&item.exit)?,
            manual_activation: item.manual_activation.clone(),
            required: item.required,
            completion_neutral: item.completion_neutral,
            repetition: item.repetition.as_ref().map(|rule| RepetitionRule {
                condition: rule.condition.clone(),
                ignore_after_first_completion: rule.ignore_after_first_completion,
                max_instance_count: rule.max_instance_count,
            }),
        });
    }

    let mut children = Vec::new();
    for pos in 0..items.len() {
        match items[pos].parent {
            Some(parent) => items[parent.0].children.push(PlanItemDefId(pos)),
            None => children.push(PlanItemDefId(pos)),
        }
    }

    let by_id = builder
        .index_of
        .iter()
        .map(|(id, idx)| (id.to_string(), *idx))
        .collect();

    Ok(CaseDefinition {
        key: raw.key.clone(),
        name: raw.name.clone().unwrap_or_else(|| raw.key.clone()),
        auto_complete: raw.auto_complete.clone(),
        exit_criteria,
        children,
        items,
        sentries: builder.sentries,
        by_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{RawOnPart, RawRepetition};
    use crate::types::PlanItemTransition;

    fn item(id: &str, kind: RawItemKind) -> RawItem {
        RawItem::new(id, kind)
    }

    fn on(source: &str, transition: PlanItemTransition) -> RawOnPart {
        RawOnPart {
            source: source.to_string(),
            transition,
        }
    }

    #[test]
    fn items_are_laid_out_in_pre_order() {
        let mut case = RawCase::new("nested");
        let mut late_child = item("late", RawItemKind::HumanTask);
        late_child.parent = Some("outer".to_string());
        let mut inner = item("inner", RawItemKind::Stage);
        inner.parent = Some("outer".to_string());
        let mut leaf = item("leaf", RawItemKind::Milestone);
        leaf.parent = Some("inner".to_string());
        case.item = vec![
            late_child,
            item("top", RawItemKind::HumanTask),
            leaf,
            item("outer", RawItemKind::Stage),
            inner,
        ];

        let def = CaseDefinition::try_from(case).unwrap();
        let ids: Vec<&str> = def.items().map(|item| item.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "outer", "late", "inner", "leaf"]);

        let leaf = def.find("leaf").unwrap();
        assert_eq!(leaf.depth, 2);
        assert_eq!(def.item(leaf.parent.unwrap()).id, "inner");
        assert_eq!(def.children.len(), 2);
        assert_eq!(def.find("outer").unwrap().children.len(), 2);
    }

    #[test]
    fn stage_cycle_is_reported() {
        let mut case = RawCase::new("loop");
        let mut a = item("a", RawItemKind::Stage);
        a.parent = Some("b".to_string());
        let mut b = item("b", RawItemKind::Stage);
        b.parent = Some("a".to_string());
        case.item = vec![a, b];

        match CaseDefinition::try_from(case) {
            Err(CaseError::ModelCycle(msg)) => assert!(msg.contains("loop")),
            other => panic!("expected ModelCycle, got {other:?}"),
        }
    }

    #[test]
    fn non_stage_parent_is_rejected() {
        let mut case = RawCase::new("bad");
        let mut child = item("child", RawItemKind::HumanTask);
        child.parent = Some("task".to_string());
        case.item = vec![item("task", RawItemKind::HumanTask), child];

        let err = CaseDefinition::try_from(case).unwrap_err();
        assert!(err.to_string().contains("is not a stage"));
    }

    #[test]
    fn criteria_are_checked() {
        let mut case = RawCase::new("c");
        let mut listener = item("l", RawItemKind::UserEventListener);
        let mut entry = RawCriterion::new("e1");
        entry.on.push(on("x", PlanItemTransition::Complete));
        listener.entry.push(entry);
        case.item = vec![item("x", RawItemKind::HumanTask), listener];
        let err = CaseDefinition::try_from(case).unwrap_err();
        assert!(err.to_string().contains("cannot have entry criteria"));

        let mut case = RawCase::new("c");
        let mut task = item("t", RawItemKind::HumanTask);
        let mut entry = RawCriterion::new("e1");
        entry.on.push(on("ghost", PlanItemTransition::Complete));
        task.entry.push(entry);
        case.item = vec![task];
        let err = CaseDefinition::try_from(case).unwrap_err();
        assert!(err.to_string().contains("unknown plan item 'ghost'"));

        let mut case = RawCase::new("c");
        let mut task = item("t", RawItemKind::HumanTask);
        task.exit.push(RawCriterion::new("empty"));
        case.item = vec![task];
        let err = CaseDefinition::try_from(case).unwrap_err();
        assert!(err.to_string().contains("needs at least one on-part"));

        let mut case = RawCase::new("c");
        let mut task = item("t", RawItemKind::HumanTask);
        let mut exit = RawCriterion::new("x1");
        exit.if_part = Some("${done}".to_string());
        exit.exit_type = Some(ExitType::Complete);
        task.exit.push(exit);
        case.item = vec![task];
        let err = CaseDefinition::try_from(case).unwrap_err();
        assert!(err.to_string().contains("only stages support"));
    }

    #[test]
    fn kind_specific_fields() {
        let mut case = RawCase::new("k");
        case.item = vec![item("svc", RawItemKind::ServiceTask)];
        let err = CaseDefinition::try_from(case).unwrap_err();
        assert!(err.to_string().contains("requires `delegate`"));

        let mut case = RawCase::new("k");
        let mut task = item("t", RawItemKind::HumanTask);
        task.signal = Some("go".to_string());
        case.item = vec![task];
        let err = CaseDefinition::try_from(case).unwrap_err();
        assert!(err.to_string().contains("does not accept `signal`"));

        let mut case = RawCase::new("k");
        let mut timer = item("timer", RawItemKind::TimerEventListener);
        timer.delay = Some("90s".to_string());
        let mut repeat = item("again", RawItemKind::HumanTask);
        repeat.repetition = Some(RawRepetition::default());
        case.item = vec![timer, repeat];
        let def = CaseDefinition::try_from(case).unwrap();
        assert_eq!(
            def.find("timer").unwrap().kind,
            PlanItemKind::TimerEventListener {
                delay: Duration::from_secs(90)
            }
        );
        let rule = def.find("again").unwrap().repetition.clone().unwrap();
        assert_eq!(rule.condition, Condition::Constant(true));
    }

    #[test]
    fn sentries_are_numbered_in_declaration_order() {
        let mut case = RawCase::new("s");
        let mut exit = RawCriterion::new("caseExit");
        exit.on.push(on("b", PlanItemTransition::Complete));
        case.exit.push(exit);
        let mut b = item("b", RawItemKind::HumanTask);
        let mut entry = RawCriterion::new("bEntry");
        entry.on.push(on("a", PlanItemTransition::Complete));
        entry.on.push(on("a", PlanItemTransition::Exit));
        b.entry.push(entry);
        case.item = vec![item("a", RawItemKind::HumanTask), b];

        let def = CaseDefinition::try_from(case).unwrap();
        assert_eq!(def.exit_criteria[0].sentry, SentryId(0));
        let b = def.find("b").unwrap();
        assert_eq!(b.entry_criteria[0].sentry, SentryId(1));
        assert_eq!(def.sentry(SentryId(1)).on_parts.len(), 2);
        assert_eq!(def.sentry(SentryId(1)).on_parts[0].source, def.find("a").unwrap().index);
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration(" 2m "), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn engine_section_bounds() {
        let section = EngineSection {
            max_concurrent_delegates: 0,
            ..EngineSection::default()
        };
        assert!(EngineConfig::try_from(&section).is_err());
        let config = EngineConfig::try_from(&EngineSection::default()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
