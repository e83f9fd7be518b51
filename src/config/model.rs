// src/config/model.rs

use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::model::{CaseDefinition, Condition};
use crate::types::{ExitScope, ExitType, PlanItemTransition};

/// Top-level model file as read from TOML, before validation.
///
/// ```toml
/// [engine]
/// max_agenda_operations = 10000
///
/// [[case]]
/// key = "claim"
///
/// [[case.item]]
/// id = "review"
/// kind = "human_task"
///
/// [[case.item]]
/// id = "payout"
/// kind = "task"
/// blocking = false
///
/// [[case.item.entry]]
/// id = "afterReview"
/// on = [{ source = "review", transition = "complete" }]
/// ```
///
/// Array order is declaration order. `[[case.item.entry]]` and
/// `[[case.item.exit]]` attach to the item declared right above them.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawModelFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub case: Vec<RawCase>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Guard against runaway cascades inside one cycle.
    #[serde(default = "default_max_agenda_operations")]
    pub max_agenda_operations: usize,

    /// Delegate futures polled at once by the async runtime.
    #[serde(default = "default_max_concurrent_delegates")]
    pub max_concurrent_delegates: usize,

    /// Local variable set on every instance of a repeatable item.
    #[serde(default = "default_repetition_counter_variable")]
    pub repetition_counter_variable: String,

    /// Job queue poll interval of the async runtime, in milliseconds.
    #[serde(default = "default_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
}

fn default_max_agenda_operations() -> usize {
    EngineConfig::default().max_agenda_operations
}

fn default_max_concurrent_delegates() -> usize {
    EngineConfig::default().max_concurrent_delegates
}

fn default_repetition_counter_variable() -> String {
    EngineConfig::default().repetition_counter_variable
}

fn default_job_poll_interval_ms() -> u64 {
    EngineConfig::default().job_poll_interval.as_millis() as u64
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_agenda_operations: default_max_agenda_operations(),
            max_concurrent_delegates: default_max_concurrent_delegates(),
            repetition_counter_variable: default_repetition_counter_variable(),
            job_poll_interval_ms: default_job_poll_interval_ms(),
        }
    }
}

/// `[[case]]` table: one case plan model.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCase {
    pub key: String,

    /// Display name; defaults to the key.
    #[serde(default)]
    pub name: Option<String>,

    /// `true`, `false` or an expression over case variables.
    #[serde(default)]
    pub auto_complete: Condition,

    /// Exit criteria of the case plan model itself.
    #[serde(default)]
    pub exit: Vec<RawCriterion>,

    #[serde(default)]
    pub item: Vec<RawItem>,
}

impl RawCase {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            auto_complete: Condition::default(),
            exit: Vec::new(),
            item: Vec::new(),
        }
    }
}

/// Kind tag of a `[[case.item]]`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RawItemKind {
    Stage,
    HumanTask,
    Task,
    ServiceTask,
    DecisionTask,
    CaseTask,
    CasePage,
    Milestone,
    UserEventListener,
    GenericEventListener,
    SignalEventListener,
    TimerEventListener,
}

/// `[[case.item]]` table.
///
/// Kind-specific keys (`delegate`, `case_ref`, `signal`, ...) are only
/// accepted on the kinds that use them; validation rejects the rest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawItem {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub kind: RawItemKind,

    /// Enclosing stage; the case plan model when omitted.
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub completion_neutral: bool,

    #[serde(default)]
    pub manual_activation: Condition,

    #[serde(default)]
    pub repetition: Option<RawRepetition>,

    #[serde(default)]
    pub entry: Vec<RawCriterion>,

    #[serde(default)]
    pub exit: Vec<RawCriterion>,

    /// Stages only.
    #[serde(default)]
    pub auto_complete: Option<Condition>,

    /// `task` and `case_task`; defaults to `true`.
    #[serde(default)]
    pub blocking: Option<bool>,

    /// `service_task`: registered delegate name.
    #[serde(default)]
    pub delegate: Option<String>,

    /// `service_task`: activate through an async job.
    #[serde(default, rename = "async")]
    pub is_async: Option<bool>,

    /// `decision_task`: decision reference.
    #[serde(default)]
    pub decision: Option<String>,

    /// `case_task`: key of the child case definition.
    #[serde(default)]
    pub case_ref: Option<String>,

    /// `signal_event_listener`: signal name.
    #[serde(default)]
    pub signal: Option<String>,

    /// `timer_event_listener`: delay such as `"250ms"` or `"5m"`.
    #[serde(default)]
    pub delay: Option<String>,
}

impl RawItem {
    pub fn new(id: impl Into<String>, kind: RawItemKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            parent: None,
            required: false,
            completion_neutral: false,
            manual_activation: Condition::default(),
            repetition: None,
            entry: Vec::new(),
            exit: Vec::new(),
            auto_complete: None,
            blocking: None,
            delegate: None,
            is_async: None,
            decision: None,
            case_ref: None,
            signal: None,
            delay: None,
        }
    }
}

/// `repetition = { ... }` inline table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawRepetition {
    #[serde(default = "default_repetition_condition")]
    pub condition: Condition,

    #[serde(default)]
    pub ignore_after_first_completion: bool,

    #[serde(default)]
    pub max_instance_count: Option<u32>,
}

fn default_repetition_condition() -> Condition {
    Condition::Constant(true)
}

impl Default for RawRepetition {
    fn default() -> Self {
        Self {
            condition: default_repetition_condition(),
            ignore_after_first_completion: false,
            max_instance_count: None,
        }
    }
}

/// An entry or exit criterion.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawCriterion {
    pub id: String,

    #[serde(default)]
    pub on: Vec<RawOnPart>,

    #[serde(default)]
    pub if_part: Option<String>,

    /// Exit criteria only.
    #[serde(default)]
    pub exit_type: Option<ExitType>,

    /// Exit criteria only.
    #[serde(default)]
    pub exit_scope: Option<ExitScope>,
}

impl RawCriterion {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            on: Vec::new(),
            if_part: None,
            exit_type: None,
            exit_scope: None,
        }
    }
}

/// `{ source = "<item id>", transition = "<transition>" }`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawOnPart {
    pub source: String,
    pub transition: PlanItemTransition,
}

/// A validated model file: engine settings plus every case definition in
/// declaration order.
///
/// Only obtainable through `TryFrom<RawModelFile>`.
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub engine: EngineConfig,
    pub cases: Vec<CaseDefinition>,
}

impl ModelFile {
    pub(crate) fn new_unchecked(engine: EngineConfig, cases: Vec<CaseDefinition>) -> Self {
        Self { engine, cases }
    }

    pub fn case(&self, key: &str) -> Option<&CaseDefinition> {
        self.cases.iter().find(|case| case.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.cases.iter().map(|case| case.key.as_str())
    }
}
