// src/history.rs

//! History sink: receives one event per case lifecycle change, plan item
//! transition and variable write. Fire-and-forget from the engine's side;
//! events are only emitted once a cycle has committed.

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::plan::{CaseInstanceId, PlanItemInstanceId};
use crate::types::{CaseState, PlanItemState, PlanItemTransition};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    CaseStarted {
        case_id: CaseInstanceId,
        definition_key: String,
        at: DateTime<Utc>,
    },
    CaseEnded {
        case_id: CaseInstanceId,
        state: CaseState,
        at: DateTime<Utc>,
    },
    PlanItemTransitioned {
        case_id: CaseInstanceId,
        plan_item_id: PlanItemInstanceId,
        definition_id: String,
        from: Option<PlanItemState>,
        to: PlanItemState,
        transition: PlanItemTransition,
        at: DateTime<Utc>,
    },
    VariableUpdated {
        case_id: CaseInstanceId,
        plan_item_id: Option<PlanItemInstanceId>,
        name: String,
        value: serde_json::Value,
        at: DateTime<Utc>,
    },
}

impl HistoryEvent {
    pub fn case_id(&self) -> CaseInstanceId {
        match self {
            HistoryEvent::CaseStarted { case_id, .. }
            | HistoryEvent::CaseEnded { case_id, .. }
            | HistoryEvent::PlanItemTransitioned { case_id, .. }
            | HistoryEvent::VariableUpdated { case_id, .. } => *case_id,
        }
    }
}

pub trait HistorySink: Send + Sync + Debug {
    fn record(&self, event: &HistoryEvent);
}

/// Logs every event at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHistory;

impl HistorySink for TracingHistory {
    fn record(&self, event: &HistoryEvent) {
        match event {
            HistoryEvent::CaseStarted { case_id, definition_key, .. } => {
                info!(%case_id, %definition_key, "case started");
            }
            HistoryEvent::CaseEnded { case_id, state, .. } => {
                info!(%case_id, %state, "case ended");
            }
            HistoryEvent::PlanItemTransitioned {
                case_id,
                definition_id,
                from,
                to,
                transition,
                ..
            } => {
                let from = from.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
                info!(%case_id, plan_item = %definition_id, %from, %to, %transition, "plan item transition");
            }
            HistoryEvent::VariableUpdated { case_id, name, value, .. } => {
                info!(%case_id, %name, %value, "variable updated");
            }
        }
    }
}

/// Keeps every event in memory; used by the CLI report and in tests.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    events: Mutex<Vec<HistoryEvent>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HistoryEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_for(&self, case_id: CaseInstanceId) -> Vec<HistoryEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.case_id() == case_id)
            .collect()
    }

    /// Number of ended cases seen so far.
    pub fn finished_cases(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, HistoryEvent::CaseEnded { .. }))
            .count()
    }
}

impl HistorySink for MemoryHistory {
    fn record(&self, event: &HistoryEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Fans events out to several sinks.
#[derive(Debug, Default)]
pub struct CompositeHistory {
    sinks: Vec<std::sync::Arc<dyn HistorySink>>,
}

impl CompositeHistory {
    pub fn new(sinks: Vec<std::sync::Arc<dyn HistorySink>>) -> Self {
        Self { sinks }
    }
}

impl HistorySink for CompositeHistory {
    fn record(&self, event: &HistoryEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
