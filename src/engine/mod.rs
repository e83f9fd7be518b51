// src/engine/mod.rs

//! Orchestration engine for caseflow.
//!
//! This module ties together:
//! - the agenda (FIFO of operations for one external trigger)
//! - the operation handlers that drive plan items through their lifecycle
//! - criteria evaluation and settle-point stage arbitration
//! - the synchronous case controller ([`CaseService`])
//! - the async shell ([`Runtime`]) that resolves delegate futures
//!   concurrently and polls the job queue
//!
//! A single trigger runs as one [`CaseExecution`]: a working copy of the
//! case that is drained to a settle point and committed in one store write.

use std::time::Duration;

use crate::plan::{CaseInstanceId, ParentLink};
use crate::types::{CaseState, VariableMap};

pub mod agenda;
pub mod evaluation;
pub mod execution;
pub mod handlers;
pub mod runtime;
pub mod service;

pub use agenda::{Agenda, OnPartEvent, Operation};
pub use execution::{CaseExecution, Effects, ExecutionContext, PendingDelegate};
pub use runtime::{Runtime, RuntimeHandle, RuntimeRequest};
pub use service::{CaseCommand, CaseService, CaseServiceBuilder, Cycle, drive_blocking};

/// Engine settings, read from the `[engine]` table of a model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on operations a single cycle may run.
    pub max_agenda_operations: usize,
    /// Delegate futures the async runtime polls at once; the rest are
    /// awaited inline.
    pub max_concurrent_delegates: usize,
    /// Local variable carrying the repetition counter of repeatable items.
    pub repetition_counter_variable: String,
    /// How often the async runtime looks for due jobs.
    pub job_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_agenda_operations: 10_000,
            max_concurrent_delegates: 4,
            repetition_counter_variable: "repetitionCounter".to_string(),
            job_poll_interval: Duration::from_millis(250),
        }
    }
}

/// Work a committed cycle hands to other cases.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// Start the child case of a case task under a pre-allocated id.
    StartCase {
        case_id: CaseInstanceId,
        definition_key: String,
        variables: VariableMap,
        parent: ParentLink,
    },
    /// Terminate a child case whose blocking case task ended first.
    TerminateCase { case_id: CaseInstanceId },
    /// Report the end of a child case to its blocking case task.
    ChildCaseEnded { parent: ParentLink, state: CaseState },
}

/// Result of draining the agenda.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Queue empty, no futures outstanding, nothing left to arbitrate.
    Settled,
    /// Queue empty but delegate futures are still outstanding.
    Suspended { pending: usize },
}
