// src/jobs.rs

//! Deferred work: async continuations and timers.
//!
//! The engine only schedules jobs (on commit); an outer loop takes due jobs
//! and feeds them back through `CaseService::execute_job`.

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::plan::{CaseInstanceId, PlanItemInstanceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Move an `ASYNC_ACTIVE` item to `ACTIVE` and run its start behaviour.
    AsyncActivation { plan_item: PlanItemInstanceId },
    /// A timer event listener's delay has passed.
    TimerElapsed { plan_item: PlanItemInstanceId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub case_id: CaseInstanceId,
    pub kind: JobKind,
    pub not_before: DateTime<Utc>,
}

impl Job {
    pub fn new(case_id: CaseInstanceId, kind: JobKind, not_before: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            kind,
            not_before,
        }
    }
}

pub trait JobQueue: Send + Sync + Debug {
    fn schedule(&self, job: Job);

    /// Remove and return every job due at `now`, earliest first.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<Job>;

    /// Earliest `not_before` of the queued jobs.
    fn next_due(&self) -> Option<DateTime<Utc>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<Job> {
        match self.jobs.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_jobs<R>(&self, f: impl FnOnce(&mut Vec<Job>) -> R) -> R {
        match self.jobs.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl JobQueue for MemoryJobQueue {
    fn schedule(&self, job: Job) {
        self.with_jobs(|jobs| jobs.push(job));
    }

    fn take_due(&self, now: DateTime<Utc>) -> Vec<Job> {
        self.with_jobs(|jobs| {
            let (mut due, rest): (Vec<Job>, Vec<Job>) =
                jobs.drain(..).partition(|job| job.not_before <= now);
            *jobs = rest;
            due.sort_by_key(|job| job.not_before);
            due
        })
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.with_jobs(|jobs| jobs.iter().map(|job| job.not_before).min())
    }

    fn len(&self) -> usize {
        self.with_jobs(|jobs| jobs.len())
    }
}
