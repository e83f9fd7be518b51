// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::errors::{CaseError, Result};
use crate::plan::CaseInstance;

use super::execution::CaseExecution;
use super::service::{CaseCommand, CaseService};
use super::{DrainOutcome, FollowUp};

/// Requests flowing into the runtime.
#[derive(Debug)]
pub enum RuntimeRequest {
    /// Run a command; the committed case (or the error) goes to `reply`.
    Execute {
        command: CaseCommand,
        reply: oneshot::Sender<Result<CaseInstance>>,
    },
    /// Graceful shutdown.
    Shutdown,
}

/// Cloneable sender side of a [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeRequest>,
}

impl RuntimeHandle {
    pub async fn submit(&self, command: CaseCommand) -> Result<CaseInstance> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(RuntimeRequest::Execute { command, reply })
            .await
            .map_err(|_| CaseError::Other(anyhow::anyhow!("runtime is not running")))?;
        response
            .await
            .map_err(|_| CaseError::Other(anyhow::anyhow!("runtime dropped the request")))?
    }

    pub async fn shutdown(&self) {
        // A closed channel means the runtime already stopped.
        let _ = self.tx.send(RuntimeRequest::Shutdown).await;
    }
}

/// Async shell around [`CaseService`].
///
/// Commands are executed one at a time, so every case sees its cycles in
/// request order. Within a cycle, delegate futures are polled concurrently
/// up to `max_concurrent_delegates`; their results are fed back into the
/// cycle's agenda in completion order. The job queue is polled on an
/// interval.
pub struct Runtime {
    service: Arc<CaseService>,
    request_rx: mpsc::Receiver<RuntimeRequest>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(service: Arc<CaseService>, buffer: usize) -> (Self, RuntimeHandle) {
        let (tx, request_rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                service,
                request_rx,
            },
            RuntimeHandle { tx },
        )
    }

    /// Main loop.
    ///
    /// - Executes `RuntimeRequest`s from the channel.
    /// - Runs due jobs on every tick of the poll interval.
    /// - Stops on `Shutdown` or when every handle is dropped.
    pub async fn run(mut self) -> Result<()> {
        info!("caseflow runtime started");
        let mut ticker = tokio::time::interval(self.service.config().job_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(RuntimeRequest::Execute { command, reply }) => {
                        debug!(command = command.name(), "runtime received command");
                        let result = self.execute(command).await;
                        if reply.send(result).is_err() {
                            debug!("requester went away before the reply");
                        }
                    }
                    Some(RuntimeRequest::Shutdown) => {
                        info!("shutdown requested; stopping runtime");
                        break;
                    }
                    None => {
                        info!("runtime request channel closed; exiting");
                        break;
                    }
                },
                _ = ticker.tick() => self.run_due_jobs().await,
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    async fn execute(&self, command: CaseCommand) -> Result<CaseInstance> {
        let mut cycle = self.service.prepare(command)?;
        self.drive(cycle.execution_mut()).await?;
        let (case, follow_ups) = self.service.commit(cycle)?;
        self.run_follow_ups(follow_ups).await;
        Ok(case)
    }

    async fn run_due_jobs(&self) {
        for job in self.service.jobs().take_due(Utc::now()) {
            let command = CaseCommand::ExecuteJob { job: job.clone() };
            if let Err(err) = self.execute(command).await {
                self.service.requeue_failed_job(job, &err);
            }
        }
    }

    async fn run_follow_ups(&self, follow_ups: Vec<FollowUp>) {
        let mut queue: VecDeque<FollowUp> = follow_ups.into();
        while let Some(follow_up) = queue.pop_front() {
            let cycle = match self.service.prepare_follow_up(follow_up) {
                Ok(Some(cycle)) => cycle,
                Ok(None) => continue,
                Err(err) => {
                    warn!(error = %err, "follow-up cycle failed");
                    continue;
                }
            };
            let mut cycle = cycle;
            let outcome = match self.drive(cycle.execution_mut()).await {
                Ok(()) => self.service.commit(cycle),
                Err(err) => Err(err),
            };
            match outcome {
                Ok((_, more)) => queue.extend(more),
                Err(err) => warn!(error = %err, "follow-up cycle failed"),
            }
        }
    }

    /// Drain a cycle, awaiting delegate futures whenever it suspends.
    async fn drive(&self, execution: &mut CaseExecution) -> Result<()> {
        let limit = self.service.config().max_concurrent_delegates.max(1);
        loop {
            let pending = match execution.drain()? {
                DrainOutcome::Settled => return Ok(()),
                DrainOutcome::Suspended { pending } => pending,
            };
            let delegates = execution.take_pending_delegates();
            if delegates.is_empty() {
                return Err(CaseError::Other(anyhow::anyhow!(
                    "cycle suspended on {pending} delegates but no future is available"
                )));
            }

            let mut in_flight = FuturesUnordered::new();
            for delegate in delegates {
                let plan_item = delegate.plan_item;
                if in_flight.len() < limit {
                    in_flight.push(delegate.future.map(move |result| (plan_item, result)));
                } else {
                    warn!(%plan_item, delegate = %delegate.delegate, limit, "delegate executor saturated; awaiting inline");
                    let result = delegate.future.await;
                    execution.resume_delegate(plan_item, result)?;
                }
            }
            while let Some((plan_item, result)) = in_flight.next().await {
                execution.resume_delegate(plan_item, result)?;
            }
        }
    }
}
