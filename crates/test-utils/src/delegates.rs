#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use caseflow::delegate::{DelegateContext, DelegateResult, PlanItemDelegate};
use caseflow::types::VariableMap;
use futures::FutureExt;

/// A delegate that:
/// - records the model id of every item it runs for
/// - completes immediately with a fixed set of output variables.
#[derive(Clone, Default)]
pub struct RecordingDelegate {
    calls: Arc<Mutex<Vec<String>>>,
    output: VariableMap,
}

impl RecordingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(output: VariableMap) -> Self {
        Self {
            calls: Arc::default(),
            output,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PlanItemDelegate for RecordingDelegate {
    fn execute(&self, context: &DelegateContext) -> anyhow::Result<DelegateResult> {
        self.calls
            .lock()
            .unwrap()
            .push(context.definition_id.clone());
        Ok(DelegateResult::Completed(self.output.clone()))
    }
}

/// Always fails.
#[derive(Clone)]
pub struct FailingDelegate {
    message: String,
}

impl FailingDelegate {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl PlanItemDelegate for FailingDelegate {
    fn execute(&self, _context: &DelegateContext) -> anyhow::Result<DelegateResult> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// Hands back a future instead of finishing inline.
///
/// `ready` futures resolve on first poll and are safe with the blocking
/// driver. `sleeping` futures need a tokio runtime; they count how many of
/// them are in flight at once. Every future adds `<item>Done = true` to its
/// output.
#[derive(Clone)]
pub struct FutureDelegate {
    delay: Option<Duration>,
    output: VariableMap,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FutureDelegate {
    pub fn ready(output: VariableMap) -> Self {
        Self {
            delay: None,
            output,
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
        }
    }

    pub fn sleeping(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::ready(VariableMap::new())
        }
    }

    /// Highest number of futures observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl PlanItemDelegate for FutureDelegate {
    fn execute(&self, context: &DelegateContext) -> anyhow::Result<DelegateResult> {
        let mut output = self.output.clone();
        output.insert(
            format!("{}Done", context.definition_id),
            serde_json::Value::Bool(true),
        );
        let delay = self.delay;
        let in_flight = Arc::clone(&self.in_flight);
        let max_in_flight = Arc::clone(&self.max_in_flight);

        let future = async move {
            let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok::<VariableMap, anyhow::Error>(output)
        };
        Ok(DelegateResult::Pending(future.boxed()))
    }
}
