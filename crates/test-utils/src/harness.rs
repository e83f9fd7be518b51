#![allow(dead_code)]

use std::sync::Arc;

use caseflow::delegate::DelegateRegistry;
use caseflow::engine::{CaseService, EngineConfig};
use caseflow::errors::Result;
use caseflow::history::{HistoryEvent, HistorySink, MemoryHistory};
use caseflow::jobs::{JobQueue, MemoryJobQueue};
use caseflow::model::{CaseDefinition, InMemoryModelProvider, ModelProvider};
use caseflow::plan::{CaseInstance, CaseInstanceId, PlanItemInstance, PlanItemInstanceId};
use caseflow::types::{PlanItemState, VariableMap};
use chrono::{DateTime, Utc};

/// In-memory engine with its history and job queue exposed for assertions.
pub struct TestEngine {
    pub service: Arc<CaseService>,
    pub history: Arc<MemoryHistory>,
    pub jobs: Arc<MemoryJobQueue>,
    pub models: Arc<InMemoryModelProvider>,
}

impl TestEngine {
    /// Engine with the built-in delegates only.
    pub fn new(cases: impl IntoIterator<Item = CaseDefinition>) -> Self {
        Self::with_delegates(cases, DelegateRegistry::with_builtins())
    }

    pub fn with_delegates(
        cases: impl IntoIterator<Item = CaseDefinition>,
        delegates: DelegateRegistry,
    ) -> Self {
        Self::with_config(cases, delegates, EngineConfig::default())
    }

    pub fn with_config(
        cases: impl IntoIterator<Item = CaseDefinition>,
        delegates: DelegateRegistry,
        config: EngineConfig,
    ) -> Self {
        let models = Arc::new(InMemoryModelProvider::new());
        models
            .deploy_all(cases)
            .expect("Failed to deploy case models");
        let history = Arc::new(MemoryHistory::new());
        let jobs = Arc::new(MemoryJobQueue::new());

        let service = CaseService::builder(Arc::clone(&models) as Arc<dyn ModelProvider>)
            .history(Arc::clone(&history) as Arc<dyn HistorySink>)
            .jobs(Arc::clone(&jobs) as Arc<dyn JobQueue>)
            .delegates(delegates)
            .config(config)
            .build();

        Self {
            service: Arc::new(service),
            history,
            jobs,
            models,
        }
    }

    pub fn start(&self, key: &str) -> CaseInstance {
        self.start_with(key, VariableMap::new())
    }

    pub fn start_with(&self, key: &str, variables: VariableMap) -> CaseInstance {
        self.service
            .start_case(key, variables)
            .expect("Failed to start case")
    }

    pub fn case(&self, case_id: CaseInstanceId) -> CaseInstance {
        self.service
            .case_instance(case_id)
            .expect("Case not found")
    }

    /// Every instance, ended ones included, in declaration order.
    pub fn items(&self, case_id: CaseInstanceId) -> Vec<PlanItemInstance> {
        self.service
            .plan_items(case_id)
            .expect("Case not found")
    }

    pub fn live(&self, case_id: CaseInstanceId) -> Vec<PlanItemInstance> {
        self.service
            .live_plan_items(case_id)
            .expect("Case not found")
    }

    /// `(model id, state)` of every instance, in declaration order.
    pub fn states(&self, case_id: CaseInstanceId) -> Vec<(String, PlanItemState)> {
        self.items(case_id)
            .into_iter()
            .map(|item| (item.definition_id, item.state))
            .collect()
    }

    pub fn instances(&self, case_id: CaseInstanceId, definition_id: &str) -> Vec<PlanItemInstance> {
        self.service
            .plan_items_by_definition(case_id, definition_id)
            .expect("Case not found")
    }

    /// Newest live instance of a model item, else its newest instance.
    pub fn item(&self, case_id: CaseInstanceId, definition_id: &str) -> PlanItemInstance {
        let instances = self.instances(case_id, definition_id);
        instances
            .iter()
            .rev()
            .find(|item| item.is_live())
            .or_else(|| instances.last())
            .cloned()
            .unwrap_or_else(|| panic!("no instance of plan item '{definition_id}'"))
    }

    pub fn id(&self, case_id: CaseInstanceId, definition_id: &str) -> PlanItemInstanceId {
        self.item(case_id, definition_id).id
    }

    pub fn state(&self, case_id: CaseInstanceId, definition_id: &str) -> PlanItemState {
        self.item(case_id, definition_id).state
    }

    pub fn trigger(&self, case_id: CaseInstanceId, definition_id: &str) -> Result<()> {
        self.service.trigger(self.id(case_id, definition_id))
    }

    /// Run every queued job regardless of its due time.
    pub fn run_all_jobs(&self) -> usize {
        self.service.run_due_jobs(DateTime::<Utc>::MAX_UTC)
    }

    pub fn events_for(&self, case_id: CaseInstanceId) -> Vec<HistoryEvent> {
        self.history.events_for(case_id)
    }

    pub fn finished_cases(&self) -> usize {
        self.history.finished_cases()
    }
}
