//! Engine wiring
//!
//! One place that builds the workflow manager, chain orchestrator and
//! routing engine around a store, an entity registry and an outbox.

use std::sync::Arc;

use tokio::sync::mpsc;

use relay_core::{EntityRegistry, Outbox, RelayResult, RuntimeConfig, Store};

use crate::batch::BatchRegistry;
use crate::chain::{ChainEvent, ChainOrchestrator};
use crate::routing::RoutingEngine;
use crate::tasks::RetryPolicy;
use crate::tools::ToolRegistry;
use crate::workflow::{WorkflowRegistry, WorkflowStateManager};

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    config: RuntimeConfig,
    orchestrator: ChainOrchestrator,
    routing: RoutingEngine,
}

impl Engine {
    /// Engine with the built-in workflows and the standard tool set
    pub fn new(
        store: Arc<dyn Store>,
        entities: EntityRegistry,
        outbox: Arc<dyn Outbox>,
        config: RuntimeConfig,
    ) -> RelayResult<Self> {
        Self::with_registries(
            store,
            entities,
            WorkflowRegistry::with_builtins(),
            ToolRegistry::standard(outbox),
            config,
        )
    }

    pub fn with_registries(
        store: Arc<dyn Store>,
        entities: EntityRegistry,
        workflows: WorkflowRegistry,
        tools: ToolRegistry,
        config: RuntimeConfig,
    ) -> RelayResult<Self> {
        config.validate()?;
        let manager = WorkflowStateManager::new(store.clone(), Arc::new(workflows), Arc::new(tools));
        let orchestrator = ChainOrchestrator::new(store.clone(), manager, entities);
        let routing = RoutingEngine::new(config.spec.routing.clone());

        tracing::debug!(
            "Engine ready: workflows {:?}, {} worker(s)",
            orchestrator.workflows().workflows().types(),
            config.spec.workers.max_concurrent
        );
        Ok(Self {
            store,
            config,
            orchestrator,
            routing,
        })
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<ChainEvent>) -> Self {
        self.orchestrator = self.orchestrator.with_event_channel(tx);
        self
    }

    /// Share a batch registry with a task queue
    pub fn with_batches(mut self, batches: Arc<BatchRegistry>) -> Self {
        self.orchestrator = self.orchestrator.with_batches(batches);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &ChainOrchestrator {
        &self.orchestrator
    }

    pub fn workflows(&self) -> &WorkflowStateManager {
        self.orchestrator.workflows()
    }

    pub fn entities(&self) -> &EntityRegistry {
        self.orchestrator.entities()
    }

    pub fn routing(&self) -> &RoutingEngine {
        &self.routing
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.spec.retry)
    }
}
