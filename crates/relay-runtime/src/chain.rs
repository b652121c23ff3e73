//! Chain Orchestrator
//!
//! Drives a ChainExecution one step (or one parallel group) at a time.
//! Every call to `execute_step` is safe to repeat: step records are upserted
//! by (execution_id, step_index), completed steps are never re-run, and a
//! step paused at an approval gate is left alone until its workflow state
//! reaches a terminal status.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use relay_core::{
    filtered_snapshot, ApprovalDecision, Chain, ChainContext, ChainExecution, ChainExecutionStep,
    EntityRef, EntityRegistry, ExecutionStatus, RelayError, RelayResult, StepOutput, StepStatus,
    Store, WorkflowState, WorkflowStatus,
};

use crate::batch::{Batch, BatchRegistry};
use crate::propagation::ContextPropagator;
use crate::workflow::{ExecuteRequest, WorkflowStateManager};

/// Events emitted while executions progress
#[derive(Debug, Clone)]
pub enum ChainEvent {
    ExecutionStarted {
        execution_id: String,
        chain_id: String,
    },

    StepStarted {
        execution_id: String,
        step_index: usize,
        agent_id: String,
    },

    StepCompleted {
        execution_id: String,
        step_index: usize,
        workflow_state_id: String,
    },

    StepFailed {
        execution_id: String,
        step_index: usize,
        error: String,
    },

    AwaitingApproval {
        execution_id: String,
        step_index: usize,
        workflow_state_id: String,
    },

    ExecutionFinished {
        execution_id: String,
        status: ExecutionStatus,
    },
}

/// What one `execute_step` call achieved
#[derive(Debug, Clone, PartialEq)]
pub enum StepProgress {
    /// A sequential step completed
    Step {
        index: usize,
        workflow_state_id: String,
    },

    /// Every member of a parallel group completed
    Group { indices: Range<usize> },

    /// A step is paused at an approval gate
    AwaitingApproval {
        index: usize,
        workflow_state_id: String,
    },

    /// A step's workflow is running elsewhere
    InProgress { index: usize },

    /// No steps remain; the caller completes the execution
    Finished,

    /// The execution is not running
    Halted(ExecutionStatus),
}

impl StepProgress {
    /// Whether another `execute_step` call could make progress right away
    pub fn advanced(&self) -> bool {
        matches!(self, Self::Step { .. } | Self::Group { .. })
    }
}

enum MemberResult {
    Completed,
    Paused(String),
    InFlight,
    Skipped,
}

#[derive(Clone)]
pub struct ChainOrchestrator {
    store: Arc<dyn Store>,
    workflows: WorkflowStateManager,
    entities: EntityRegistry,
    batches: Arc<BatchRegistry>,
    event_tx: Option<mpsc::Sender<ChainEvent>>,
}

impl ChainOrchestrator {
    pub fn new(store: Arc<dyn Store>, workflows: WorkflowStateManager, entities: EntityRegistry) -> Self {
        Self {
            store,
            workflows,
            entities,
            batches: Arc::new(BatchRegistry::new()),
            event_tx: None,
        }
    }

    /// Add event channel for monitoring
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ChainEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_batches(mut self, batches: Arc<BatchRegistry>) -> Self {
        self.batches = batches;
        self
    }

    pub fn batches(&self) -> &Arc<BatchRegistry> {
        &self.batches
    }

    pub fn workflows(&self) -> &WorkflowStateManager {
        &self.workflows
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    /// Start a new execution of `chain`
    pub async fn execute_chain(
        &self,
        chain: &Chain,
        team_id: &str,
        triggering_entity: Option<EntityRef>,
        initial_context: serde_json::Map<String, serde_json::Value>,
    ) -> RelayResult<ChainExecution> {
        self.launch(chain, team_id, triggering_entity, initial_context, None)
            .await
    }

    /// Start an execution unless one already holds `dedupe_key`
    pub async fn execute_chain_once(
        &self,
        chain: &Chain,
        team_id: &str,
        triggering_entity: Option<EntityRef>,
        initial_context: serde_json::Map<String, serde_json::Value>,
        dedupe_key: &str,
    ) -> RelayResult<ChainExecution> {
        self.launch(
            chain,
            team_id,
            triggering_entity,
            initial_context,
            Some(dedupe_key),
        )
        .await
    }

    async fn launch(
        &self,
        chain: &Chain,
        team_id: &str,
        triggering_entity: Option<EntityRef>,
        initial_context: serde_json::Map<String, serde_json::Value>,
        dedupe_key: Option<&str>,
    ) -> RelayResult<ChainExecution> {
        if !chain.spec.enabled {
            return Err(RelayError::config(format!(
                "chain '{}' is disabled",
                chain.id()
            )));
        }
        chain.validate()?;

        if self.store.find_chain(chain.id()).await?.is_none() {
            self.store.save_chain(chain).await?;
        }

        let mut execution = ChainExecution::new(
            chain,
            team_id,
            triggering_entity,
            ChainContext::new(initial_context),
        );
        if let Some(key) = dedupe_key {
            execution = execution.with_dedupe_key(key);
        }

        let (execution, created) = self.store.create_execution(execution).await?;
        if created {
            info!(
                "Started execution {} of chain {} (v{}) for team {}",
                execution.id, execution.chain_id, execution.chain_version, execution.team_id
            );
            self.emit_event(ChainEvent::ExecutionStarted {
                execution_id: execution.id.clone(),
                chain_id: execution.chain_id.clone(),
            })
            .await;
        } else {
            debug!(
                "Reusing execution {} for dedupe key {:?}",
                execution.id, execution.dedupe_key
            );
        }
        Ok(execution)
    }

    /// Run the next incomplete step (or parallel group) of an execution
    pub async fn execute_step(&self, execution_id: &str) -> RelayResult<StepProgress> {
        let execution = self.load(execution_id).await?;
        if !execution.is_running() {
            return Ok(StepProgress::Halted(execution.status));
        }
        let chain = self.chain_for(&execution).await?;

        let mut steps: BTreeMap<usize, ChainExecutionStep> = self
            .store
            .list_steps(execution_id)
            .await?
            .into_iter()
            .map(|s| (s.step_index, s))
            .collect();

        if let Some(halt) = self.reconcile(&execution, &chain, &mut steps).await? {
            return Ok(halt);
        }

        let next = (0..chain.len()).find(|i| {
            steps
                .get(i)
                .map_or(true, |s| s.status != StepStatus::Completed)
        });
        let Some(next) = next else {
            debug!("Execution {} has no remaining steps", execution_id);
            return Ok(StepProgress::Finished);
        };

        // Reconciliation may have recorded outputs
        let execution = Arc::new(self.load(execution_id).await?);
        let chain = Arc::new(chain);
        let snapshot = self.entity_snapshot(&execution).await;
        let range = chain.group_range(next);

        if range.len() == 1 {
            let existing = steps.remove(&next);
            let result = self
                .run_member(execution.clone(), chain, next, existing, snapshot, None)
                .await?;
            return match result {
                MemberResult::Completed => {
                    let workflow_state_id = self
                        .store
                        .find_step(execution_id, next)
                        .await?
                        .and_then(|s| s.workflow_state_id)
                        .unwrap_or_default();
                    Ok(StepProgress::Step {
                        index: next,
                        workflow_state_id,
                    })
                }
                MemberResult::Paused(workflow_state_id) => Ok(StepProgress::AwaitingApproval {
                    index: next,
                    workflow_state_id,
                }),
                MemberResult::InFlight => Ok(StepProgress::InProgress { index: next }),
                MemberResult::Skipped => Ok(StepProgress::Halted(
                    self.load(execution_id).await?.status,
                )),
            };
        }

        self.run_group(execution, chain, range, steps, snapshot).await
    }

    async fn run_group(
        &self,
        execution: Arc<ChainExecution>,
        chain: Arc<Chain>,
        range: Range<usize>,
        mut steps: BTreeMap<usize, ChainExecutionStep>,
        snapshot: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> RelayResult<StepProgress> {
        let batch = self.batches.create(Some(&execution.id));
        info!(
            "Execution {} dispatching parallel steps {}..{} as batch {}",
            execution.id,
            range.start,
            range.end,
            batch.id()
        );

        let mut handles = Vec::new();
        for index in range.clone() {
            let existing = steps.remove(&index);
            if existing
                .as_ref()
                .map_or(false, |s| s.status == StepStatus::Completed)
            {
                continue;
            }
            batch.add(format!("{}:{}", execution.id, index));

            let this = self.clone();
            let execution = execution.clone();
            let chain = chain.clone();
            let snapshot = snapshot.clone();
            let batch = batch.clone();
            let handle = tokio::spawn(async move {
                this.run_member(execution, chain, index, existing, snapshot, Some(batch))
                    .await
            });
            handles.push((index, handle));
        }

        let results = join_all(
            handles
                .into_iter()
                .map(|(index, handle)| async move { (index, handle.await) }),
        )
        .await;
        self.batches.remove(batch.id());

        let mut first_error = None;
        let mut paused = None;
        let mut in_flight = None;
        let mut skipped = false;
        for (index, result) in results {
            match result {
                Ok(Ok(MemberResult::Completed)) => {}
                Ok(Ok(MemberResult::Paused(workflow_state_id))) => {
                    if paused.is_none() {
                        paused = Some((index, workflow_state_id));
                    }
                }
                Ok(Ok(MemberResult::InFlight)) => {
                    if in_flight.is_none() {
                        in_flight = Some(index);
                    }
                }
                Ok(Ok(MemberResult::Skipped)) => skipped = true,
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(RelayError::execution(format!(
                            "step {} task aborted: {}",
                            index, e
                        )));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if skipped {
            let status = self.load(&execution.id).await?.status;
            info!(
                "Batch {} of execution {} was cancelled",
                batch.id(),
                execution.id
            );
            return Ok(StepProgress::Halted(status));
        }
        if let Some((index, workflow_state_id)) = paused {
            return Ok(StepProgress::AwaitingApproval {
                index,
                workflow_state_id,
            });
        }
        if let Some(index) = in_flight {
            return Ok(StepProgress::InProgress { index });
        }
        Ok(StepProgress::Group { indices: range })
    }

    async fn run_member(
        &self,
        execution: Arc<ChainExecution>,
        chain: Arc<Chain>,
        index: usize,
        existing: Option<ChainExecutionStep>,
        snapshot: Option<serde_json::Map<String, serde_json::Value>>,
        batch: Option<Arc<Batch>>,
    ) -> RelayResult<MemberResult> {
        if let Some(step) = existing.as_ref().filter(|s| s.status == StepStatus::Running) {
            if let Some(state) = self.workflow_state_of(step).await? {
                match state.status {
                    WorkflowStatus::Paused => return Ok(MemberResult::Paused(state.id)),
                    WorkflowStatus::Pending | WorkflowStatus::Running => {
                        return Ok(MemberResult::InFlight)
                    }
                    _ => {}
                }
            }
        }

        if batch.as_ref().map_or(false, |b| b.is_cancelled()) {
            debug!(
                "Skipping step {} of execution {}: batch cancelled",
                index, execution.id
            );
            return Ok(MemberResult::Skipped);
        }

        let definition = chain.step(index).ok_or_else(|| {
            RelayError::not_found("chain step", format!("{}[{}]", chain.id(), index))
        })?;

        let mut record = existing.unwrap_or_else(|| ChainExecutionStep::new(&execution.id, index));
        record.mark_running();
        record.workflow_state_id = None;
        self.store.upsert_step(&record).await?;
        self.emit_event(ChainEvent::StepStarted {
            execution_id: execution.id.clone(),
            step_index: index,
            agent_id: definition.agent.clone(),
        })
        .await;

        let batch_start = chain.group_range(index).start;
        let request = ExecuteRequest::new(
            &definition.workflow,
            &execution.team_id,
            &definition.agent,
            ContextPropagator::step_input(&chain, &execution, index, snapshot),
        )
        .with_inherited_context(ContextPropagator::inherited_context(
            &execution.chain_context,
            batch_start,
        ))
        .with_cost(definition.estimated_cost);

        let state = match self.workflows.execute_with(request).await {
            Ok(state) => state,
            Err(e) => {
                self.record_step_failure(record, &e).await;
                return Err(e);
            }
        };
        record.workflow_state_id = Some(state.id.clone());

        match state.status {
            WorkflowStatus::Completed => {
                self.complete_step(&mut record, &state).await?;
                Ok(MemberResult::Completed)
            }
            WorkflowStatus::Paused => {
                self.store.upsert_step(&record).await?;
                info!(
                    "Step {} of execution {} awaiting approval (workflow {})",
                    index, execution.id, state.id
                );
                self.emit_event(ChainEvent::AwaitingApproval {
                    execution_id: execution.id.clone(),
                    step_index: index,
                    workflow_state_id: state.id.clone(),
                })
                .await;
                Ok(MemberResult::Paused(state.id))
            }
            _ => {
                let error = state.failure_error();
                self.record_step_failure(record, &error).await;
                Err(error)
            }
        }
    }

    /// Fold workflow states that finished after a resume back into their steps
    async fn reconcile(
        &self,
        execution: &ChainExecution,
        chain: &Chain,
        steps: &mut BTreeMap<usize, ChainExecutionStep>,
    ) -> RelayResult<Option<StepProgress>> {
        for (index, step) in steps.iter_mut() {
            if step.status != StepStatus::Running {
                continue;
            }
            let Some(state) = self.workflow_state_of(step).await? else {
                continue;
            };

            match state.status {
                WorkflowStatus::Completed => {
                    debug!(
                        "Reconciling step {} of execution {}: workflow completed",
                        index, execution.id
                    );
                    self.complete_step(step, &state).await?;
                }
                WorkflowStatus::Rejected => {
                    let error = RelayError::execution(format!(
                        "approval rejected for step {} ({})",
                        index,
                        chain
                            .step(*index)
                            .map(|s| s.agent.as_str())
                            .unwrap_or("unknown agent")
                    ));
                    self.record_step_failure(step.clone(), &error).await;
                    step.status = StepStatus::Failed;
                    let cancelled = self.cancel(&execution.id).await?;
                    return Ok(Some(StepProgress::Halted(cancelled.status)));
                }
                WorkflowStatus::Failed => {
                    self.record_step_failure(step.clone(), &state.failure_error()).await;
                    step.status = StepStatus::Failed;
                }
                _ => {}
            }
        }
        Ok(None)
    }

    async fn complete_step(
        &self,
        record: &mut ChainExecutionStep,
        state: &WorkflowState,
    ) -> RelayResult<()> {
        let output = state.state_data.output.clone().unwrap_or_default();
        record.mark_completed(output.clone());
        self.store.upsert_step(record).await?;

        let step_output = StepOutput {
            agent_id: state.agent_id.clone(),
            workflow_type: state.workflow_type.clone(),
            workflow_state_id: Some(state.id.clone()),
            output,
            completed_at: Utc::now(),
        };
        if let Err(e) = self
            .store
            .record_step_output(&record.execution_id, record.step_index, step_output)
            .await
        {
            warn!(
                "Step {} of execution {} completed but its output was not recorded: {}",
                record.step_index, record.execution_id, e
            );
        }

        info!(
            "Step {} of execution {} completed",
            record.step_index, record.execution_id
        );
        self.emit_event(ChainEvent::StepCompleted {
            execution_id: record.execution_id.clone(),
            step_index: record.step_index,
            workflow_state_id: state.id.clone(),
        })
        .await;
        Ok(())
    }

    async fn record_step_failure(&self, mut record: ChainExecutionStep, error: &RelayError) {
        record.mark_failed(error);
        if let Err(store_error) = self.store.upsert_step(&record).await {
            warn!(
                "Failed to record failure of step {} of execution {}: {}",
                record.step_index, record.execution_id, store_error
            );
        }
        warn!(
            "Step {} of execution {} failed (attempt {}): {}",
            record.step_index, record.execution_id, record.attempts, error
        );
        self.emit_event(ChainEvent::StepFailed {
            execution_id: record.execution_id.clone(),
            step_index: record.step_index,
            error: error.to_string(),
        })
        .await;
    }

    /// Resume the paused workflow of one step with an approval payload
    ///
    /// The chain itself does not advance; drive it with `execute_step`.
    pub async fn approve_step(
        &self,
        execution_id: &str,
        step_index: usize,
        decision: ApprovalDecision,
    ) -> RelayResult<WorkflowState> {
        let execution = self.load(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(RelayError::invalid_transition(
                "chain_execution",
                execution_id,
                execution.status,
                ExecutionStatus::Running,
            ));
        }
        let step = self
            .store
            .find_step(execution_id, step_index)
            .await?
            .ok_or_else(|| {
                RelayError::not_found("chain step", format!("{}[{}]", execution_id, step_index))
            })?;
        let workflow_state_id = step.workflow_state_id.ok_or_else(|| {
            RelayError::not_found(
                "workflow state",
                format!("{}[{}]", execution_id, step_index),
            )
        })?;
        self.workflows
            .resume_by_id(&workflow_state_id, decision)
            .await
    }

    pub async fn complete(&self, execution_id: &str) -> RelayResult<ChainExecution> {
        self.transition(execution_id, ExecutionStatus::Completed, None)
            .await
    }

    pub async fn fail(&self, execution_id: &str, error: &RelayError) -> RelayResult<ChainExecution> {
        self.batches.cancel_owned_by(execution_id);
        self.transition(execution_id, ExecutionStatus::Failed, Some(error))
            .await
    }

    /// Cancel the execution and its active batch
    pub async fn cancel(&self, execution_id: &str) -> RelayResult<ChainExecution> {
        self.batches.cancel_owned_by(execution_id);
        self.transition(execution_id, ExecutionStatus::Cancelled, None)
            .await
    }

    pub async fn pause(&self, execution_id: &str) -> RelayResult<ChainExecution> {
        self.transition(execution_id, ExecutionStatus::Paused, None)
            .await
    }

    pub async fn resume_execution(&self, execution_id: &str) -> RelayResult<ChainExecution> {
        self.transition(execution_id, ExecutionStatus::Running, None)
            .await
    }

    pub async fn execution(&self, execution_id: &str) -> RelayResult<ChainExecution> {
        self.load(execution_id).await
    }

    pub async fn steps(&self, execution_id: &str) -> RelayResult<Vec<ChainExecutionStep>> {
        self.store.list_steps(execution_id).await
    }

    async fn transition(
        &self,
        execution_id: &str,
        next: ExecutionStatus,
        error: Option<&RelayError>,
    ) -> RelayResult<ChainExecution> {
        let mut execution = self.load(execution_id).await?;
        execution.transition_to(next)?;
        if let Some(e) = error {
            execution.error = Some(e.into());
        }
        self.store.update_execution(&execution).await?;
        info!("Execution {} is now {}", execution_id, next);

        if next.is_terminal() {
            self.emit_event(ChainEvent::ExecutionFinished {
                execution_id: execution_id.to_string(),
                status: next,
            })
            .await;
        }
        Ok(execution)
    }

    async fn load(&self, execution_id: &str) -> RelayResult<ChainExecution> {
        self.store
            .find_execution(execution_id)
            .await?
            .ok_or_else(|| RelayError::not_found("chain execution", execution_id))
    }

    async fn chain_for(&self, execution: &ChainExecution) -> RelayResult<Chain> {
        let chain = self
            .store
            .find_chain(&execution.chain_id)
            .await?
            .ok_or_else(|| RelayError::not_found("chain", &execution.chain_id))?;
        if chain.spec.version != execution.chain_version {
            warn!(
                "Execution {} started on chain {} v{}, store now holds v{}",
                execution.id, chain.id(), execution.chain_version, chain.spec.version
            );
        }
        Ok(chain)
    }

    async fn workflow_state_of(&self, step: &ChainExecutionStep) -> RelayResult<Option<WorkflowState>> {
        match step.workflow_state_id.as_deref() {
            Some(id) => self.store.find_workflow_state(id).await,
            None => Ok(None),
        }
    }

    async fn entity_snapshot(
        &self,
        execution: &ChainExecution,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        let entity = execution.triggering_entity.as_ref()?;
        match self.entities.resolve(entity).await {
            Ok(resolved) => Some(filtered_snapshot(resolved.as_ref())),
            Err(e) => {
                debug!("No snapshot for {}: {}", entity, e);
                None
            }
        }
    }

    async fn emit_event(&self, event: ChainEvent) {
        if let Some(ref tx) = self.event_tx {
            if tx.send(event).await.is_err() {
                warn!("Failed to send chain event");
            }
        }
    }
}
