//! Chain Orchestrator Integration Tests
//!
//! Drives executions step by step against the in-memory store and checks:
//! - Sequential steps run in ascending order and feed later steps
//! - Retried steps keep a single record per (execution, index)
//! - Parallel groups run as one batch and honour cancellation
//! - Approval gates pause, resume, and reject
//! - Dedupe keys and quota limits

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use relay_core::{
    AgentConfigStore, AgentConfiguration, ApprovalDecision, Capabilities, Chain, ChainStep,
    EntityRegistry, ExecutionStatus, ExecutionStore, RelayError, RelayResult, RuntimeConfig,
    StepStatus, WorkflowOutcome, WorkflowStateStore, WorkflowStatus,
};
use relay_memory::{InMemoryOutbox, InMemoryStore};
use relay_runtime::{
    BatchRegistry, Engine, StepProgress, ToolRegistry, Workflow, WorkflowContext,
    WorkflowRegistry,
};

const TEAM: &str = "maintenance";

/// Fails with a transient error on its first run only
struct FlakyWorkflow {
    runs: AtomicU32,
}

#[async_trait]
impl Workflow for FlakyWorkflow {
    fn workflow_type(&self) -> &str {
        "flaky"
    }

    async fn run(&self, _ctx: &WorkflowContext, _input: &Value) -> RelayResult<WorkflowOutcome> {
        if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(RelayError::execution("model timeout"));
        }
        Ok(WorkflowOutcome::completed(json!({ "recovered": true })))
    }
}

/// Cancels the execution it runs in, the way an operator would mid-batch
struct CancellingWorkflow {
    store: InMemoryStore,
    batches: Arc<BatchRegistry>,
}

#[async_trait]
impl Workflow for CancellingWorkflow {
    fn workflow_type(&self) -> &str {
        "cancel_execution"
    }

    async fn run(&self, _ctx: &WorkflowContext, input: &Value) -> RelayResult<WorkflowOutcome> {
        let execution_id = input["chain"]["execution_id"].as_str().unwrap_or_default();
        self.batches.cancel_owned_by(execution_id);
        if let Some(mut execution) = self.store.find_execution(execution_id).await? {
            execution.transition_to(ExecutionStatus::Cancelled)?;
            self.store.update_execution(&execution).await?;
        }
        Ok(WorkflowOutcome::completed(json!({ "cancelled": execution_id })))
    }
}

/// Create a test engine over `store` with the built-ins plus `extra`
fn create_test_engine(
    store: &InMemoryStore,
    extra: Vec<Arc<dyn Workflow>>,
) -> (Engine, Arc<InMemoryOutbox>) {
    let outbox = Arc::new(InMemoryOutbox::new());
    let mut workflows = WorkflowRegistry::with_builtins();
    for workflow in extra {
        workflows.register(workflow);
    }
    let engine = Engine::with_registries(
        Arc::new(store.clone()),
        EntityRegistry::new(),
        workflows,
        ToolRegistry::standard(outbox.clone()),
        RuntimeConfig::default(),
    )
    .unwrap();
    (engine, outbox)
}

/// Register agents with every capability
async fn create_test_agents(store: &InMemoryStore, agents: &[&str]) {
    for agent in agents {
        store
            .save_agent_config(
                &AgentConfiguration::new(TEAM, *agent)
                    .with_limits(100, 1000.0)
                    .with_capabilities(Capabilities::all()),
            )
            .await
            .unwrap();
    }
}

async fn create_approval_agent(store: &InMemoryStore, agent: &str) {
    let capabilities = Capabilities {
        requires_approval: true,
        ..Capabilities::all()
    };
    store
        .save_agent_config(
            &AgentConfiguration::new(TEAM, agent)
                .with_limits(100, 1000.0)
                .with_capabilities(capabilities),
        )
        .await
        .unwrap();
}

fn initial_context() -> Map<String, Value> {
    let mut initial = Map::new();
    initial.insert("title".to_string(), json!("Replace pump seal"));
    initial
}

// ============================================================================
// Sequential Steps
// ============================================================================

#[tokio::test]
async fn test_sequential_steps_run_in_order() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["a", "b", "c"]).await;
    let (engine, _) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();

    let chain = Chain::new(
        "abc",
        vec![
            ChainStep::new("a", "echo"),
            ChainStep::new("b", "echo"),
            ChainStep::new("c", "echo"),
        ],
    );
    let execution = orchestrator
        .execute_chain(&chain, TEAM, None, initial_context())
        .await
        .unwrap();

    for expected in 0..3 {
        let progress = orchestrator.execute_step(&execution.id).await.unwrap();
        assert!(
            matches!(progress, StepProgress::Step { index, .. } if index == expected),
            "unexpected progress {:?}",
            progress
        );
    }
    assert_eq!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Finished
    );

    let finished = orchestrator.complete(&execution.id).await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.chain_context.steps.len(), 3);

    let steps = orchestrator.steps(&execution.id).await.unwrap();
    let indices: Vec<usize> = steps.iter().map(|s| s.step_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn test_later_steps_inherit_earlier_outputs() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["a", "b"]).await;
    let (engine, _) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();

    let chain = Chain::new(
        "ab",
        vec![ChainStep::new("a", "echo"), ChainStep::new("b", "echo")],
    );
    let execution = orchestrator
        .execute_chain(&chain, TEAM, None, initial_context())
        .await
        .unwrap();
    orchestrator.execute_step(&execution.id).await.unwrap();
    let StepProgress::Step {
        workflow_state_id, ..
    } = orchestrator.execute_step(&execution.id).await.unwrap()
    else {
        panic!("expected step 1 to complete");
    };

    let state = store
        .find_workflow_state(&workflow_state_id)
        .await
        .unwrap()
        .unwrap();
    let inherited = state.state_data.inherited_context.unwrap();
    assert_eq!(inherited["previous_steps"].as_array().unwrap().len(), 1);
    assert_eq!(inherited["last_output"]["agent_id"], "a");
    assert_eq!(state.state_data.input["title"], "Replace pump seal");
    assert_eq!(state.state_data.input["step"]["index"], 1);
}

#[tokio::test]
async fn test_completed_execution_is_not_rerun() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["a"]).await;
    let (engine, _) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();

    let chain = Chain::new("single", vec![ChainStep::new("a", "echo")]);
    let execution = orchestrator
        .execute_chain(&chain, TEAM, None, Map::new())
        .await
        .unwrap();
    orchestrator.execute_step(&execution.id).await.unwrap();
    orchestrator.complete(&execution.id).await.unwrap();

    assert_eq!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Halted(ExecutionStatus::Completed)
    );
    assert_eq!(store.workflow_state_count(), 1);
    assert!(orchestrator.cancel(&execution.id).await.is_err());
}

// ============================================================================
// Retry Idempotency
// ============================================================================

#[tokio::test]
async fn test_retried_step_keeps_single_record() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["a"]).await;
    let flaky: Arc<dyn Workflow> = Arc::new(FlakyWorkflow {
        runs: AtomicU32::new(0),
    });
    let (engine, _) = create_test_engine(&store, vec![flaky]);
    let orchestrator = engine.orchestrator();

    let chain = Chain::new("retry", vec![ChainStep::new("a", "flaky")]);
    let execution = orchestrator
        .execute_chain(&chain, TEAM, None, Map::new())
        .await
        .unwrap();

    let err = orchestrator.execute_step(&execution.id).await.unwrap_err();
    assert!(err.is_retryable());
    let failed = orchestrator.steps(&execution.id).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, StepStatus::Failed);
    let captured = failed[0].error.as_ref().unwrap();
    assert_eq!(captured.message, "execution failed: model timeout");
    assert_eq!(err.to_string(), captured.message);

    let progress = orchestrator.execute_step(&execution.id).await.unwrap();
    assert!(matches!(progress, StepProgress::Step { index: 0, .. }));

    assert_eq!(store.step_count(&execution.id), 1);
    let step = store.find_step(&execution.id, 0).await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.attempts, 2);
    assert!(step.error.is_none());
    assert_eq!(step.output_data["recovered"], true);
}

// ============================================================================
// Parallel Groups
// ============================================================================

#[tokio::test]
async fn test_parallel_group_runs_as_one_batch() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["triage", "left", "right", "summary"]).await;
    let (engine, _) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();

    let chain = Chain::new(
        "fan-out",
        vec![
            ChainStep::new("triage", "echo"),
            ChainStep::new("left", "echo").in_group("review"),
            ChainStep::new("right", "echo").in_group("review"),
            ChainStep::new("summary", "echo"),
        ],
    );
    let execution = orchestrator
        .execute_chain(&chain, TEAM, None, Map::new())
        .await
        .unwrap();

    assert!(matches!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Step { index: 0, .. }
    ));
    assert_eq!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Group { indices: 1..3 }
    );

    // Both members saw only the step before the group
    for index in 1..3 {
        let step = store.find_step(&execution.id, index).await.unwrap().unwrap();
        let state = store
            .find_workflow_state(step.workflow_state_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        let inherited = state.state_data.inherited_context.unwrap();
        assert_eq!(inherited["previous_steps"].as_array().unwrap().len(), 1);
    }

    let StepProgress::Step {
        index: 3,
        workflow_state_id,
    } = orchestrator.execute_step(&execution.id).await.unwrap()
    else {
        panic!("expected the summary step");
    };
    let summary = store
        .find_workflow_state(&workflow_state_id)
        .await
        .unwrap()
        .unwrap();
    let inherited = summary.state_data.inherited_context.unwrap();
    assert_eq!(inherited["previous_steps"].as_array().unwrap().len(), 3);

    assert_eq!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Finished
    );
    let execution = orchestrator.execution(&execution.id).await.unwrap();
    assert_eq!(execution.chain_context.steps.len(), 4);
    assert!(orchestrator.batches().is_empty());
}

#[tokio::test]
async fn test_cancelled_batch_skips_remaining_members() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["operator", "worker"]).await;
    let batches = Arc::new(BatchRegistry::new());
    let canceller: Arc<dyn Workflow> = Arc::new(CancellingWorkflow {
        store: store.clone(),
        batches: batches.clone(),
    });
    let (engine, _) = create_test_engine(&store, vec![canceller]);
    let engine = engine.with_batches(batches);
    let orchestrator = engine.orchestrator();

    let chain = Chain::new(
        "cancel-mid-batch",
        vec![
            ChainStep::new("operator", "cancel_execution").in_group("batch"),
            ChainStep::new("worker", "echo").in_group("batch"),
        ],
    );
    let execution = orchestrator
        .execute_chain(&chain, TEAM, None, Map::new())
        .await
        .unwrap();

    assert_eq!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Halted(ExecutionStatus::Cancelled)
    );
    assert!(store.find_step(&execution.id, 1).await.unwrap().is_none());
    assert_eq!(store.workflow_state_count(), 1);
}

// ============================================================================
// Approval Gates
// ============================================================================

fn approval_chain() -> Chain {
    Chain::new(
        "intake",
        vec![
            ChainStep::new("triage", "echo"),
            ChainStep::new("drafter", "draft_work_order"),
            ChainStep::new("notifier", "echo"),
        ],
    )
}

#[tokio::test]
async fn test_approval_gate_end_to_end() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["triage", "notifier"]).await;
    create_approval_agent(&store, "drafter").await;
    let (engine, outbox) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();

    let execution = orchestrator
        .execute_chain(&approval_chain(), TEAM, None, initial_context())
        .await
        .unwrap();
    orchestrator.execute_step(&execution.id).await.unwrap();

    let StepProgress::AwaitingApproval {
        index: 1,
        workflow_state_id,
    } = orchestrator.execute_step(&execution.id).await.unwrap()
    else {
        panic!("expected the drafter to pause");
    };
    let paused = store
        .find_workflow_state(&workflow_state_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paused.status, WorkflowStatus::Paused);
    assert!(paused.state_data.approval.is_some());
    assert!(outbox.is_empty());

    // Polling a paused step does not start another invocation
    assert!(matches!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::AwaitingApproval { index: 1, .. }
    ));
    assert_eq!(store.workflow_state_count(), 2);

    let resumed = orchestrator
        .approve_step(&execution.id, 1, ApprovalDecision::approve().by("lead"))
        .await
        .unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Completed);
    let filed = outbox.actions_named("create_work_order");
    assert_eq!(filed.len(), 1);
    assert_eq!(filed[0].payload["title"], "Replace pump seal");

    assert!(matches!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Step { index: 2, .. }
    ));
    assert_eq!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Finished
    );
    let step = store.find_step(&execution.id, 1).await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Completed);
}

#[tokio::test]
async fn test_rejected_approval_cancels_execution() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["triage", "notifier"]).await;
    create_approval_agent(&store, "drafter").await;
    let (engine, outbox) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();

    let execution = orchestrator
        .execute_chain(&approval_chain(), TEAM, None, initial_context())
        .await
        .unwrap();
    orchestrator.execute_step(&execution.id).await.unwrap();
    orchestrator.execute_step(&execution.id).await.unwrap();

    let rejected = orchestrator
        .approve_step(&execution.id, 1, ApprovalDecision::reject("wrong site"))
        .await
        .unwrap();
    assert_eq!(rejected.status, WorkflowStatus::Rejected);

    assert_eq!(
        orchestrator.execute_step(&execution.id).await.unwrap(),
        StepProgress::Halted(ExecutionStatus::Cancelled)
    );
    let step = store.find_step(&execution.id, 1).await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    let captured = step.error.unwrap();
    assert_eq!(captured.kind, "transient_execution");
    assert!(captured.message.contains("approval rejected for step 1 (drafter)"));
    assert!(store.find_step(&execution.id, 2).await.unwrap().is_none());
    assert!(outbox.is_empty());
}

// ============================================================================
// Dedupe and Quotas
// ============================================================================

#[tokio::test]
async fn test_dedupe_key_reuses_execution() {
    let store = InMemoryStore::new();
    create_test_agents(&store, &["a"]).await;
    let (engine, _) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();
    let chain = Chain::new("single", vec![ChainStep::new("a", "echo")]);

    let first = orchestrator
        .execute_chain_once(&chain, TEAM, None, Map::new(), "trigger:wo-1:evt-1")
        .await
        .unwrap();
    let second = orchestrator
        .execute_chain_once(&chain, TEAM, None, Map::new(), "trigger:wo-1:evt-1")
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(store.execution_count(), 1);
}

#[tokio::test]
async fn test_rate_limit_blocks_the_extra_run() {
    let store = InMemoryStore::new();
    store
        .save_agent_config(&AgentConfiguration::new(TEAM, "a").with_limits(2, 1000.0))
        .await
        .unwrap();
    let (engine, _) = create_test_engine(&store, vec![]);
    let orchestrator = engine.orchestrator();
    let chain = Chain::new("single", vec![ChainStep::new("a", "echo")]);

    for _ in 0..2 {
        let execution = orchestrator
            .execute_chain(&chain, TEAM, None, Map::new())
            .await
            .unwrap();
        assert!(orchestrator.execute_step(&execution.id).await.unwrap().advanced());
    }

    let third = orchestrator
        .execute_chain(&chain, TEAM, None, Map::new())
        .await
        .unwrap();
    let err = orchestrator.execute_step(&third.id).await.unwrap_err();
    assert!(matches!(err, RelayError::RateLimitExceeded { used: 2, limit: 2, .. }));
    assert!(!err.is_retryable());

    assert_eq!(store.workflow_state_count(), 2);
    assert_eq!(store.agent_config(TEAM, "a").unwrap().daily_run_count, 2);
    let step = store.find_step(&third.id, 0).await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Failed);
}

#[tokio::test]
async fn test_disabled_chain_is_rejected() {
    let store = InMemoryStore::new();
    let (engine, _) = create_test_engine(&store, vec![]);
    let mut chain = Chain::new("off", vec![ChainStep::new("a", "echo")]);
    chain.spec.enabled = false;

    let err = engine
        .orchestrator()
        .execute_chain(&chain, TEAM, None, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Configuration(_)));
    assert_eq!(store.execution_count(), 0);
}
