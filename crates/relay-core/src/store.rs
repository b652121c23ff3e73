// Relay Core - Persistence traits
//
// The engine never talks to a database directly. It needs find-by-id,
// create, update, a create-or-update keyed by natural identifiers, and an
// atomic check-and-increment for usage counters. Backends implement these
// traits; `relay-memory` ships the in-process one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfiguration, UsageSnapshot};
use crate::chain::{Chain, ChainExecution, ChainExecutionStep};
use crate::context::StepOutput;
use crate::entity::EntityRef;
use crate::error::RelayResult;
use crate::team::Team;
use crate::trigger::Trigger;
use crate::workflow::WorkflowState;

/// Result of a create-or-update by natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait WorkflowStateStore: Send + Sync {
    async fn create_workflow_state(&self, state: &WorkflowState) -> RelayResult<()>;

    async fn find_workflow_state(&self, id: &str) -> RelayResult<Option<WorkflowState>>;

    /// Must refuse to overwrite a record whose stored status is terminal
    async fn update_workflow_state(&self, state: &WorkflowState) -> RelayResult<()>;
}

#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn find_chain(&self, id: &str) -> RelayResult<Option<Chain>>;

    async fn save_chain(&self, chain: &Chain) -> RelayResult<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Create an execution, or return the one already holding its dedupe key
    ///
    /// The boolean is `true` when a new record was inserted.
    async fn create_execution(
        &self,
        execution: ChainExecution,
    ) -> RelayResult<(ChainExecution, bool)>;

    async fn find_execution(&self, id: &str) -> RelayResult<Option<ChainExecution>>;

    /// Must refuse to overwrite a record whose stored status is terminal
    async fn update_execution(&self, execution: &ChainExecution) -> RelayResult<()>;

    /// Merge one step's output into the execution's chain context
    ///
    /// Applied in place so concurrent members of a parallel group never
    /// overwrite each other's outputs. Refuses terminal executions.
    async fn record_step_output(
        &self,
        execution_id: &str,
        step_index: usize,
        output: StepOutput,
    ) -> RelayResult<ChainExecution>;

    async fn executions_for_entity(&self, entity: &EntityRef) -> RelayResult<Vec<ChainExecution>>;

    /// Create-or-update keyed by (execution_id, step_index)
    async fn upsert_step(&self, step: &ChainExecutionStep) -> RelayResult<UpsertOutcome>;

    async fn find_step(
        &self,
        execution_id: &str,
        step_index: usize,
    ) -> RelayResult<Option<ChainExecutionStep>>;

    /// Steps of one execution ordered by index
    async fn list_steps(&self, execution_id: &str) -> RelayResult<Vec<ChainExecutionStep>>;
}

#[async_trait]
pub trait AgentConfigStore: Send + Sync {
    async fn find_agent_config(
        &self,
        team_id: &str,
        agent_id: &str,
    ) -> RelayResult<Option<AgentConfiguration>>;

    async fn save_agent_config(&self, config: &AgentConfiguration) -> RelayResult<()>;

    /// Check quotas and charge one run as a single atomic operation
    ///
    /// Implementations must not read, release, and write back; concurrent
    /// reservations for the same (team, agent) are serialised.
    async fn reserve_run(
        &self,
        team_id: &str,
        agent_id: &str,
        cost: f64,
        now: DateTime<Utc>,
    ) -> RelayResult<UsageSnapshot>;
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Enabled triggers matching the transition
    async fn find_matching_triggers(
        &self,
        entity_type: &str,
        from_status: &str,
        to_status: &str,
    ) -> RelayResult<Vec<Trigger>>;

    async fn save_trigger(&self, trigger: &Trigger) -> RelayResult<()>;
}

#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn find_team(&self, team_id: &str) -> RelayResult<Option<Team>>;

    async fn save_team(&self, team: &Team) -> RelayResult<()>;
}

/// Side-effecting action requested by an agent tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundAction {
    pub team_id: String,
    pub agent_id: String,
    /// Tool name, e.g. `create_work_order`
    pub action: String,
    pub payload: serde_json::Value,
    pub requested_at: DateTime<Utc>,
}

/// Delivery surface for tool actions (email, work order creation, ...)
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn deliver(&self, action: OutboundAction) -> RelayResult<()>;
}

/// Everything the engine persists
pub trait Store:
    WorkflowStateStore + ChainStore + ExecutionStore + AgentConfigStore + TriggerStore + TeamDirectory
{
}

impl<T> Store for T where
    T: WorkflowStateStore
        + ChainStore
        + ExecutionStore
        + AgentConfigStore
        + TriggerStore
        + TeamDirectory
{
}
