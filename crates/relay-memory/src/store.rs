//! DashMap-backed implementation of every store trait
//!
//! Per-record mutual exclusion comes from DashMap's shard locks: an upsert,
//! a terminal-status guard, or a quota reservation holds the write guard of
//! its record for the whole check-then-write, never across an await point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use relay_core::{
    AgentConfigStore, AgentConfiguration, Chain, ChainExecution, ChainExecutionStep, ChainStore,
    EntityRef, ExecutionStore, RelayError, RelayResult, StepOutput, Team, TeamDirectory, Trigger,
    TriggerStore, UpsertOutcome, UsageSnapshot, WorkflowState, WorkflowStateStore,
};

#[derive(Default)]
struct Tables {
    workflow_states: DashMap<String, WorkflowState>,
    chains: DashMap<String, Chain>,
    executions: DashMap<String, ChainExecution>,
    /// dedupe key -> execution id
    dedupe: DashMap<String, String>,
    /// execution id -> steps by index
    steps: DashMap<String, BTreeMap<usize, ChainExecutionStep>>,
    agents: DashMap<(String, String), AgentConfiguration>,
    triggers: DashMap<String, Trigger>,
    teams: DashMap<String, Team>,
}

/// Ephemeral store, cleared when the last clone is dropped
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow_state_count(&self) -> usize {
        self.tables.workflow_states.len()
    }

    pub fn execution_count(&self) -> usize {
        self.tables.executions.len()
    }

    pub fn step_count(&self, execution_id: &str) -> usize {
        self.tables
            .steps
            .get(execution_id)
            .map(|steps| steps.len())
            .unwrap_or(0)
    }

    /// Every workflow state, oldest first
    pub fn workflow_states(&self) -> Vec<WorkflowState> {
        let mut states: Vec<WorkflowState> = self
            .tables
            .workflow_states
            .iter()
            .map(|s| s.value().clone())
            .collect();
        states.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        states
    }

    pub fn agent_config(&self, team_id: &str, agent_id: &str) -> Option<AgentConfiguration> {
        self.tables
            .agents
            .get(&(team_id.to_string(), agent_id.to_string()))
            .map(|c| c.clone())
    }
}

#[async_trait]
impl WorkflowStateStore for InMemoryStore {
    async fn create_workflow_state(&self, state: &WorkflowState) -> RelayResult<()> {
        match self.tables.workflow_states.entry(state.id.clone()) {
            Entry::Occupied(_) => Err(RelayError::store(format!(
                "workflow state '{}' already exists",
                state.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(state.clone());
                Ok(())
            }
        }
    }

    async fn find_workflow_state(&self, id: &str) -> RelayResult<Option<WorkflowState>> {
        Ok(self.tables.workflow_states.get(id).map(|s| s.clone()))
    }

    async fn update_workflow_state(&self, state: &WorkflowState) -> RelayResult<()> {
        let mut current = self
            .tables
            .workflow_states
            .get_mut(&state.id)
            .ok_or_else(|| RelayError::not_found("workflow state", &state.id))?;
        if current.is_terminal() {
            return Err(RelayError::invalid_transition(
                "workflow_state",
                &state.id,
                current.status,
                state.status,
            ));
        }
        *current = state.clone();
        Ok(())
    }
}

#[async_trait]
impl ChainStore for InMemoryStore {
    async fn find_chain(&self, id: &str) -> RelayResult<Option<Chain>> {
        Ok(self.tables.chains.get(id).map(|c| c.clone()))
    }

    async fn save_chain(&self, chain: &Chain) -> RelayResult<()> {
        self.tables
            .chains
            .insert(chain.id().to_string(), chain.clone());
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(
        &self,
        execution: ChainExecution,
    ) -> RelayResult<(ChainExecution, bool)> {
        let Some(key) = execution.dedupe_key.clone() else {
            self.tables
                .executions
                .insert(execution.id.clone(), execution.clone());
            return Ok((execution, true));
        };

        match self.tables.dedupe.entry(key) {
            Entry::Occupied(entry) => {
                let existing = self
                    .tables
                    .executions
                    .get(entry.get())
                    .map(|e| e.clone())
                    .ok_or_else(|| {
                        RelayError::store(format!("dangling dedupe key '{}'", entry.key()))
                    })?;
                tracing::debug!(
                    "Dedupe key {} already maps to execution {}",
                    entry.key(),
                    existing.id
                );
                Ok((existing, false))
            }
            Entry::Vacant(entry) => {
                self.tables
                    .executions
                    .insert(execution.id.clone(), execution.clone());
                entry.insert(execution.id.clone());
                Ok((execution, true))
            }
        }
    }

    async fn find_execution(&self, id: &str) -> RelayResult<Option<ChainExecution>> {
        Ok(self.tables.executions.get(id).map(|e| e.clone()))
    }

    async fn update_execution(&self, execution: &ChainExecution) -> RelayResult<()> {
        let mut current = self
            .tables
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| RelayError::not_found("chain execution", &execution.id))?;
        if current.status.is_terminal() {
            return Err(RelayError::invalid_transition(
                "chain_execution",
                &execution.id,
                current.status,
                execution.status,
            ));
        }
        *current = execution.clone();
        Ok(())
    }

    async fn record_step_output(
        &self,
        execution_id: &str,
        step_index: usize,
        output: StepOutput,
    ) -> RelayResult<ChainExecution> {
        let mut current = self
            .tables
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| RelayError::not_found("chain execution", execution_id))?;
        if current.status.is_terminal() {
            return Err(RelayError::store(format!(
                "execution '{}' is {}; step {} output dropped",
                execution_id, current.status, step_index
            )));
        }
        current.chain_context.record_step(step_index, output);
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    async fn executions_for_entity(&self, entity: &EntityRef) -> RelayResult<Vec<ChainExecution>> {
        let mut found: Vec<ChainExecution> = self
            .tables
            .executions
            .iter()
            .filter(|e| e.triggering_entity.as_ref() == Some(entity))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn upsert_step(&self, step: &ChainExecutionStep) -> RelayResult<UpsertOutcome> {
        let mut steps = self
            .tables
            .steps
            .entry(step.execution_id.clone())
            .or_default();
        match steps.insert(step.step_index, step.clone()) {
            Some(_) => Ok(UpsertOutcome::Updated),
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    async fn find_step(
        &self,
        execution_id: &str,
        step_index: usize,
    ) -> RelayResult<Option<ChainExecutionStep>> {
        Ok(self
            .tables
            .steps
            .get(execution_id)
            .and_then(|steps| steps.get(&step_index).cloned()))
    }

    async fn list_steps(&self, execution_id: &str) -> RelayResult<Vec<ChainExecutionStep>> {
        Ok(self
            .tables
            .steps
            .get(execution_id)
            .map(|steps| steps.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AgentConfigStore for InMemoryStore {
    async fn find_agent_config(
        &self,
        team_id: &str,
        agent_id: &str,
    ) -> RelayResult<Option<AgentConfiguration>> {
        Ok(self.agent_config(team_id, agent_id))
    }

    async fn save_agent_config(&self, config: &AgentConfiguration) -> RelayResult<()> {
        self.tables.agents.insert(config.key(), config.clone());
        Ok(())
    }

    async fn reserve_run(
        &self,
        team_id: &str,
        agent_id: &str,
        cost: f64,
        now: DateTime<Utc>,
    ) -> RelayResult<UsageSnapshot> {
        let mut config = self
            .tables
            .agents
            .get_mut(&(team_id.to_string(), agent_id.to_string()))
            .ok_or_else(|| {
                RelayError::config(format!(
                    "agent '{}' is not configured for team '{}'",
                    agent_id, team_id
                ))
            })?;
        config.try_reserve(cost, now)
    }
}

#[async_trait]
impl TriggerStore for InMemoryStore {
    async fn find_matching_triggers(
        &self,
        entity_type: &str,
        from_status: &str,
        to_status: &str,
    ) -> RelayResult<Vec<Trigger>> {
        let mut found: Vec<Trigger> = self
            .tables
            .triggers
            .iter()
            .filter(|t| t.matches(entity_type, from_status, to_status))
            .map(|t| t.value().clone())
            .collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(found)
    }

    async fn save_trigger(&self, trigger: &Trigger) -> RelayResult<()> {
        self.tables
            .triggers
            .insert(trigger.name().to_string(), trigger.clone());
        Ok(())
    }
}

#[async_trait]
impl TeamDirectory for InMemoryStore {
    async fn find_team(&self, team_id: &str) -> RelayResult<Option<Team>> {
        Ok(self.tables.teams.get(team_id).map(|t| t.clone()))
    }

    async fn save_team(&self, team: &Team) -> RelayResult<()> {
        self.tables.teams.insert(team.id().to_string(), team.clone());
        Ok(())
    }
}
