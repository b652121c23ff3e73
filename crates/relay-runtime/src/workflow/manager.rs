//! Workflow State Manager
//!
//! Runs one agent invocation through the workflow state machine:
//!
//! ```text
//! pending -> running -> (paused <-> running) -> completed | failed | rejected
//! ```
//!
//! Quota checks happen before any state exists. Once a state is created,
//! errors raised by the workflow are captured on the state rather than
//! returned, so callers inspect `WorkflowState::failure()`.

use std::sync::Arc;
use tracing::{debug, info, warn};

use relay_core::{
    AgentConfiguration, ApprovalDecision, RelayError, RelayResult, Store, WorkflowOutcome,
    WorkflowState, WorkflowStatus,
};

use super::{WorkflowContext, WorkflowRegistry};
use crate::limiter::BudgetLimiter;
use crate::tools::{ToolContext, ToolRegistry, Toolbox};

/// Parameters of one agent invocation
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub workflow_type: String,
    pub team_id: String,
    pub agent_id: String,
    pub input: serde_json::Value,
    pub inherited_context: Option<serde_json::Value>,
    /// Overrides both the workflow's estimate and the agent default
    pub cost: Option<f64>,
}

impl ExecuteRequest {
    pub fn new(
        workflow_type: impl Into<String>,
        team_id: impl Into<String>,
        agent_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            team_id: team_id.into(),
            agent_id: agent_id.into(),
            input,
            inherited_context: None,
            cost: None,
        }
    }

    pub fn with_inherited_context(mut self, context: serde_json::Value) -> Self {
        self.inherited_context = Some(context);
        self
    }

    pub fn with_cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }
}

#[derive(Clone)]
pub struct WorkflowStateManager {
    store: Arc<dyn Store>,
    limiter: BudgetLimiter,
    workflows: Arc<WorkflowRegistry>,
    tools: Arc<ToolRegistry>,
}

impl WorkflowStateManager {
    pub fn new(store: Arc<dyn Store>, workflows: Arc<WorkflowRegistry>, tools: Arc<ToolRegistry>) -> Self {
        let limiter = BudgetLimiter::new(store.clone());
        Self {
            store,
            limiter,
            workflows,
            tools,
        }
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    /// Start an invocation of `workflow_type` for (team, agent)
    pub async fn execute(
        &self,
        workflow_type: &str,
        input: serde_json::Value,
        team_id: &str,
        agent_id: &str,
    ) -> RelayResult<WorkflowState> {
        self.execute_with(ExecuteRequest::new(workflow_type, team_id, agent_id, input))
            .await
    }

    pub async fn execute_with(&self, request: ExecuteRequest) -> RelayResult<WorkflowState> {
        let workflow = self.workflows.get(&request.workflow_type)?;
        let config = self
            .limiter
            .agent_config(&request.team_id, &request.agent_id)
            .await?;

        let cost = request
            .cost
            .or_else(|| workflow.estimated_cost(&request.input))
            .unwrap_or(config.default_run_cost);
        let usage = self
            .limiter
            .reserve(&request.team_id, &request.agent_id, cost)
            .await?;

        let mut state = WorkflowState::new(
            &request.team_id,
            &request.agent_id,
            &request.workflow_type,
            request.input,
        );
        state.state_data.inherited_context = request.inherited_context;
        state.state_data.cost = usage.charged;
        state.transition_to(WorkflowStatus::Running)?;
        self.store.create_workflow_state(&state).await?;

        info!(
            "Workflow {} ({}) started for agent {} in team {}",
            state.id, state.workflow_type, state.agent_id, state.team_id
        );

        let ctx = self.context(&state, &config);
        let outcome = workflow.run(&ctx, &state.state_data.input).await;
        self.apply_outcome(&mut state, outcome)?;
        self.store.update_workflow_state(&state).await?;
        Ok(state)
    }

    /// Continue a paused invocation with an approval payload
    ///
    /// Anything but a paused state is returned untouched. A payload with
    /// `approved: false` rejects the state without running the workflow.
    pub async fn resume(
        &self,
        state: WorkflowState,
        decision: ApprovalDecision,
    ) -> RelayResult<WorkflowState> {
        let mut state = self
            .store
            .find_workflow_state(&state.id)
            .await?
            .unwrap_or(state);

        if !state.is_paused() {
            debug!(
                "Ignoring resume of workflow {} in status {}",
                state.id, state.status
            );
            return Ok(state);
        }

        let decision = merge_decision(state.state_data.approval_response.take(), decision);
        state.state_data.approval_response = Some(decision.clone());

        if !decision.approved {
            state.transition_to(WorkflowStatus::Rejected)?;
            self.store.update_workflow_state(&state).await?;
            info!(
                "Workflow {} rejected{}",
                state.id,
                decision
                    .approver
                    .as_deref()
                    .map(|a| format!(" by {}", a))
                    .unwrap_or_default()
            );
            return Ok(state);
        }

        state.transition_to(WorkflowStatus::Running)?;
        self.store.update_workflow_state(&state).await?;
        info!("Workflow {} resumed after approval", state.id);

        let outcome = match self.prepare_resume(&state).await {
            Ok((workflow, ctx)) => {
                let checkpoint = state.state_data.checkpoint.clone().unwrap_or_default();
                workflow.resume(&ctx, &checkpoint, &decision).await
            }
            Err(e) => Err(e),
        };
        self.apply_outcome(&mut state, outcome)?;
        self.store.update_workflow_state(&state).await?;
        Ok(state)
    }

    /// Resume by id
    pub async fn resume_by_id(&self, id: &str, decision: ApprovalDecision) -> RelayResult<WorkflowState> {
        let state = self
            .store
            .find_workflow_state(id)
            .await?
            .ok_or_else(|| RelayError::not_found("workflow state", id))?;
        self.resume(state, decision).await
    }

    async fn prepare_resume(
        &self,
        state: &WorkflowState,
    ) -> RelayResult<(Arc<dyn super::Workflow>, WorkflowContext)> {
        let workflow = self.workflows.get(&state.workflow_type)?;
        let config = self
            .store
            .find_agent_config(&state.team_id, &state.agent_id)
            .await?
            .unwrap_or_else(|| AgentConfiguration::new(&state.team_id, &state.agent_id));
        Ok((workflow, self.context(state, &config)))
    }

    fn context(&self, state: &WorkflowState, config: &AgentConfiguration) -> WorkflowContext {
        let tool_ctx = ToolContext {
            team_id: state.team_id.clone(),
            agent_id: state.agent_id.clone(),
            workflow_state_id: state.id.clone(),
            capabilities: config.capabilities.clone(),
        };
        WorkflowContext {
            team_id: state.team_id.clone(),
            agent_id: state.agent_id.clone(),
            workflow_state_id: state.id.clone(),
            capabilities: config.capabilities.clone(),
            inherited_context: state.state_data.inherited_context.clone(),
            tools: Toolbox::new(self.tools.clone(), tool_ctx),
        }
    }

    fn apply_outcome(
        &self,
        state: &mut WorkflowState,
        outcome: RelayResult<WorkflowOutcome>,
    ) -> RelayResult<()> {
        match outcome {
            Ok(WorkflowOutcome::Completed { output }) => {
                state.state_data.output = Some(output);
                state.state_data.approval = None;
                state.transition_to(WorkflowStatus::Completed)?;
                info!("Workflow {} completed", state.id);
            }
            Ok(WorkflowOutcome::NeedsApproval {
                request,
                checkpoint,
            }) => {
                info!(
                    "Workflow {} paused for approval: {}",
                    state.id, request.prompt
                );
                state.state_data.approval = Some(request);
                state.state_data.checkpoint = Some(checkpoint);
                state.transition_to(WorkflowStatus::Paused)?;
            }
            Err(e) => {
                warn!("Workflow {} failed: {}", state.id, e);
                state.state_data.error = Some((&e).into());
                state.transition_to(WorkflowStatus::Failed)?;
            }
        }
        Ok(())
    }
}

fn merge_decision(previous: Option<ApprovalDecision>, next: ApprovalDecision) -> ApprovalDecision {
    match previous {
        None => next,
        Some(mut merged) => {
            merged.approved = next.approved;
            if next.approver.is_some() {
                merged.approver = next.approver;
            }
            if next.comment.is_some() {
                merged.comment = next.comment;
            }
            merged.data.extend(next.data);
            merged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::{AgentConfigStore, Capabilities, WorkflowStateStore};
    use relay_memory::{InMemoryOutbox, InMemoryStore};

    struct Exploding;

    #[async_trait]
    impl super::super::Workflow for Exploding {
        fn workflow_type(&self) -> &str {
            "exploding"
        }

        async fn run(
            &self,
            _ctx: &WorkflowContext,
            _input: &serde_json::Value,
        ) -> RelayResult<WorkflowOutcome> {
            Err(RelayError::execution("model unavailable"))
        }
    }

    async fn manager_with(config: AgentConfiguration) -> (WorkflowStateManager, InMemoryStore) {
        let store = InMemoryStore::new();
        store.save_agent_config(&config).await.unwrap();
        let mut workflows = WorkflowRegistry::with_builtins();
        workflows.register(Arc::new(Exploding));
        let tools = ToolRegistry::standard(Arc::new(InMemoryOutbox::new()));
        let manager =
            WorkflowStateManager::new(Arc::new(store.clone()), Arc::new(workflows), Arc::new(tools));
        (manager, store)
    }

    #[tokio::test]
    async fn test_execute_completes() {
        let (manager, store) = manager_with(AgentConfiguration::new("team-1", "helper")).await;
        let state = manager
            .execute("echo", serde_json::json!({"x": 1}), "team-1", "helper")
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.state_data.output.as_ref().unwrap()["input"]["x"], 1);
        let stored = store.find_workflow_state(&state.id).await.unwrap().unwrap();
        assert_eq!(stored, state);
    }

    #[tokio::test]
    async fn test_rate_limited_run_creates_no_state() {
        let (manager, store) =
            manager_with(AgentConfiguration::new("team-1", "helper").with_limits(1, 10.0)).await;
        manager
            .execute("echo", serde_json::json!({}), "team-1", "helper")
            .await
            .unwrap();
        let err = manager
            .execute("echo", serde_json::json!({}), "team-1", "helper")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RateLimitExceeded { .. }));
        assert_eq!(store.workflow_state_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_workflow_does_not_charge() {
        let (manager, store) = manager_with(AgentConfiguration::new("team-1", "helper")).await;
        let err = manager
            .execute("summarize", serde_json::json!({}), "team-1", "helper")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert_eq!(store.agent_config("team-1", "helper").unwrap().daily_run_count, 0);
        assert_eq!(store.workflow_state_count(), 0);
    }

    #[tokio::test]
    async fn test_cost_resolution_prefers_override() {
        let mut config = AgentConfiguration::new("team-1", "helper");
        config.default_run_cost = 0.25;
        let (manager, store) = manager_with(config).await;

        let state = manager
            .execute("echo", serde_json::json!({}), "team-1", "helper")
            .await
            .unwrap();
        assert_eq!(state.state_data.cost, 0.25);

        let state = manager
            .execute_with(
                ExecuteRequest::new("echo", "team-1", "helper", serde_json::json!({}))
                    .with_cost(Some(2.0)),
            )
            .await
            .unwrap();
        assert_eq!(state.state_data.cost, 2.0);
        assert_eq!(store.agent_config("team-1", "helper").unwrap().current_month_spend, 2.25);
    }

    #[tokio::test]
    async fn test_workflow_error_is_captured_not_raised() {
        let (manager, _) = manager_with(AgentConfiguration::new("team-1", "helper")).await;
        let state = manager
            .execute("exploding", serde_json::json!({}), "team-1", "helper")
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        let failure = state.failure().unwrap();
        assert_eq!(failure.kind, "transient_execution");
        assert!(failure.message.contains("model unavailable"));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (manager, _) = manager_with(AgentConfiguration::new("team-1", "helper")).await;
        let paused = manager
            .execute("approval_gate", serde_json::json!({"prompt": "Ship it?"}), "team-1", "helper")
            .await
            .unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);
        assert_eq!(paused.state_data.approval.as_ref().unwrap().prompt, "Ship it?");

        let done = manager
            .resume(paused, ApprovalDecision::approve().by("dana"))
            .await
            .unwrap();
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(
            done.state_data.approval_response.as_ref().unwrap().approver.as_deref(),
            Some("dana")
        );
        assert!(done.state_data.output.is_some());
    }

    #[tokio::test]
    async fn test_resume_of_non_paused_state_is_noop() {
        let (manager, _) = manager_with(AgentConfiguration::new("team-1", "helper")).await;
        let completed = manager
            .execute("echo", serde_json::json!({}), "team-1", "helper")
            .await
            .unwrap();
        let before = completed.state_data.clone();

        let after = manager
            .resume(completed, ApprovalDecision::approve())
            .await
            .unwrap();
        assert_eq!(after.status, WorkflowStatus::Completed);
        assert_eq!(after.state_data, before);
    }

    #[tokio::test]
    async fn test_rejection_skips_continuation() {
        let capabilities = Capabilities {
            can_create_work_orders: true,
            requires_approval: true,
            ..Default::default()
        };
        let (manager, _) = manager_with(
            AgentConfiguration::new("team-1", "helper").with_capabilities(capabilities),
        )
        .await;
        let paused = manager
            .execute("draft_work_order", serde_json::json!({"title": "Leak"}), "team-1", "helper")
            .await
            .unwrap();

        let rejected = manager
            .resume(paused, ApprovalDecision::reject("duplicate"))
            .await
            .unwrap();
        assert_eq!(rejected.status, WorkflowStatus::Rejected);
        assert!(rejected.state_data.output.is_none());
        assert!(rejected.is_terminal());
    }
}
