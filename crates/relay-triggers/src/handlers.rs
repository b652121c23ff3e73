//! Request handlers
//!
//! Human-initiated work that does not go through a chain: answering an
//! @mention, ranking assignees for an entity, and proposing a plan. Each
//! handler resolves its team the same way the dispatcher does (explicit team,
//! else the entity's team).

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use relay_core::{
    filtered_snapshot, EntityRef, RelayError, RelayResult, RoutingCandidate, TeamDirectory,
    WorkflowState, WorkflowStatus,
};
use relay_runtime::Engine;

/// Entity metadata key holding the latest routing recommendation
pub const ROUTING_METADATA_KEY: &str = "routing_recommendations";

#[derive(Clone)]
pub struct RequestHandlers {
    engine: Engine,
}

impl RequestHandlers {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Let `agent_id` answer a mention on `entity`
    pub async fn handle_mention(
        &self,
        entity: &EntityRef,
        agent_id: &str,
        team_id: Option<&str>,
        author: Option<&str>,
        body: &str,
    ) -> RelayResult<WorkflowState> {
        let (team_id, snapshot) = self.resolve(entity, team_id).await?;
        let input = json!({
            "entity": snapshot,
            "author": author,
            "body": body,
        });
        let state = self
            .engine
            .workflows()
            .execute("mention_reply", input, &team_id, agent_id)
            .await?;
        debug!("Mention of {} on {} handled by {}", agent_id, entity, state.id);
        into_result(state)
    }

    /// Rank team members for `entity` and store the ranking on it
    pub async fn handle_routing(
        &self,
        entity: &EntityRef,
        team_id: Option<&str>,
        required_skills: &[String],
        estimated_hours: f64,
    ) -> RelayResult<Vec<RoutingCandidate>> {
        let (team_id, _) = self.resolve(entity, team_id).await?;
        let team = self
            .engine
            .store()
            .find_team(&team_id)
            .await?
            .ok_or_else(|| RelayError::not_found("team", &team_id))?;

        let candidates = self
            .engine
            .routing()
            .calculate_routing(&team, required_skills, estimated_hours);
        let recommendation = json!({
            "team_id": team_id,
            "required_skills": required_skills,
            "estimated_hours": estimated_hours,
            "candidates": candidates,
            "calculated_at": Utc::now(),
        });
        self.engine
            .entities()
            .annotate(entity, ROUTING_METADATA_KEY, recommendation)
            .await?;

        info!(
            "Routed {} in team {}: {}",
            entity,
            team_id,
            candidates
                .first()
                .map(|c| format!("{} ({:.2})", c.user_id, c.combined_score))
                .unwrap_or_else(|| "no qualifying member".to_string())
        );
        Ok(candidates)
    }

    /// Ask `agent_id` for a plan toward `goal`; the plan waits for approval
    pub async fn handle_plan_generation(
        &self,
        entity: &EntityRef,
        agent_id: &str,
        team_id: Option<&str>,
        goal: &str,
    ) -> RelayResult<WorkflowState> {
        let (team_id, snapshot) = self.resolve(entity, team_id).await?;
        let input = json!({
            "goal": goal,
            "entity": snapshot,
        });
        let state = self
            .engine
            .workflows()
            .execute("plan_generation", input, &team_id, agent_id)
            .await?;
        into_result(state)
    }

    /// Team id and filtered snapshot for an entity
    async fn resolve(
        &self,
        entity: &EntityRef,
        team_id: Option<&str>,
    ) -> RelayResult<(String, Value)> {
        let resolved = self.engine.entities().resolve(entity).await?;
        let team_id = team_id
            .map(str::to_string)
            .or_else(|| resolved.team_id())
            .ok_or_else(|| RelayError::not_found("team", format!("for {}", entity)))?;
        Ok((team_id, Value::Object(filtered_snapshot(resolved.as_ref()))))
    }
}

/// A failed invocation becomes a retryable error for the owning task
fn into_result(state: WorkflowState) -> RelayResult<WorkflowState> {
    if state.status == WorkflowStatus::Failed {
        return Err(state.failure_error());
    }
    Ok(state)
}
