//! Trigger Dispatcher
//!
//! Turns an entity status change into chain executions and drives each one
//! forward until it finishes, blocks on a human, or hits the auto-progression
//! bound. Missing chains and teams are logged and skipped, never retried.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use relay_core::{
    filtered_snapshot, CapturedError, ChainExecution, ChainStore, ExecutionStatus, RelayError,
    RelayResult, StatusChangeEvent, TeamDirectory, Trigger, Triggerable,
};
use relay_runtime::{Engine, StepProgress};

use crate::worker::FAILURE_METADATA_KEY;

/// Upper bound on `execute_step` calls per `advance`
pub const MAX_AUTO_PROGRESS_ITERATIONS: u32 = 100;

/// Where auto-progression stopped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ProgressOutcome {
    /// Every step finished and the execution is completed
    Completed,

    /// A step waits for an approval decision
    AwaitingApproval {
        step_index: usize,
        workflow_state_id: String,
    },

    /// A step's workflow is still running elsewhere
    InProgress { step_index: usize },

    /// The execution is no longer running
    Halted(ExecutionStatus),

    /// The iteration cap was hit; the execution is left running
    SafetyBoundReached { iterations: u32 },
}

/// One execution started (or picked up again) for a status change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub trigger: String,
    pub execution_id: String,
    pub progress: ProgressOutcome,
}

#[derive(Clone)]
pub struct TriggerDispatcher {
    engine: Engine,
    max_iterations: u32,
}

impl TriggerDispatcher {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            max_iterations: MAX_AUTO_PROGRESS_ITERATIONS,
        }
    }

    /// Lower the bound, e.g. for dry runs
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run every enabled trigger matching the transition
    ///
    /// One failing trigger never stops the others. An execution whose step
    /// fails for good is marked failed here; the first retryable error is
    /// returned after every trigger ran, and redelivering the same event
    /// reuses the executions it created.
    pub async fn handle_status_change(
        &self,
        event: &StatusChangeEvent,
    ) -> RelayResult<Vec<DispatchOutcome>> {
        let triggers = self
            .engine
            .store()
            .find_matching_triggers(&event.entity.entity_type, &event.from_status, &event.to_status)
            .await?;
        if triggers.is_empty() {
            debug!(
                "No trigger for {} {} -> {}",
                event.entity, event.from_status, event.to_status
            );
            return Ok(Vec::new());
        }

        let entity = match self.engine.entities().resolve(&event.entity).await {
            Ok(entity) => Some(entity),
            Err(e) => {
                debug!("Entity {} not resolvable: {}", event.entity, e);
                None
            }
        };

        let mut outcomes = Vec::new();
        let mut retry: Option<RelayError> = None;
        for trigger in &triggers {
            let execution = match self.start(trigger, event, entity.as_deref()).await {
                Ok(Some(execution)) => execution,
                Ok(None) => continue,
                Err(e) if e.is_skippable() => {
                    info!("Skipping trigger {}: {}", trigger.name(), e);
                    continue;
                }
                Err(e) => {
                    warn!("Trigger {} could not start: {}", trigger.name(), e);
                    if e.is_retryable() {
                        retry.get_or_insert(e);
                    }
                    continue;
                }
            };

            let progress = match self.advance(&execution.id).await {
                Ok(progress) => progress,
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Execution {} for trigger {} stopped and will be retried: {}",
                        execution.id,
                        trigger.name(),
                        e
                    );
                    retry.get_or_insert(e);
                    continue;
                }
                Err(e) => match self.engine.orchestrator().fail(&execution.id, &e).await {
                    Ok(failed) => {
                        warn!(
                            "Execution {} for trigger {} failed: {}",
                            execution.id,
                            trigger.name(),
                            e
                        );
                        self.annotate_failure(event, trigger, &execution.id, &e).await;
                        ProgressOutcome::Halted(failed.status)
                    }
                    Err(fail_error) => {
                        warn!(
                            "Could not mark execution {} failed ({}): {}",
                            execution.id, fail_error, e
                        );
                        if fail_error.is_retryable() {
                            retry.get_or_insert(fail_error);
                        }
                        continue;
                    }
                },
            };
            outcomes.push(DispatchOutcome {
                trigger: trigger.name().to_string(),
                execution_id: execution.id,
                progress,
            });
        }

        match retry {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    async fn annotate_failure(
        &self,
        event: &StatusChangeEvent,
        trigger: &Trigger,
        execution_id: &str,
        error: &RelayError,
    ) {
        let failure = json!({
            "trigger": trigger.name(),
            "event_id": event.event_id,
            "execution_id": execution_id,
            "error": CapturedError::from(error),
            "recorded_at": Utc::now(),
        });
        if let Err(e) = self
            .engine
            .entities()
            .annotate(&event.entity, FAILURE_METADATA_KEY, failure)
            .await
        {
            warn!("Could not record failure on {} ({}): {}", event.entity, e, error);
        }
    }

    /// Resolve chain and team for one trigger and start its execution
    async fn start(
        &self,
        trigger: &Trigger,
        event: &StatusChangeEvent,
        entity: Option<&dyn Triggerable>,
    ) -> RelayResult<Option<ChainExecution>> {
        let chain = match self.engine.store().find_chain(&trigger.spec.chain).await? {
            Some(chain) if chain.spec.enabled => chain,
            Some(_) => {
                debug!(
                    "Trigger {} skipped: chain {} is disabled",
                    trigger.name(),
                    trigger.spec.chain
                );
                return Ok(None);
            }
            None => {
                debug!(
                    "Trigger {} skipped: chain {} not found",
                    trigger.name(),
                    trigger.spec.chain
                );
                return Ok(None);
            }
        };

        let Some(team_id) = self.resolve_team(trigger, entity).await? else {
            debug!(
                "Trigger {} skipped: no team resolves for {}",
                trigger.name(),
                event.entity
            );
            return Ok(None);
        };

        let dedupe_key = format!("{}:{}:{}", trigger.name(), event.entity, event.event_id);
        let execution = self
            .engine
            .orchestrator()
            .execute_chain_once(
                &chain,
                &team_id,
                Some(event.entity.clone()),
                initial_context(trigger, event, entity),
                &dedupe_key,
            )
            .await?;
        info!(
            "Trigger {} fired for {} ({} -> {}): execution {}",
            trigger.name(),
            event.entity,
            event.from_status,
            event.to_status,
            execution.id
        );
        Ok(Some(execution))
    }

    /// The trigger's team, else the entity's; `None` when neither exists
    async fn resolve_team(
        &self,
        trigger: &Trigger,
        entity: Option<&dyn Triggerable>,
    ) -> RelayResult<Option<String>> {
        let candidates = [trigger.spec.team.clone(), entity.and_then(|e| e.team_id())];
        for team_id in candidates.into_iter().flatten() {
            if self.engine.store().find_team(&team_id).await?.is_some() {
                return Ok(Some(team_id));
            }
            debug!("Team {} not found for trigger {}", team_id, trigger.name());
        }
        Ok(None)
    }

    /// Drive an execution forward under the iteration bound
    pub async fn advance(&self, execution_id: &str) -> RelayResult<ProgressOutcome> {
        let orchestrator = self.engine.orchestrator();

        for _ in 0..self.max_iterations {
            match orchestrator.execute_step(execution_id).await? {
                StepProgress::Step { .. } | StepProgress::Group { .. } => continue,
                StepProgress::Finished => {
                    orchestrator.complete(execution_id).await?;
                    return Ok(ProgressOutcome::Completed);
                }
                StepProgress::AwaitingApproval {
                    index,
                    workflow_state_id,
                } => {
                    return Ok(ProgressOutcome::AwaitingApproval {
                        step_index: index,
                        workflow_state_id,
                    })
                }
                StepProgress::InProgress { index } => {
                    return Ok(ProgressOutcome::InProgress { step_index: index })
                }
                StepProgress::Halted(status) => return Ok(ProgressOutcome::Halted(status)),
            }
        }

        let bound = RelayError::SafetyBoundExceeded {
            execution_id: execution_id.to_string(),
            iterations: self.max_iterations,
        };
        warn!("{}; execution left running for manual follow-up", bound);
        Ok(ProgressOutcome::SafetyBoundReached {
            iterations: self.max_iterations,
        })
    }
}

/// Trigger metadata, filtered entity snapshot and the acting user
fn initial_context(
    trigger: &Trigger,
    event: &StatusChangeEvent,
    entity: Option<&dyn Triggerable>,
) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("trigger".to_string(), trigger.context_metadata());
    context.insert(
        "event".to_string(),
        json!({
            "event_id": event.event_id,
            "entity_type": event.entity.entity_type,
            "entity_id": event.entity.id,
            "from_status": event.from_status,
            "to_status": event.to_status,
            "occurred_at": event.occurred_at,
        }),
    );
    context.insert(
        "entity".to_string(),
        Value::Object(entity.map(filtered_snapshot).unwrap_or_default()),
    );
    context.insert(
        "acting_user".to_string(),
        event
            .acting_user
            .as_ref()
            .map(|u| json!(u))
            .unwrap_or(Value::Null),
    );
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{EntityRef, GenericEntity};

    #[test]
    fn test_initial_context_drops_audit_timestamps() {
        let trigger = Trigger::new("t", "intake", "work_order", "submitted", "approved");
        let event = StatusChangeEvent::new(EntityRef::new("work_order", "wo-1"), "submitted", "approved")
            .by("dana");
        let entity = GenericEntity::new("work_order", "wo-1")
            .with_attribute("title", json!("Leaking valve"))
            .with_attribute("updated_at", json!("2026-03-01T10:00:00Z"));

        let context = initial_context(&trigger, &event, Some(&entity as &dyn Triggerable));
        assert_eq!(context["trigger"]["name"], "t");
        assert_eq!(context["entity"]["title"], "Leaking valve");
        assert!(context["entity"].get("updated_at").is_none());
        assert_eq!(context["acting_user"], "dana");
        assert_eq!(context["event"]["to_status"], "approved");
    }

    #[test]
    fn test_progress_outcome_serializes_with_state_tag() {
        let bound = serde_json::to_value(ProgressOutcome::SafetyBoundReached { iterations: 100 }).unwrap();
        assert_eq!(bound["state"], "safety_bound_reached");
        assert_eq!(bound["detail"]["iterations"], 100);
        assert_eq!(
            serde_json::to_value(ProgressOutcome::Completed).unwrap()["state"],
            "completed"
        );
    }

    #[test]
    fn test_initial_context_without_entity() {
        let trigger = Trigger::new("t", "intake", "task", "*", "done");
        let event = StatusChangeEvent::new(EntityRef::new("task", "9"), "todo", "done");
        let context = initial_context(&trigger, &event, None);
        assert!(context["entity"].as_object().unwrap().is_empty());
        assert!(context["acting_user"].is_null());
    }
}
