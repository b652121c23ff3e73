//! Task worker
//!
//! Maps every `TaskKind` onto the dispatcher, the orchestrator or a request
//! handler, and records final failures on the record that owns the task.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use relay_core::{CapturedError, EntityRef, RelayError, RelayResult};
use relay_runtime::{Engine, StepProgress, TaskEnvelope, TaskKind, TaskOutcome, TaskRunner};

use crate::dispatcher::TriggerDispatcher;
use crate::handlers::RequestHandlers;

/// Entity metadata key holding the last task failure
pub const FAILURE_METADATA_KEY: &str = "relay_last_failure";

#[derive(Clone)]
pub struct RelayWorker {
    dispatcher: TriggerDispatcher,
    handlers: RequestHandlers,
}

impl RelayWorker {
    pub fn new(engine: Engine) -> Self {
        Self {
            dispatcher: TriggerDispatcher::new(engine.clone()),
            handlers: RequestHandlers::new(engine),
        }
    }

    pub fn dispatcher(&self) -> &TriggerDispatcher {
        &self.dispatcher
    }

    pub fn handlers(&self) -> &RequestHandlers {
        &self.handlers
    }

    fn engine(&self) -> &Engine {
        self.dispatcher.engine()
    }

    async fn dispatch(&self, kind: &TaskKind) -> RelayResult<()> {
        match kind {
            TaskKind::ProcessTrigger { event } => {
                let outcomes = self.dispatcher.handle_status_change(event).await?;
                debug!("Event {} started {} execution(s)", event.event_id, outcomes.len());
            }
            TaskKind::ExecuteStep { execution_id } => {
                let orchestrator = self.engine().orchestrator();
                if orchestrator.execute_step(execution_id).await? == StepProgress::Finished {
                    orchestrator.complete(execution_id).await?;
                }
            }
            TaskKind::AdvanceChain { execution_id } => {
                let progress = self.dispatcher.advance(execution_id).await?;
                debug!("Execution {} advanced to {:?}", execution_id, progress);
            }
            TaskKind::HandleMention {
                entity,
                agent_id,
                team_id,
                author,
                body,
            } => {
                self.handlers
                    .handle_mention(entity, agent_id, team_id.as_deref(), author.as_deref(), body)
                    .await?;
            }
            TaskKind::RoutingTrigger {
                entity,
                team_id,
                required_skills,
                estimated_hours,
            } => {
                self.handlers
                    .handle_routing(entity, team_id.as_deref(), required_skills, *estimated_hours)
                    .await?;
            }
            TaskKind::PlanGeneration {
                entity,
                agent_id,
                team_id,
                goal,
            } => {
                self.handlers
                    .handle_plan_generation(entity, agent_id, team_id.as_deref(), goal)
                    .await?;
            }
        }
        Ok(())
    }

    async fn fail_execution(&self, execution_id: &str, error: &RelayError) {
        match self.engine().orchestrator().fail(execution_id, error).await {
            Ok(_) => info!("Execution {} marked failed: {}", execution_id, error),
            Err(e) => warn!(
                "Could not mark execution {} failed ({}): {}",
                execution_id, e, error
            ),
        }
    }

    async fn annotate_failure(&self, entity: &EntityRef, task: &TaskEnvelope, error: &RelayError) {
        let failure = json!({
            "task": task.kind.label(),
            "task_id": task.id,
            "attempts": task.attempt,
            "error": CapturedError::from(error),
            "recorded_at": Utc::now(),
        });
        if let Err(e) = self
            .engine()
            .entities()
            .annotate(entity, FAILURE_METADATA_KEY, failure)
            .await
        {
            warn!("Could not record failure on {} ({}): {}", entity, e, error);
        }
    }
}

#[async_trait]
impl TaskRunner for RelayWorker {
    async fn run(&self, task: &TaskEnvelope) -> TaskOutcome {
        TaskOutcome::from_result(self.dispatch(&task.kind).await)
    }

    async fn on_failure(&self, task: &TaskEnvelope, error: &RelayError) {
        match &task.kind {
            TaskKind::ExecuteStep { execution_id } | TaskKind::AdvanceChain { execution_id } => {
                self.fail_execution(execution_id, error).await;
            }
            TaskKind::ProcessTrigger { event } => {
                let executions = match self
                    .engine()
                    .store()
                    .executions_for_entity(&event.entity)
                    .await
                {
                    Ok(executions) => executions,
                    Err(e) => {
                        warn!("Could not list executions for {}: {}", event.entity, e);
                        Vec::new()
                    }
                };
                for execution in executions.iter().filter(|e| {
                    !e.status.is_terminal()
                        && e.dedupe_key
                            .as_deref()
                            .map_or(false, |k| k.ends_with(&event.event_id))
                }) {
                    self.fail_execution(&execution.id, error).await;
                }
                self.annotate_failure(&event.entity, task, error).await;
            }
            TaskKind::HandleMention { entity, .. }
            | TaskKind::RoutingTrigger { entity, .. }
            | TaskKind::PlanGeneration { entity, .. } => {
                self.annotate_failure(entity, task, error).await;
            }
        }
    }
}
