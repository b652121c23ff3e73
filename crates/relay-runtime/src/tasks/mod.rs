//! Async execution layer
//!
//! Work that must survive transient failures is wrapped in a typed
//! `TaskEnvelope` and handed to the `TaskQueue`. Runners report a typed
//! `TaskOutcome`; retryable failures are re-enqueued after the policy's
//! backoff, and the final failure is handed back to the runner so it can
//! record the error on the owning record.

pub mod queue;

pub use queue::{QueueStats, TaskQueue};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use relay_core::{EntityRef, RelayError, RelayResult, RetryConfig, StatusChangeEvent};

/// Every kind of background work the engine performs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// React to an entity status change
    ProcessTrigger { event: StatusChangeEvent },

    /// Run the next step of an execution once
    ExecuteStep { execution_id: String },

    /// Drive an execution until it blocks or finishes
    AdvanceChain { execution_id: String },

    /// An agent was @mentioned on an entity
    HandleMention {
        entity: EntityRef,
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<String>,
        body: String,
    },

    /// Rank assignees for an entity and annotate it with the result
    RoutingTrigger {
        entity: EntityRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team_id: Option<String>,
        #[serde(default)]
        required_skills: Vec<String>,
        #[serde(default)]
        estimated_hours: f64,
    },

    /// Propose a plan for an entity
    PlanGeneration {
        entity: EntityRef,
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team_id: Option<String>,
        goal: String,
    },
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ProcessTrigger { .. } => "process_trigger",
            Self::ExecuteStep { .. } => "execute_step",
            Self::AdvanceChain { .. } => "advance_chain",
            Self::HandleMention { .. } => "handle_mention",
            Self::RoutingTrigger { .. } => "routing_trigger",
            Self::PlanGeneration { .. } => "plan_generation",
        }
    }
}

/// Retry policy attached to every task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_secs(config.backoff_seconds),
        }
    }
}

/// A unit of queued work
#[derive(Debug, Clone)]
pub struct TaskEnvelope {
    pub id: String,
    pub kind: TaskKind,
    /// 1 on the first run
    pub attempt: u32,
    pub policy: RetryPolicy,
    pub batch_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(kind: TaskKind, policy: RetryPolicy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            attempt: 1,
            policy,
            batch_id: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn in_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    pub(crate) fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// Result of one task run
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success,
    /// Try again after the backoff, if attempts remain
    Retry(RelayError),
    /// Give up now
    Fail(RelayError),
}

impl TaskOutcome {
    /// Retryable errors retry, everything else fails
    pub fn from_result(result: RelayResult<()>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) if e.is_retryable() => Self::Retry(e),
            Err(e) => Self::Fail(e),
        }
    }
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &TaskEnvelope) -> TaskOutcome;

    /// Called once when a task fails for good
    async fn on_failure(&self, _task: &TaskEnvelope, _error: &RelayError) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(TaskOutcome::from_result(Ok(())), TaskOutcome::Success);
        assert!(matches!(
            TaskOutcome::from_result(Err(RelayError::execution("timeout"))),
            TaskOutcome::Retry(_)
        ));
        assert!(matches!(
            TaskOutcome::from_result(Err(RelayError::config("missing agent"))),
            TaskOutcome::Fail(_)
        ));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(60));

        let envelope = TaskEnvelope::new(
            TaskKind::ExecuteStep {
                execution_id: "exec-1".to_string(),
            },
            policy,
        );
        assert_eq!(envelope.attempt, 1);
        assert!(!envelope.is_final_attempt());
        assert!(envelope.next_attempt().next_attempt().is_final_attempt());
    }

    #[test]
    fn test_task_kind_serializes_tagged() {
        let kind = TaskKind::AdvanceChain {
            execution_id: "exec-1".to_string(),
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "advance_chain");
        assert_eq!(kind.label(), "advance_chain");
    }
}
