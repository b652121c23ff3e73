// Relay Core - Chain resource and execution records
//
// A Chain is a versioned, ordered list of agent steps. Consecutive steps that
// share a `parallelGroup` form a batch that runs concurrently. A
// ChainExecution tracks one run of a chain; its steps are stored as
// ChainExecutionStep records keyed by (execution_id, step_index).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use uuid::Uuid;

use crate::context::ChainContext;
use crate::entity::EntityRef;
use crate::error::{RelayError, RelayResult};
use crate::workflow::CapturedError;

/// Chain definition following Kubernetes-style configuration
///
/// Example:
/// ```yaml
/// apiVersion: relay.dev/v1
/// kind: Chain
/// metadata:
///   name: work-order-intake
/// spec:
///   version: 2
///   steps:
///     - agent: triage
///       workflow: echo
///     - agent: drafter
///       workflow: draft_work_order
///       parallelGroup: drafts
///     - agent: notifier
///       workflow: notify
///       parallelGroup: drafts
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_chain_kind")]
    pub kind: String,

    pub metadata: ChainMetadata,

    pub spec: ChainSpec,
}

fn default_api_version() -> String {
    crate::API_VERSION.to_string()
}

fn default_chain_kind() -> String {
    "Chain".to_string()
}

fn default_version() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// Chain metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChainMetadata {
    /// Chain name, used as the chain id
    pub name: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

/// Chain specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainSpec {
    /// Steps are immutable per version; edits bump the version
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub steps: Vec<ChainStep>,
}

/// One step of a chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainStep {
    /// Agent that runs this step
    pub agent: String,

    /// Workflow type the agent runs
    pub workflow: String,

    /// Steps sharing a group run as one concurrent batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,

    /// Overrides the agent's default per-run cost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChainStep {
    pub fn new(agent: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            workflow: workflow.into(),
            parallel_group: None,
            estimated_cost: None,
            name: None,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }
}

impl Chain {
    /// Build a chain programmatically
    pub fn new(name: impl Into<String>, steps: Vec<ChainStep>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_chain_kind(),
            metadata: ChainMetadata {
                name: name.into(),
                ..Default::default()
            },
            spec: ChainSpec {
                version: default_version(),
                enabled: true,
                description: None,
                steps,
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.name
    }

    pub fn step(&self, index: usize) -> Option<&ChainStep> {
        self.spec.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.spec.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec.steps.is_empty()
    }

    /// Index range of the batch containing `index`
    ///
    /// A sequential step is its own single-element range.
    pub fn group_range(&self, index: usize) -> Range<usize> {
        let steps = &self.spec.steps;
        let group = match steps.get(index).and_then(|s| s.parallel_group.as_ref()) {
            Some(g) => g,
            None => return index..index + 1,
        };

        let same = |i: usize| steps[i].parallel_group.as_ref() == Some(group);
        let mut start = index;
        while start > 0 && same(start - 1) {
            start -= 1;
        }
        let mut end = index + 1;
        while end < steps.len() && same(end) {
            end += 1;
        }
        start..end
    }

    /// Validate structural constraints
    pub fn validate(&self) -> RelayResult<()> {
        if self.metadata.name.is_empty() {
            return Err(RelayError::config("chain name is required"));
        }
        if self.spec.steps.is_empty() {
            return Err(RelayError::config(format!(
                "chain '{}' has no steps",
                self.metadata.name
            )));
        }

        let mut seen_groups: Vec<&str> = Vec::new();
        let mut previous: Option<&str> = None;
        for (index, step) in self.spec.steps.iter().enumerate() {
            if step.agent.is_empty() || step.workflow.is_empty() {
                return Err(RelayError::config(format!(
                    "chain '{}' step {} needs both agent and workflow",
                    self.metadata.name, index
                )));
            }
            let group = step.parallel_group.as_deref();
            if let Some(g) = group {
                // A group must be one contiguous run of steps
                if previous != Some(g) && seen_groups.contains(&g) {
                    return Err(RelayError::config(format!(
                        "chain '{}' parallel group '{}' is not contiguous",
                        self.metadata.name, g
                    )));
                }
                if !seen_groups.contains(&g) {
                    seen_groups.push(g);
                }
            }
            previous = group;
        }
        Ok(())
    }
}

/// Status of a chain execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One run of a chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainExecution {
    pub id: String,
    pub chain_id: String,
    pub chain_version: u32,
    pub team_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggering_entity: Option<EntityRef>,

    /// Natural key used to make creation idempotent under redelivery
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,

    pub status: ExecutionStatus,
    pub chain_context: ChainContext,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CapturedError>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChainExecution {
    pub fn new(
        chain: &Chain,
        team_id: impl Into<String>,
        triggering_entity: Option<EntityRef>,
        chain_context: ChainContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            chain_id: chain.id().to_string(),
            chain_version: chain.spec.version,
            team_id: team_id.into(),
            triggering_entity,
            dedupe_key: None,
            status: ExecutionStatus::Running,
            chain_context,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    pub fn transition_to(&mut self, next: ExecutionStatus) -> RelayResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RelayError::invalid_transition(
                "chain_execution",
                &self.id,
                self.status,
                next,
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        Ok(())
    }
}

/// Status of one step within an execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Per-step record, unique per (execution_id, step_index)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainExecutionStep {
    pub execution_id: String,
    pub step_index: usize,
    pub status: StepStatus,

    #[serde(default)]
    pub output_data: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_state_id: Option<String>,

    /// Number of times the step was started
    #[serde(default)]
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CapturedError>,

    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ChainExecutionStep {
    pub fn new(execution_id: impl Into<String>, step_index: usize) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_index,
            status: StepStatus::Pending,
            output_data: serde_json::Value::Null,
            workflow_state_id: None,
            attempts: 0,
            error: None,
            updated_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Natural key of the record
    pub fn key(&self) -> (String, usize) {
        (self.execution_id.clone(), self.step_index)
    }

    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = StepStatus::Running;
        self.attempts += 1;
        self.error = None;
        self.started_at = Some(now);
        self.finished_at = None;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, output: serde_json::Value) {
        let now = Utc::now();
        self.status = StepStatus::Completed;
        self.output_data = output;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: &RelayError) {
        let now = Utc::now();
        self.status = StepStatus::Failed;
        self.output_data = serde_json::json!({ "error": error.to_string() });
        self.error = Some(CapturedError::from(error));
        self.finished_at = Some(now);
        self.updated_at = now;
    }
}
