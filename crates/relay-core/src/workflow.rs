// Relay Core - Workflow state types
//
// A WorkflowState is the durable record of one agent invocation. It moves
// through a small state machine and carries a typed payload describing the
// input, output, pending approval, and any captured failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};

/// Lifecycle status of a single agent invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Rejected,
}

impl WorkflowStatus {
    /// Completed, failed, and rejected states are never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// Allowed edges of the invocation state machine
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Rejected)
                | (Paused, Running)
                | (Paused, Rejected)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// Approval requirement recorded when a workflow pauses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    /// Prompt shown to the human approver
    pub prompt: String,

    /// Why the workflow asked for approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Proposal the approver is deciding on (draft, plan, assignment)
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub proposal: serde_json::Value,

    pub requested_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reason: None,
            proposal: serde_json::Value::Null,
            requested_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_proposal(mut self, proposal: serde_json::Value) -> Self {
        self.proposal = proposal;
        self
    }
}

/// Human decision carried by `resume`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApprovalDecision {
    pub approved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Extra fields supplied with the decision (edits to a draft, etc.)
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Default::default()
        }
    }

    pub fn reject(comment: impl Into<String>) -> Self {
        Self {
            approved: false,
            comment: Some(comment.into()),
            ..Default::default()
        }
    }

    pub fn by(mut self, approver: impl Into<String>) -> Self {
        self.approver = Some(approver.into());
        self
    }

    /// Parse an untyped payload such as `{"approved": true}`
    pub fn from_value(value: serde_json::Value) -> RelayResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Failure summary stored on a failed record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedError {
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl CapturedError {
    /// Message without the prefix its error kind adds when displayed
    pub fn detail(&self) -> &str {
        if self.kind == "transient_execution" {
            let prefix = RelayError::execution("").to_string();
            if let Some(rest) = self.message.strip_prefix(prefix.as_str()) {
                return rest;
            }
        }
        &self.message
    }
}

impl From<&RelayError> for CapturedError {
    fn from(e: &RelayError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            at: Utc::now(),
        }
    }
}

/// Typed payload of a workflow state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateData {
    /// Input the workflow was invoked with
    #[serde(default)]
    pub input: serde_json::Value,

    /// Context inherited from earlier chain steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited_context: Option<serde_json::Value>,

    /// Final output once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Pending approval requirement while paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,

    /// Approval payload merged in by `resume`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_response: Option<ApprovalDecision>,

    /// Workflow-private data needed by the continuation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CapturedError>,

    /// Cost charged for this invocation
    #[serde(default)]
    pub cost: f64,
}

/// Result returned by a workflow handler
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    /// The workflow finished and produced an output
    Completed { output: serde_json::Value },

    /// The workflow needs a human decision before it can continue
    NeedsApproval {
        request: ApprovalRequest,
        checkpoint: serde_json::Value,
    },
}

impl WorkflowOutcome {
    pub fn completed(output: serde_json::Value) -> Self {
        Self::Completed { output }
    }

    pub fn needs_approval(request: ApprovalRequest, checkpoint: serde_json::Value) -> Self {
        Self::NeedsApproval {
            request,
            checkpoint,
        }
    }
}

/// Durable record of one agent invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub id: String,
    pub team_id: String,
    pub agent_id: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub state_data: StateData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(
        team_id: impl Into<String>,
        agent_id: impl Into<String>,
        workflow_type: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            team_id: team_id.into(),
            agent_id: agent_id.into(),
            workflow_type: workflow_type.into(),
            status: WorkflowStatus::Pending,
            state_data: StateData {
                input,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == WorkflowStatus::Paused
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Captured failure, if the invocation failed
    pub fn failure(&self) -> Option<&CapturedError> {
        match self.status {
            WorkflowStatus::Failed => self.state_data.error.as_ref(),
            _ => None,
        }
    }

    /// Rebuild the failure as a retryable error for whoever drives the workflow
    pub fn failure_error(&self) -> RelayError {
        let message = self
            .failure()
            .map(|f| f.detail().to_string())
            .unwrap_or_else(|| self.summary());
        RelayError::execution(message)
    }

    /// Move to `next`, enforcing the state machine
    pub fn transition_to(&mut self, next: WorkflowStatus) -> RelayResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RelayError::invalid_transition(
                "workflow_state",
                &self.id,
                self.status,
                next,
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// One-line summary suitable for progress or approval UIs
    pub fn summary(&self) -> String {
        match self.status {
            WorkflowStatus::Paused => self
                .state_data
                .approval
                .as_ref()
                .map(|a| format!("awaiting approval: {}", a.prompt))
                .unwrap_or_else(|| "awaiting approval".to_string()),
            WorkflowStatus::Failed => self
                .state_data
                .error
                .as_ref()
                .map(|e| format!("failed: {}", e.message))
                .unwrap_or_else(|| "failed".to_string()),
            status => status.to_string(),
        }
    }
}
