//! Workflows and the state manager that runs them
//!
//! A workflow is a named handler invoked once per agent run. It either
//! completes with an output or asks for human approval, handing back a
//! checkpoint the manager stores and later passes to `resume`.

pub mod builtin;
pub mod manager;
pub mod registry;

pub use manager::{ExecuteRequest, WorkflowStateManager};
pub use registry::WorkflowRegistry;

use async_trait::async_trait;

use relay_core::{ApprovalDecision, Capabilities, RelayResult, WorkflowOutcome};

use crate::tools::Toolbox;

/// Everything a workflow may look at while it runs
#[derive(Clone)]
pub struct WorkflowContext {
    pub team_id: String,
    pub agent_id: String,
    pub workflow_state_id: String,
    pub capabilities: Capabilities,
    /// Aggregated outputs of earlier chain steps, if any
    pub inherited_context: Option<serde_json::Value>,
    pub tools: Toolbox,
}

impl WorkflowContext {
    pub fn requires_approval(&self) -> bool {
        self.capabilities.requires_approval
    }
}

#[async_trait]
pub trait Workflow: Send + Sync {
    /// Registry key, e.g. `draft_work_order`
    fn workflow_type(&self) -> &str;

    /// Cost charged against the agent's budget, when the workflow knows it
    fn estimated_cost(&self, _input: &serde_json::Value) -> Option<f64> {
        None
    }

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: &serde_json::Value,
    ) -> RelayResult<WorkflowOutcome>;

    /// Continue after an approval
    ///
    /// The default completes with the checkpoint and the approval payload.
    async fn resume(
        &self,
        _ctx: &WorkflowContext,
        checkpoint: &serde_json::Value,
        decision: &ApprovalDecision,
    ) -> RelayResult<WorkflowOutcome> {
        Ok(WorkflowOutcome::completed(serde_json::json!({
            "result": checkpoint,
            "approval": decision,
        })))
    }
}
