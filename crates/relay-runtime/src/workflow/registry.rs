//! Workflow registry
//!
//! Maps workflow type names onto handlers. An unknown type is a
//! configuration error raised before any quota is charged.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{RelayError, RelayResult};

use super::builtin;
use super::Workflow;

#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in workflows
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(builtin::EchoWorkflow));
        registry.register(Arc::new(builtin::ApprovalGateWorkflow));
        registry.register(Arc::new(builtin::DraftWorkOrderWorkflow));
        registry.register(Arc::new(builtin::NotifyWorkflow));
        registry.register(Arc::new(builtin::PlanGenerationWorkflow));
        registry.register(Arc::new(builtin::MentionReplyWorkflow));
        registry
    }

    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        let name = workflow.workflow_type().to_string();
        tracing::debug!("Registered workflow: {}", name);
        self.workflows.insert(name, workflow);
    }

    pub fn get(&self, workflow_type: &str) -> RelayResult<Arc<dyn Workflow>> {
        self.workflows
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| RelayError::config(format!("unknown workflow type '{}'", workflow_type)))
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.workflows.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = WorkflowRegistry::with_builtins();
        assert_eq!(
            registry.types(),
            vec![
                "approval_gate",
                "draft_work_order",
                "echo",
                "mention_reply",
                "notify",
                "plan_generation"
            ]
        );
        assert!(matches!(
            registry.get("summarize"),
            Err(RelayError::Configuration(_))
        ));
    }
}
