//! Agent tool surface
//!
//! Tools are named, team-scoped actions a workflow can request while it runs.
//! Each tool declares the capability flag it needs; the `Toolbox` handed to a
//! workflow checks that flag against the agent's configuration before the
//! action reaches the outbox. A denied action fails with `CapabilityDenied`
//! for that action only.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use relay_core::{Capabilities, Capability, OutboundAction, Outbox, RelayError, RelayResult};

/// Identity of the agent invoking a tool
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub team_id: String,
    pub agent_id: String,
    pub workflow_state_id: String,
    pub capabilities: Capabilities,
}

#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;

    /// Capability the agent needs to use this tool
    fn capability(&self) -> Capability;

    async fn invoke(&self, ctx: &ToolContext, args: serde_json::Value) -> RelayResult<serde_json::Value>;
}

/// Tool that hands its action to an outbox
pub struct OutboxTool {
    name: String,
    capability: Capability,
    outbox: Arc<dyn Outbox>,
}

impl OutboxTool {
    pub fn new(name: impl Into<String>, capability: Capability, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            name: name.into(),
            capability,
            outbox,
        }
    }
}

#[async_trait]
impl AgentTool for OutboxTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    async fn invoke(&self, ctx: &ToolContext, args: serde_json::Value) -> RelayResult<serde_json::Value> {
        let action = OutboundAction {
            team_id: ctx.team_id.clone(),
            agent_id: ctx.agent_id.clone(),
            action: self.name.clone(),
            payload: args,
            requested_at: Utc::now(),
        };
        self.outbox.deliver(action).await?;
        Ok(serde_json::json!({ "status": "queued", "action": self.name }))
    }
}

/// Named tools available to workflows
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard tool set, one per capability flag
    pub fn standard(outbox: Arc<dyn Outbox>) -> Self {
        let mut registry = Self::new();
        for (name, capability) in [
            ("create_work_order", Capability::CreateWorkOrders),
            ("update_task", Capability::ModifyTasks),
            ("share_client_data", Capability::AccessClientData),
            ("send_email", Capability::SendEmails),
        ] {
            registry.register(Arc::new(OutboxTool::new(name, capability, outbox.clone())));
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AgentTool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Capability-checked view of the registry for one invocation
#[derive(Clone)]
pub struct Toolbox {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl Toolbox {
    pub fn new(registry: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { registry, ctx }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Whether the agent may use `tool`
    pub fn allows(&self, tool: &str) -> bool {
        self.registry
            .get(tool)
            .map_or(false, |t| self.ctx.capabilities.allows(t.capability()))
    }

    pub async fn invoke(&self, tool: &str, args: serde_json::Value) -> RelayResult<serde_json::Value> {
        let handle = self
            .registry
            .get(tool)
            .ok_or_else(|| RelayError::config(format!("unknown tool '{}'", tool)))?;

        let capability = handle.capability();
        if !self.ctx.capabilities.allows(capability) {
            warn!(
                "Agent {} in team {} denied {} (missing {})",
                self.ctx.agent_id, self.ctx.team_id, tool, capability
            );
            return Err(RelayError::CapabilityDenied {
                agent_id: self.ctx.agent_id.clone(),
                action: tool.to_string(),
                capability: capability.to_string(),
            });
        }

        debug!("Agent {} invoking tool {}", self.ctx.agent_id, tool);
        handle.invoke(&self.ctx, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_memory::InMemoryOutbox;

    fn toolbox(capabilities: Capabilities, outbox: Arc<InMemoryOutbox>) -> Toolbox {
        Toolbox::new(
            Arc::new(ToolRegistry::standard(outbox)),
            ToolContext {
                team_id: "team-1".to_string(),
                agent_id: "drafter".to_string(),
                workflow_state_id: "ws-1".to_string(),
                capabilities,
            },
        )
    }

    #[tokio::test]
    async fn test_denied_action_fails_only_that_action() {
        let outbox = Arc::new(InMemoryOutbox::new());
        let tools = toolbox(
            Capabilities {
                can_create_work_orders: true,
                ..Default::default()
            },
            outbox.clone(),
        );

        let err = tools
            .invoke("send_email", serde_json::json!({"to": "ops@example.com"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::CapabilityDenied { ref action, .. } if action == "send_email"));

        tools
            .invoke("create_work_order", serde_json::json!({"title": "Fix pump"}))
            .await
            .unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.sent()[0].agent_id, "drafter");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_configuration_error() {
        let tools = toolbox(Capabilities::all(), Arc::new(InMemoryOutbox::new()));
        assert!(matches!(
            tools.invoke("launch_rocket", serde_json::json!({})).await,
            Err(RelayError::Configuration(_))
        ));
        assert!(tools.allows("send_email"));
        assert!(!tools.allows("launch_rocket"));
    }
}
