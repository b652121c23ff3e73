//! Built-in workflows
//!
//! Deterministic handlers covering the engine's standard agent jobs. They
//! shape inputs into proposals and route side effects through the toolbox;
//! text generation itself lives outside the engine.

use async_trait::async_trait;
use serde_json::{json, Value};

use relay_core::{ApprovalDecision, ApprovalRequest, RelayError, RelayResult, WorkflowOutcome};

use super::{Workflow, WorkflowContext};

fn text<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| {
        input
            .get(*k)
            .and_then(|v| v.as_str())
            .or_else(|| input.get("entity").and_then(|e| e.get(*k)).and_then(|v| v.as_str()))
    })
}

/// Completes immediately with its input
pub struct EchoWorkflow;

#[async_trait]
impl Workflow for EchoWorkflow {
    fn workflow_type(&self) -> &str {
        "echo"
    }

    async fn run(&self, ctx: &WorkflowContext, input: &Value) -> RelayResult<WorkflowOutcome> {
        Ok(WorkflowOutcome::completed(json!({
            "agent_id": ctx.agent_id,
            "input": input,
        })))
    }
}

/// Always pauses for a human decision
pub struct ApprovalGateWorkflow;

#[async_trait]
impl Workflow for ApprovalGateWorkflow {
    fn workflow_type(&self) -> &str {
        "approval_gate"
    }

    async fn run(&self, _ctx: &WorkflowContext, input: &Value) -> RelayResult<WorkflowOutcome> {
        let prompt = text(input, &["prompt"]).unwrap_or("Approve to continue the chain");
        let request = ApprovalRequest::new(prompt)
            .with_reason("chain contains an approval gate")
            .with_proposal(input.clone());
        Ok(WorkflowOutcome::needs_approval(request, input.clone()))
    }
}

/// Drafts a work order and files it through `create_work_order`
///
/// Agents flagged `requires_approval` pause with the draft as the proposal.
/// An approver may replace the draft by sending a `draft` object.
pub struct DraftWorkOrderWorkflow;

impl DraftWorkOrderWorkflow {
    fn draft(input: &Value) -> Value {
        json!({
            "title": text(input, &["title", "name"]).unwrap_or("Untitled work order"),
            "description": text(input, &["description", "summary"]).unwrap_or_default(),
            "priority": text(input, &["priority"]).unwrap_or("normal"),
            "source": input.get("entity").and_then(|e| e.get("id")).cloned().unwrap_or(Value::Null),
        })
    }

    async fn submit(ctx: &WorkflowContext, draft: Value) -> RelayResult<WorkflowOutcome> {
        let submission = ctx.tools.invoke("create_work_order", draft.clone()).await?;
        Ok(WorkflowOutcome::completed(json!({
            "draft": draft,
            "submission": submission,
        })))
    }
}

#[async_trait]
impl Workflow for DraftWorkOrderWorkflow {
    fn workflow_type(&self) -> &str {
        "draft_work_order"
    }

    async fn run(&self, ctx: &WorkflowContext, input: &Value) -> RelayResult<WorkflowOutcome> {
        let draft = Self::draft(input);
        if ctx.requires_approval() {
            let prompt = format!(
                "Create work order '{}'?",
                draft["title"].as_str().unwrap_or_default()
            );
            let request = ApprovalRequest::new(prompt)
                .with_reason(format!("agent '{}' requires approval", ctx.agent_id))
                .with_proposal(draft.clone());
            return Ok(WorkflowOutcome::needs_approval(request, draft));
        }
        Self::submit(ctx, draft).await
    }

    async fn resume(
        &self,
        ctx: &WorkflowContext,
        checkpoint: &Value,
        decision: &ApprovalDecision,
    ) -> RelayResult<WorkflowOutcome> {
        let draft = decision
            .data
            .get("draft")
            .filter(|d| d.is_object())
            .cloned()
            .unwrap_or_else(|| checkpoint.clone());
        Self::submit(ctx, draft).await
    }
}

/// Sends a notification email
///
/// A denied `send_email` is recorded in the output instead of failing.
pub struct NotifyWorkflow;

#[async_trait]
impl Workflow for NotifyWorkflow {
    fn workflow_type(&self) -> &str {
        "notify"
    }

    async fn run(&self, ctx: &WorkflowContext, input: &Value) -> RelayResult<WorkflowOutcome> {
        let message = text(input, &["message", "title"])
            .map(str::to_string)
            .unwrap_or_else(|| format!("Update from agent {}", ctx.agent_id));
        let recipients = input.get("recipients").cloned().unwrap_or_else(|| json!([]));

        let email = json!({ "recipients": recipients, "message": message });
        match ctx.tools.invoke("send_email", email.clone()).await {
            Ok(receipt) => Ok(WorkflowOutcome::completed(json!({
                "delivered": true,
                "email": email,
                "receipt": receipt,
            }))),
            Err(RelayError::CapabilityDenied { action, capability, .. }) => {
                Ok(WorkflowOutcome::completed(json!({
                    "delivered": false,
                    "denied": { "action": action, "capability": capability },
                    "email": email,
                })))
            }
            Err(e) => Err(e),
        }
    }
}

/// Breaks a goal into a phased plan and waits for sign-off
///
/// Once approved, plan items become tasks when the agent may modify tasks.
pub struct PlanGenerationWorkflow;

impl PlanGenerationWorkflow {
    const PHASES: [&'static str; 3] = ["Scope", "Execute", "Verify"];

    fn plan(goal: &str, input: &Value) -> Value {
        let items: Vec<Value> = match input.get("tasks").and_then(|t| t.as_array()) {
            Some(tasks) if !tasks.is_empty() => tasks
                .iter()
                .enumerate()
                .map(|(i, t)| json!({ "order": i + 1, "title": t }))
                .collect(),
            _ => Self::PHASES
                .iter()
                .enumerate()
                .map(|(i, phase)| json!({ "order": i + 1, "title": format!("{}: {}", phase, goal) }))
                .collect(),
        };
        json!({ "goal": goal, "items": items })
    }
}

#[async_trait]
impl Workflow for PlanGenerationWorkflow {
    fn workflow_type(&self) -> &str {
        "plan_generation"
    }

    async fn run(&self, _ctx: &WorkflowContext, input: &Value) -> RelayResult<WorkflowOutcome> {
        let goal = text(input, &["goal", "title"])
            .ok_or_else(|| RelayError::execution("plan generation needs a goal"))?;
        let plan = Self::plan(goal, input);
        let request = ApprovalRequest::new(format!("Approve plan for '{}'?", goal))
            .with_proposal(plan.clone());
        Ok(WorkflowOutcome::needs_approval(request, plan))
    }

    async fn resume(
        &self,
        ctx: &WorkflowContext,
        checkpoint: &Value,
        _decision: &ApprovalDecision,
    ) -> RelayResult<WorkflowOutcome> {
        let items = checkpoint["items"].as_array().cloned().unwrap_or_default();
        let mut created = 0;
        if ctx.tools.allows("update_task") {
            for item in &items {
                ctx.tools.invoke("update_task", json!({ "create": item })).await?;
                created += 1;
            }
        }
        Ok(WorkflowOutcome::completed(json!({
            "plan": checkpoint,
            "tasks_created": created,
        })))
    }
}

/// Acknowledges an @mention of the agent
pub struct MentionReplyWorkflow;

#[async_trait]
impl Workflow for MentionReplyWorkflow {
    fn workflow_type(&self) -> &str {
        "mention_reply"
    }

    async fn run(&self, ctx: &WorkflowContext, input: &Value) -> RelayResult<WorkflowOutcome> {
        let body = text(input, &["body"]).unwrap_or_default();
        let author = text(input, &["author"]);
        let reply = match author {
            Some(author) => format!("@{} {} is on it: \"{}\"", author, ctx.agent_id, body.trim()),
            None => format!("{} is on it: \"{}\"", ctx.agent_id, body.trim()),
        };
        Ok(WorkflowOutcome::completed(json!({
            "reply": reply,
            "in_reply_to": author,
        })))
    }
}
