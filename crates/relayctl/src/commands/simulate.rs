//! `relayctl simulate <dir>`
//!
//! Applies a resource directory to an in-memory store, registers one entity
//! and replays a status change through the trigger dispatcher. Outbound
//! actions are recorded instead of delivered.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use relay_core::{
    ApprovalDecision, ChainExecution, ChainExecutionStep, EntityRef, EntityRegistry,
    ExecutionStore, GenericEntity, OutboundAction, StatusChangeEvent,
};
use relay_memory::{InMemoryEntities, InMemoryOutbox, InMemoryStore};
use relay_runtime::Engine;
use relay_triggers::{DispatchOutcome, ProgressOutcome, TriggerDispatcher};

use super::load_resources;
use crate::output::{print_table, OutputFormat};

/// Parse `key=value`; the value is read as JSON when it parses, else as a string
pub fn parse_attribute(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub entity_type: String,
    pub id: String,
    pub from: String,
    pub to: String,
    pub team: Option<String>,
    pub user: Option<String>,
    pub attributes: Vec<(String, Value)>,
    pub auto_approve: bool,
    pub max_steps: u32,
}

#[derive(Debug, Serialize)]
pub struct SimulatedExecution {
    pub trigger: String,
    pub progress: ProgressOutcome,
    pub execution: ChainExecution,
    pub steps: Vec<ChainExecutionStep>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub event: StatusChangeEvent,
    pub executions: Vec<SimulatedExecution>,
    pub outbox: Vec<OutboundAction>,
    pub entity_metadata: Value,
}

pub async fn simulate(dir: &Path, args: SimulateArgs) -> Result<SimulationReport> {
    let resources = load_resources(dir)?;
    for error in resources.validate_references() {
        tracing::warn!("{}", error);
    }

    let store = InMemoryStore::new();
    resources
        .apply(&store)
        .await
        .context("Failed to apply resources")?;

    let mut entity = GenericEntity::new(&args.entity_type, &args.id);
    if let Some(team) = &args.team {
        entity = entity.in_team(team);
    }
    for (key, value) in &args.attributes {
        entity = entity.with_attribute(key, value.clone());
    }
    let entities = Arc::new(InMemoryEntities::new(&args.entity_type));
    entities.insert(entity);

    let outbox = Arc::new(InMemoryOutbox::new());
    let engine = Engine::new(
        Arc::new(store.clone()),
        EntityRegistry::new().with_resolver(entities.clone()),
        outbox.clone(),
        resources.runtime.clone(),
    )?;
    let dispatcher = TriggerDispatcher::new(engine.clone()).with_max_iterations(args.max_steps);

    let mut event = StatusChangeEvent::new(
        EntityRef::new(&args.entity_type, &args.id),
        &args.from,
        &args.to,
    );
    if let Some(user) = &args.user {
        event = event.by(user);
    }

    let outcomes = dispatcher.handle_status_change(&event).await?;
    if outcomes.is_empty() {
        tracing::info!(
            "No trigger fired for {} {} -> {}",
            event.entity,
            event.from_status,
            event.to_status
        );
    }

    let mut executions = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let progress = if args.auto_approve {
            approve_until_blocked(&dispatcher, &outcome).await?
        } else {
            outcome.progress.clone()
        };
        let execution = store
            .find_execution(&outcome.execution_id)
            .await?
            .with_context(|| format!("Execution {} disappeared", outcome.execution_id))?;
        let steps = store.list_steps(&outcome.execution_id).await?;
        executions.push(SimulatedExecution {
            trigger: outcome.trigger,
            progress,
            execution,
            steps,
        });
    }

    let entity_metadata = entities
        .get(&args.id)
        .map(|e| serde_json::to_value(&e.metadata))
        .transpose()?
        .unwrap_or(Value::Null);

    Ok(SimulationReport {
        event,
        executions,
        outbox: outbox.sent(),
        entity_metadata,
    })
}

/// Approve each paused step and keep advancing
async fn approve_until_blocked(
    dispatcher: &TriggerDispatcher,
    outcome: &DispatchOutcome,
) -> Result<ProgressOutcome> {
    let orchestrator = dispatcher.engine().orchestrator();
    let mut progress = outcome.progress.clone();
    while let ProgressOutcome::AwaitingApproval { step_index, .. } = progress {
        tracing::info!(
            "Auto-approving step {} of execution {}",
            step_index,
            outcome.execution_id
        );
        orchestrator
            .approve_step(
                &outcome.execution_id,
                step_index,
                ApprovalDecision::approve().by("relayctl"),
            )
            .await?;
        progress = dispatcher.advance(&outcome.execution_id).await?;
    }
    Ok(progress)
}

pub async fn execute(dir: &Path, args: SimulateArgs, output: OutputFormat) -> Result<()> {
    let report = simulate(dir, args).await?;
    if output.print_structured(&report)? {
        return Ok(());
    }

    println!(
        "Event {} {} -> {}: {} execution(s)",
        report.event.entity,
        report.event.from_status,
        report.event.to_status,
        report.executions.len()
    );
    for run in &report.executions {
        println!();
        println!(
            "Trigger {}  execution {}  chain {}  team {}",
            run.trigger, run.execution.id, run.execution.chain_id, run.execution.team_id
        );
        println!("Status: {:?}  Progress: {}", run.execution.status, describe(&run.progress));
        let rows: Vec<Vec<String>> = run
            .steps
            .iter()
            .map(|s| {
                vec![
                    s.step_index.to_string(),
                    format!("{:?}", s.status).to_lowercase(),
                    s.attempts.to_string(),
                    s.workflow_state_id.clone().unwrap_or_default(),
                    s.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["STEP", "STATUS", "ATTEMPTS", "WORKFLOW STATE", "ERROR"], &rows);
    }

    if !report.outbox.is_empty() {
        println!();
        println!("Outbound actions:");
        for action in &report.outbox {
            println!("  {} {}", action.action, action.payload);
        }
    }
    Ok(())
}

fn describe(progress: &ProgressOutcome) -> String {
    match progress {
        ProgressOutcome::Completed => "completed".to_string(),
        ProgressOutcome::AwaitingApproval { step_index, .. } => {
            format!("awaiting approval at step {}", step_index)
        }
        ProgressOutcome::InProgress { step_index } => format!("step {} in progress", step_index),
        ProgressOutcome::Halted(status) => format!("halted ({:?})", status),
        ProgressOutcome::SafetyBoundReached { iterations } => {
            format!("stopped after {} steps; execution left running", iterations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ExecutionStatus;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn create_test_resources(requires_approval: bool) -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "teams/maintenance.yaml",
            "apiVersion: relay.dev/v1\nkind: Team\nmetadata:\n  name: maintenance\n",
        );
        write(
            dir.path(),
            "agents/drafter.yaml",
            &format!(
                "apiVersion: relay.dev/v1\nkind: AgentConfiguration\nmetadata:\n  name: drafter\nspec:\n  team: maintenance\n  capabilities:\n    can_create_work_orders: true\n    requires_approval: {}\n",
                requires_approval
            ),
        );
        write(
            dir.path(),
            "chains/intake.yaml",
            "apiVersion: relay.dev/v1\nkind: Chain\nmetadata:\n  name: intake\nspec:\n  steps:\n    - agent: drafter\n      workflow: draft_work_order\n",
        );
        write(
            dir.path(),
            "triggers/on-approved.yaml",
            "apiVersion: relay.dev/v1\nkind: Trigger\nmetadata:\n  name: on-approved\nspec:\n  chain: intake\n  entityType: work_order\n  statusFrom: submitted\n  statusTo: approved\n",
        );
        dir
    }

    fn args(auto_approve: bool) -> SimulateArgs {
        SimulateArgs {
            entity_type: "work_order".to_string(),
            id: "wo-7".to_string(),
            from: "submitted".to_string(),
            to: "approved".to_string(),
            team: Some("maintenance".to_string()),
            user: Some("dana".to_string()),
            attributes: vec![("title".to_string(), serde_json::json!("Boiler service"))],
            auto_approve,
            max_steps: 100,
        }
    }

    #[test]
    fn test_parse_attribute() {
        assert_eq!(
            parse_attribute("hours=2.5").unwrap(),
            ("hours".to_string(), serde_json::json!(2.5))
        );
        assert_eq!(
            parse_attribute("title=Leak in 4B").unwrap(),
            ("title".to_string(), serde_json::json!("Leak in 4B"))
        );
        assert!(parse_attribute("no-separator").is_err());
        assert!(parse_attribute("=value").is_err());
    }

    #[tokio::test]
    async fn test_simulate_runs_triggered_chain() {
        let dir = create_test_resources(false);
        let report = simulate(dir.path(), args(false)).await.unwrap();

        assert_eq!(report.executions.len(), 1);
        let run = &report.executions[0];
        assert_eq!(run.progress, ProgressOutcome::Completed);
        assert_eq!(run.execution.status, ExecutionStatus::Completed);
        assert_eq!(run.steps.len(), 1);
        assert_eq!(report.outbox.len(), 1);
        assert_eq!(report.outbox[0].payload["title"], "Boiler service");
    }

    #[tokio::test]
    async fn test_simulate_stops_at_approval_unless_auto_approved() {
        let dir = create_test_resources(true);

        let paused = simulate(dir.path(), args(false)).await.unwrap();
        assert!(matches!(
            paused.executions[0].progress,
            ProgressOutcome::AwaitingApproval { step_index: 0, .. }
        ));
        assert!(paused.outbox.is_empty());

        let approved = simulate(dir.path(), args(true)).await.unwrap();
        assert_eq!(approved.executions[0].progress, ProgressOutcome::Completed);
        assert_eq!(approved.outbox.len(), 1);
    }

    #[tokio::test]
    async fn test_simulate_without_matching_trigger() {
        let dir = create_test_resources(false);
        let mut args = args(false);
        args.to = "rejected".to_string();

        let report = simulate(dir.path(), args).await.unwrap();
        assert!(report.executions.is_empty());
        assert!(report.outbox.is_empty());
    }
}
