//! Context propagation between chain steps
//!
//! Builds the two values handed to a step's workflow:
//! - the **input**: the execution's initial context, the triggering entity's
//!   attribute snapshot, and the step's position in the chain
//! - the **inherited context**: the outputs of every step before the
//!   step's batch, ordered by index
//!
//! Members of a parallel group never see each other's outputs.

use serde_json::{json, Map, Value};

use relay_core::{Chain, ChainContext, ChainExecution};

pub struct ContextPropagator;

impl ContextPropagator {
    /// Input for the step at `index`
    pub fn step_input(
        chain: &Chain,
        execution: &ChainExecution,
        index: usize,
        entity_snapshot: Option<Map<String, Value>>,
    ) -> Value {
        let mut input = execution.chain_context.initial.clone();
        if let Some(snapshot) = entity_snapshot {
            input.insert("entity".to_string(), Value::Object(snapshot));
        }
        if let Some(step) = chain.step(index) {
            input.insert(
                "step".to_string(),
                json!({
                    "index": index,
                    "name": step.name,
                    "agent_id": step.agent,
                    "workflow_type": step.workflow,
                    "parallel_group": step.parallel_group,
                }),
            );
        }
        input.insert(
            "chain".to_string(),
            json!({
                "id": chain.id(),
                "version": execution.chain_version,
                "execution_id": execution.id,
                "total_steps": chain.len(),
            }),
        );
        Value::Object(input)
    }

    /// Outputs of steps strictly before `batch_start`
    pub fn inherited_context(context: &ChainContext, batch_start: usize) -> Value {
        let previous: Vec<Value> = context
            .outputs_before(batch_start)
            .map(|(index, step)| {
                json!({
                    "step_index": index,
                    "agent_id": step.agent_id,
                    "workflow_type": step.workflow_type,
                    "workflow_state_id": step.workflow_state_id,
                    "output": step.output,
                })
            })
            .collect();

        let last_output = context
            .outputs_before(batch_start)
            .next_back()
            .map(|(_, step)| step.output.clone())
            .unwrap_or(Value::Null);

        json!({
            "previous_steps": previous,
            "last_output": last_output,
        })
    }
}
