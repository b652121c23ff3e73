// Relay Core - Chain context
//
// The chain context is the versioned, typed record that carries the
// triggering snapshot and every completed step's output from one step to the
// next. Older executions stored an untyped object with `step_<n>` keys next
// to the trigger fields; `ChainContext::from_value` migrates those.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RelayError, RelayResult};

/// Current schema version written by this crate
pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

/// Output of one completed step, as seen by later steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutput {
    pub agent_id: String,
    pub workflow_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_state_id: Option<String>,

    #[serde(default)]
    pub output: serde_json::Value,

    pub completed_at: DateTime<Utc>,
}

/// Context shared by all steps of a chain execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainContext {
    pub schema_version: u32,

    /// Snapshot taken when the execution started (trigger, entity, actor)
    #[serde(default)]
    pub initial: serde_json::Map<String, serde_json::Value>,

    /// Completed step outputs keyed by step index
    #[serde(default)]
    pub steps: BTreeMap<usize, StepOutput>,
}

impl Default for ChainContext {
    fn default() -> Self {
        Self::new(serde_json::Map::new())
    }
}

impl ChainContext {
    pub fn new(initial: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            schema_version: CONTEXT_SCHEMA_VERSION,
            initial,
            steps: BTreeMap::new(),
        }
    }

    pub fn record_step(&mut self, index: usize, output: StepOutput) {
        self.steps.insert(index, output);
    }

    pub fn step(&self, index: usize) -> Option<&StepOutput> {
        self.steps.get(&index)
    }

    /// Outputs of steps strictly before `index`, in ascending order
    pub fn outputs_before(
        &self,
        index: usize,
    ) -> impl DoubleEndedIterator<Item = (&usize, &StepOutput)> {
        self.steps.range(..index)
    }

    /// Look up a value from the initial snapshot
    pub fn initial_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.initial.get(key)
    }

    /// Decode a stored context, migrating older layouts
    pub fn from_value(value: serde_json::Value) -> RelayResult<Self> {
        let object = match value {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => return Ok(Self::default()),
            other => {
                return Err(RelayError::Serialization(format!(
                    "chain context must be an object, got {}",
                    other
                )))
            }
        };

        match object.get("schema_version").and_then(|v| v.as_u64()) {
            Some(v) if v as u32 == CONTEXT_SCHEMA_VERSION => {
                Ok(serde_json::from_value(serde_json::Value::Object(object))?)
            }
            Some(v) => Err(RelayError::Serialization(format!(
                "unsupported chain context schema version {}",
                v
            ))),
            None => Ok(Self::migrate_legacy(object)),
        }
    }

    /// Legacy layout: one flat object, `step_<n>` keys hold step outputs
    fn migrate_legacy(object: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut context = Self::default();
        for (key, value) in object {
            match key.strip_prefix("step_").and_then(|n| n.parse::<usize>().ok()) {
                Some(index) => {
                    let agent_id = value
                        .get("agent_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    let workflow_type = value
                        .get("workflow_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    context.record_step(
                        index,
                        StepOutput {
                            agent_id,
                            workflow_type,
                            workflow_state_id: None,
                            output: value,
                            completed_at: Utc::now(),
                        },
                    );
                }
                None => {
                    context.initial.insert(key, value);
                }
            }
        }
        tracing::debug!(steps = context.steps.len(), "migrated legacy chain context");
        context
    }
}
