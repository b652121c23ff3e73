// Relay Core - Trigger resource type
//
// A Trigger maps an entity status transition onto a chain that runs
// automatically. Triggers are static configuration and rarely change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RelayError, RelayResult};

/// Matches any status in `statusFrom` / `statusTo`
pub const ANY_STATUS: &str = "*";

/// Trigger - status transition to chain mapping
///
/// Example:
/// ```yaml
/// apiVersion: relay.dev/v1
/// kind: Trigger
/// metadata:
///   name: draft-on-approval
/// spec:
///   chain: work-order-intake
///   entityType: work_order
///   statusFrom: submitted
///   statusTo: approved
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_trigger_kind")]
    pub kind: String,

    pub metadata: TriggerMetadata,

    pub spec: TriggerSpec,
}

fn default_api_version() -> String {
    crate::API_VERSION.to_string()
}

fn default_trigger_kind() -> String {
    "Trigger".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Trigger metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerMetadata {
    /// Trigger name (unique identifier)
    pub name: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// Trigger specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    /// Chain to run
    pub chain: String,

    /// Team to run under; falls back to the entity's team
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    pub entity_type: String,

    pub status_from: String,

    pub status_to: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Trigger {
    pub fn new(
        name: impl Into<String>,
        chain: impl Into<String>,
        entity_type: impl Into<String>,
        status_from: impl Into<String>,
        status_to: impl Into<String>,
    ) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_trigger_kind(),
            metadata: TriggerMetadata {
                name: name.into(),
                ..Default::default()
            },
            spec: TriggerSpec {
                chain: chain.into(),
                team: None,
                entity_type: entity_type.into(),
                status_from: status_from.into(),
                status_to: status_to.into(),
                enabled: true,
            },
        }
    }

    pub fn for_team(mut self, team: impl Into<String>) -> Self {
        self.spec.team = Some(team.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether an enabled trigger fires for this transition
    pub fn matches(&self, entity_type: &str, from: &str, to: &str) -> bool {
        fn status_matches(pattern: &str, status: &str) -> bool {
            pattern == ANY_STATUS || pattern.eq_ignore_ascii_case(status)
        }

        self.spec.enabled
            && self.spec.entity_type == entity_type
            && status_matches(&self.spec.status_from, from)
            && status_matches(&self.spec.status_to, to)
    }

    /// Metadata copied into the initial chain context
    pub fn context_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.metadata.name,
            "chain": self.spec.chain,
            "entity_type": self.spec.entity_type,
            "status_from": self.spec.status_from,
            "status_to": self.spec.status_to,
        })
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.metadata.name.is_empty() {
            return Err(RelayError::config("trigger name is required"));
        }
        if self.spec.chain.is_empty() || self.spec.entity_type.is_empty() {
            return Err(RelayError::config(format!(
                "trigger '{}' needs a chain and an entity type",
                self.metadata.name
            )));
        }
        if self.spec.status_from == self.spec.status_to && self.spec.status_from != ANY_STATUS {
            return Err(RelayError::config(format!(
                "trigger '{}' maps status '{}' onto itself",
                self.metadata.name, self.spec.status_from
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_matches_transition() {
        let trigger = Trigger::new("t", "intake", "work_order", "submitted", "approved");
        assert!(trigger.matches("work_order", "submitted", "approved"));
        assert!(trigger.matches("work_order", "SUBMITTED", "Approved"));
        assert!(!trigger.matches("work_order", "draft", "approved"));
        assert!(!trigger.matches("task", "submitted", "approved"));
    }

    #[test]
    fn test_wildcard_status() {
        let trigger = Trigger::new("t", "intake", "task", ANY_STATUS, "blocked");
        assert!(trigger.matches("task", "in_progress", "blocked"));
        assert!(trigger.matches("task", "todo", "blocked"));
        assert!(!trigger.matches("task", "todo", "done"));
    }

    #[test]
    fn test_disabled_trigger_never_matches() {
        let mut trigger = Trigger::new("t", "intake", "task", "todo", "done");
        trigger.spec.enabled = false;
        assert!(!trigger.matches("task", "todo", "done"));
    }

    #[test]
    fn test_parse_trigger_yaml() {
        let yaml = r#"
apiVersion: relay.dev/v1
kind: Trigger
metadata:
  name: draft-on-approval
spec:
  chain: work-order-intake
  team: maintenance
  entityType: work_order
  statusFrom: submitted
  statusTo: approved
"#;
        let trigger: Trigger = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(trigger.name(), "draft-on-approval");
        assert_eq!(trigger.spec.team.as_deref(), Some("maintenance"));
        assert!(trigger.spec.enabled);
        assert!(trigger.validate().is_ok());
    }
}
