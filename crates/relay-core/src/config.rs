// Relay Core - Runtime configuration
//
// Tunables for the engine: routing weights, task retry policy and worker
// concurrency. Every field has a default so an empty document is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RelayError, RelayResult};

/// Runtime configuration resource
///
/// Example:
/// ```yaml
/// apiVersion: relay.dev/v1
/// kind: RuntimeConfig
/// spec:
///   routing:
///     skillWeight: 0.7
///     capacityWeight: 0.3
///   retry:
///     maxAttempts: 3
///     backoffSeconds: 60
///   workers:
///     maxConcurrent: 4
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_config_kind")]
    pub kind: String,

    #[serde(default)]
    pub spec: RuntimeSpec,
}

fn default_api_version() -> String {
    crate::API_VERSION.to_string()
}

fn default_config_kind() -> String {
    "RuntimeConfig".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_config_kind(),
            spec: RuntimeSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSpec {
    #[serde(default)]
    pub routing: RoutingWeights,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Weights and penalties of the routing score
///
/// Skill is weighted above capacity by default (0.6 / 0.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingWeights {
    #[serde(default = "default_skill_weight")]
    pub skill_weight: f64,

    #[serde(default = "default_capacity_weight")]
    pub capacity_weight: f64,

    /// Projected utilization at which the capacity penalty starts
    #[serde(default = "default_near_capacity_threshold")]
    pub near_capacity_threshold: f64,

    /// Multiplier applied to the capacity score past the threshold
    #[serde(default = "default_near_capacity_penalty")]
    pub near_capacity_penalty: f64,
}

fn default_skill_weight() -> f64 {
    0.6
}

fn default_capacity_weight() -> f64 {
    0.4
}

fn default_near_capacity_threshold() -> f64 {
    0.8
}

fn default_near_capacity_penalty() -> f64 {
    0.5
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            skill_weight: default_skill_weight(),
            capacity_weight: default_capacity_weight(),
            near_capacity_threshold: default_near_capacity_threshold(),
            near_capacity_penalty: default_near_capacity_penalty(),
        }
    }
}

impl RoutingWeights {
    pub fn validate(&self) -> RelayResult<()> {
        if self.skill_weight < 0.0 || self.capacity_weight < 0.0 {
            return Err(RelayError::config("routing weights must be non-negative"));
        }
        if self.skill_weight + self.capacity_weight <= 0.0 {
            return Err(RelayError::config("routing weights must not both be zero"));
        }
        if !(0.0..=1.0).contains(&self.near_capacity_penalty) {
            return Err(RelayError::config(
                "nearCapacityPenalty must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// Retry policy applied to every task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_seconds() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    8
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RuntimeConfig {
    /// Parse YAML, reporting the failing field path
    pub fn from_yaml(content: &str) -> RelayResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(content);
        let config: Self = serde_path_to_error::deserialize(deserializer).map_err(|e| {
            RelayError::config(format!("invalid runtime config at '{}': {}", e.path(), e.inner()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> RelayResult<()> {
        self.spec.routing.validate()?;
        if self.spec.retry.max_attempts == 0 {
            return Err(RelayError::config("retry.maxAttempts must be at least 1"));
        }
        if self.spec.workers.max_concurrent == 0 {
            return Err(RelayError::config("workers.maxConcurrent must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = RuntimeConfig::from_yaml("kind: RuntimeConfig\n").unwrap();
        assert_eq!(config.spec.routing.skill_weight, 0.6);
        assert_eq!(config.spec.retry.max_attempts, 3);
        assert_eq!(config.spec.retry.backoff_seconds, 60);
        assert_eq!(config.spec.workers.max_concurrent, 8);
    }

    #[test]
    fn test_partial_override() {
        let yaml = r#"
spec:
  routing:
    skillWeight: 0.7
    capacityWeight: 0.3
  retry:
    backoffSeconds: 5
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.spec.routing.skill_weight, 0.7);
        assert_eq!(config.spec.routing.near_capacity_threshold, 0.8);
        assert_eq!(config.spec.retry.max_attempts, 3);
        assert_eq!(config.spec.retry.backoff_seconds, 5);
    }

    #[test]
    fn test_error_reports_field_path() {
        let yaml = r#"
spec:
  retry:
    maxAttempts: many
"#;
        let err = RuntimeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("spec.retry.maxAttempts"));
    }

    #[test]
    fn test_rejects_zero_weights() {
        let yaml = r#"
spec:
  routing:
    skillWeight: 0
    capacityWeight: 0
"#;
        assert!(RuntimeConfig::from_yaml(yaml).is_err());
    }
}
