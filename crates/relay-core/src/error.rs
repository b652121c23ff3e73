// Relay Core - Error taxonomy
//
// Every fallible operation in the engine returns `RelayResult<T>`. The
// variants map one-to-one onto the propagation policy: configuration and
// not-found errors are skipped by the dispatcher, transient errors are
// retried by the task layer, and the safety bound is only ever a warning.

use thiserror::Error;

/// Result alias used across all Relay crates
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors raised by the orchestration engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    /// Agent disabled or missing, unknown workflow type, invalid resource
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Daily invocation count for (team, agent) reached its limit
    #[error("rate limit exceeded for agent '{agent_id}' in team '{team_id}': {used}/{limit} runs today")]
    RateLimitExceeded {
        team_id: String,
        agent_id: String,
        used: u32,
        limit: u32,
    },

    /// Invocation would push monthly spend past the configured cap
    #[error("budget exceeded for agent '{agent_id}' in team '{team_id}': {spent:.2} + {requested:.2} > cap {cap:.2}")]
    BudgetExceeded {
        team_id: String,
        agent_id: String,
        spent: f64,
        requested: f64,
        cap: f64,
    },

    /// Chain, team, entity, or record could not be resolved
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Any failure while invoking a workflow or executing a step
    #[error("execution failed: {0}")]
    TransientExecution(String),

    /// Auto-progression hit its iteration cap
    #[error("auto-progression for execution '{execution_id}' stopped after {iterations} iterations")]
    SafetyBoundExceeded {
        execution_id: String,
        iterations: u32,
    },

    /// A tool action was attempted without the matching capability flag
    #[error("agent '{agent_id}' is not allowed to {action} (missing {capability})")]
    CapabilityDenied {
        agent_id: String,
        action: String,
        capability: String,
    },

    /// A status change that the state machine does not allow
    #[error("invalid transition for {record} '{id}': {from} -> {to}")]
    InvalidTransition {
        record: String,
        id: String,
        from: String,
        to: String,
    },

    /// Persistence collaborator failure
    #[error("store error: {0}")]
    Store(String),

    /// Serialization / deserialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure while loading resources
    #[error("io error: {0}")]
    Io(String),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::TransientExecution(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn invalid_transition(
        record: impl Into<String>,
        id: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            record: record.into(),
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the owning task should try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExecution(_) | Self::Store(_))
    }

    /// Whether the dispatcher treats this error as a silent, logged skip
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::NotFound { .. })
    }

    /// Quota rejections happen before any state is created
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::BudgetExceeded { .. }
        )
    }

    /// Short machine-readable label stored alongside captured failures
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::NotFound { .. } => "not_found",
            Self::TransientExecution(_) => "transient_execution",
            Self::SafetyBoundExceeded { .. } => "safety_bound_exceeded",
            Self::CapabilityDenied { .. } => "capability_denied",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Store(_) => "store",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for RelayError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
