// Relay Core - Foundation types and traits for the agent chain engine
//
// This crate provides the core abstractions shared by every Relay crate:
// workflow state, chain and execution records, agent quotas, triggers,
// the entity capability interface, store traits, and YAML resources.

pub mod agent;
pub mod chain;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod registry;
pub mod store;
pub mod team;
pub mod trigger;
pub mod workflow;

// Re-export core types
pub use agent::{
    AgentConfiguration, AgentResource, AgentResourceMetadata, AgentResourceSpec, Capabilities,
    Capability, UsageSnapshot,
};
pub use chain::{
    Chain, ChainExecution, ChainExecutionStep, ChainMetadata, ChainSpec, ChainStep,
    ExecutionStatus, StepStatus,
};
pub use config::{RetryConfig, RoutingWeights, RuntimeConfig, RuntimeSpec, WorkerConfig};
pub use context::{ChainContext, StepOutput, CONTEXT_SCHEMA_VERSION};
pub use entity::{
    filtered_snapshot, EntityRef, EntityRegistry, EntityResolver, GenericEntity,
    StatusChangeEvent, Triggerable, AUDIT_TIMESTAMP_KEYS,
};
pub use error::{RelayError, RelayResult};
pub use registry::{
    load_yaml_file, AgentRegistry, ChainRegistry, Registry, ResourceLoadSummary,
    ResourceManager, TeamRegistry, TriggerRegistry, ValidationError,
};
pub use store::{
    AgentConfigStore, ChainStore, ExecutionStore, OutboundAction, Outbox, Store, TeamDirectory,
    TriggerStore, UpsertOutcome, WorkflowStateStore,
};
pub use team::{
    CapacityAnalysis, Confidence, RoutingCandidate, RoutingReasoning, SkillMatch, Team,
    TeamMember, TeamMetadata, TeamSpec,
};
pub use trigger::{Trigger, TriggerMetadata, TriggerSpec, ANY_STATUS};
pub use workflow::{
    ApprovalDecision, ApprovalRequest, CapturedError, StateData, WorkflowOutcome, WorkflowState,
    WorkflowStatus,
};

/// API version of every Relay resource
pub const API_VERSION: &str = "relay.dev/v1";

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
