//! Relay Runtime - Execution engine for agent chains
//!
//! This crate runs agent work on top of the `relay-core` types:
//!
//! - **BudgetLimiter**: per-(team, agent) daily run limit and monthly budget
//!   cap, charged with one atomic reservation
//! - **WorkflowStateManager**: one agent invocation through the workflow
//!   state machine, including approval pauses and resumes
//! - **ChainOrchestrator**: ordered chain steps, parallel groups run as
//!   cancellable batches, idempotent per-step records
//! - **RoutingEngine**: skill and capacity scoring of team members
//! - **TaskQueue**: bounded worker pool with typed outcomes and retries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_runtime::Engine;
//!
//! let engine = Engine::new(store, entities, outbox, RuntimeConfig::default())?;
//! let execution = engine
//!     .orchestrator()
//!     .execute_chain(&chain, "maintenance", None, serde_json::Map::new())
//!     .await?;
//! let progress = engine.orchestrator().execute_step(&execution.id).await?;
//! ```

pub mod batch;
pub mod chain;
pub mod engine;
pub mod limiter;
pub mod propagation;
pub mod routing;
pub mod tasks;
pub mod tools;
pub mod workflow;

pub use batch::{Batch, BatchRegistry};
pub use chain::{ChainEvent, ChainOrchestrator, StepProgress};
pub use engine::Engine;
pub use limiter::BudgetLimiter;
pub use propagation::ContextPropagator;
pub use routing::RoutingEngine;
pub use tasks::{
    QueueStats, RetryPolicy, TaskEnvelope, TaskKind, TaskOutcome, TaskQueue, TaskRunner,
};
pub use tools::{AgentTool, OutboxTool, ToolContext, ToolRegistry, Toolbox};
pub use workflow::{
    ExecuteRequest, Workflow, WorkflowContext, WorkflowRegistry, WorkflowStateManager,
};
