//! Relay Triggers - Status-change automation and task handlers
//!
//! This crate connects outside events to the engine:
//!
//! - **TriggerDispatcher**: matches entity status changes against Trigger
//!   resources, starts one deduplicated execution per trigger and drives it
//!   under the auto-progression bound
//! - **RequestHandlers**: @mention replies, routing recommendations and plan
//!   proposals
//! - **RelayWorker**: the `TaskRunner` that executes every task kind and
//!   records final failures on the owning record
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_triggers::RelayWorker;
//! use relay_runtime::{TaskKind, TaskQueue};
//!
//! let worker = Arc::new(RelayWorker::new(engine.clone()));
//! let queue = TaskQueue::start(worker, 4, engine.retry_policy());
//! queue.enqueue(TaskKind::ProcessTrigger { event })?;
//! ```

pub mod dispatcher;
pub mod handlers;
pub mod worker;

pub use dispatcher::{
    DispatchOutcome, ProgressOutcome, TriggerDispatcher, MAX_AUTO_PROGRESS_ITERATIONS,
};
pub use handlers::{RequestHandlers, ROUTING_METADATA_KEY};
pub use worker::{RelayWorker, FAILURE_METADATA_KEY};
