//! Relay Memory - In-process backends for the engine's store traits
//!
//! This crate provides DashMap-backed implementations of every persistence
//! seam in `relay-core`. Records are sharded by key, so writes to one record
//! lock only its shard and natural-key upserts are atomic.
//!
//! ## Backends
//!
//! - **InMemoryStore**: workflow states, chains, executions, steps, agent
//!   configurations, triggers, and teams
//! - **InMemoryEntities**: an entity resolver for one entity type
//! - **InMemoryOutbox**: records tool actions instead of delivering them
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relay_memory::{InMemoryEntities, InMemoryStore};
//! use relay_core::{EntityRegistry, GenericEntity};
//! use std::sync::Arc;
//!
//! let store = InMemoryStore::new();
//! let work_orders = Arc::new(InMemoryEntities::new("work_order"));
//! work_orders.insert(GenericEntity::new("work_order", "wo-1").in_team("maintenance"));
//! let entities = EntityRegistry::new().with_resolver(work_orders);
//! ```

pub mod entities;
pub mod outbox;
pub mod store;

pub use entities::InMemoryEntities;
pub use outbox::InMemoryOutbox;
pub use store::InMemoryStore;
