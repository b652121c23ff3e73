//! Cancellable batches
//!
//! A batch groups units of work (queued tasks or the members of a parallel
//! chain group) under one cancellation flag. Members check `is_cancelled()`
//! immediately before they run; cancelling never interrupts work that has
//! already started.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub struct Batch {
    id: String,
    /// Record the batch belongs to, e.g. a chain execution id
    owner: Option<String>,
    cancelled: AtomicBool,
    members: Mutex<Vec<String>>,
}

impl Batch {
    fn new(id: String, owner: Option<String>) -> Self {
        Self {
            id,
            owner,
            cancelled: AtomicBool::new(false),
            members: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn add(&self, member: impl Into<String>) {
        self.members.lock().push(member.into());
    }

    pub fn members(&self) -> Vec<String> {
        self.members.lock().clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Live batches by id
#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches: DashMap<String, Arc<Batch>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, owner: Option<&str>) -> Arc<Batch> {
        let batch = Arc::new(Batch::new(
            Uuid::new_v4().to_string(),
            owner.map(str::to_string),
        ));
        self.batches.insert(batch.id.clone(), batch.clone());
        batch
    }

    pub fn get(&self, id: &str) -> Option<Arc<Batch>> {
        self.batches.get(id).map(|b| b.clone())
    }

    /// Add a member to an existing batch
    pub fn add(&self, id: &str, member: impl Into<String>) -> bool {
        match self.batches.get(id) {
            Some(batch) => {
                batch.add(member);
                true
            }
            None => false,
        }
    }

    pub fn cancel(&self, id: &str) -> bool {
        match self.batches.get(id) {
            Some(batch) => {
                batch.cancel();
                tracing::info!("Cancelled batch {}", id);
                true
            }
            None => false,
        }
    }

    /// Cancel every live batch owned by `owner`; returns how many
    pub fn cancel_owned_by(&self, owner: &str) -> usize {
        let mut cancelled = 0;
        for batch in self.batches.iter() {
            if batch.owner() == Some(owner) && !batch.is_cancelled() {
                batch.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!("Cancelled {} batch(es) owned by {}", cancelled, owner);
        }
        cancelled
    }

    /// Unknown batches count as not cancelled
    pub fn is_cancelled(&self, id: &str) -> bool {
        self.batches
            .get(id)
            .map(|b| b.is_cancelled())
            .unwrap_or(false)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Batch>> {
        self.batches.remove(id).map(|(_, b)| b)
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_by_owner() {
        let registry = BatchRegistry::new();
        let a = registry.create(Some("exec-1"));
        let b = registry.create(Some("exec-2"));
        a.add("step-1");
        assert!(registry.add(b.id(), "step-2"));

        assert_eq!(registry.cancel_owned_by("exec-1"), 1);
        assert!(a.is_cancelled());
        assert!(!registry.is_cancelled(b.id()));
        assert_eq!(a.members(), vec!["step-1".to_string()]);
    }

    #[test]
    fn test_unknown_batch() {
        let registry = BatchRegistry::new();
        assert!(!registry.is_cancelled("nope"));
        assert!(!registry.cancel("nope"));
        assert!(!registry.add("nope", "x"));
    }
}
