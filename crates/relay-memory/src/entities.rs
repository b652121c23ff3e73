//! In-memory entity resolver
//!
//! Holds `GenericEntity` records for one entity type. `annotate` writes into
//! the entity's metadata map, which is where routing recommendations and
//! final task failures end up.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use relay_core::{EntityResolver, GenericEntity, RelayError, RelayResult, Triggerable};

pub struct InMemoryEntities {
    entity_type: String,
    entities: DashMap<String, GenericEntity>,
}

impl InMemoryEntities {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entities: DashMap::new(),
        }
    }

    /// Insert or replace an entity; its type must match this resolver
    pub fn insert(&self, entity: GenericEntity) {
        if entity.entity_type != self.entity_type {
            tracing::warn!(
                "Ignoring {} entity '{}' inserted into {} resolver",
                entity.entity_type,
                entity.id,
                self.entity_type
            );
            return;
        }
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn get(&self, id: &str) -> Option<GenericEntity> {
        self.entities.get(id).map(|e| e.clone())
    }

    pub fn metadata(&self, id: &str, key: &str) -> Option<serde_json::Value> {
        self.entities
            .get(id)
            .and_then(|e| e.metadata.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[async_trait]
impl EntityResolver for InMemoryEntities {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    async fn resolve(&self, id: &str) -> RelayResult<Option<Arc<dyn Triggerable>>> {
        Ok(self
            .entities
            .get(id)
            .map(|e| Arc::new(e.clone()) as Arc<dyn Triggerable>))
    }

    async fn annotate(&self, id: &str, key: &str, value: serde_json::Value) -> RelayResult<()> {
        let mut entity = self
            .entities
            .get_mut(id)
            .ok_or_else(|| RelayError::not_found(self.entity_type.clone(), id))?;
        entity.metadata.insert(key.to_string(), value);
        Ok(())
    }
}
