// Relay Core - Triggerable entities
//
// Business entities (work orders, tasks, tickets) are not modelled here.
// Anything that can start a chain implements `Triggerable`, and a resolver
// per entity type is registered in the `EntityRegistry`. Entity references
// are stored as (type, id) pairs and resolved through the registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};

/// Attribute keys that never leave the entity in a snapshot
pub const AUDIT_TIMESTAMP_KEYS: &[&str] = &["created_at", "updated_at", "deleted_at"];

/// Stable (type, id) reference to a business entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub entity_type: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// Capability interface of an entity that can start chains
pub trait Triggerable: Send + Sync {
    fn entity_ref(&self) -> EntityRef;

    /// Owning team, if the entity belongs to one
    fn team_id(&self) -> Option<String>;

    /// Stable key, unique across entity types
    fn key(&self) -> String {
        self.entity_ref().to_string()
    }

    /// Attribute snapshot passed to agents
    fn snapshot(&self) -> serde_json::Map<String, serde_json::Value>;
}

/// Resolves and annotates entities of a single type
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Entity type this resolver handles
    fn entity_type(&self) -> &str;

    async fn resolve(&self, id: &str) -> RelayResult<Option<Arc<dyn Triggerable>>>;

    /// Write a metadata entry on the entity (routing results, failures)
    async fn annotate(&self, id: &str, key: &str, value: serde_json::Value) -> RelayResult<()>;
}

/// Explicit registry from entity type to resolver
#[derive(Default, Clone)]
pub struct EntityRegistry {
    resolvers: HashMap<String, Arc<dyn EntityResolver>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn EntityResolver>) {
        let entity_type = resolver.entity_type().to_string();
        tracing::debug!("Registered entity resolver: {}", entity_type);
        self.resolvers.insert(entity_type, resolver);
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.register(resolver);
        self
    }

    pub fn resolver(&self, entity_type: &str) -> Option<&Arc<dyn EntityResolver>> {
        self.resolvers.get(entity_type)
    }

    pub fn entity_types(&self) -> Vec<&str> {
        self.resolvers.keys().map(|s| s.as_str()).collect()
    }

    /// Resolve a reference; unknown types and missing ids are `NotFound`
    pub async fn resolve(&self, entity: &EntityRef) -> RelayResult<Arc<dyn Triggerable>> {
        let resolver = self
            .resolver(&entity.entity_type)
            .ok_or_else(|| RelayError::not_found("entity type", &entity.entity_type))?;
        resolver
            .resolve(&entity.id)
            .await?
            .ok_or_else(|| RelayError::not_found("entity", entity.to_string()))
    }

    pub async fn annotate(
        &self,
        entity: &EntityRef,
        key: &str,
        value: serde_json::Value,
    ) -> RelayResult<()> {
        let resolver = self
            .resolver(&entity.entity_type)
            .ok_or_else(|| RelayError::not_found("entity type", &entity.entity_type))?;
        resolver.annotate(&entity.id, key, value).await
    }
}

/// Snapshot with audit timestamps removed
pub fn filtered_snapshot(entity: &dyn Triggerable) -> serde_json::Map<String, serde_json::Value> {
    let mut snapshot = entity.snapshot();
    for key in AUDIT_TIMESTAMP_KEYS {
        snapshot.remove(*key);
    }
    snapshot
}

/// Entity-status-change event consumed by the trigger dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChangeEvent {
    /// Unique per delivery source event; redeliveries reuse it
    pub event_id: String,
    pub entity: EntityRef,
    pub from_status: String,
    pub to_status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acting_user: Option<String>,

    pub occurred_at: DateTime<Utc>,
}

impl StatusChangeEvent {
    pub fn new(
        entity: EntityRef,
        from_status: impl Into<String>,
        to_status: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            entity,
            from_status: from_status.into(),
            to_status: to_status.into(),
            acting_user: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn by(mut self, user: impl Into<String>) -> Self {
        self.acting_user = Some(user.into());
        self
    }
}

/// Plain attribute-bag entity, used by in-memory resolvers and tooling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericEntity {
    pub entity_type: String,
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    /// Annotations written back by the engine
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl GenericEntity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            team_id: None,
            attributes: serde_json::Map::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn in_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

impl Triggerable for GenericEntity {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(&self.entity_type, &self.id)
    }

    fn team_id(&self) -> Option<String> {
        self.team_id.clone()
    }

    fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut snapshot = self.attributes.clone();
        snapshot.insert("id".to_string(), serde_json::json!(self.id));
        snapshot.insert("entity_type".to_string(), serde_json::json!(self.entity_type));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_snapshot_drops_audit_timestamps() {
        let entity = GenericEntity::new("work_order", "wo-1")
            .with_attribute("title", serde_json::json!("Replace pump"))
            .with_attribute("created_at", serde_json::json!("2026-01-01T00:00:00Z"))
            .with_attribute("updated_at", serde_json::json!("2026-01-02T00:00:00Z"));

        let snapshot = filtered_snapshot(&entity);
        assert_eq!(snapshot.get("title"), Some(&serde_json::json!("Replace pump")));
        assert!(!snapshot.contains_key("created_at"));
        assert!(!snapshot.contains_key("updated_at"));
        assert_eq!(snapshot.get("id"), Some(&serde_json::json!("wo-1")));
    }

    #[test]
    fn test_entity_key_is_type_qualified() {
        let entity = GenericEntity::new("task", "42");
        assert_eq!(entity.key(), "task:42");
    }

    #[tokio::test]
    async fn test_unknown_entity_type_is_not_found() {
        let registry = EntityRegistry::new();
        let err = registry
            .resolve(&EntityRef::new("invoice", "1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::NotFound { .. }));
    }
}
