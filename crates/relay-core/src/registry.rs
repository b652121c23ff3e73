// Relay Core - Resource Registries
//
// Registries for loading and indexing the YAML resources a deployment is
// configured with. Each registry provides:
// - Directory loading (load all resources from a path)
// - Name-based lookup
// - Type-safe access to resources

use crate::agent::AgentResource;
use crate::chain::Chain;
use crate::config::RuntimeConfig;
use crate::error::{RelayError, RelayResult};
use crate::store::Store;
use crate::team::Team;
use crate::trigger::Trigger;

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;

/// Common trait for all resource registries
pub trait Registry<T> {
    /// Load all resources from a directory
    fn load_directory(&mut self, path: &Path) -> RelayResult<usize>;

    /// Get a resource by name
    fn get(&self, name: &str) -> Option<&T>;

    /// Get all resources
    fn get_all(&self) -> Vec<&T>;

    /// Register a resource
    fn register(&mut self, resource: T) -> RelayResult<()>;

    /// Get the count of resources
    fn count(&self) -> usize;

    /// Check if a resource exists
    fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Parse one YAML file, reporting the failing field path
pub fn load_yaml_file<T: DeserializeOwned>(path: &Path) -> RelayResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RelayError::config(format!("Failed to read {}: {}", path.display(), e)))?;
    let deserializer = serde_yaml::Deserializer::from_str(&content);
    serde_path_to_error::deserialize(deserializer).map_err(|e| {
        RelayError::config(format!(
            "Failed to parse {} at '{}': {}",
            path.display(),
            e.path(),
            e.inner()
        ))
    })
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map_or(false, |e| e == "yaml" || e == "yml")
}

/// Load every YAML file in `path`, skipping (and logging) unparseable ones
fn load_each<T: DeserializeOwned>(
    path: &Path,
    kind: &str,
    mut insert: impl FnMut(T) -> RelayResult<String>,
) -> RelayResult<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let mut entries: Vec<_> = std::fs::read_dir(path)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| is_yaml(p))
        .collect();
    entries.sort();

    let mut count = 0;
    for file_path in entries {
        match load_yaml_file::<T>(&file_path).and_then(&mut insert) {
            Ok(name) => {
                tracing::debug!("Loaded {}: {}", kind, name);
                count += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to load {} from {:?}: {}", kind, file_path, e);
            }
        }
    }
    Ok(count)
}

// ============================================================================
// Chain Registry
// ============================================================================

#[derive(Debug, Default)]
pub struct ChainRegistry {
    chains: HashMap<String, Chain>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry<Chain> for ChainRegistry {
    fn load_directory(&mut self, path: &Path) -> RelayResult<usize> {
        load_each(path, "chain", |chain: Chain| {
            let name = chain.id().to_string();
            self.register(chain)?;
            Ok(name)
        })
    }

    fn get(&self, name: &str) -> Option<&Chain> {
        self.chains.get(name)
    }

    fn get_all(&self) -> Vec<&Chain> {
        self.chains.values().collect()
    }

    fn register(&mut self, resource: Chain) -> RelayResult<()> {
        resource.validate()?;
        self.chains.insert(resource.id().to_string(), resource);
        Ok(())
    }

    fn count(&self) -> usize {
        self.chains.len()
    }
}

// ============================================================================
// Trigger Registry
// ============================================================================

#[derive(Debug, Default)]
pub struct TriggerRegistry {
    triggers: HashMap<String, Trigger>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers that fire for the transition
    pub fn matching(&self, entity_type: &str, from: &str, to: &str) -> Vec<&Trigger> {
        let mut found: Vec<&Trigger> = self
            .triggers
            .values()
            .filter(|t| t.matches(entity_type, from, to))
            .collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        found
    }
}

impl Registry<Trigger> for TriggerRegistry {
    fn load_directory(&mut self, path: &Path) -> RelayResult<usize> {
        load_each(path, "trigger", |trigger: Trigger| {
            let name = trigger.name().to_string();
            self.register(trigger)?;
            Ok(name)
        })
    }

    fn get(&self, name: &str) -> Option<&Trigger> {
        self.triggers.get(name)
    }

    fn get_all(&self) -> Vec<&Trigger> {
        self.triggers.values().collect()
    }

    fn register(&mut self, resource: Trigger) -> RelayResult<()> {
        resource.validate()?;
        self.triggers.insert(resource.name().to_string(), resource);
        Ok(())
    }

    fn count(&self) -> usize {
        self.triggers.len()
    }
}

// ============================================================================
// Agent Registry
// ============================================================================

/// Agent configurations keyed by `team/agent`
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentResource>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(resource: &AgentResource) -> String {
        format!("{}/{}", resource.spec.team, resource.name())
    }

    /// Whether any team configures `agent_id`
    pub fn has_agent(&self, agent_id: &str) -> bool {
        self.agents.values().any(|a| a.name() == agent_id)
    }
}

impl Registry<AgentResource> for AgentRegistry {
    fn load_directory(&mut self, path: &Path) -> RelayResult<usize> {
        load_each(path, "agent", |agent: AgentResource| {
            let key = Self::key(&agent);
            self.register(agent)?;
            Ok(key)
        })
    }

    /// Look up by `team/agent`
    fn get(&self, name: &str) -> Option<&AgentResource> {
        self.agents.get(name)
    }

    fn get_all(&self) -> Vec<&AgentResource> {
        self.agents.values().collect()
    }

    fn register(&mut self, resource: AgentResource) -> RelayResult<()> {
        if resource.name().is_empty() || resource.spec.team.is_empty() {
            return Err(RelayError::config("agent configuration needs a name and a team"));
        }
        self.agents.insert(Self::key(&resource), resource);
        Ok(())
    }

    fn count(&self) -> usize {
        self.agents.len()
    }
}

// ============================================================================
// Team Registry
// ============================================================================

#[derive(Debug, Default)]
pub struct TeamRegistry {
    teams: HashMap<String, Team>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry<Team> for TeamRegistry {
    fn load_directory(&mut self, path: &Path) -> RelayResult<usize> {
        load_each(path, "team", |team: Team| {
            let name = team.id().to_string();
            self.register(team)?;
            Ok(name)
        })
    }

    fn get(&self, name: &str) -> Option<&Team> {
        self.teams.get(name)
    }

    fn get_all(&self) -> Vec<&Team> {
        self.teams.values().collect()
    }

    fn register(&mut self, resource: Team) -> RelayResult<()> {
        self.teams.insert(resource.id().to_string(), resource);
        Ok(())
    }

    fn count(&self) -> usize {
        self.teams.len()
    }
}

// ============================================================================
// Resource Manager (Unified Access)
// ============================================================================

/// Unified resource manager holding all registries
#[derive(Debug, Default)]
pub struct ResourceManager {
    pub chains: ChainRegistry,
    pub triggers: TriggerRegistry,
    pub agents: AgentRegistry,
    pub teams: TeamRegistry,
    pub runtime: RuntimeConfig,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all resources from a directory structure
    ///
    /// Expected structure:
    /// ```text
    /// root/
    /// ├── runtime.yaml
    /// ├── chains/
    /// ├── triggers/
    /// ├── agents/
    /// └── teams/
    /// ```
    pub fn load_directory(&mut self, root: &Path) -> RelayResult<ResourceLoadSummary> {
        let mut summary = ResourceLoadSummary::default();

        let runtime_file = root.join("runtime.yaml");
        if runtime_file.exists() {
            self.runtime = RuntimeConfig::from_file(&runtime_file)?;
        }

        summary.chains = self.chains.load_directory(&root.join("chains"))?;
        summary.triggers = self.triggers.load_directory(&root.join("triggers"))?;
        summary.agents = self.agents.load_directory(&root.join("agents"))?;
        summary.teams = self.teams.load_directory(&root.join("teams"))?;

        Ok(summary)
    }

    /// Validate all cross-references between resources
    pub fn validate_references(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for trigger in self.triggers.get_all() {
            if !self.chains.exists(&trigger.spec.chain) {
                errors.push(ValidationError {
                    resource_type: "Trigger".to_string(),
                    resource_name: trigger.name().to_string(),
                    field: "chain".to_string(),
                    message: format!("Referenced chain '{}' not found", trigger.spec.chain),
                });
            }
            if let Some(ref team) = trigger.spec.team {
                if !self.teams.exists(team) {
                    errors.push(ValidationError {
                        resource_type: "Trigger".to_string(),
                        resource_name: trigger.name().to_string(),
                        field: "team".to_string(),
                        message: format!("Referenced team '{}' not found", team),
                    });
                }
            }
        }

        for agent in self.agents.get_all() {
            if !self.teams.exists(&agent.spec.team) {
                errors.push(ValidationError {
                    resource_type: "AgentConfiguration".to_string(),
                    resource_name: agent.name().to_string(),
                    field: "team".to_string(),
                    message: format!("Referenced team '{}' not found", agent.spec.team),
                });
            }
        }

        for chain in self.chains.get_all() {
            for (index, step) in chain.spec.steps.iter().enumerate() {
                if !self.agents.has_agent(&step.agent) {
                    errors.push(ValidationError {
                        resource_type: "Chain".to_string(),
                        resource_name: chain.id().to_string(),
                        field: format!("steps[{}].agent", index),
                        message: format!("Agent '{}' is not configured for any team", step.agent),
                    });
                }
            }
        }

        errors.sort_by(|a, b| {
            (&a.resource_type, &a.resource_name, &a.field)
                .cmp(&(&b.resource_type, &b.resource_name, &b.field))
        });
        errors
    }

    /// Write every loaded resource into a store
    pub async fn apply(&self, store: &dyn Store) -> RelayResult<ResourceLoadSummary> {
        for team in self.teams.get_all() {
            store.save_team(team).await?;
        }
        for chain in self.chains.get_all() {
            store.save_chain(chain).await?;
        }
        for trigger in self.triggers.get_all() {
            store.save_trigger(trigger).await?;
        }
        for agent in self.agents.get_all() {
            store.save_agent_config(&agent.to_configuration()).await?;
        }
        tracing::info!("Applied resources: {}", self.summary());
        Ok(self.summary())
    }

    /// Get summary of loaded resources
    pub fn summary(&self) -> ResourceLoadSummary {
        ResourceLoadSummary {
            chains: self.chains.count(),
            triggers: self.triggers.count(),
            agents: self.agents.count(),
            teams: self.teams.count(),
        }
    }
}

/// Summary of loaded resources
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResourceLoadSummary {
    pub chains: usize,
    pub triggers: usize,
    pub agents: usize,
    pub teams: usize,
}

impl ResourceLoadSummary {
    pub fn total(&self) -> usize {
        self.chains + self.triggers + self.agents + self.teams
    }
}

impl std::fmt::Display for ResourceLoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} chains, {} triggers, {} agents, {} teams",
            self.chains, self.triggers, self.agents, self.teams
        )
    }
}

/// Broken cross-reference between resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub resource_type: String,
    pub resource_name: String,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}: {} - {}",
            self.resource_type, self.resource_name, self.field, self.message
        )
    }
}
