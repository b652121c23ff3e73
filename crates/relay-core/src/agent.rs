// Relay Core - Agent configuration
//
// One AgentConfiguration exists per (team, agent). It carries the quota
// limits checked before every invocation, the usage counters those checks
// increment, and the capability flags that gate tool actions.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RelayError, RelayResult};

/// Tool capabilities an agent may be granted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateWorkOrders,
    ModifyTasks,
    AccessClientData,
    SendEmails,
}

impl Capability {
    /// Name of the configuration flag backing this capability
    pub fn flag(&self) -> &'static str {
        match self {
            Self::CreateWorkOrders => "can_create_work_orders",
            Self::ModifyTasks => "can_modify_tasks",
            Self::AccessClientData => "can_access_client_data",
            Self::SendEmails => "can_send_emails",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.flag())
    }
}

/// Capability flags for one agent in one team
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    #[serde(default)]
    pub can_create_work_orders: bool,
    #[serde(default)]
    pub can_modify_tasks: bool,
    #[serde(default)]
    pub can_access_client_data: bool,
    #[serde(default)]
    pub can_send_emails: bool,
    /// Workflows should pause for a human before side effects
    #[serde(default)]
    pub requires_approval: bool,
}

impl Capabilities {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::CreateWorkOrders => self.can_create_work_orders,
            Capability::ModifyTasks => self.can_modify_tasks,
            Capability::AccessClientData => self.can_access_client_data,
            Capability::SendEmails => self.can_send_emails,
        }
    }

    /// Everything allowed, no approval required
    pub fn all() -> Self {
        Self {
            can_create_work_orders: true,
            can_modify_tasks: true,
            can_access_client_data: true,
            can_send_emails: true,
            requires_approval: false,
        }
    }
}

/// Usage counters after a successful reservation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSnapshot {
    pub daily_run_count: u32,
    pub daily_run_limit: u32,
    pub current_month_spend: f64,
    pub monthly_budget_cap: f64,
    pub charged: f64,
}

/// Per-team configuration of one agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfiguration {
    pub team_id: String,
    pub agent_id: String,
    pub enabled: bool,
    pub daily_run_limit: u32,
    pub monthly_budget_cap: f64,

    /// Cost charged when a workflow does not estimate its own
    #[serde(default)]
    pub default_run_cost: f64,

    #[serde(default)]
    pub daily_run_count: u32,
    #[serde(default)]
    pub daily_spend: f64,
    #[serde(default)]
    pub current_month_spend: f64,

    /// Day the counters were last charged; drives day/month rollover
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_day: Option<NaiveDate>,

    #[serde(default)]
    pub capabilities: Capabilities,
}

impl AgentConfiguration {
    pub fn new(team_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            agent_id: agent_id.into(),
            enabled: true,
            daily_run_limit: default_daily_run_limit(),
            monthly_budget_cap: default_monthly_budget_cap(),
            default_run_cost: 0.0,
            daily_run_count: 0,
            daily_spend: 0.0,
            current_month_spend: 0.0,
            usage_day: None,
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_limits(mut self, daily_run_limit: u32, monthly_budget_cap: f64) -> Self {
        self.daily_run_limit = daily_run_limit;
        self.monthly_budget_cap = monthly_budget_cap;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn key(&self) -> (String, String) {
        (self.team_id.clone(), self.agent_id.clone())
    }

    /// Check every quota and, only if all pass, charge one run of `cost`
    ///
    /// Counters roll over when `now` falls on a different day or month than
    /// the last charge. On rejection nothing is modified.
    pub fn try_reserve(&mut self, cost: f64, now: DateTime<Utc>) -> RelayResult<UsageSnapshot> {
        if !self.enabled {
            return Err(RelayError::config(format!(
                "agent '{}' is disabled for team '{}'",
                self.agent_id, self.team_id
            )));
        }

        let today = now.date_naive();
        let (mut runs, mut day_spend, mut month_spend) =
            (self.daily_run_count, self.daily_spend, self.current_month_spend);
        match self.usage_day {
            Some(day) if day == today => {}
            Some(day) if day.year() == today.year() && day.month() == today.month() => {
                runs = 0;
                day_spend = 0.0;
            }
            _ => {
                runs = 0;
                day_spend = 0.0;
                month_spend = 0.0;
            }
        }

        if runs >= self.daily_run_limit {
            return Err(RelayError::RateLimitExceeded {
                team_id: self.team_id.clone(),
                agent_id: self.agent_id.clone(),
                used: runs,
                limit: self.daily_run_limit,
            });
        }

        if month_spend + cost > self.monthly_budget_cap {
            return Err(RelayError::BudgetExceeded {
                team_id: self.team_id.clone(),
                agent_id: self.agent_id.clone(),
                spent: month_spend,
                requested: cost,
                cap: self.monthly_budget_cap,
            });
        }

        self.daily_run_count = runs + 1;
        self.daily_spend = day_spend + cost;
        self.current_month_spend = month_spend + cost;
        self.usage_day = Some(today);

        Ok(UsageSnapshot {
            daily_run_count: self.daily_run_count,
            daily_run_limit: self.daily_run_limit,
            current_month_spend: self.current_month_spend,
            monthly_budget_cap: self.monthly_budget_cap,
            charged: cost,
        })
    }
}

fn default_daily_run_limit() -> u32 {
    50
}

fn default_monthly_budget_cap() -> f64 {
    100.0
}

fn default_enabled() -> bool {
    true
}

/// AgentConfiguration as declared in YAML
///
/// Example:
/// ```yaml
/// apiVersion: relay.dev/v1
/// kind: AgentConfiguration
/// metadata:
///   name: drafter
/// spec:
///   team: maintenance
///   dailyRunLimit: 20
///   monthlyBudgetCap: 50.0
///   capabilities:
///     can_create_work_orders: true
///     requires_approval: true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResource {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_agent_kind")]
    pub kind: String,

    pub metadata: AgentResourceMetadata,

    pub spec: AgentResourceSpec,
}

fn default_api_version() -> String {
    crate::API_VERSION.to_string()
}

fn default_agent_kind() -> String {
    "AgentConfiguration".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResourceMetadata {
    /// Agent id
    pub name: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResourceSpec {
    pub team: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_daily_run_limit")]
    pub daily_run_limit: u32,

    #[serde(default = "default_monthly_budget_cap")]
    pub monthly_budget_cap: f64,

    #[serde(default)]
    pub default_run_cost: f64,

    #[serde(default)]
    pub capabilities: Capabilities,
}

impl AgentResource {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Fresh configuration with zeroed counters
    pub fn to_configuration(&self) -> AgentConfiguration {
        AgentConfiguration {
            enabled: self.spec.enabled,
            daily_run_limit: self.spec.daily_run_limit,
            monthly_budget_cap: self.spec.monthly_budget_cap,
            default_run_cost: self.spec.default_run_cost,
            capabilities: self.spec.capabilities.clone(),
            ..AgentConfiguration::new(&self.spec.team, &self.metadata.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_limit_rejects_next_run() {
        let mut config = AgentConfiguration::new("team-1", "drafter").with_limits(2, 100.0);
        config.try_reserve(1.0, at(2026, 3, 4)).unwrap();
        config.try_reserve(1.0, at(2026, 3, 4)).unwrap();

        let before = config.clone();
        let err = config.try_reserve(1.0, at(2026, 3, 4)).unwrap_err();
        assert!(matches!(err, RelayError::RateLimitExceeded { used: 2, limit: 2, .. }));
        assert_eq!(config, before);
    }

    #[test]
    fn test_budget_cap_is_inclusive() {
        let mut config = AgentConfiguration::new("team-1", "drafter").with_limits(10, 3.0);
        config.try_reserve(2.0, at(2026, 3, 4)).unwrap();
        config.try_reserve(1.0, at(2026, 3, 4)).unwrap();
        let err = config.try_reserve(0.5, at(2026, 3, 4)).unwrap_err();
        assert!(matches!(err, RelayError::BudgetExceeded { .. }));
        assert_eq!(config.current_month_spend, 3.0);
    }

    #[test]
    fn test_day_rollover_keeps_month_spend() {
        let mut config = AgentConfiguration::new("team-1", "drafter").with_limits(1, 10.0);
        config.try_reserve(2.0, at(2026, 3, 4)).unwrap();
        let usage = config.try_reserve(2.0, at(2026, 3, 5)).unwrap();
        assert_eq!(usage.daily_run_count, 1);
        assert_eq!(config.daily_spend, 2.0);
        assert_eq!(config.current_month_spend, 4.0);
    }

    #[test]
    fn test_month_rollover_resets_spend() {
        let mut config = AgentConfiguration::new("team-1", "drafter").with_limits(5, 3.0);
        config.try_reserve(3.0, at(2026, 3, 31)).unwrap();
        config.try_reserve(3.0, at(2026, 4, 1)).unwrap();
        assert_eq!(config.current_month_spend, 3.0);
    }

    #[test]
    fn test_disabled_agent_is_configuration_error() {
        let mut config = AgentConfiguration::new("team-1", "drafter");
        config.enabled = false;
        let err = config.try_reserve(0.0, Utc::now()).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert_eq!(config.daily_run_count, 0);
    }

    #[test]
    fn test_agent_resource_yaml() {
        let yaml = r#"
apiVersion: relay.dev/v1
kind: AgentConfiguration
metadata:
  name: drafter
spec:
  team: maintenance
  dailyRunLimit: 20
  capabilities:
    can_create_work_orders: true
"#;
        let resource: AgentResource = serde_yaml::from_str(yaml).unwrap();
        let config = resource.to_configuration();
        assert_eq!(config.team_id, "maintenance");
        assert_eq!(config.daily_run_limit, 20);
        assert_eq!(config.monthly_budget_cap, 100.0);
        assert!(config.capabilities.allows(Capability::CreateWorkOrders));
        assert!(!config.capabilities.allows(Capability::SendEmails));
    }
}
