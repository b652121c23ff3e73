//! Budget & rate limiter
//!
//! Gatekeeper in front of every agent invocation. The check and the charge
//! are delegated to `AgentConfigStore::reserve_run`, which performs both as
//! one compare-and-increment on the (team, agent) row.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use relay_core::{AgentConfiguration, RelayError, RelayResult, Store, UsageSnapshot};

#[derive(Clone)]
pub struct BudgetLimiter {
    store: Arc<dyn Store>,
}

impl BudgetLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Configuration of an enabled agent
    ///
    /// A missing or disabled agent is a configuration error.
    pub async fn agent_config(
        &self,
        team_id: &str,
        agent_id: &str,
    ) -> RelayResult<AgentConfiguration> {
        let config = self
            .store
            .find_agent_config(team_id, agent_id)
            .await?
            .ok_or_else(|| {
                RelayError::config(format!(
                    "agent '{}' is not configured for team '{}'",
                    agent_id, team_id
                ))
            })?;
        if !config.enabled {
            return Err(RelayError::config(format!(
                "agent '{}' is disabled for team '{}'",
                agent_id, team_id
            )));
        }
        Ok(config)
    }

    /// Check quotas and charge one run, or fail without touching counters
    pub async fn reserve(
        &self,
        team_id: &str,
        agent_id: &str,
        cost: f64,
    ) -> RelayResult<UsageSnapshot> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(RelayError::config(format!(
                "invalid run cost {} for agent '{}'",
                cost, agent_id
            )));
        }

        match self.store.reserve_run(team_id, agent_id, cost, Utc::now()).await {
            Ok(usage) => {
                debug!(
                    "Reserved run for {}/{}: {}/{} runs, {:.2}/{:.2} spent",
                    team_id,
                    agent_id,
                    usage.daily_run_count,
                    usage.daily_run_limit,
                    usage.current_month_spend,
                    usage.monthly_budget_cap
                );
                Ok(usage)
            }
            Err(e) => {
                if e.is_quota() {
                    warn!("Limiter rejected {}/{}: {}", team_id, agent_id, e);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::AgentConfigStore;
    use relay_memory::InMemoryStore;

    async fn limiter_with(config: AgentConfiguration) -> (BudgetLimiter, InMemoryStore) {
        let store = InMemoryStore::new();
        store.save_agent_config(&config).await.unwrap();
        (BudgetLimiter::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_run_after_limit() {
        let (limiter, store) =
            limiter_with(AgentConfiguration::new("team-1", "drafter").with_limits(3, 100.0)).await;

        for _ in 0..3 {
            limiter.reserve("team-1", "drafter", 1.0).await.unwrap();
        }
        let err = limiter.reserve("team-1", "drafter", 1.0).await.unwrap_err();
        assert!(matches!(err, RelayError::RateLimitExceeded { .. }));

        let config = store.agent_config("team-1", "drafter").unwrap();
        assert_eq!(config.daily_run_count, 3);
        assert_eq!(config.current_month_spend, 3.0);
    }

    #[tokio::test]
    async fn test_budget_rejection_mutates_nothing() {
        let (limiter, store) =
            limiter_with(AgentConfiguration::new("team-1", "drafter").with_limits(10, 2.0)).await;

        let err = limiter.reserve("team-1", "drafter", 2.5).await.unwrap_err();
        assert!(matches!(err, RelayError::BudgetExceeded { .. }));
        let config = store.agent_config("team-1", "drafter").unwrap();
        assert_eq!(config.daily_run_count, 0);
        assert_eq!(config.current_month_spend, 0.0);
    }

    #[tokio::test]
    async fn test_disabled_and_missing_agents() {
        let mut config = AgentConfiguration::new("team-1", "drafter");
        config.enabled = false;
        let (limiter, _) = limiter_with(config).await;

        assert!(matches!(
            limiter.agent_config("team-1", "drafter").await,
            Err(RelayError::Configuration(_))
        ));
        assert!(matches!(
            limiter.agent_config("team-1", "ghost").await,
            Err(RelayError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_cost_is_rejected() {
        let (limiter, _) = limiter_with(AgentConfiguration::new("team-1", "drafter")).await;
        assert!(limiter.reserve("team-1", "drafter", -1.0).await.is_err());
    }
}
