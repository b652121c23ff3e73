//! Recording outbox
//!
//! Keeps every tool action in order instead of delivering it.

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::{OutboundAction, Outbox, RelayResult};

#[derive(Default)]
pub struct InMemoryOutbox {
    sent: Mutex<Vec<OutboundAction>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundAction> {
        self.sent.lock().clone()
    }

    /// Delivered actions with the given tool name
    pub fn actions_named(&self, action: &str) -> Vec<OutboundAction> {
        self.sent
            .lock()
            .iter()
            .filter(|a| a.action == action)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn deliver(&self, action: OutboundAction) -> RelayResult<()> {
        tracing::debug!(
            "Outbox recorded {} for agent {} in team {}",
            action.action,
            action.agent_id,
            action.team_id
        );
        self.sent.lock().push(action);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_records_in_order() {
        let outbox = InMemoryOutbox::new();
        for action in ["send_email", "create_work_order", "send_email"] {
            outbox
                .deliver(OutboundAction {
                    team_id: "team-1".to_string(),
                    agent_id: "notifier".to_string(),
                    action: action.to_string(),
                    payload: serde_json::json!({}),
                    requested_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox.actions_named("send_email").len(), 2);
        assert_eq!(outbox.sent()[1].action, "create_work_order");
    }
}
