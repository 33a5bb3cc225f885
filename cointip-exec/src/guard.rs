//! Idempotency Guard
//!
//! The platform feed delivers items at least once. Before an action takes an
//! effectful step, the guard asks the action log whether the same
//! (action type, source message id) was already recorded.

use std::sync::Arc;
use tracing::warn;

use cointip_domain::ActionType;
use cointip_store::{ActionQuery, Store};

use crate::error::ExecResult;

/// Duplicate detection over the persisted action log.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
}

impl IdempotencyGuard {
    /// Create a guard over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Whether `message_id` was already processed as `action_type`.
    ///
    /// With `exclude_pending`, a `pending` record does not count: accept and
    /// decline re-process their own pending tips.
    pub async fn already_processed(
        &self,
        action_type: ActionType,
        message_id: &str,
        exclude_pending: bool,
    ) -> ExecResult<bool> {
        let query = ActionQuery::new()
            .action_type(action_type)
            .message_id(message_id)
            .exclude_pending(exclude_pending);

        let found = self.store.actions().exists(&query).await?;
        if found {
            warn!(
                %message_id,
                action_type = %action_type,
                "Duplicate item, already processed"
            );
        }
        Ok(found)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cointip_domain::{Action, ActionState, Destination, ItemKind, SourceRef, Username};
    use cointip_store::MemoryStore;

    fn pending_tip(message_id: &str) -> Action {
        let source = SourceRef {
            message_id: message_id.to_string(),
            permalink: None,
            channel: None,
            created_at: Utc::now(),
            kind: ItemKind::Comment,
        };
        let mut action = Action::new(ActionType::Givetip, Username::new("alice").unwrap(), source);
        action.destination = Some(Destination::User(Username::new("bob").unwrap()));
        action.state = ActionState::Pending;
        action
    }

    #[tokio::test]
    async fn test_detects_recorded_item() {
        let store = Arc::new(MemoryStore::new());
        let guard = IdempotencyGuard::new(store.clone());

        assert!(!guard.already_processed(ActionType::Givetip, "t1_a", false).await.unwrap());
        store.actions().save(&pending_tip("t1_a")).await.unwrap();
        assert!(guard.already_processed(ActionType::Givetip, "t1_a", false).await.unwrap());
        // Same id under another type is a different action
        assert!(!guard.already_processed(ActionType::Accept, "t1_a", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_exclude_pending() {
        let store = Arc::new(MemoryStore::new());
        let guard = IdempotencyGuard::new(store.clone());
        let mut tip = pending_tip("t1_a");
        store.actions().save(&tip).await.unwrap();

        assert!(!guard.already_processed(ActionType::Givetip, "t1_a", true).await.unwrap());

        tip.transition(ActionState::Completed).unwrap();
        store.actions().save(&tip).await.unwrap();
        assert!(guard.already_processed(ActionType::Givetip, "t1_a", true).await.unwrap());
    }
}
