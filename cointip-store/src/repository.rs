//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the domain.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cointip_domain::{Action, ActionState, ActionType, CoinUnit, User, Username};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

// =============================================================================
// Action queries
// =============================================================================

/// Filter over the action log. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionQuery {
    pub action_type: Option<ActionType>,
    pub state: Option<ActionState>,
    pub message_id: Option<String>,
    pub from_user: Option<Username>,
    pub to_user: Option<Username>,
    pub coin: Option<CoinUnit>,
    /// Skip records in `pending` (used when replaying pending tips)
    pub exclude_pending: bool,
    /// Only records whose source item is older than this
    pub created_before: Option<DateTime<Utc>>,
}

impl ActionQuery {
    /// Empty query (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to an action type
    pub fn action_type(mut self, action_type: ActionType) -> Self {
        self.action_type = Some(action_type);
        self
    }

    /// Restrict to a state
    pub fn state(mut self, state: ActionState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restrict to a source message id
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Restrict to a sender
    pub fn from_user(mut self, user: Username) -> Self {
        self.from_user = Some(user);
        self
    }

    /// Restrict to a recipient
    pub fn to_user(mut self, user: Username) -> Self {
        self.to_user = Some(user);
        self
    }

    /// Restrict to a coin
    pub fn coin(mut self, coin: CoinUnit) -> Self {
        self.coin = Some(coin);
        self
    }

    /// Skip pending records
    pub fn exclude_pending(mut self, exclude: bool) -> Self {
        self.exclude_pending = exclude;
        self
    }

    /// Only records created before `at`
    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    /// Whether `action` satisfies this query
    pub fn matches(&self, action: &Action) -> bool {
        self.action_type.map_or(true, |t| action.action_type == t)
            && self.state.map_or(true, |s| action.state == s)
            && self.message_id.as_deref().map_or(true, |m| action.message_id() == m)
            && self.from_user.as_ref().map_or(true, |u| &action.from_user == u)
            && self.to_user.as_ref().map_or(true, |u| action.to_user() == Some(u))
            && self.coin.as_ref().map_or(true, |c| action.coin.as_ref() == Some(c))
            && !(self.exclude_pending && action.state == ActionState::Pending)
            && self.created_before.map_or(true, |t| action.source.created_at < t)
    }
}

// =============================================================================
// Repositories
// =============================================================================

/// Repository for the action log.
///
/// One record per (action type, source message id). A record may be
/// rewritten only while it is `pending`.
#[async_trait]
pub trait ActionRepository: Send + Sync {
    /// Insert or update a record.
    ///
    /// Amounts are clamped to >= 0 before writing.
    ///
    /// # Errors
    /// - `InvalidState` for `new` records, for updates of a terminal record,
    ///   and for transitions the lifecycle does not allow
    async fn save(&self, action: &Action) -> Result<(), StoreError>;

    /// All records matching `query`, oldest source item first
    async fn find(&self, query: &ActionQuery) -> Result<Vec<Action>, StoreError>;

    /// Whether any record matches `query`
    async fn exists(&self, query: &ActionQuery) -> Result<bool, StoreError> {
        Ok(!self.find(query).await?.is_empty())
    }

    /// Latest `limit` records where `user` is sender or recipient, newest first
    async fn history(&self, user: &Username, limit: usize) -> Result<Vec<Action>, StoreError>;

    /// Sum of pending givetip amounts per coin
    async fn pending_totals(&self) -> Result<BTreeMap<CoinUnit, Decimal>, StoreError> {
        let pending = self
            .find(
                &ActionQuery::new()
                    .action_type(ActionType::Givetip)
                    .state(ActionState::Pending),
            )
            .await?;

        let mut totals = BTreeMap::new();
        for action in pending {
            if let (Some(coin), Some(value)) = (action.coin, action.coin_value) {
                *totals.entry(coin).or_insert(Decimal::ZERO) += value;
            }
        }
        Ok(totals)
    }
}

/// Repository for registered users and their deposit addresses.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a user row with no addresses.
    ///
    /// # Errors
    /// `UserExists` if the user already exists.
    async fn create(&self, name: &Username) -> Result<(), StoreError>;

    /// Find a user with its addresses
    async fn find(&self, name: &Username) -> Result<Option<User>, StoreError>;

    /// Record the deposit address for one coin.
    ///
    /// # Errors
    /// `UserNotFound` if the user does not exist, `AddressExists` if the coin already has one.
    async fn add_address(
        &self,
        name: &Username,
        coin: &CoinUnit,
        address: &str,
    ) -> Result<(), StoreError>;

    /// Delete a user and its addresses (no-op if absent)
    async fn delete(&self, name: &Username) -> Result<(), StoreError>;

    /// All users, by name
    async fn list(&self) -> Result<Vec<User>, StoreError>;
}

/// Key of the comment high-water mark, in Unix seconds.
pub const LAST_PROCESSED_COMMENT_TIME: &str = "last_processed_comment_time";

/// Key/value store for process-wide checkpoints.
#[async_trait]
pub trait ValueRepository: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value (insert or replace)
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Combined store interface
pub trait Store: Send + Sync {
    /// Get action repository
    fn actions(&self) -> &dyn ActionRepository;

    /// Get user repository
    fn users(&self) -> &dyn UserRepository;

    /// Get checkpoint repository
    fn values(&self) -> &dyn ValueRepository;
}

/// Check that `action` may be written over `existing`.
pub(crate) fn check_write(existing: Option<&Action>, action: &Action) -> Result<(), StoreError> {
    if action.state == ActionState::New {
        return Err(StoreError::invalid_state(format!(
            "{} action {} cannot be persisted in state new",
            action.action_type,
            action.message_id()
        )));
    }

    if let Some(existing) = existing {
        if !existing.state.can_transition_to(action.state) {
            return Err(StoreError::invalid_state(format!(
                "{} action {} is {}, cannot become {}",
                action.action_type,
                action.message_id(),
                existing.state,
                action.state
            )));
        }
    }
    Ok(())
}
