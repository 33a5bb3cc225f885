//! Execution layer port definitions.
//!
//! Ports define the interfaces for external collaborators (coin daemon,
//! social platform, exchange rates). Adapters implement these ports for
//! specific services (coin daemon JSON-RPC, stub, etc.).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use cointip_domain::{CoinUnit, FiatUnit, ItemKind, SourceRef, Username};

use crate::error::ExecError;

// =============================================================================
// Ledger Port
// =============================================================================

/// Port for the coin daemon's per-account ledger.
///
/// Accounts are keyed by username; the escrow and redeem accounts are plain
/// accounts with reserved names.
///
/// Implementations:
/// - `StubLedger` - In-memory balances for testing
/// - `CoinDaemons` - JSON-RPC against one daemon per coin
///
/// Implementations must **never** retry a money-moving call. A failed
/// `move_between` or `send_to_address` is reported as-is and the caller
/// treats it as fatal.
#[async_trait]
pub trait LedgerPort: Send + Sync {
    /// Balance of `account` counting deposits with at least `minconf` confirmations.
    async fn balance(
        &self,
        coin: &CoinUnit,
        account: &Username,
        minconf: u32,
    ) -> Result<Decimal, ExecError>;

    /// Move `amount` between two accounts of the same wallet.
    async fn move_between(
        &self,
        coin: &CoinUnit,
        from: &Username,
        to: &Username,
        amount: Decimal,
    ) -> Result<(), ExecError>;

    /// Send `amount` from `from` to an external address.
    ///
    /// # Returns
    ///
    /// The network transaction id.
    async fn send_to_address(
        &self,
        coin: &CoinUnit,
        from: &Username,
        address: &str,
        amount: Decimal,
        minconf: u32,
    ) -> Result<String, ExecError>;

    /// Whether `address` is a valid address for `coin`.
    async fn is_valid_address(&self, coin: &CoinUnit, address: &str) -> Result<bool, ExecError>;

    /// Allocate a new deposit address for `account`.
    async fn new_address(&self, coin: &CoinUnit, account: &Username) -> Result<String, ExecError>;

    /// Total wallet balance across all accounts.
    async fn wallet_balance(&self, coin: &CoinUnit) -> Result<Decimal, ExecError>;
}

// =============================================================================
// Platform Port
// =============================================================================

/// Failure talking to the social platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// Timeout, 5xx or dropped connection; worth retrying
    #[error("transient platform failure: {0}")]
    Transient(String),

    /// Rate limited by the platform
    #[error("rate limited by platform")]
    RateLimited {
        /// Wait suggested by the platform, if any
        retry_after: Option<Duration>,
    },

    /// User or item does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The bot is not allowed to do this (banned from a channel, locked thread)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Item was deleted before we could act on it
    #[error("item deleted: {0}")]
    Deleted(String),

    /// Anything else the platform reported
    #[error("platform error: {0}")]
    Other(String),
}

impl PlatformError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }
}

/// A message or comment fetched from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformItem {
    /// Immutable platform id
    pub id: String,
    /// Author, `None` if the account was deleted
    pub author: Option<Username>,
    /// Raw text body
    pub body: String,
    /// Private message or public comment
    pub kind: ItemKind,
    /// When the item was posted
    pub created_at: DateTime<Utc>,
    /// Link to the item
    pub permalink: Option<String>,
    /// Channel (subreddit, room) of a comment
    pub channel: Option<String>,
}

impl PlatformItem {
    /// Provenance record for an action triggered by this item
    pub fn source(&self) -> SourceRef {
        SourceRef {
            message_id: self.id.clone(),
            permalink: self.permalink.clone(),
            channel: self.channel.clone(),
            created_at: self.created_at,
            kind: self.kind,
        }
    }
}

/// Port for the social platform.
///
/// Implementations:
/// - `StubPlatform` - Scripted inbox/comments, records everything sent
/// - `RetryingPlatform` - Wraps another platform with the retry policy
#[async_trait]
pub trait PlatformPort: Send + Sync {
    /// Unread private messages (and comment replies) in the bot's inbox.
    async fn unread_messages(&self, limit: usize) -> Result<Vec<PlatformItem>, PlatformError>;

    /// Mark an inbox item read. Marking twice is harmless.
    async fn mark_read(&self, item_id: &str) -> Result<(), PlatformError>;

    /// Recent comments in the watched channels, at most `limit`.
    async fn recent_comments(&self, limit: usize) -> Result<Vec<PlatformItem>, PlatformError>;

    /// Reply publicly (or in-thread) to an item.
    async fn reply(&self, item_id: &str, text: &str) -> Result<(), PlatformError>;

    /// Send a private message.
    async fn send_message(
        &self,
        to: &Username,
        subject: &str,
        text: &str,
    ) -> Result<(), PlatformError>;

    /// Author of the comment `item_id` replies to, if it can be resolved.
    async fn parent_author(&self, item_id: &str) -> Result<Option<Username>, PlatformError>;

    /// Whether `user` exists on the platform.
    async fn user_exists(&self, user: &Username) -> Result<bool, PlatformError>;

    /// Karma of `user` (used by redeem).
    async fn karma(&self, user: &Username) -> Result<i64, PlatformError>;
}

// =============================================================================
// Rate Port
// =============================================================================

/// Port for exchange rates.
#[async_trait]
pub trait RatePort: Send + Sync {
    /// Fiat per coin, or `None` when the provider has no rate for the pair.
    async fn rate(&self, coin: &CoinUnit, fiat: &FiatUnit) -> Result<Option<Decimal>, ExecError>;
}

// =============================================================================
// Tests
// =============================================================================
