//! Domain Entities for Cointip
//!
//! Core business entities with lifecycle management.
//! An `Action` is the unit of work: one incoming command, one record.

use crate::value_objects::{non_negative, CoinUnit, DomainError, FiatUnit, TransferKind, Username};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an Action
pub type ActionId = Uuid;

// =============================================================================
// Action type
// =============================================================================

/// Closed set of commands a user can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Create the user's ledger account and deposit addresses
    Register,
    /// Balance and address summary
    Info,
    /// Recent action log
    History,
    /// Exchange rate table
    Rates,
    /// Accept pending tips held in escrow
    Accept,
    /// Return pending tips to their senders
    Decline,
    /// Tip a user or an address
    Givetip,
    /// Send funds to an external address
    Withdraw,
    /// Convert karma into a one-time grant
    Redeem,
}

impl ActionType {
    /// Every action type, in rule-table registration order.
    pub const ALL: [ActionType; 9] = [
        ActionType::Givetip,
        ActionType::Withdraw,
        ActionType::Redeem,
        ActionType::Register,
        ActionType::Info,
        ActionType::History,
        ActionType::Rates,
        ActionType::Accept,
        ActionType::Decline,
    ];

    /// Lowercase name used in storage and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Register => "register",
            ActionType::Info => "info",
            ActionType::History => "history",
            ActionType::Rates => "rates",
            ActionType::Accept => "accept",
            ActionType::Decline => "decline",
            ActionType::Givetip => "givetip",
            ActionType::Withdraw => "withdraw",
            ActionType::Redeem => "redeem",
        }
    }

    /// Public commands are matched in comments; all others only in private messages.
    pub fn is_public(&self) -> bool {
        matches!(self, ActionType::Givetip)
    }

    /// Commands that move coins between accounts or out of the wallet.
    pub fn moves_funds(&self) -> bool {
        matches!(self, ActionType::Givetip | ActionType::Withdraw)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::UnknownName {
                kind: "action type",
                value: s.to_string(),
            })
    }
}

// =============================================================================
// Action state machine
// =============================================================================

/// Action lifecycle state.
///
/// ```text
/// New ──→ Pending ──→ Completed | Declined | Expired
///  └───→ Completed | Failed | Declined
/// ```
///
/// `New` is transient and never persisted. `Pending` is the only
/// non-terminal persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    /// Constructed, not yet driven anywhere
    New,
    /// Funds parked in escrow awaiting the recipient
    Pending,
    /// Finished successfully
    Completed,
    /// Rejected by validation or failed during execution
    Failed,
    /// Returned to the sender by the recipient
    Declined,
    /// Returned to the sender after the acceptance window closed
    Expired,
}

impl ActionState {
    /// Lowercase name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::New => "new",
            ActionState::Pending => "pending",
            ActionState::Completed => "completed",
            ActionState::Failed => "failed",
            ActionState::Declined => "declined",
            ActionState::Expired => "expired",
        }
    }

    /// Terminal states are never updated again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionState::New | ActionState::Pending)
    }

    /// Whether `self → next` is an allowed transition.
    pub fn can_transition_to(&self, next: ActionState) -> bool {
        use ActionState::*;
        matches!(
            (self, next),
            (New, Pending | Completed | Failed | Declined)
                | (Pending, Completed | Declined | Expired)
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ActionState::New),
            "pending" => Ok(ActionState::Pending),
            "completed" => Ok(ActionState::Completed),
            "failed" => Ok(ActionState::Failed),
            "declined" => Ok(ActionState::Declined),
            "expired" => Ok(ActionState::Expired),
            other => Err(DomainError::UnknownName {
                kind: "action state",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Destination
// =============================================================================

/// Where a tip or withdrawal goes. Exactly one form per action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Destination {
    /// Another platform user (ledger account)
    User(Username),
    /// External coin address
    Address(String),
}

impl Destination {
    /// Build a destination from the two optional forms.
    ///
    /// Returns `Ok(None)` when neither is set, and an error when both are.
    pub fn from_parts(
        to_user: Option<Username>,
        to_address: Option<String>,
    ) -> Result<Option<Self>, DomainError> {
        match (to_user, to_address) {
            (Some(_), Some(_)) => Err(DomainError::InvalidStateTransition(
                "Destination must be a user or an address, not both".to_string(),
            )),
            (Some(user), None) => Ok(Some(Destination::User(user))),
            (None, Some(address)) => Ok(Some(Destination::Address(address))),
            (None, None) => Ok(None),
        }
    }

    /// Recipient user, if any
    pub fn user(&self) -> Option<&Username> {
        match self {
            Destination::User(user) => Some(user),
            Destination::Address(_) => None,
        }
    }

    /// Recipient address, if any
    pub fn address(&self) -> Option<&str> {
        match self {
            Destination::User(_) => None,
            Destination::Address(address) => Some(address),
        }
    }

    /// Confirmation/minimum policy for this destination
    pub fn transfer_kind(&self) -> TransferKind {
        match self {
            Destination::User(_) => TransferKind::Givetip,
            Destination::Address(_) => TransferKind::Withdraw,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::User(user) => write!(f, "/u/{}", user),
            Destination::Address(address) => write!(f, "{}", address),
        }
    }
}

// =============================================================================
// Source reference
// =============================================================================

/// Where an item came from on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Private message in the bot's inbox
    Message,
    /// Public comment (scanned channel, or a mention delivered to the inbox)
    Comment,
}

/// Immutable reference to the message/comment that triggered an action.
///
/// `message_id` together with the action type is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Opaque platform id of the triggering item
    pub message_id: String,
    /// Permalink to the item (comments only)
    pub permalink: Option<String>,
    /// Channel (subreddit) the item was posted in
    pub channel: Option<String>,
    /// When the item was created on the platform (not when it was processed)
    pub created_at: DateTime<Utc>,
    /// Message or comment
    pub kind: ItemKind,
}

// =============================================================================
// Action
// =============================================================================

/// A single transfer or account request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub action_type: ActionType,
    pub state: ActionState,
    pub from_user: Username,
    pub destination: Option<Destination>,

    // Denomination
    pub coin: Option<CoinUnit>,
    pub fiat: Option<FiatUnit>,
    pub coin_value: Option<Decimal>,
    pub fiat_value: Option<Decimal>,

    // Provenance
    pub source: SourceRef,

    /// External ledger transaction id (address sends only)
    pub transaction_id: Option<String>,
}

impl Action {
    /// Create a transient action with no denomination (account commands).
    pub fn new(action_type: ActionType, from_user: Username, source: SourceRef) -> Self {
        Self {
            id: Uuid::now_v7(),
            action_type,
            state: ActionState::New,
            from_user,
            destination: None,
            coin: None,
            fiat: None,
            coin_value: None,
            fiat_value: None,
            source,
            transaction_id: None,
        }
    }

    /// Recipient user, if any
    pub fn to_user(&self) -> Option<&Username> {
        self.destination.as_ref().and_then(Destination::user)
    }

    /// Recipient address, if any
    pub fn to_address(&self) -> Option<&str> {
        self.destination.as_ref().and_then(Destination::address)
    }

    /// Triggering message id
    pub fn message_id(&self) -> &str {
        &self.source.message_id
    }

    /// Resolved positive coin amount, if any
    pub fn amount(&self) -> Option<Decimal> {
        self.coin_value.filter(|v| *v > Decimal::ZERO)
    }

    /// Move to `next`, enforcing the state machine.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStateTransition` for any edge not in the diagram.
    pub fn transition(&mut self, next: ActionState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "{} action {} cannot move from {} to {}",
                self.action_type, self.source.message_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Copy of this action as it must be persisted: amounts clamped to >= 0.
    pub fn for_persistence(&self) -> Action {
        let mut record = self.clone();
        record.coin_value = record.coin_value.map(non_negative);
        record.fiat_value = record.fiat_value.map(non_negative);
        record
    }
}

// =============================================================================
// User
// =============================================================================

/// A registered user: identity plus one deposit address per active coin.
///
/// Balances are never stored here; they are always read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: Username,
    pub addresses: Vec<(CoinUnit, String)>,
    pub joined_at: DateTime<Utc>,
}

impl User {
    /// Deposit address for `coin`, if allocated
    pub fn address(&self, coin: &CoinUnit) -> Option<&str> {
        self.addresses
            .iter()
            .find(|(c, _)| c == coin)
            .map(|(_, address)| address.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
