//! Cointip Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, and the typed tip configuration.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod settings;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    Action, ActionId, ActionState, ActionType, Destination, ItemKind, SourceRef, User,
};
pub use settings::{
    CoinSpec, CommandSpec, Commands, FiatSpec, KeywordSpec, KeywordValue, MessageSettings,
    RedeemSpec, TipSettings,
};
pub use value_objects::{
    non_negative, CoinUnit, DomainError, FiatUnit, TransferKind, Username,
};
