//! Storage layer errors

use cointip_domain::{CoinUnit, Username};
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// No user row for this name
    #[error("User not found: {0}")]
    UserNotFound(Username),

    /// User row already exists
    #[error("User already exists: {0}")]
    UserExists(Username),

    /// User already holds an address for the coin
    #[error("User {user} already has a {coin} address")]
    AddressExists { user: Username, coin: CoinUnit },

    /// Unique constraint hit by a write the caller did not classify
    #[error("Unique violation: {0}")]
    UniqueViolation(String),

    /// Write would break the action lifecycle (terminal record, unpersistable state)
    #[error("Invalid state transition: {message}")]
    InvalidState {
        /// Description of the invalid transition
        message: String,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stored row could not be turned back into a domain value
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Domain error passthrough
    #[error("Domain error: {0}")]
    Domain(#[from] cointip_domain::DomainError),
}

impl StoreError {
    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            // 23505: unique_violation
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::UniqueViolation(db_err.message().to_string())
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(err.to_string())
            },
            _ => StoreError::Database(err.to_string()),
        }
    }
}
