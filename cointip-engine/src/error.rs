//! Engine error types.

use cointip_domain::{CoinUnit, DomainError, FiatUnit};
use thiserror::Error;

/// Errors from rule building and amount resolution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A configured regex fragment does not compile once assembled
    #[error("Invalid pattern for {rule}: {source}")]
    InvalidPattern {
        /// Human-readable rule description
        rule: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// Captured amount is not a positive number
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Keyword not present in configuration
    #[error("Unknown keyword: {0}")]
    UnknownKeyword(String),

    /// Balance-relative keyword used without a balance to apply it to
    #[error("Keyword '{0}' needs a coin balance")]
    KeywordNeedsBalance(String),

    /// No usable exchange rate for the pair
    #[error("No exchange rate for {coin}/{fiat}")]
    NoRate {
        /// Coin side
        coin: CoinUnit,
        /// Fiat side
        fiat: FiatUnit,
    },

    /// Domain validation error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
