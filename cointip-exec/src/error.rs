//! Execution layer error types.
//!
//! `ExecError` is the fatal arm of the action taxonomy: a ledger call that
//! failed after validation passed, a broken store, or data the engine cannot
//! trust. Business-rule failures are not errors here; they are
//! [`ValidationFailure`](crate::executor::ValidationFailure)s recorded on the
//! action.

use thiserror::Error;

/// Errors that halt processing.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Coin daemon call failed
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Platform call failed permanently where the engine cannot continue
    #[error("Platform error: {0}")]
    Platform(#[from] crate::ports::PlatformError),

    /// Exchange rate provider failed
    #[error("Rate provider error: {0}")]
    Rates(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] cointip_store::StoreError),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] cointip_domain::DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] cointip_engine::EngineError),

    /// Persisted or external state contradicts an invariant
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A startup self-check failed
    ///
    /// **Do not process commands when this error occurs.** The ledger and the
    /// action log disagree and an operator must reconcile them first.
    #[error("SELF-CHECK FAILED: {0}")]
    SelfCheck(String),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
