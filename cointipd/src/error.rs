//! Daemon error types.

use cointip_domain::DomainError;
use cointip_engine::EngineError;
use cointip_exec::{ExecError, PlatformError};
use cointip_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error (invalid tip configuration)
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Execution error; fatal
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Platform feed unavailable after retries; the pass is skipped
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DaemonError {
    /// Whether the daemon must stop rather than try the next pass
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Platform(_))
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
