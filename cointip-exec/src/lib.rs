//! Cointip Execution Layer
//!
//! The action state machine: turns platform items into validated, executed,
//! persisted actions, exactly once per item.
//!
//! # Architecture
//!
//! ```text
//! PlatformItem → RuleTable → construct → IdempotencyGuard → TipExecutor → Store
//!                                                               ↓
//!                                                   LedgerPort / PlatformPort
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the coin daemon ledger, the social platform and rates
//! - **Idempotency Guard**: Duplicate detection keyed by (type, message id)
//! - **Executor**: Validation, escrow, execution and notification
//! - **Registrar**: Registration with compensating rollback
//! - **Audit**: Startup self-checks of the escrow invariant
//! - **Retry**: Backoff policy for the platform boundary only
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use cointip_exec::{Services, StaticRates, StubLedger, StubPlatform, TipExecutor};
//! use cointip_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let services = Services {
//!     ledger: Arc::new(StubLedger::new()),
//!     platform: Arc::new(StubPlatform::new()),
//!     rates: Arc::new(StaticRates::from_settings(&settings)),
//!     store: Arc::new(MemoryStore::new()),
//!     settings: Arc::new(settings),
//! };
//! let executor = TipExecutor::new(services)?;
//!
//! // Handle one comment or message
//! let result = executor.handle(&item).await?;
//! ```

#![warn(clippy::all)]

pub mod audit;
pub mod construct;
pub mod context;
pub mod error;
pub mod executor;
pub mod guard;
pub mod notice;
pub mod ports;
pub mod registrar;
pub mod retry;
pub mod stub;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use audit::{escrow_status, run_self_checks, EscrowStatus};
pub use construct::{construct, ConstructionError};
pub use context::Services;
pub use error::{ExecError, ExecResult};
pub use executor::{ActionResult, TipExecutor, ValidationFailure};
pub use guard::IdempotencyGuard;
pub use notice::Notice;
pub use ports::{LedgerPort, PlatformError, PlatformItem, PlatformPort, RatePort};
pub use registrar::Registrar;
pub use retry::{RetryPolicy, RetryingPlatform};
pub use stub::{StaticRates, StubLedger, StubPlatform};
