//! Cointip Daemon Library
//!
//! Runtime orchestrator for the tip engine.
//!
//! # Architecture
//!
//! ```text
//! Platform → Bot → TipExecutor → Ledger (coin daemons)
//!                      ↓
//!                    Store (actions, users, checkpoints)
//!
//! API Server → escrow status
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Bot**: Polling passes (expire, inbox, comments)
//! - **API**: HTTP health and escrow status endpoints
//! - **Config**: Environment-based configuration plus the TOML tip configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use cointipd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::from_config(config).await.expect("Failed to start");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod bot;
pub mod config;
pub mod daemon;
pub mod error;

#[cfg(feature = "postgres")]
pub mod db;

// Re-exports for convenience
pub use bot::{Bot, PassReport};
pub use config::{load_tip_settings, parse_tip_settings, ApiConfig, BotConfig, Config, Environment};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
