//! Cointip Connectors
//!
//! Adapters for the external systems behind the execution ports.
//!
//! - [`CoinDaemonClient`]: JSON-RPC client for one bitcoind-style coin daemon
//! - [`CoinDaemons`]: one client per coin, implementing
//!   [`cointip_exec::LedgerPort`]
//!
//! Ledger calls are never retried here. A failed `move` or `sendfrom` is
//! reported to the executor as is; retrying a money movement blindly could
//! execute it twice.

#![warn(clippy::all)]

pub mod coin_daemon;

pub use coin_daemon::{CoinDaemonClient, CoinDaemons, DaemonEndpoint, RpcError};
