//! Cointip Storage Layer
//!
//! Provides persistence for the action log, registered users and checkpoints.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use cointip_store::{ActionQuery, MemoryStore, Store};
//! use cointip_domain::{ActionType, Username};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     store.users().create(&Username::new("alice").unwrap()).await.unwrap();
//!
//!     let query = ActionQuery::new().action_type(ActionType::Givetip).message_id("t1_abc");
//!     assert!(!store.actions().exists(&query).await.unwrap());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    ActionQuery, ActionRepository, Store, UserRepository, ValueRepository,
    LAST_PROCESSED_COMMENT_TIME,
};
