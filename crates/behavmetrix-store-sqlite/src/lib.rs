//! SQLite backend for the BehavMetrix colony store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Rank writes are single transactions
//! guarded by per-animal `rank_version` and the rank cache `generation`.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
