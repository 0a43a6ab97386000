//! Persistent resolution cache.
//!
//! The store deduplicates upstream work across process instances: torrent
//! file resolutions, debrid availability records, unlocked download links and
//! upstream metadata all land here with per-table TTLs, and the
//! ongoing-search marker table gives at-most-one-concurrent-search semantics
//! for a logical request.

mod sqlite;
mod types;

pub use sqlite::{SearchGuard, SqliteStore};
pub use types::*;

use thiserror::Error;

/// Errors that can occur during cache store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
