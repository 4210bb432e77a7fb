//! Persistence facade for the Agora community platform.
//!
//! The platform's request handlers never talk to storage directly; they go
//! through [`Store`], which routes every operation to one of two backends
//! selected once at [`Store::connect`] time:
//!
//! - [`FileBackend`](file::FileBackend) — one JSON document per collection in
//!   a local data directory, with an in-process cache, crash-safe atomic
//!   writes and best-effort invalidation on external edits.
//! - [`DatabaseBackend`](db::DatabaseBackend) — document tables over an sqlx
//!   pool, with per-record upsert keyed by the stable `id` field.
//!
//! A one-shot, idempotent migration ([`migrate`]) moves every file collection
//! into the database the first time a database URL is configured, and writes a
//! completion marker so it never runs twice.

pub mod backend;
pub mod config;
pub mod db;
pub mod facade;
pub mod file;
pub mod migrate;
pub mod models;

pub use backend::PersistenceBackend;
pub use config::StoreConfig;
pub use facade::Store;
pub use migrate::MigrationReport;

use std::time::{SystemTime, UNIX_EPOCH};

/// Errors from the persistence layer.
///
/// Database driver errors are normalized to [`PersistenceError::Database`]
/// so callers never depend on backend-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(String),
    #[error("database unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("hash error: {0}")]
    Hash(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for PersistenceError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PersistenceError::Migration(err.to_string())
    }
}

/// Generate a stable opaque record id.
///
/// Generated once at record creation and never reassigned; lookups always go
/// through this id rather than any backend-internal key.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
