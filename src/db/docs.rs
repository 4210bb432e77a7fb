//! Generic helpers for JSON-document tables.
//!
//! Each collection table stores one serialized record per row in a `doc`
//! column next to the internal `pk`. These helpers keep the per-collection
//! code in `mod.rs` focused on semantics rather than row plumbing.
//!
//! Table names are compile-time constants within this crate and never come
//! from caller input.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::PersistenceError;

/// Read every document in insertion order.
pub(crate) async fn read_all<T: DeserializeOwned>(
    pool: &SqlitePool,
    table: &str,
) -> Result<Vec<T>, PersistenceError> {
    let query = format!("SELECT doc FROM {table} ORDER BY pk ASC");
    let rows: Vec<(String,)> = sqlx::query_as(&query).fetch_all(pool).await?;
    rows.into_iter()
        .map(|(doc,)| serde_json::from_str(&doc).map_err(PersistenceError::from))
        .collect()
}

/// Read every document ordered by `created_at` descending (newest first).
pub(crate) async fn read_all_newest_first<T: DeserializeOwned>(
    pool: &SqlitePool,
    table: &str,
) -> Result<Vec<T>, PersistenceError> {
    let query = format!("SELECT doc FROM {table} ORDER BY created_at DESC, pk DESC");
    let rows: Vec<(String,)> = sqlx::query_as(&query).fetch_all(pool).await?;
    rows.into_iter()
        .map(|(doc,)| serde_json::from_str(&doc).map_err(PersistenceError::from))
        .collect()
}

/// Bulk replace: delete all rows, insert the new set.
///
/// Runs inside a transaction so a crash cannot leave the collection
/// transiently empty. Only for collections without stable-identity
/// requirements — replacing rows regenerates internal pks, so users must go
/// through [`upsert_by_id`] instead.
pub(crate) async fn replace_all<T: Serialize>(
    pool: &SqlitePool,
    table: &str,
    values: &[T],
) -> Result<(), PersistenceError> {
    let mut tx = pool.begin().await?;
    let delete = format!("DELETE FROM {table}");
    sqlx::query(&delete).execute(&mut *tx).await?;
    let insert = format!("INSERT INTO {table} (doc) VALUES (?)");
    for value in values {
        sqlx::query(&insert)
            .bind(serde_json::to_string(value)?)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Upsert one document keyed by its stable `id` column, preserving the
/// internal pk of an existing row.
pub(crate) async fn upsert_by_id<T: Serialize>(
    pool: &SqlitePool,
    table: &str,
    id: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    let query = format!(
        "INSERT INTO {table} (id, doc) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET doc = excluded.doc"
    );
    sqlx::query(&query)
        .bind(id)
        .bind(serde_json::to_string(value)?)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn count(pool: &SqlitePool, table: &str) -> Result<u64, PersistenceError> {
    let query = format!("SELECT COUNT(*) FROM {table}");
    let row: (i64,) = sqlx::query_as(&query).fetch_one(pool).await?;
    Ok(row.0 as u64)
}

/// Enforce a collection cap after insert: delete the oldest rows (by
/// `created_at`, then pk) past `cap`.
pub(crate) async fn trim_to_cap(
    pool: &SqlitePool,
    table: &str,
    cap: usize,
) -> Result<(), PersistenceError> {
    let total = count(pool, table).await?;
    if total <= cap as u64 {
        return Ok(());
    }
    let excess = total - cap as u64;
    let query = format!(
        "DELETE FROM {table} WHERE pk IN \
         (SELECT pk FROM {table} ORDER BY created_at ASC, pk ASC LIMIT ?)"
    );
    sqlx::query(&query)
        .bind(excess as i64)
        .execute(pool)
        .await?;
    Ok(())
}

/// Read the single document of a one-row collection.
pub(crate) async fn read_singleton<T: DeserializeOwned>(
    pool: &SqlitePool,
    table: &str,
) -> Result<Option<T>, PersistenceError> {
    let query = format!("SELECT doc FROM {table} WHERE pk = 1");
    let row: Option<(String,)> = sqlx::query_as(&query).fetch_optional(pool).await?;
    row.map(|(doc,)| serde_json::from_str(&doc).map_err(PersistenceError::from))
        .transpose()
}

/// Replace the single document of a one-row collection.
pub(crate) async fn write_singleton<T: Serialize>(
    pool: &SqlitePool,
    table: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    let query = format!("INSERT OR REPLACE INTO {table} (pk, doc) VALUES (1, ?)");
    sqlx::query(&query)
        .bind(serde_json::to_string(value)?)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove the single document of a one-row collection.
pub(crate) async fn clear_singleton(
    pool: &SqlitePool,
    table: &str,
) -> Result<(), PersistenceError> {
    let query = format!("DELETE FROM {table}");
    sqlx::query(&query).execute(pool).await?;
    Ok(())
}
