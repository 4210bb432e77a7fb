//! Session table operations.
//!
//! Sessions are keyed by their opaque token; the referenced user id and the
//! expiry are mirrored into columns so user-wide deletes and the periodic
//! expiry sweep stay index-backed SQL instead of doc scans.

use sqlx::SqlitePool;

use crate::models::SessionData;
use crate::{now_millis, PersistenceError};

/// Lazy expiry: the row may still exist, but an expired session is absent to
/// every caller.
pub(crate) async fn get(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<SessionData>, PersistenceError> {
    let row: Option<(String, i64)> =
        sqlx::query_as("SELECT doc, expires_at FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(pool)
            .await?;
    match row {
        Some((_, expires_at)) if expires_at <= now_millis() => Ok(None),
        Some((doc, _)) => Ok(Some(serde_json::from_str(&doc)?)),
        None => Ok(None),
    }
}

pub(crate) async fn set(
    pool: &SqlitePool,
    token: &str,
    data: &SessionData,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "INSERT INTO sessions (token, user_id, doc, expires_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(token) DO UPDATE SET \
            user_id = excluded.user_id, \
            doc = excluded.doc, \
            expires_at = excluded.expires_at",
    )
    .bind(token)
    .bind(&data.user_id)
    .bind(serde_json::to_string(data)?)
    .bind(data.expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn delete(pool: &SqlitePool, token: &str) -> Result<(), PersistenceError> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn delete_by_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<(), PersistenceError> {
    sqlx::query("DELETE FROM sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Physically remove expired sessions, bounding storage growth.
pub(crate) async fn delete_expired(pool: &SqlitePool) -> Result<u64, PersistenceError> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now_millis())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn list(
    pool: &SqlitePool,
) -> Result<Vec<(String, SessionData)>, PersistenceError> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT token, doc FROM sessions")
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|(token, doc)| Ok((token, serde_json::from_str(&doc)?)))
        .collect()
}

/// Delete sessions whose referenced user id is not in `user_ids`. Returns the
/// tokens removed. Used by startup orphan-session repair.
pub(crate) async fn delete_orphaned(
    pool: &SqlitePool,
    user_ids: &[String],
) -> Result<Vec<String>, PersistenceError> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT token, user_id FROM sessions")
        .fetch_all(pool)
        .await?;
    let mut removed = Vec::new();
    for (token, user_id) in rows {
        if !user_ids.contains(&user_id) {
            delete(pool, &token).await?;
            removed.push(token);
        }
    }
    Ok(removed)
}
