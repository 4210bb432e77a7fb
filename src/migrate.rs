//! One-shot migration of a file-mode data directory into the database.
//!
//! Runs at most once per data directory: a completion marker written next to
//! the collection files records that migration finished, and its presence
//! skips the whole engine on every later startup. All record writes are
//! idempotent upserts keyed by each record's stable identity, so a migration
//! interrupted before the marker was written simply re-runs to the same
//! final state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::backend::PersistenceBackend;
use crate::db::sessions;
use crate::file::FileBackend;
use crate::models::Settings;
use crate::{now_millis, PersistenceError};

/// Marker file written into the data directory after a successful migration.
pub const MIGRATION_MARKER: &str = "migration-complete.json";

/// Summary of one completed migration run. Serialized into the marker file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub users: usize,
    pub posts: usize,
    pub legacy_feed_posts: usize,
    pub chat_messages: usize,
    pub force_withdrawals: usize,
    pub feed_posts: usize,
    pub feed_comments: usize,
    pub deleted_feed_posts: usize,
    pub deleted_feed_comments: usize,
    pub sessions_migrated: usize,
    pub sessions_dropped: usize,
    pub completed_at: i64,
}

pub(crate) fn marker_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MIGRATION_MARKER)
}

/// Whether the data directory holds file-mode records that have not yet been
/// migrated. The marker file wins unconditionally; without it, migration runs
/// only when at least one collection has a record worth carrying over.
pub async fn is_migration_needed(file: &FileBackend) -> Result<bool, PersistenceError> {
    if marker_path(file.data_dir()).exists() {
        return Ok(false);
    }

    if !file.read_users().await?.is_empty()
        || !file.read_posts().await?.is_empty()
        || !file.read_legacy_feed_posts().await?.is_empty()
        || !file.read_chat_messages().await?.is_empty()
        || !file.read_force_withdrawals().await?.is_empty()
        || file.get_feed_posts(1, 0, None).await?.total > 0
        || !file.read_deleted_feed_posts().await?.is_empty()
        || !file.read_deleted_feed_comments().await?.is_empty()
        || file.read_pinned().await?.is_some()
        || !file.list_sessions().await?.is_empty()
        || file.read_settings().await? != Settings::default()
        || file.stored_admin_pin_hash()?.is_some()
    {
        return Ok(true);
    }
    Ok(false)
}

/// Copy every file-mode collection into the database and write the completion
/// marker. Safe to re-run: every write upserts by stable identity.
pub async fn migrate_file_data(
    file: &FileBackend,
    pool: &SqlitePool,
) -> Result<MigrationReport, PersistenceError> {
    info!(data_dir = %file.data_dir().display(), "starting file-to-database migration");
    let mut report = MigrationReport::default();

    let users = file.read_users().await?;
    for user in &users {
        crate::db::docs::upsert_by_id(pool, "users", &user.id, user).await?;
    }
    report.users = users.len();

    let posts = file.read_posts().await?;
    crate::db::docs::replace_all(pool, "posts", &posts).await?;
    report.posts = posts.len();

    // Legacy feed posts are stored newest-first in file mode; insert oldest
    // first so created_at ordering matches insertion order.
    let mut legacy = file.read_legacy_feed_posts().await?;
    legacy.reverse();
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM legacy_feed_posts")
        .execute(&mut *tx)
        .await?;
    for post in &legacy {
        sqlx::query("INSERT INTO legacy_feed_posts (doc, created_at) VALUES (?, ?)")
            .bind(serde_json::to_string(post)?)
            .bind(post.created_at)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    report.legacy_feed_posts = legacy.len();

    for msg in file.read_chat_messages().await? {
        sqlx::query(
            "INSERT INTO chat_messages (id, user_id, doc, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET doc = excluded.doc",
        )
        .bind(&msg.id)
        .bind(&msg.user_id)
        .bind(serde_json::to_string(&msg)?)
        .bind(msg.created_at)
        .execute(pool)
        .await?;
        report.chat_messages += 1;
    }

    for entry in file.read_force_withdrawals().await? {
        sqlx::query(
            "INSERT INTO force_withdrawals (id, doc, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET doc = excluded.doc",
        )
        .bind(&entry.id)
        .bind(serde_json::to_string(&entry)?)
        .bind(entry.created_at)
        .execute(pool)
        .await?;
        report.force_withdrawals += 1;
    }

    // New-style feed: keep the file-mode counter ids as the database pks so
    // existing references (audit entries, client bookmarks) stay valid.
    let feed = file.get_feed_posts(u32::MAX, 0, None).await?;
    for post in &feed.posts {
        sqlx::query(
            "INSERT INTO feed_posts (pk, doc, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(pk) DO UPDATE SET doc = excluded.doc",
        )
        .bind(post.id)
        .bind(serde_json::to_string(post)?)
        .bind(post.created_at)
        .execute(pool)
        .await?;
        report.feed_posts += 1;
        for comment in &post.comments {
            sqlx::query(
                "INSERT INTO feed_comments (pk, post_pk, doc, created_at) VALUES (?, ?, ?, ?) \
                 ON CONFLICT(pk) DO UPDATE SET doc = excluded.doc",
            )
            .bind(comment.id)
            .bind(post.id)
            .bind(serde_json::to_string(comment)?)
            .bind(comment.created_at)
            .execute(pool)
            .await?;
            report.feed_comments += 1;
        }
    }

    let deleted_posts = file.read_deleted_feed_posts().await?;
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM deleted_feed_posts")
        .execute(&mut *tx)
        .await?;
    for entry in deleted_posts.iter().rev() {
        sqlx::query("INSERT INTO deleted_feed_posts (post_id, doc, created_at) VALUES (?, ?, ?)")
            .bind(entry.post.id)
            .bind(serde_json::to_string(entry)?)
            .bind(entry.deleted_at)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    report.deleted_feed_posts = deleted_posts.len();

    let deleted_comments = file.read_deleted_feed_comments().await?;
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM deleted_feed_comments")
        .execute(&mut *tx)
        .await?;
    for entry in deleted_comments.iter().rev() {
        sqlx::query(
            "INSERT INTO deleted_feed_comments (comment_id, doc, created_at) VALUES (?, ?, ?)",
        )
        .bind(entry.comment.id)
        .bind(serde_json::to_string(entry)?)
        .bind(entry.deleted_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    report.deleted_feed_comments = deleted_comments.len();

    if let Some(pinned) = file.read_pinned().await? {
        crate::db::docs::write_singleton(pool, "pinned_message", &pinned).await?;
    }

    let settings = file.read_settings().await?;
    crate::db::docs::write_singleton(pool, "settings", &settings).await?;

    let pin_hash = file.read_admin_pin_hash().await?;
    sqlx::query("INSERT OR REPLACE INTO admin_pin (pk, pin_hash) VALUES (1, ?)")
        .bind(&pin_hash)
        .execute(pool)
        .await?;

    // Session reconciliation: a session is only carried over when the user it
    // references made it into the migrated set. Orphans are dropped here, not
    // copied and repaired later.
    for (token, data) in file.list_sessions().await? {
        if users.iter().any(|u| u.id == data.user_id) {
            sessions::set(pool, &token, &data).await?;
            report.sessions_migrated += 1;
        } else {
            warn!(user_id = %data.user_id, "dropping session for unknown user");
            report.sessions_dropped += 1;
        }
    }

    report.completed_at = now_millis();
    write_marker(file.data_dir(), &report)?;

    info!(
        users = report.users,
        posts = report.posts,
        chat_messages = report.chat_messages,
        feed_posts = report.feed_posts,
        sessions_migrated = report.sessions_migrated,
        sessions_dropped = report.sessions_dropped,
        "file-to-database migration complete"
    );
    Ok(report)
}

fn write_marker(data_dir: &Path, report: &MigrationReport) -> Result<(), PersistenceError> {
    let contents = serde_json::to_string_pretty(report)?;
    crate::file::write_atomic(&marker_path(data_dir), &contents)
}

/// Delete database sessions whose referenced user no longer exists. Runs on
/// every database-mode startup, not just after migration: out-of-band user
/// deletion leaves sessions behind otherwise.
pub async fn repair_orphan_sessions(pool: &SqlitePool) -> Result<u64, PersistenceError> {
    let user_ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM users")
        .fetch_all(pool)
        .await?;
    let user_ids: Vec<String> = user_ids.into_iter().map(|(id,)| id).collect();

    let removed = sessions::delete_orphaned(pool, &user_ids).await?;
    if !removed.is_empty() {
        info!(count = removed.len(), "removed orphaned sessions");
    }
    Ok(removed.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{NewChatMessage, NewFeedComment, NewFeedPost, SessionData, User};
    use tempfile::TempDir;

    fn sample_user(id: &str, points: i64) -> User {
        User {
            id: id.to_string(),
            display_name: format!("user-{id}"),
            wallet_address: format!("0x{id}"),
            points,
            level: 1,
            is_admin: false,
            banned: None,
            created_at: 1_000,
        }
    }

    fn sample_session(user_id: &str) -> SessionData {
        SessionData {
            user_id: user_id.to_string(),
            display_name: format!("user-{user_id}"),
            wallet_address: format!("0x{user_id}"),
            is_admin: false,
            expires_at: now_millis() + 60_000,
        }
    }

    async fn seeded_file_backend(dir: &TempDir) -> FileBackend {
        let file = FileBackend::new_unwatched(dir.path()).unwrap();
        file.write_users(&[sample_user("u1", 5), sample_user("u2", 9)])
            .await
            .unwrap();
        file.append_chat_message(NewChatMessage {
            user_id: "u1".into(),
            display_name: "user-u1".into(),
            text: "hello".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        let post = file
            .create_feed_post(NewFeedPost {
                author_id: "u1".into(),
                author_name: "user-u1".into(),
                body: "first post".into(),
                image_url: None,
            })
            .await
            .unwrap();
        file.create_feed_comment(NewFeedComment {
            post_id: post.id,
            author_id: "u2".into(),
            author_name: "user-u2".into(),
            body: "welcome".into(),
        })
        .await
        .unwrap();
        file.set_session("tok-u1", &sample_session("u1"))
            .await
            .unwrap();
        file.set_session("tok-ghost", &sample_session("ghost"))
            .await
            .unwrap();
        file.write_settings(&Settings {
            maintenance_mode: true,
            ..Default::default()
        })
        .await
        .unwrap();
        file
    }

    #[tokio::test]
    async fn test_migration_needed_only_before_marker() {
        let dir = TempDir::new().unwrap();
        let file = seeded_file_backend(&dir).await;
        assert!(is_migration_needed(&file).await.unwrap());

        let db = Database::new_in_memory().await.unwrap();
        migrate_file_data(&file, db.pool()).await.unwrap();

        assert!(marker_path(dir.path()).exists());
        assert!(!is_migration_needed(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_data_dir_needs_no_migration() {
        let dir = TempDir::new().unwrap();
        let file = FileBackend::new_unwatched(dir.path()).unwrap();
        assert!(!is_migration_needed(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_settings_only_data_dir_triggers_migration() {
        let dir = TempDir::new().unwrap();
        let file = FileBackend::new_unwatched(dir.path()).unwrap();
        file.write_settings(&Settings {
            maintenance_mode: true,
            ..Default::default()
        })
        .await
        .unwrap();
        assert!(is_migration_needed(&file).await.unwrap());

        let db = Database::new_in_memory().await.unwrap();
        migrate_file_data(&file, db.pool()).await.unwrap();
        let settings: Option<Settings> = crate::db::docs::read_singleton(db.pool(), "settings")
            .await
            .unwrap();
        assert!(settings.unwrap().maintenance_mode);
    }

    #[tokio::test]
    async fn test_custom_admin_pin_triggers_migration() {
        let dir = TempDir::new().unwrap();
        let file = FileBackend::new_unwatched(dir.path()).unwrap();
        file.write_admin_pin_hash("$2b$10$custom-hash").await.unwrap();
        assert!(is_migration_needed(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_migration_copies_collections_and_drops_orphan_sessions() {
        let dir = TempDir::new().unwrap();
        let file = seeded_file_backend(&dir).await;
        let db = Database::new_in_memory().await.unwrap();

        let report = migrate_file_data(&file, db.pool()).await.unwrap();
        assert_eq!(report.users, 2);
        assert_eq!(report.chat_messages, 1);
        assert_eq!(report.feed_posts, 1);
        assert_eq!(report.feed_comments, 1);
        assert_eq!(report.sessions_migrated, 1);
        assert_eq!(report.sessions_dropped, 1);

        let migrated = sessions::list(db.pool()).await.unwrap();
        assert_eq!(migrated.len(), 1);
        assert_eq!(migrated[0].0, "tok-u1");

        let settings: Option<Settings> =
            crate::db::docs::read_singleton(db.pool(), "settings").await.unwrap();
        assert!(settings.unwrap().maintenance_mode);
    }

    #[tokio::test]
    async fn test_migration_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = seeded_file_backend(&dir).await;
        let db = Database::new_in_memory().await.unwrap();

        migrate_file_data(&file, db.pool()).await.unwrap();
        let pks_before: Vec<(i64, String)> = sqlx::query_as("SELECT pk, id FROM users ORDER BY pk")
            .fetch_all(db.pool())
            .await
            .unwrap();

        // Re-running (marker lost, crash before it was written) reproduces
        // the same state without duplicating records or reassigning ids.
        migrate_file_data(&file, db.pool()).await.unwrap();
        let pks_after: Vec<(i64, String)> = sqlx::query_as("SELECT pk, id FROM users ORDER BY pk")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(pks_before, pks_after);

        let chat_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(chat_count.0, 1);

        let feed_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feed_posts")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(feed_count.0, 1);
    }

    #[tokio::test]
    async fn test_migration_preserves_feed_ids() {
        let dir = TempDir::new().unwrap();
        let file = seeded_file_backend(&dir).await;
        let db = Database::new_in_memory().await.unwrap();

        let before = file.get_feed_posts(10, 0, None).await.unwrap();
        migrate_file_data(&file, db.pool()).await.unwrap();

        let after = crate::db::feed::get_posts(db.pool(), 10, 0, None).await.unwrap();
        assert_eq!(before.posts[0].id, after.posts[0].id);
        assert_eq!(
            before.posts[0].comments[0].id,
            after.posts[0].comments[0].id
        );
    }

    #[tokio::test]
    async fn test_repair_orphan_sessions() {
        let db = Database::new_in_memory().await.unwrap();
        crate::db::docs::upsert_by_id(db.pool(), "users", "u1", &sample_user("u1", 5))
            .await
            .unwrap();
        sessions::set(db.pool(), "tok-u1", &sample_session("u1"))
            .await
            .unwrap();
        sessions::set(db.pool(), "tok-ghost", &sample_session("ghost"))
            .await
            .unwrap();

        assert_eq!(repair_orphan_sessions(db.pool()).await.unwrap(), 1);
        let remaining = sessions::list(db.pool()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "tok-u1");
    }
}
