//! Document-database backend over an sqlx pool.
//!
//! ## Database setup
//!
//! [`Database`] wraps a `sqlx::SqlitePool` configured with:
//! - **WAL mode** — one writer, multiple concurrent readers.
//! - **Foreign keys enabled** — the feed comment cascade depends on it.
//! - **Embedded migrations** — `sqlx::migrate!` runs
//!   `migrations/001_initial_schema.sql` when [`Database::open`] is called.
//!   The schema is idempotent.
//!
//! ## Write semantics
//!
//! Concurrency control is pushed down to the database via atomic per-record
//! statements. Users use upsert-by-stable-`id` so internal row identities
//! survive rewrites; bulk-replace collections (posts, legacy feed) go through
//! a delete-all/insert-all transaction; capped collections trim their oldest
//! rows after insert; heart counters are bumped with `json_set` so two
//! concurrent increments both land.

pub(crate) mod docs;
pub(crate) mod feed;
pub(crate) mod sessions;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::backend::{initial_admin_pin, PersistenceBackend};
use crate::models::{
    ChatMessage, ChatMessageUpdate, DeletedFeedComment, DeletedFeedPost, FeedComment, FeedPage,
    FeedPost, ForceWithdrawal, LegacyFeedPost, NewChatMessage, NewFeedComment, NewFeedPost,
    PinnedMessage, Post, SessionData, Settings, User, CHAT_MAX_MESSAGES,
    DELETED_AUDIT_MAX_ENTRIES, FORCE_WITHDRAW_MAX_ENTRIES,
};
use crate::{now_millis, PersistenceError};

/// Bounded connection retry: attempts and initial backoff delay. The delay
/// doubles after every failed attempt.
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Holds a connection pool to the document database.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database at `url`, run schema migrations, and return a
    /// ready-to-use `Database`.
    pub async fn open(url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(sqlx::Error::from)?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open with bounded exponential backoff. Once database mode is
    /// configured there is no fallback to file mode — after the final
    /// attempt the error is fatal to startup.
    pub async fn open_with_retry(url: &str) -> Result<Self, PersistenceError> {
        let mut delay = CONNECT_BACKOFF;
        let mut last_err = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            match Self::open(url).await {
                Ok(db) => {
                    if attempt > 1 {
                        info!(attempt, "database connection established after retry");
                    }
                    return Ok(db);
                }
                Err(err) => {
                    last_err = err.to_string();
                    warn!(
                        attempt,
                        max_attempts = CONNECT_ATTEMPTS,
                        "database connection failed: {last_err}"
                    );
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(PersistenceError::Unavailable {
            attempts: CONNECT_ATTEMPTS,
            reason: last_err,
        })
    }

    /// Create an in-memory database for testing. Migrations are applied.
    #[cfg(test)]
    pub(crate) async fn new_in_memory() -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(sqlx::Error::from)?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// The database-backed persistence implementation.
pub struct DatabaseBackend {
    db: Database,
}

impl DatabaseBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }
}

#[async_trait]
impl PersistenceBackend for DatabaseBackend {
    async fn read_users(&self) -> Result<Vec<User>, PersistenceError> {
        docs::read_all(self.pool(), "users").await
    }

    async fn read_users_fresh(&self) -> Result<Vec<User>, PersistenceError> {
        // No in-process cache in database mode; every read is fresh.
        self.read_users().await
    }

    async fn write_users(&self, users: &[User]) -> Result<(), PersistenceError> {
        // Per-record upsert keyed by the stable id: deleting and reinserting
        // would mint new internal identities and break sessions issued
        // against the old ones.
        for user in users {
            docs::upsert_by_id(self.pool(), "users", &user.id, user).await?;
        }

        let existing: Vec<(String,)> = sqlx::query_as("SELECT id FROM users")
            .fetch_all(self.pool())
            .await?;
        for (id,) in existing {
            if !users.iter().any(|u| u.id == id) {
                sqlx::query("DELETE FROM users WHERE id = ?")
                    .bind(&id)
                    .execute(self.pool())
                    .await?;
            }
        }
        Ok(())
    }

    async fn read_posts(&self) -> Result<Vec<Post>, PersistenceError> {
        docs::read_all(self.pool(), "posts").await
    }

    async fn write_posts(&self, posts: &[Post]) -> Result<(), PersistenceError> {
        docs::replace_all(self.pool(), "posts", posts).await
    }

    async fn read_legacy_feed_posts(&self) -> Result<Vec<LegacyFeedPost>, PersistenceError> {
        docs::read_all_newest_first(self.pool(), "legacy_feed_posts").await
    }

    async fn write_legacy_feed_posts(
        &self,
        posts: &[LegacyFeedPost],
    ) -> Result<(), PersistenceError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM legacy_feed_posts")
            .execute(&mut *tx)
            .await?;
        for post in posts {
            sqlx::query("INSERT INTO legacy_feed_posts (doc, created_at) VALUES (?, ?)")
                .bind(serde_json::to_string(post)?)
                .bind(post.created_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_admin_pin_hash(&self) -> Result<String, PersistenceError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT pin_hash FROM admin_pin WHERE pk = 1")
                .fetch_optional(self.pool())
                .await?;
        if let Some((hash,)) = row {
            if !hash.is_empty() {
                return Ok(hash);
            }
        }
        let hash = bcrypt::hash(initial_admin_pin(), 10)
            .map_err(|e| PersistenceError::Hash(e.to_string()))?;
        self.write_admin_pin_hash(&hash).await?;
        Ok(hash)
    }

    async fn write_admin_pin_hash(&self, pin_hash: &str) -> Result<(), PersistenceError> {
        sqlx::query("INSERT OR REPLACE INTO admin_pin (pk, pin_hash) VALUES (1, ?)")
            .bind(pin_hash)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn read_force_withdrawals(&self) -> Result<Vec<ForceWithdrawal>, PersistenceError> {
        docs::read_all_newest_first(self.pool(), "force_withdrawals").await
    }

    async fn append_force_withdrawal(
        &self,
        entry: ForceWithdrawal,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT OR REPLACE INTO force_withdrawals (id, doc, created_at) VALUES (?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(serde_json::to_string(&entry)?)
        .bind(entry.created_at)
        .execute(self.pool())
        .await?;
        docs::trim_to_cap(self.pool(), "force_withdrawals", FORCE_WITHDRAW_MAX_ENTRIES).await
    }

    async fn clear_force_withdrawals(&self) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM force_withdrawals")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn delete_force_withdrawals_by_ids(
        &self,
        ids: &[String],
    ) -> Result<usize, PersistenceError> {
        let mut removed = 0usize;
        for id in ids {
            let result = sqlx::query("DELETE FROM force_withdrawals WHERE id = ?")
                .bind(id)
                .execute(self.pool())
                .await?;
            removed += result.rows_affected() as usize;
        }
        Ok(removed)
    }

    async fn read_chat_messages(&self) -> Result<Vec<ChatMessage>, PersistenceError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT doc FROM chat_messages ORDER BY created_at ASC, pk ASC",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter()
            .map(|(doc,)| serde_json::from_str(&doc).map_err(PersistenceError::from))
            .collect()
    }

    async fn append_chat_message(
        &self,
        msg: NewChatMessage,
    ) -> Result<ChatMessage, PersistenceError> {
        let stored = msg.into_message();
        sqlx::query(
            "INSERT INTO chat_messages (id, user_id, doc, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&stored.id)
        .bind(&stored.user_id)
        .bind(serde_json::to_string(&stored)?)
        .bind(stored.created_at)
        .execute(self.pool())
        .await?;
        docs::trim_to_cap(self.pool(), "chat_messages", CHAT_MAX_MESSAGES).await?;
        Ok(stored)
    }

    async fn update_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
        updates: ChatMessageUpdate,
    ) -> Result<Option<ChatMessage>, PersistenceError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT doc FROM chat_messages WHERE id = ? AND user_id = ?")
                .bind(message_id)
                .bind(user_id)
                .fetch_optional(self.pool())
                .await?;
        let Some((doc,)) = row else {
            return Ok(None);
        };
        let mut msg: ChatMessage = serde_json::from_str(&doc)?;
        updates.apply(&mut msg);
        sqlx::query("UPDATE chat_messages SET doc = ? WHERE id = ?")
            .bind(serde_json::to_string(&msg)?)
            .bind(message_id)
            .execute(self.pool())
            .await?;
        Ok(Some(msg))
    }

    async fn delete_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE id = ? AND user_id = ?")
            .bind(message_id)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_chat_messages(&self) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM chat_messages")
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn increment_message_hearts(&self, message_id: &str) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE chat_messages SET doc = json_set(doc, '$.heartsReceived', \
             COALESCE(json_extract(doc, '$.heartsReceived'), 0) + 1) WHERE id = ?",
        )
        .bind(message_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn read_pinned(&self) -> Result<Option<PinnedMessage>, PersistenceError> {
        let pinned: Option<PinnedMessage> =
            docs::read_singleton(self.pool(), "pinned_message").await?;
        match pinned {
            Some(p) if p.is_expired_at(now_millis()) => {
                docs::clear_singleton(self.pool(), "pinned_message").await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn write_pinned(&self, pinned: &PinnedMessage) -> Result<(), PersistenceError> {
        docs::write_singleton(self.pool(), "pinned_message", pinned).await
    }

    async fn clear_pinned(&self) -> Result<(), PersistenceError> {
        docs::clear_singleton(self.pool(), "pinned_message").await
    }

    async fn read_settings(&self) -> Result<Settings, PersistenceError> {
        Ok(docs::read_singleton(self.pool(), "settings")
            .await?
            .unwrap_or_default())
    }

    async fn write_settings(&self, settings: &Settings) -> Result<(), PersistenceError> {
        docs::write_singleton(self.pool(), "settings", settings).await
    }

    async fn get_session(&self, token: &str) -> Result<Option<SessionData>, PersistenceError> {
        sessions::get(self.pool(), token).await
    }

    async fn set_session(
        &self,
        token: &str,
        data: &SessionData,
    ) -> Result<(), PersistenceError> {
        sessions::set(self.pool(), token, data).await
    }

    async fn delete_session(&self, token: &str) -> Result<(), PersistenceError> {
        sessions::delete(self.pool(), token).await
    }

    async fn delete_sessions_by_user(&self, user_id: &str) -> Result<(), PersistenceError> {
        sessions::delete_by_user(self.pool(), user_id).await
    }

    async fn delete_expired_sessions(&self) -> Result<u64, PersistenceError> {
        sessions::delete_expired(self.pool()).await
    }

    async fn list_sessions(&self) -> Result<Vec<(String, SessionData)>, PersistenceError> {
        sessions::list(self.pool()).await
    }

    async fn create_feed_post(&self, post: NewFeedPost) -> Result<FeedPost, PersistenceError> {
        feed::create_post(self.pool(), post).await
    }

    async fn get_feed_posts(
        &self,
        limit: u32,
        offset: u32,
        query: Option<&str>,
    ) -> Result<FeedPage, PersistenceError> {
        feed::get_posts(self.pool(), limit, offset, query).await
    }

    async fn get_feed_post_by_id(&self, id: i64) -> Result<Option<FeedPost>, PersistenceError> {
        feed::get_post_by_id(self.pool(), id).await
    }

    async fn delete_feed_post(&self, id: i64) -> Result<bool, PersistenceError> {
        feed::delete_post(self.pool(), id).await
    }

    async fn create_feed_comment(
        &self,
        comment: NewFeedComment,
    ) -> Result<FeedComment, PersistenceError> {
        feed::create_comment(self.pool(), comment).await
    }

    async fn delete_feed_comment(&self, id: i64) -> Result<bool, PersistenceError> {
        feed::delete_comment(self.pool(), id).await
    }

    async fn increment_feed_post_hearts(&self, id: i64) -> Result<(), PersistenceError> {
        feed::increment_post_hearts(self.pool(), id).await
    }

    async fn increment_feed_comment_hearts(&self, id: i64) -> Result<(), PersistenceError> {
        feed::increment_comment_hearts(self.pool(), id).await
    }

    async fn append_deleted_feed_post(
        &self,
        entry: DeletedFeedPost,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO deleted_feed_posts (post_id, doc, created_at) VALUES (?, ?, ?)",
        )
        .bind(entry.post.id)
        .bind(serde_json::to_string(&entry)?)
        .bind(entry.deleted_at)
        .execute(self.pool())
        .await?;
        docs::trim_to_cap(self.pool(), "deleted_feed_posts", DELETED_AUDIT_MAX_ENTRIES).await
    }

    async fn read_deleted_feed_posts(&self) -> Result<Vec<DeletedFeedPost>, PersistenceError> {
        docs::read_all_newest_first(self.pool(), "deleted_feed_posts").await
    }

    async fn remove_deleted_feed_post(&self, post_id: i64) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM deleted_feed_posts WHERE post_id = ?")
            .bind(post_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_deleted_feed_comment(
        &self,
        entry: DeletedFeedComment,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO deleted_feed_comments (comment_id, doc, created_at) VALUES (?, ?, ?)",
        )
        .bind(entry.comment.id)
        .bind(serde_json::to_string(&entry)?)
        .bind(entry.deleted_at)
        .execute(self.pool())
        .await?;
        docs::trim_to_cap(
            self.pool(),
            "deleted_feed_comments",
            DELETED_AUDIT_MAX_ENTRIES,
        )
        .await
    }

    async fn read_deleted_feed_comments(
        &self,
    ) -> Result<Vec<DeletedFeedComment>, PersistenceError> {
        docs::read_all_newest_first(self.pool(), "deleted_feed_comments").await
    }

    async fn remove_deleted_feed_comment(
        &self,
        comment_id: i64,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM deleted_feed_comments WHERE comment_id = ?")
            .bind(comment_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> DatabaseBackend {
        let db = Database::new_in_memory().await.unwrap();
        DatabaseBackend::new(db)
    }

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

    fn sample_chat(user_id: &str, text: &str) -> NewChatMessage {
        NewChatMessage {
            user_id: user_id.to_string(),
            display_name: format!("user-{user_id}"),
            text: text.to_string(),
            ..Default::default()
        }
    }

    fn sample_session(user_id: &str, expires_at: i64) -> SessionData {
        SessionData {
            user_id: user_id.to_string(),
            display_name: format!("user-{user_id}"),
            wallet_address: format!("0x{user_id}"),
            is_admin: false,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_users_roundtrip() {
        let backend = backend().await;
        let users = vec![sample_user("u1", 5), sample_user("u2", 9)];
        backend.write_users(&users).await.unwrap();
        assert_eq!(backend.read_users().await.unwrap(), users);
    }

    #[tokio::test]
    async fn test_users_upsert_preserves_identity() {
        let backend = backend().await;
        backend.write_users(&[sample_user("u1", 5)]).await.unwrap();

        let pk_before: (i64,) = sqlx::query_as("SELECT pk FROM users WHERE id = 'u1'")
            .fetch_one(backend.pool())
            .await
            .unwrap();

        // Rewrite with changed fields: one record, same stable id.
        backend.write_users(&[sample_user("u1", 9)]).await.unwrap();

        let users = backend.read_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u1");
        assert_eq!(users[0].points, 9);

        let pk_after: (i64,) = sqlx::query_as("SELECT pk FROM users WHERE id = 'u1'")
            .fetch_one(backend.pool())
            .await
            .unwrap();
        assert_eq!(pk_before, pk_after);
    }

    #[tokio::test]
    async fn test_write_users_removes_absent_records() {
        let backend = backend().await;
        backend
            .write_users(&[sample_user("u1", 5), sample_user("u2", 9)])
            .await
            .unwrap();
        backend.write_users(&[sample_user("u1", 5)]).await.unwrap();

        let users = backend.read_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u1");
    }

    #[tokio::test]
    async fn test_chat_cap_evicts_oldest() {
        let backend = backend().await;
        for i in 0..CHAT_MAX_MESSAGES {
            backend
                .append_chat_message(sample_chat("u1", &format!("msg {i}")))
                .await
                .unwrap();
        }
        backend
            .append_chat_message(sample_chat("u1", "one past the cap"))
            .await
            .unwrap();

        let messages = backend.read_chat_messages().await.unwrap();
        assert_eq!(messages.len(), CHAT_MAX_MESSAGES);
        assert_eq!(messages.last().unwrap().text, "one past the cap");
        assert!(!messages.iter().any(|m| m.text == "msg 0"));
    }

    #[tokio::test]
    async fn test_chat_update_requires_ownership() {
        let backend = backend().await;
        let stored = backend
            .append_chat_message(sample_chat("u1", "hello"))
            .await
            .unwrap();

        let denied = backend
            .update_chat_message(
                &stored.id,
                "u2",
                ChatMessageUpdate {
                    text: Some("hijacked".into()),
                },
            )
            .await
            .unwrap();
        assert!(denied.is_none());

        let updated = backend
            .update_chat_message(
                &stored.id,
                "u1",
                ChatMessageUpdate {
                    text: Some("edited".into()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.text, "edited");
    }

    #[tokio::test]
    async fn test_message_hearts_increment() {
        let backend = backend().await;
        let stored = backend
            .append_chat_message(sample_chat("u1", "hello"))
            .await
            .unwrap();
        backend.increment_message_hearts(&stored.id).await.unwrap();
        backend.increment_message_hearts(&stored.id).await.unwrap();

        let messages = backend.read_chat_messages().await.unwrap();
        assert_eq!(messages[0].hearts_received, 2);
    }

    #[tokio::test]
    async fn test_pinned_lazy_expiry() {
        let backend = backend().await;
        backend
            .write_pinned(&PinnedMessage {
                text: "expired".into(),
                set_by: None,
                created_at: now_millis(),
                expires_at: Some(now_millis() - 1),
            })
            .await
            .unwrap();
        assert!(backend.read_pinned().await.unwrap().is_none());

        // The stale row was removed by the read.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pinned_message")
            .fetch_one(backend.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_sessions_lazy_expiry_and_sweep() {
        let backend = backend().await;
        backend
            .set_session("tok-live", &sample_session("u1", now_millis() + 60_000))
            .await
            .unwrap();
        backend
            .set_session("tok-dead", &sample_session("u2", now_millis() - 1))
            .await
            .unwrap();

        assert!(backend.get_session("tok-live").await.unwrap().is_some());
        assert!(backend.get_session("tok-dead").await.unwrap().is_none());
        assert_eq!(backend.list_sessions().await.unwrap().len(), 2);

        assert_eq!(backend.delete_expired_sessions().await.unwrap(), 1);
        assert_eq!(backend.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_upsert_by_token() {
        let backend = backend().await;
        backend
            .set_session("tok", &sample_session("u1", now_millis() + 60_000))
            .await
            .unwrap();
        backend
            .set_session("tok", &sample_session("u2", now_millis() + 60_000))
            .await
            .unwrap();

        let sessions = backend.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].1.user_id, "u2");
    }

    #[tokio::test]
    async fn test_feed_post_cascade_delete() {
        let backend = backend().await;
        let post = backend
            .create_feed_post(NewFeedPost {
                author_id: "u1".into(),
                author_name: "Mina".into(),
                body: "first".into(),
                image_url: None,
            })
            .await
            .unwrap();
        backend
            .create_feed_comment(NewFeedComment {
                post_id: post.id,
                author_id: "u2".into(),
                author_name: "Jae".into(),
                body: "welcome".into(),
            })
            .await
            .unwrap();

        let loaded = backend.get_feed_post_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(loaded.comments.len(), 1);

        assert!(backend.delete_feed_post(post.id).await.unwrap());
        let orphans: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feed_comments")
            .fetch_one(backend.pool())
            .await
            .unwrap();
        assert_eq!(orphans.0, 0);
    }

    #[tokio::test]
    async fn test_feed_query_and_pagination() {
        let backend = backend().await;
        for i in 0..5 {
            backend
                .create_feed_post(NewFeedPost {
                    author_id: "u1".into(),
                    author_name: "Mina".into(),
                    body: format!("post number {i}"),
                    image_url: None,
                })
                .await
                .unwrap();
        }

        let page = backend.get_feed_posts(2, 1, None).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.posts[0].body, "post number 3");

        let filtered = backend
            .get_feed_posts(10, 0, Some("number 2"))
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);
    }

    #[tokio::test]
    async fn test_feed_query_matches_wildcards_literally() {
        let backend = backend().await;
        for body in ["abcdef", "50% off", "under_score"] {
            backend
                .create_feed_post(NewFeedPost {
                    author_id: "u1".into(),
                    author_name: "Mina".into(),
                    body: body.into(),
                    image_url: None,
                })
                .await
                .unwrap();
        }

        // "%" and "_" in the query are literal characters, not wildcards.
        assert_eq!(backend.get_feed_posts(10, 0, Some("a%f")).await.unwrap().total, 0);

        let percent = backend.get_feed_posts(10, 0, Some("%")).await.unwrap();
        assert_eq!(percent.total, 1);
        assert_eq!(percent.posts[0].body, "50% off");

        let underscore = backend.get_feed_posts(10, 0, Some("_")).await.unwrap();
        assert_eq!(underscore.total, 1);
        assert_eq!(underscore.posts[0].body, "under_score");
    }

    #[tokio::test]
    async fn test_comment_on_missing_post_is_not_found() {
        let backend = backend().await;
        let err = backend
            .create_feed_comment(NewFeedComment {
                post_id: 42,
                author_id: "u1".into(),
                author_name: "Mina".into(),
                body: "void".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_force_withdrawals_append_and_delete() {
        let backend = backend().await;
        for i in 0..3 {
            backend
                .append_force_withdrawal(ForceWithdrawal {
                    id: format!("fw{i}"),
                    user_id: None,
                    display_name: "user".into(),
                    wallet_address: "0xabc".into(),
                    reason: None,
                    created_at: i,
                })
                .await
                .unwrap();
        }
        let entries = backend.read_force_withdrawals().await.unwrap();
        assert_eq!(entries[0].id, "fw2");

        let removed = backend
            .delete_force_withdrawals_by_ids(&["fw0".to_string(), "fw2".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.read_force_withdrawals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_posts_bulk_replace() {
        let backend = backend().await;
        let posts = vec![Post {
            id: "p1".into(),
            author_id: "u1".into(),
            author_name: "Mina".into(),
            title: "hello".into(),
            body: "world".into(),
            created_at: 1_000,
            updated_at: None,
        }];
        backend.write_posts(&posts).await.unwrap();
        assert_eq!(backend.read_posts().await.unwrap(), posts);

        backend.write_posts(&[]).await.unwrap();
        assert!(backend.read_posts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_pin_self_initializes() {
        let backend = backend().await;
        let hash = backend.read_admin_pin_hash().await.unwrap();
        assert!(hash.starts_with("$2"));
        assert_eq!(backend.read_admin_pin_hash().await.unwrap(), hash);
    }

    #[tokio::test]
    async fn test_settings_default_when_absent() {
        let backend = backend().await;
        assert_eq!(backend.read_settings().await.unwrap(), Settings::default());

        let settings = Settings {
            maintenance_mode: true,
            announcement: None,
            signups_enabled: false,
            chat_frozen: false,
        };
        backend.write_settings(&settings).await.unwrap();
        assert_eq!(backend.read_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_deleted_feed_comment_audit_roundtrip() {
        let backend = backend().await;
        let comment = FeedComment {
            id: 7,
            post_id: 3,
            author_id: "u1".into(),
            author_name: "Mina".into(),
            body: "gone".into(),
            hearts: 0,
            created_at: 1_000,
        };
        backend
            .append_deleted_feed_comment(DeletedFeedComment {
                comment: comment.clone(),
                post_body_preview: Some("parent post".into()),
                deleted_at: now_millis(),
                deleted_by: "admin".into(),
                deleted_by_name: "Admin".into(),
            })
            .await
            .unwrap();

        let audit = backend.read_deleted_feed_comments().await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].comment, comment);

        assert!(backend.remove_deleted_feed_comment(7).await.unwrap());
        assert!(backend
            .read_deleted_feed_comments()
            .await
            .unwrap()
            .is_empty());
    }
}
