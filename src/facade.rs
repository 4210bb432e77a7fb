//! The `Store` facade: one handle for all persistence operations.
//!
//! The backend is chosen once, at [`Store::connect`] time, from the resolved
//! configuration: a database URL selects the database backend (running the
//! one-shot file migration and orphan-session repair first), otherwise the
//! file backend is used. After connect there is no per-call branching and no
//! fallback between backends.

use tracing::info;

use crate::backend::PersistenceBackend;
use crate::config::StoreConfig;
use crate::db::{Database, DatabaseBackend};
use crate::file::FileBackend;
use crate::migrate;
use crate::models::{
    ChatMessage, ChatMessageUpdate, DeletedFeedComment, DeletedFeedPost, FeedComment, FeedPage,
    FeedPost, ForceWithdrawal, LegacyFeedPost, NewChatMessage, NewFeedComment, NewFeedPost,
    PinnedMessage, Post, SessionData, Settings, User,
};
use crate::PersistenceError;

/// The persistence facade handed to the rest of the application.
pub struct Store {
    backend: Box<dyn PersistenceBackend>,
}

impl Store {
    /// Connect to the configured backend.
    ///
    /// With a database URL: open the pool (bounded retry), migrate any
    /// unmigrated file data, repair orphaned sessions, and serve from the
    /// database. Without one: initialize the data directory, start the
    /// change watcher, and serve from collection files.
    pub async fn connect(config: StoreConfig) -> Result<Self, PersistenceError> {
        match &config.database_url {
            Some(url) => {
                let db = Database::open_with_retry(url).await?;

                let file = FileBackend::new_unwatched(&config.data_dir)?;
                if migrate::is_migration_needed(&file).await? {
                    migrate::migrate_file_data(&file, db.pool()).await?;
                }
                migrate::repair_orphan_sessions(db.pool()).await?;

                info!("persistence connected in database mode");
                Ok(Self {
                    backend: Box::new(DatabaseBackend::new(db)),
                })
            }
            None => {
                let file = FileBackend::connect(&config.data_dir)?;
                info!(data_dir = %config.data_dir.display(), "persistence connected in file mode");
                Ok(Self {
                    backend: Box::new(file),
                })
            }
        }
    }

    /// Wrap an already-constructed backend. Used by tests and by callers
    /// embedding a custom backend.
    pub fn with_backend(backend: Box<dyn PersistenceBackend>) -> Self {
        Self { backend }
    }

    // Users

    pub async fn read_users(&self) -> Result<Vec<User>, PersistenceError> {
        self.backend.read_users().await
    }

    pub async fn read_users_fresh(&self) -> Result<Vec<User>, PersistenceError> {
        self.backend.read_users_fresh().await
    }

    pub async fn write_users(&self, users: &[User]) -> Result<(), PersistenceError> {
        self.backend.write_users(users).await
    }

    /// Remove duplicate user records: no two users may share a
    /// case-insensitive display name or a non-placeholder wallet address.
    /// Among duplicates the record with the most points survives (ties go to
    /// the oldest). Sessions of removed users are deleted. Returns the number
    /// of records removed.
    pub async fn deduplicate_users(&self) -> Result<usize, PersistenceError> {
        let mut users = self.backend.read_users_fresh().await?;
        if users.is_empty() {
            return Ok(0);
        }

        // Highest points first, oldest first on ties; the first record seen
        // for a key is the survivor.
        let mut ranked: Vec<usize> = (0..users.len()).collect();
        ranked.sort_by(|&a, &b| {
            users[b]
                .points
                .cmp(&users[a].points)
                .then(users[a].created_at.cmp(&users[b].created_at))
        });

        let mut seen_names: Vec<String> = Vec::new();
        let mut seen_wallets: Vec<String> = Vec::new();
        let mut removed_ids: Vec<String> = Vec::new();

        for idx in ranked {
            let user = &users[idx];
            let name = user.display_name.to_lowercase();
            let wallet = user.wallet_address.to_lowercase();
            let wallet_taken = !wallet.is_empty() && seen_wallets.contains(&wallet);
            if seen_names.contains(&name) || wallet_taken {
                removed_ids.push(user.id.clone());
                continue;
            }
            seen_names.push(name);
            if !wallet.is_empty() {
                seen_wallets.push(wallet);
            }
        }

        if removed_ids.is_empty() {
            return Ok(0);
        }

        users.retain(|u| !removed_ids.contains(&u.id));
        self.backend.write_users(&users).await?;
        for id in &removed_ids {
            self.backend.delete_sessions_by_user(id).await?;
        }
        info!(removed = removed_ids.len(), "deduplicated user records");
        Ok(removed_ids.len())
    }

    // Posts

    pub async fn read_posts(&self) -> Result<Vec<Post>, PersistenceError> {
        self.backend.read_posts().await
    }

    pub async fn write_posts(&self, posts: &[Post]) -> Result<(), PersistenceError> {
        self.backend.write_posts(posts).await
    }

    pub async fn read_legacy_feed_posts(&self) -> Result<Vec<LegacyFeedPost>, PersistenceError> {
        self.backend.read_legacy_feed_posts().await
    }

    pub async fn write_legacy_feed_posts(
        &self,
        posts: &[LegacyFeedPost],
    ) -> Result<(), PersistenceError> {
        self.backend.write_legacy_feed_posts(posts).await
    }

    // Admin PIN

    pub async fn read_admin_pin_hash(&self) -> Result<String, PersistenceError> {
        self.backend.read_admin_pin_hash().await
    }

    pub async fn write_admin_pin_hash(&self, pin_hash: &str) -> Result<(), PersistenceError> {
        self.backend.write_admin_pin_hash(pin_hash).await
    }

    // Force withdrawals

    pub async fn read_force_withdrawals(&self) -> Result<Vec<ForceWithdrawal>, PersistenceError> {
        self.backend.read_force_withdrawals().await
    }

    pub async fn append_force_withdrawal(
        &self,
        entry: ForceWithdrawal,
    ) -> Result<(), PersistenceError> {
        self.backend.append_force_withdrawal(entry).await
    }

    pub async fn clear_force_withdrawals(&self) -> Result<(), PersistenceError> {
        self.backend.clear_force_withdrawals().await
    }

    pub async fn delete_force_withdrawals_by_ids(
        &self,
        ids: &[String],
    ) -> Result<usize, PersistenceError> {
        self.backend.delete_force_withdrawals_by_ids(ids).await
    }

    // Chat

    pub async fn read_chat_messages(&self) -> Result<Vec<ChatMessage>, PersistenceError> {
        self.backend.read_chat_messages().await
    }

    pub async fn append_chat_message(
        &self,
        msg: NewChatMessage,
    ) -> Result<ChatMessage, PersistenceError> {
        self.backend.append_chat_message(msg).await
    }

    pub async fn update_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
        updates: ChatMessageUpdate,
    ) -> Result<Option<ChatMessage>, PersistenceError> {
        self.backend
            .update_chat_message(message_id, user_id, updates)
            .await
    }

    pub async fn delete_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<bool, PersistenceError> {
        self.backend.delete_chat_message(message_id, user_id).await
    }

    pub async fn clear_chat_messages(&self) -> Result<(), PersistenceError> {
        self.backend.clear_chat_messages().await
    }

    pub async fn increment_message_hearts(&self, message_id: &str) -> Result<(), PersistenceError> {
        self.backend.increment_message_hearts(message_id).await
    }

    // Pinned message

    pub async fn read_pinned(&self) -> Result<Option<PinnedMessage>, PersistenceError> {
        self.backend.read_pinned().await
    }

    pub async fn write_pinned(&self, pinned: &PinnedMessage) -> Result<(), PersistenceError> {
        self.backend.write_pinned(pinned).await
    }

    pub async fn clear_pinned(&self) -> Result<(), PersistenceError> {
        self.backend.clear_pinned().await
    }

    // Settings

    pub async fn read_settings(&self) -> Result<Settings, PersistenceError> {
        self.backend.read_settings().await
    }

    pub async fn write_settings(&self, settings: &Settings) -> Result<(), PersistenceError> {
        self.backend.write_settings(settings).await
    }

    // Sessions

    pub async fn get_session(&self, token: &str) -> Result<Option<SessionData>, PersistenceError> {
        self.backend.get_session(token).await
    }

    pub async fn set_session(
        &self,
        token: &str,
        data: &SessionData,
    ) -> Result<(), PersistenceError> {
        self.backend.set_session(token, data).await
    }

    pub async fn delete_session(&self, token: &str) -> Result<(), PersistenceError> {
        self.backend.delete_session(token).await
    }

    pub async fn delete_sessions_by_user(&self, user_id: &str) -> Result<(), PersistenceError> {
        self.backend.delete_sessions_by_user(user_id).await
    }

    /// Physically remove expired sessions. Callers schedule this on their own
    /// cadence; the store only provides the sweep.
    pub async fn delete_expired_sessions(&self) -> Result<u64, PersistenceError> {
        self.backend.delete_expired_sessions().await
    }

    pub async fn list_sessions(&self) -> Result<Vec<(String, SessionData)>, PersistenceError> {
        self.backend.list_sessions().await
    }

    // Feed

    pub async fn create_feed_post(&self, post: NewFeedPost) -> Result<FeedPost, PersistenceError> {
        self.backend.create_feed_post(post).await
    }

    pub async fn get_feed_posts(
        &self,
        limit: u32,
        offset: u32,
        query: Option<&str>,
    ) -> Result<FeedPage, PersistenceError> {
        self.backend.get_feed_posts(limit, offset, query).await
    }

    pub async fn get_feed_post_by_id(&self, id: i64) -> Result<Option<FeedPost>, PersistenceError> {
        self.backend.get_feed_post_by_id(id).await
    }

    pub async fn delete_feed_post(&self, id: i64) -> Result<bool, PersistenceError> {
        self.backend.delete_feed_post(id).await
    }

    pub async fn create_feed_comment(
        &self,
        comment: NewFeedComment,
    ) -> Result<FeedComment, PersistenceError> {
        self.backend.create_feed_comment(comment).await
    }

    pub async fn delete_feed_comment(&self, id: i64) -> Result<bool, PersistenceError> {
        self.backend.delete_feed_comment(id).await
    }

    pub async fn increment_feed_post_hearts(&self, id: i64) -> Result<(), PersistenceError> {
        self.backend.increment_feed_post_hearts(id).await
    }

    pub async fn increment_feed_comment_hearts(&self, id: i64) -> Result<(), PersistenceError> {
        self.backend.increment_feed_comment_hearts(id).await
    }

    // Deleted-item audits

    pub async fn append_deleted_feed_post(
        &self,
        entry: DeletedFeedPost,
    ) -> Result<(), PersistenceError> {
        self.backend.append_deleted_feed_post(entry).await
    }

    pub async fn read_deleted_feed_posts(&self) -> Result<Vec<DeletedFeedPost>, PersistenceError> {
        self.backend.read_deleted_feed_posts().await
    }

    pub async fn remove_deleted_feed_post(&self, post_id: i64) -> Result<bool, PersistenceError> {
        self.backend.remove_deleted_feed_post(post_id).await
    }

    pub async fn append_deleted_feed_comment(
        &self,
        entry: DeletedFeedComment,
    ) -> Result<(), PersistenceError> {
        self.backend.append_deleted_feed_comment(entry).await
    }

    pub async fn read_deleted_feed_comments(
        &self,
    ) -> Result<Vec<DeletedFeedComment>, PersistenceError> {
        self.backend.read_deleted_feed_comments().await
    }

    pub async fn remove_deleted_feed_comment(
        &self,
        comment_id: i64,
    ) -> Result<bool, PersistenceError> {
        self.backend.remove_deleted_feed_comment(comment_id).await
    }
}
