//! The backend capability trait.
//!
//! [`PersistenceBackend`] is the single contract both storage implementations
//! fulfil. The facade holds one boxed instance selected at connect time, so
//! callers never branch on backend type and both backends stay signature-
//! compatible by construction.
//!
//! Contract notes shared by both implementations:
//! - every `read_*` returns the current materialized collection, or the
//!   collection's empty default if it was never created;
//! - every `write_*` fully replaces (or per-record upserts) the collection;
//! - capped collections trim their oldest entries on insert;
//! - sessions and the pinned message use lazy expiry: an expired record is
//!   absent to every caller even before physical deletion.

use async_trait::async_trait;

use crate::models::{
    ChatMessage, ChatMessageUpdate, DeletedFeedComment, DeletedFeedPost, FeedComment, FeedPage,
    FeedPost, ForceWithdrawal, LegacyFeedPost, NewChatMessage, NewFeedComment, NewFeedPost,
    PinnedMessage, Post, SessionData, Settings, User,
};
use crate::PersistenceError;

#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    // Users

    async fn read_users(&self) -> Result<Vec<User>, PersistenceError>;

    /// Read users bypassing any in-process cache. Identical to
    /// [`read_users`](Self::read_users) for backends without a cache.
    async fn read_users_fresh(&self) -> Result<Vec<User>, PersistenceError>;

    /// Full replace of the users collection. Implementations must preserve
    /// backend-internal identities for records whose stable `id` survives the
    /// write (per-record upsert, never delete-all/insert-all).
    async fn write_users(&self, users: &[User]) -> Result<(), PersistenceError>;

    // Legacy posts / legacy feed (bulk replace)

    async fn read_posts(&self) -> Result<Vec<Post>, PersistenceError>;
    async fn write_posts(&self, posts: &[Post]) -> Result<(), PersistenceError>;

    /// Legacy feed posts, newest first.
    async fn read_legacy_feed_posts(&self) -> Result<Vec<LegacyFeedPost>, PersistenceError>;
    async fn write_legacy_feed_posts(
        &self,
        posts: &[LegacyFeedPost],
    ) -> Result<(), PersistenceError>;

    // Admin PIN

    /// Read the admin PIN hash, initializing it from the configured initial
    /// PIN if the record is missing or malformed.
    async fn read_admin_pin_hash(&self) -> Result<String, PersistenceError>;
    async fn write_admin_pin_hash(&self, pin_hash: &str) -> Result<(), PersistenceError>;

    // Force withdrawals (capped audit log)

    /// Audit entries, newest first.
    async fn read_force_withdrawals(&self) -> Result<Vec<ForceWithdrawal>, PersistenceError>;
    async fn append_force_withdrawal(
        &self,
        entry: ForceWithdrawal,
    ) -> Result<(), PersistenceError>;
    async fn clear_force_withdrawals(&self) -> Result<(), PersistenceError>;
    /// Returns the number of entries removed.
    async fn delete_force_withdrawals_by_ids(
        &self,
        ids: &[String],
    ) -> Result<usize, PersistenceError>;

    // Chat (capped, append-only)

    /// Chat messages, oldest first.
    async fn read_chat_messages(&self) -> Result<Vec<ChatMessage>, PersistenceError>;
    /// Append one message, evicting the oldest past the cap. Returns the
    /// stored message including its generated id and timestamp.
    async fn append_chat_message(
        &self,
        msg: NewChatMessage,
    ) -> Result<ChatMessage, PersistenceError>;
    /// Update an owned message. `None` when the message does not exist or is
    /// not owned by `user_id`.
    async fn update_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
        updates: ChatMessageUpdate,
    ) -> Result<Option<ChatMessage>, PersistenceError>;
    /// Delete an owned message. `false` when absent or not owned.
    async fn delete_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<bool, PersistenceError>;
    async fn clear_chat_messages(&self) -> Result<(), PersistenceError>;
    async fn increment_message_hearts(&self, message_id: &str) -> Result<(), PersistenceError>;

    // Pinned message (single record, lazy expiry)

    async fn read_pinned(&self) -> Result<Option<PinnedMessage>, PersistenceError>;
    async fn write_pinned(&self, pinned: &PinnedMessage) -> Result<(), PersistenceError>;
    async fn clear_pinned(&self) -> Result<(), PersistenceError>;

    // Settings (single document)

    async fn read_settings(&self) -> Result<Settings, PersistenceError>;
    async fn write_settings(&self, settings: &Settings) -> Result<(), PersistenceError>;

    // Sessions (token-keyed, lazy expiry)

    async fn get_session(&self, token: &str) -> Result<Option<SessionData>, PersistenceError>;
    async fn set_session(&self, token: &str, data: &SessionData)
        -> Result<(), PersistenceError>;
    async fn delete_session(&self, token: &str) -> Result<(), PersistenceError>;
    async fn delete_sessions_by_user(&self, user_id: &str) -> Result<(), PersistenceError>;
    /// Physically remove expired sessions. Returns the number removed.
    async fn delete_expired_sessions(&self) -> Result<u64, PersistenceError>;
    /// All persisted sessions (expired included) as `(token, data)` pairs.
    /// Used by migration and orphan-session repair.
    async fn list_sessions(&self) -> Result<Vec<(String, SessionData)>, PersistenceError>;

    // Feed posts / comments (new style)

    async fn create_feed_post(&self, post: NewFeedPost) -> Result<FeedPost, PersistenceError>;
    /// Posts newest first, with comments attached; `query` filters on body and
    /// author name.
    async fn get_feed_posts(
        &self,
        limit: u32,
        offset: u32,
        query: Option<&str>,
    ) -> Result<FeedPage, PersistenceError>;
    async fn get_feed_post_by_id(&self, id: i64) -> Result<Option<FeedPost>, PersistenceError>;
    /// Deleting a post cascades to its comments.
    async fn delete_feed_post(&self, id: i64) -> Result<bool, PersistenceError>;
    async fn create_feed_comment(
        &self,
        comment: NewFeedComment,
    ) -> Result<FeedComment, PersistenceError>;
    async fn delete_feed_comment(&self, id: i64) -> Result<bool, PersistenceError>;
    async fn increment_feed_post_hearts(&self, id: i64) -> Result<(), PersistenceError>;
    async fn increment_feed_comment_hearts(&self, id: i64) -> Result<(), PersistenceError>;

    // Deleted-item audits (capped, restoration support)

    async fn append_deleted_feed_post(
        &self,
        entry: DeletedFeedPost,
    ) -> Result<(), PersistenceError>;
    async fn read_deleted_feed_posts(&self) -> Result<Vec<DeletedFeedPost>, PersistenceError>;
    async fn remove_deleted_feed_post(&self, post_id: i64) -> Result<bool, PersistenceError>;

    async fn append_deleted_feed_comment(
        &self,
        entry: DeletedFeedComment,
    ) -> Result<(), PersistenceError>;
    async fn read_deleted_feed_comments(
        &self,
    ) -> Result<Vec<DeletedFeedComment>, PersistenceError>;
    async fn remove_deleted_feed_comment(&self, comment_id: i64)
        -> Result<bool, PersistenceError>;
}

/// Resolve the initial admin PIN from `AGORA_INITIAL_ADMIN_PIN`, falling back
/// to `000000` when unset or not a 6-digit value.
pub(crate) fn initial_admin_pin() -> String {
    let pin = std::env::var("AGORA_INITIAL_ADMIN_PIN").unwrap_or_default();
    let pin = pin.trim();
    if pin.len() == 6 && pin.bytes().all(|b| b.is_ascii_digit()) {
        pin.to_string()
    } else {
        "000000".to_string()
    }
}
