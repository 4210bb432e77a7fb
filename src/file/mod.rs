//! Local JSON-document backend.
//!
//! One JSON document per collection in a single data directory. Reads go
//! through a per-collection cache; writes serialize the full new value and
//! atomically replace the on-disk document, then invalidate the cache entry
//! so the next read re-loads from disk. A best-effort directory watcher
//! invalidates entries when files change from outside the write path.
//!
//! Single-writer-process assumption: no file locking or cross-process write
//! coordination is provided, and two concurrent read-mutate-write appends
//! from different tasks may race (the second full-collection write wins).
//! Collections with real write concurrency belong on the database backend.

mod atomic;
mod cache;
mod watch;

pub(crate) use atomic::write_atomic;
pub use cache::CollectionCache;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::{initial_admin_pin, PersistenceBackend};
use crate::models::{
    ChatMessage, ChatMessageUpdate, DeletedFeedComment, DeletedFeedPost, FeedComment, FeedPage,
    FeedPost, ForceWithdrawal, LegacyFeedPost, NewChatMessage, NewFeedComment, NewFeedPost,
    PinnedMessage, Post, SessionData, Settings, User, CHAT_MAX_MESSAGES,
    DELETED_AUDIT_MAX_ENTRIES, FORCE_WITHDRAW_MAX_ENTRIES,
};
use crate::{now_millis, PersistenceError};

/// The named on-disk collections of the file backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Posts,
    LegacyFeed,
    AdminPin,
    ForceWithdrawals,
    Chat,
    Pinned,
    Settings,
    Sessions,
    FeedPosts,
    DeletedFeedPosts,
    DeletedFeedComments,
}

impl Collection {
    pub const ALL: [Collection; 12] = [
        Collection::Users,
        Collection::Posts,
        Collection::LegacyFeed,
        Collection::AdminPin,
        Collection::ForceWithdrawals,
        Collection::Chat,
        Collection::Pinned,
        Collection::Settings,
        Collection::Sessions,
        Collection::FeedPosts,
        Collection::DeletedFeedPosts,
        Collection::DeletedFeedComments,
    ];

    /// File name of the collection document inside the data directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Collection::Users => "users.json",
            Collection::Posts => "posts.json",
            Collection::LegacyFeed => "feed.json",
            Collection::AdminPin => "admin-pin.json",
            Collection::ForceWithdrawals => "force-withdraws.json",
            Collection::Chat => "chat.json",
            Collection::Pinned => "pinned.json",
            Collection::Settings => "settings.json",
            Collection::Sessions => "sessions.json",
            Collection::FeedPosts => "feed-posts.json",
            Collection::DeletedFeedPosts => "deleted-feed-posts.json",
            Collection::DeletedFeedComments => "deleted-feed-comments.json",
        }
    }
}

/// Admin PIN document shape (`{"pinHash": "..."}`).
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminPinDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pin_hash: Option<String>,
}

/// New-style feed document: posts with embedded comments plus id counters,
/// so ids are never reused after deletions.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedDoc {
    next_post_id: i64,
    next_comment_id: i64,
    posts: Vec<FeedPost>,
}

impl Default for FeedDoc {
    fn default() -> Self {
        Self {
            next_post_id: 1,
            next_comment_id: 1,
            posts: Vec::new(),
        }
    }
}

/// The file-backed persistence implementation.
pub struct FileBackend {
    data_dir: PathBuf,
    cache: CollectionCache,
    _watcher: Option<watch::DirWatcher>,
}

impl FileBackend {
    /// Initialize the backend: create the data directory, persist an empty
    /// users document if none exists, and start the directory watcher.
    ///
    /// Must be called from within a tokio runtime (the watcher consumer is a
    /// spawned task). Watch setup failure is logged and the backend proceeds
    /// unwatched.
    pub fn connect(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let mut backend = Self::new_unwatched(data_dir)?;
        backend._watcher = watch::DirWatcher::spawn(&backend.data_dir, backend.cache.clone());
        Ok(backend)
    }

    /// Initialize without a directory watcher. Reads stay correct; staleness
    /// after external edits lasts until the next write-triggered
    /// invalidation.
    pub fn new_unwatched(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let backend = Self {
            data_dir,
            cache: CollectionCache::new(),
            _watcher: None,
        };
        // Make the users document visible for external inspection even before
        // the first write.
        if !backend.path(Collection::Users).exists() {
            backend.write_collection(Collection::Users, &Vec::<User>::new())?;
        }
        Ok(backend)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.data_dir.join(collection.file_name())
    }

    /// Cache-first read. A missing document is initialized to the
    /// collection's empty default and persisted; malformed content is logged
    /// and treated as the default rather than failing the caller.
    fn read_collection<T>(&self, collection: Collection) -> Result<T, PersistenceError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        if let Some(cached) = self.cache.get(collection) {
            return Ok(serde_json::from_value(cached)?);
        }

        let path = self.path(collection);
        let value: T = if path.exists() {
            match fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(
                            file = %path.display(),
                            "malformed collection document, treating as empty: {err}"
                        );
                        T::default()
                    }
                },
                Err(err) => {
                    warn!(file = %path.display(), "failed to read collection document: {err}");
                    T::default()
                }
            }
        } else {
            let default = T::default();
            write_atomic(&path, &serde_json::to_string_pretty(&default)?)?;
            default
        };

        self.cache.insert(collection, serde_json::to_value(&value)?);
        Ok(value)
    }

    /// Atomic full-document replace, then cache invalidation. Invalidating
    /// (rather than updating in place) keeps the read path the single
    /// authority on defaulting logic.
    fn write_collection<T: Serialize>(
        &self,
        collection: Collection,
        value: &T,
    ) -> Result<(), PersistenceError> {
        write_atomic(&self.path(collection), &serde_json::to_string_pretty(value)?)?;
        self.cache.invalidate(collection);
        Ok(())
    }

    fn read_feed_doc(&self) -> Result<FeedDoc, PersistenceError> {
        self.read_collection(Collection::FeedPosts)
    }

    fn write_feed_doc(&self, doc: &FeedDoc) -> Result<(), PersistenceError> {
        self.write_collection(Collection::FeedPosts, doc)
    }

    /// The stored admin PIN hash, if one was ever written. Unlike
    /// [`PersistenceBackend::read_admin_pin_hash`] this never
    /// self-initializes a missing record.
    pub(crate) fn stored_admin_pin_hash(&self) -> Result<Option<String>, PersistenceError> {
        let doc: AdminPinDoc = self.read_collection(Collection::AdminPin)?;
        Ok(doc.pin_hash.filter(|h| !h.is_empty()))
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn read_users(&self) -> Result<Vec<User>, PersistenceError> {
        self.read_collection(Collection::Users)
    }

    async fn read_users_fresh(&self) -> Result<Vec<User>, PersistenceError> {
        self.cache.invalidate(Collection::Users);
        self.read_collection(Collection::Users)
    }

    async fn write_users(&self, users: &[User]) -> Result<(), PersistenceError> {
        self.write_collection(Collection::Users, &users)
    }

    async fn read_posts(&self) -> Result<Vec<Post>, PersistenceError> {
        self.read_collection(Collection::Posts)
    }

    async fn write_posts(&self, posts: &[Post]) -> Result<(), PersistenceError> {
        self.write_collection(Collection::Posts, &posts)
    }

    async fn read_legacy_feed_posts(&self) -> Result<Vec<LegacyFeedPost>, PersistenceError> {
        let mut posts: Vec<LegacyFeedPost> = self.read_collection(Collection::LegacyFeed)?;
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn write_legacy_feed_posts(
        &self,
        posts: &[LegacyFeedPost],
    ) -> Result<(), PersistenceError> {
        self.write_collection(Collection::LegacyFeed, &posts)
    }

    async fn read_admin_pin_hash(&self) -> Result<String, PersistenceError> {
        let doc: AdminPinDoc = self.read_collection(Collection::AdminPin)?;
        if let Some(hash) = doc.pin_hash.filter(|h| !h.is_empty()) {
            return Ok(hash);
        }
        let hash = bcrypt::hash(initial_admin_pin(), 10)
            .map_err(|e| PersistenceError::Hash(e.to_string()))?;
        self.write_collection(
            Collection::AdminPin,
            &AdminPinDoc {
                pin_hash: Some(hash.clone()),
            },
        )?;
        Ok(hash)
    }

    async fn write_admin_pin_hash(&self, pin_hash: &str) -> Result<(), PersistenceError> {
        self.write_collection(
            Collection::AdminPin,
            &AdminPinDoc {
                pin_hash: Some(pin_hash.to_string()),
            },
        )
    }

    async fn read_force_withdrawals(&self) -> Result<Vec<ForceWithdrawal>, PersistenceError> {
        // Stored newest-first.
        self.read_collection(Collection::ForceWithdrawals)
    }

    async fn append_force_withdrawal(
        &self,
        entry: ForceWithdrawal,
    ) -> Result<(), PersistenceError> {
        let mut entries: Vec<ForceWithdrawal> =
            self.read_collection(Collection::ForceWithdrawals)?;
        entries.insert(0, entry);
        entries.truncate(FORCE_WITHDRAW_MAX_ENTRIES);
        self.write_collection(Collection::ForceWithdrawals, &entries)
    }

    async fn clear_force_withdrawals(&self) -> Result<(), PersistenceError> {
        self.write_collection(Collection::ForceWithdrawals, &Vec::<ForceWithdrawal>::new())
    }

    async fn delete_force_withdrawals_by_ids(
        &self,
        ids: &[String],
    ) -> Result<usize, PersistenceError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let entries: Vec<ForceWithdrawal> = self.read_collection(Collection::ForceWithdrawals)?;
        let before = entries.len();
        let kept: Vec<ForceWithdrawal> = entries
            .into_iter()
            .filter(|e| !ids.contains(&e.id))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.write_collection(Collection::ForceWithdrawals, &kept)?;
        }
        Ok(removed)
    }

    async fn read_chat_messages(&self) -> Result<Vec<ChatMessage>, PersistenceError> {
        // Stored oldest-first.
        self.read_collection(Collection::Chat)
    }

    async fn append_chat_message(
        &self,
        msg: NewChatMessage,
    ) -> Result<ChatMessage, PersistenceError> {
        let stored = msg.into_message();
        let mut messages: Vec<ChatMessage> = self.read_collection(Collection::Chat)?;
        messages.push(stored.clone());
        if messages.len() > CHAT_MAX_MESSAGES {
            let excess = messages.len() - CHAT_MAX_MESSAGES;
            messages.drain(..excess);
        }
        self.write_collection(Collection::Chat, &messages)?;
        Ok(stored)
    }

    async fn update_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
        updates: ChatMessageUpdate,
    ) -> Result<Option<ChatMessage>, PersistenceError> {
        let mut messages: Vec<ChatMessage> = self.read_collection(Collection::Chat)?;
        let Some(msg) = messages
            .iter_mut()
            .find(|m| m.id == message_id && m.user_id == user_id)
        else {
            return Ok(None);
        };
        updates.apply(msg);
        let updated = msg.clone();
        self.write_collection(Collection::Chat, &messages)?;
        Ok(Some(updated))
    }

    async fn delete_chat_message(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<bool, PersistenceError> {
        let mut messages: Vec<ChatMessage> = self.read_collection(Collection::Chat)?;
        let before = messages.len();
        messages.retain(|m| !(m.id == message_id && m.user_id == user_id));
        if messages.len() == before {
            return Ok(false);
        }
        self.write_collection(Collection::Chat, &messages)?;
        Ok(true)
    }

    async fn clear_chat_messages(&self) -> Result<(), PersistenceError> {
        self.write_collection(Collection::Chat, &Vec::<ChatMessage>::new())
    }

    async fn increment_message_hearts(&self, message_id: &str) -> Result<(), PersistenceError> {
        let mut messages: Vec<ChatMessage> = self.read_collection(Collection::Chat)?;
        let Some(msg) = messages.iter_mut().find(|m| m.id == message_id) else {
            return Ok(());
        };
        msg.hearts_received += 1;
        self.write_collection(Collection::Chat, &messages)
    }

    async fn read_pinned(&self) -> Result<Option<PinnedMessage>, PersistenceError> {
        let pinned: Option<PinnedMessage> = self.read_collection(Collection::Pinned)?;
        match pinned {
            Some(p) if p.is_expired_at(now_millis()) => {
                // Lazy expiry: the read that observes expiry removes the
                // stale record.
                self.write_collection(Collection::Pinned, &Option::<PinnedMessage>::None)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn write_pinned(&self, pinned: &PinnedMessage) -> Result<(), PersistenceError> {
        self.write_collection(Collection::Pinned, &Some(pinned))
    }

    async fn clear_pinned(&self) -> Result<(), PersistenceError> {
        self.write_collection(Collection::Pinned, &Option::<PinnedMessage>::None)
    }

    async fn read_settings(&self) -> Result<Settings, PersistenceError> {
        self.read_collection(Collection::Settings)
    }

    async fn write_settings(&self, settings: &Settings) -> Result<(), PersistenceError> {
        self.write_collection(Collection::Settings, settings)
    }

    async fn get_session(&self, token: &str) -> Result<Option<SessionData>, PersistenceError> {
        let sessions: HashMap<String, SessionData> =
            self.read_collection(Collection::Sessions)?;
        Ok(sessions
            .get(token)
            .filter(|s| !s.is_expired_at(now_millis()))
            .cloned())
    }

    async fn set_session(
        &self,
        token: &str,
        data: &SessionData,
    ) -> Result<(), PersistenceError> {
        let mut sessions: HashMap<String, SessionData> =
            self.read_collection(Collection::Sessions)?;
        sessions.insert(token.to_string(), data.clone());
        self.write_collection(Collection::Sessions, &sessions)
    }

    async fn delete_session(&self, token: &str) -> Result<(), PersistenceError> {
        let mut sessions: HashMap<String, SessionData> =
            self.read_collection(Collection::Sessions)?;
        if sessions.remove(token).is_some() {
            self.write_collection(Collection::Sessions, &sessions)?;
        }
        Ok(())
    }

    async fn delete_sessions_by_user(&self, user_id: &str) -> Result<(), PersistenceError> {
        let mut sessions: HashMap<String, SessionData> =
            self.read_collection(Collection::Sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        if sessions.len() != before {
            self.write_collection(Collection::Sessions, &sessions)?;
        }
        Ok(())
    }

    async fn delete_expired_sessions(&self) -> Result<u64, PersistenceError> {
        let mut sessions: HashMap<String, SessionData> =
            self.read_collection(Collection::Sessions)?;
        let now = now_millis();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        let removed = (before - sessions.len()) as u64;
        if removed > 0 {
            self.write_collection(Collection::Sessions, &sessions)?;
        }
        Ok(removed)
    }

    async fn list_sessions(&self) -> Result<Vec<(String, SessionData)>, PersistenceError> {
        let sessions: HashMap<String, SessionData> =
            self.read_collection(Collection::Sessions)?;
        Ok(sessions.into_iter().collect())
    }

    async fn create_feed_post(&self, post: NewFeedPost) -> Result<FeedPost, PersistenceError> {
        let mut doc = self.read_feed_doc()?;
        let created = FeedPost {
            id: doc.next_post_id,
            author_id: post.author_id,
            author_name: post.author_name,
            body: post.body,
            image_url: post.image_url,
            hearts: 0,
            created_at: now_millis(),
            comments: Vec::new(),
        };
        doc.next_post_id += 1;
        doc.posts.push(created.clone());
        self.write_feed_doc(&doc)?;
        Ok(created)
    }

    async fn get_feed_posts(
        &self,
        limit: u32,
        offset: u32,
        query: Option<&str>,
    ) -> Result<FeedPage, PersistenceError> {
        let doc = self.read_feed_doc()?;
        let needle = query.map(str::to_lowercase);
        let mut matched: Vec<FeedPost> = doc
            .posts
            .into_iter()
            .filter(|p| match &needle {
                Some(q) => {
                    p.body.to_lowercase().contains(q)
                        || p.author_name.to_lowercase().contains(q)
                }
                None => true,
            })
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matched.len() as u64;
        let posts: Vec<FeedPost> = matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(FeedPage { posts, total })
    }

    async fn get_feed_post_by_id(&self, id: i64) -> Result<Option<FeedPost>, PersistenceError> {
        let doc = self.read_feed_doc()?;
        Ok(doc.posts.into_iter().find(|p| p.id == id))
    }

    async fn delete_feed_post(&self, id: i64) -> Result<bool, PersistenceError> {
        let mut doc = self.read_feed_doc()?;
        let before = doc.posts.len();
        // Comments are embedded, so removing the post removes them with it.
        doc.posts.retain(|p| p.id != id);
        if doc.posts.len() == before {
            return Ok(false);
        }
        self.write_feed_doc(&doc)?;
        Ok(true)
    }

    async fn create_feed_comment(
        &self,
        comment: NewFeedComment,
    ) -> Result<FeedComment, PersistenceError> {
        let mut doc = self.read_feed_doc()?;
        let next_id = doc.next_comment_id;
        let Some(post) = doc.posts.iter_mut().find(|p| p.id == comment.post_id) else {
            return Err(PersistenceError::NotFound(format!(
                "feed post {}",
                comment.post_id
            )));
        };
        let created = FeedComment {
            id: next_id,
            post_id: comment.post_id,
            author_id: comment.author_id,
            author_name: comment.author_name,
            body: comment.body,
            hearts: 0,
            created_at: now_millis(),
        };
        post.comments.push(created.clone());
        doc.next_comment_id += 1;
        self.write_feed_doc(&doc)?;
        Ok(created)
    }

    async fn delete_feed_comment(&self, id: i64) -> Result<bool, PersistenceError> {
        let mut doc = self.read_feed_doc()?;
        let mut removed = false;
        for post in &mut doc.posts {
            let before = post.comments.len();
            post.comments.retain(|c| c.id != id);
            removed |= post.comments.len() != before;
        }
        if removed {
            self.write_feed_doc(&doc)?;
        }
        Ok(removed)
    }

    async fn increment_feed_post_hearts(&self, id: i64) -> Result<(), PersistenceError> {
        let mut doc = self.read_feed_doc()?;
        let Some(post) = doc.posts.iter_mut().find(|p| p.id == id) else {
            return Ok(());
        };
        post.hearts += 1;
        self.write_feed_doc(&doc)
    }

    async fn increment_feed_comment_hearts(&self, id: i64) -> Result<(), PersistenceError> {
        let mut doc = self.read_feed_doc()?;
        let mut bumped = false;
        for post in &mut doc.posts {
            if let Some(comment) = post.comments.iter_mut().find(|c| c.id == id) {
                comment.hearts += 1;
                bumped = true;
                break;
            }
        }
        if bumped {
            self.write_feed_doc(&doc)?;
        }
        Ok(())
    }

    async fn append_deleted_feed_post(
        &self,
        entry: DeletedFeedPost,
    ) -> Result<(), PersistenceError> {
        let mut entries: Vec<DeletedFeedPost> =
            self.read_collection(Collection::DeletedFeedPosts)?;
        entries.insert(0, entry);
        entries.truncate(DELETED_AUDIT_MAX_ENTRIES);
        self.write_collection(Collection::DeletedFeedPosts, &entries)
    }

    async fn read_deleted_feed_posts(&self) -> Result<Vec<DeletedFeedPost>, PersistenceError> {
        self.read_collection(Collection::DeletedFeedPosts)
    }

    async fn remove_deleted_feed_post(&self, post_id: i64) -> Result<bool, PersistenceError> {
        let mut entries: Vec<DeletedFeedPost> =
            self.read_collection(Collection::DeletedFeedPosts)?;
        let before = entries.len();
        entries.retain(|e| e.post.id != post_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.write_collection(Collection::DeletedFeedPosts, &entries)?;
        Ok(true)
    }

    async fn append_deleted_feed_comment(
        &self,
        entry: DeletedFeedComment,
    ) -> Result<(), PersistenceError> {
        let mut entries: Vec<DeletedFeedComment> =
            self.read_collection(Collection::DeletedFeedComments)?;
        entries.insert(0, entry);
        entries.truncate(DELETED_AUDIT_MAX_ENTRIES);
        self.write_collection(Collection::DeletedFeedComments, &entries)
    }

    async fn read_deleted_feed_comments(
        &self,
    ) -> Result<Vec<DeletedFeedComment>, PersistenceError> {
        self.read_collection(Collection::DeletedFeedComments)
    }

    async fn remove_deleted_feed_comment(
        &self,
        comment_id: i64,
    ) -> Result<bool, PersistenceError> {
        let mut entries: Vec<DeletedFeedComment> =
            self.read_collection(Collection::DeletedFeedComments)?;
        let before = entries.len();
        entries.retain(|e| e.comment.id != comment_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.write_collection(Collection::DeletedFeedComments, &entries)?;
        Ok(true)
    }
}
