//! Record types for every collection the facade manages.
//!
//! All documents are serialized with camelCase keys so files written by the
//! persistence layer stay readable by (and migratable from) the original
//! deployment's data directory. Every cross-referenced record carries a stable
//! opaque `id`; backend-internal keys never replace it.

use serde::{Deserialize, Serialize};

/// Chat is globally capped at the most recent messages; oldest are evicted on
/// insert once the cap is exceeded.
pub const CHAT_MAX_MESSAGES: usize = 200;
/// Force-withdrawal audit log cap.
pub const FORCE_WITHDRAW_MAX_ENTRIES: usize = 2000;
/// Deleted feed post/comment audit caps (restoration support).
pub const DELETED_AUDIT_MAX_ENTRIES: usize = 500;

/// Maximum stored length of chat message text after an edit.
pub const CHAT_TEXT_MAX_CHARS: usize = 500;
/// Maximum stored length of a quoted reply preview.
pub const REPLY_PREVIEW_MAX_CHARS: usize = 100;

/// A platform member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub wallet_address: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned: Option<bool>,
    #[serde(default)]
    pub created_at: i64,
}

/// A legacy board post (bulk-replace collection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub title: String,
    pub body: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// A legacy-mode feed post (bulk-replace collection, read newest-first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFeedPost {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub created_at: i64,
}

/// One chat message. Append-only, capped collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub display_name: String,
    pub text: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    #[serde(default)]
    pub hearts_received: u32,
}

/// Fields supplied by a caller appending a chat message. Id and timestamp are
/// generated by the backend; the stored message is returned.
#[derive(Debug, Clone, Default)]
pub struct NewChatMessage {
    pub user_id: String,
    pub display_name: String,
    pub text: String,
    pub image_url: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub reply_to_text: Option<String>,
}

impl NewChatMessage {
    /// Materialize the stored message with a generated id and timestamp.
    /// Reply previews are truncated to [`REPLY_PREVIEW_MAX_CHARS`].
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: crate::generate_id(),
            user_id: self.user_id,
            display_name: self.display_name,
            text: self.text,
            created_at: crate::now_millis(),
            image_url: self.image_url,
            reply_to_message_id: self.reply_to_message_id,
            reply_to_text: self
                .reply_to_text
                .map(|t| truncate_chars(&t, REPLY_PREVIEW_MAX_CHARS)),
            edited_at: None,
            hearts_received: 0,
        }
    }
}

/// Partial update to an owned chat message.
#[derive(Debug, Clone, Default)]
pub struct ChatMessageUpdate {
    pub text: Option<String>,
}

impl ChatMessageUpdate {
    /// Apply the update in place, trimming and truncating edited text, and
    /// stamp `edited_at`.
    pub fn apply(&self, msg: &mut ChatMessage) {
        if let Some(text) = &self.text {
            msg.text = truncate_chars(text.trim(), CHAT_TEXT_MAX_CHARS);
        }
        msg.edited_at = Some(crate::now_millis());
    }
}

/// One force-withdrawal audit entry. Append-only, capped collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceWithdrawal {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub display_name: String,
    pub wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: i64,
}

/// The single pinned chat message. Lazily expired: reads past `expires_at`
/// treat it as absent and remove the stale record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_by: Option<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl PinnedMessage {
    /// Whether the record should be treated as absent at `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Platform-wide settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement: Option<String>,
    #[serde(default = "default_true")]
    pub signups_enabled: bool,
    #[serde(default)]
    pub chat_frozen: bool,
}

fn default_true() -> bool {
    true
}

/// One authenticated session, keyed externally by an opaque token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user_id: String,
    pub display_name: String,
    pub wallet_address: String,
    #[serde(default)]
    pub is_admin: bool,
    pub expires_at: i64,
}

impl SessionData {
    /// Lazy expiry: an expired session is absent to every caller, even before
    /// physical deletion.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// A new-style feed post. Keyed by backend-internal identity (`id`), with
/// comments stored in a related collection and attached on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: i64,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub hearts: u32,
    pub created_at: i64,
    #[serde(default)]
    pub comments: Vec<FeedComment>,
}

/// A comment on a new-style feed post, referencing its parent by the parent's
/// backend-internal identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedComment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    #[serde(default)]
    pub hearts: u32,
    pub created_at: i64,
}

/// Caller-supplied fields for a new feed post.
#[derive(Debug, Clone, Default)]
pub struct NewFeedPost {
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub image_url: Option<String>,
}

/// Caller-supplied fields for a new feed comment.
#[derive(Debug, Clone, Default)]
pub struct NewFeedComment {
    pub post_id: i64,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
}

/// One page of feed posts plus the total (pre-pagination) match count.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub posts: Vec<FeedPost>,
    pub total: u64,
}

/// Audit entry for a deleted feed post, kept to support restoration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFeedPost {
    pub post: FeedPost,
    pub deleted_at: i64,
    pub deleted_by: String,
    pub deleted_by_name: String,
}

/// Audit entry for a deleted feed comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFeedComment {
    pub comment: FeedComment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_body_preview: Option<String>,
    pub deleted_at: i64,
    pub deleted_by: String,
    pub deleted_by_name: String,
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chat_message_truncates_reply_preview() {
        let msg = NewChatMessage {
            user_id: "u1".into(),
            display_name: "Mina".into(),
            text: "hello".into(),
            reply_to_text: Some("x".repeat(300)),
            ..Default::default()
        }
        .into_message();
        assert_eq!(msg.reply_to_text.unwrap().chars().count(), REPLY_PREVIEW_MAX_CHARS);
        assert_eq!(msg.hearts_received, 0);
        assert!(msg.edited_at.is_none());
    }

    #[test]
    fn test_chat_update_trims_and_caps_text() {
        let mut msg = NewChatMessage {
            user_id: "u1".into(),
            display_name: "Mina".into(),
            text: "original".into(),
            ..Default::default()
        }
        .into_message();
        let update = ChatMessageUpdate {
            text: Some(format!("  {}  ", "y".repeat(600))),
        };
        update.apply(&mut msg);
        assert_eq!(msg.text.chars().count(), CHAT_TEXT_MAX_CHARS);
        assert!(msg.edited_at.is_some());
    }

    #[test]
    fn test_pinned_expiry() {
        let pinned = PinnedMessage {
            text: "event tonight".into(),
            set_by: None,
            created_at: 1_000,
            expires_at: Some(2_000),
        };
        assert!(!pinned.is_expired_at(1_999));
        assert!(pinned.is_expired_at(2_000));

        let forever = PinnedMessage {
            expires_at: None,
            ..pinned
        };
        assert!(!forever.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_session_expiry() {
        let sess = SessionData {
            user_id: "u1".into(),
            display_name: "Mina".into(),
            wallet_address: "0xabc".into(),
            is_admin: false,
            expires_at: 5_000,
        };
        assert!(!sess.is_expired_at(4_999));
        assert!(sess.is_expired_at(5_000));
    }

    #[test]
    fn test_settings_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert!(settings.signups_enabled);
        assert!(!settings.maintenance_mode);
        assert!(!settings.chat_frozen);
    }

    #[test]
    fn test_user_camel_case_keys() {
        let user = User {
            id: "u1".into(),
            display_name: "Mina".into(),
            wallet_address: "0xabc".into(),
            points: 5,
            level: 1,
            is_admin: false,
            banned: None,
            created_at: 1_000,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("displayName").is_some());
        assert!(json.get("walletAddress").is_some());
        assert!(json.get("banned").is_none());
    }
}
