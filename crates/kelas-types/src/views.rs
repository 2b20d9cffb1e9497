//! Derived read models emitted by live subscriptions.
//!
//! These are recomputed from scratch on every store snapshot and never
//! persisted.

use serde::{Deserialize, Serialize};

use crate::models::{Channel, ChannelMode, ForumId, ForumKind, Message, TenantId};

/// The tenant a user belongs to, as resolved from their profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInfo {
    pub id: TenantId,
    pub tier: Option<String>,
}

/// Channels sharing one `(forumId, forumName)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumGroup {
    pub forum_id: ForumId,
    pub forum_name: String,
    pub kind: ForumKind,
    pub channels: Vec<Channel>,
}

/// Raised alongside an empty directory when the channel query fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "detail")]
pub enum DirectoryError {
    #[error("channel query failed: {0}")]
    Query(String),
    #[error("malformed channel record: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    pub groups: Vec<ForumGroup>,
    /// Channels without a parent forum pair.
    pub standalone: Vec<Channel>,
    pub error: Option<DirectoryError>,
}

impl DirectorySnapshot {
    pub fn failed(error: DirectoryError) -> Self {
        Self {
            groups: Vec::new(),
            standalone: Vec::new(),
            error: Some(error),
        }
    }
}

/// A top-level message and, in announcement channels, its direct replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub replies: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelFeed {
    pub channel_id: String,
    pub mode: ChannelMode,
    pub items: Vec<MessageView>,
}

impl ChannelFeed {
    pub fn message_count(&self) -> usize {
        self.items.iter().map(|v| 1 + v.replies.len()).sum()
    }
}
