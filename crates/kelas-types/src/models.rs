use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type TenantId = String;
pub type ForumId = String;
pub type ChannelId = String;
pub type MessageId = String;
pub type ClassId = String;

/// Returned by the `FromStr` impls when a stored tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownTag {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_tag {
    ($ty:ident, $kind:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownTag;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok(Self::$variant),)+
                    other => Err(UnknownTag { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

string_tag!(Role, "role", {
    Student => "student",
    Teacher => "teacher",
    Admin => "admin",
});

impl Role {
    /// Teachers and admins may start announcement threads.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Teacher | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForumKind {
    School,
    Faculty,
    Class,
    Group,
}

string_tag!(ForumKind, "forum kind", {
    School => "school",
    Faculty => "faculty",
    Class => "class",
    Group => "group",
});

impl ForumKind {
    /// School- and faculty-wide forums are visible to every member of the tenant.
    pub fn is_institution_wide(&self) -> bool {
        matches!(self, Self::School | Self::Faculty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Discussion,
    Announcement,
}

string_tag!(ChannelMode, "channel mode", {
    Discussion => "discussion",
    Announcement => "announcement",
});

/// The owning school. Maintained by the admin subsystem; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    /// Grade level. Used for labels and filtering only.
    pub tier: Option<String>,
}

/// Profile contract supplied by the authentication subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub display_name: String,
    pub role: Role,
    pub tenant_id: Option<TenantId>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forum {
    pub id: ForumId,
    pub name: String,
    pub kind: ForumKind,
    pub tenant_id: Option<TenantId>,
    pub creator_id: UserId,
    pub moderators: BTreeSet<UserId>,
    pub members: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A single message stream inside a forum.
///
/// `forum_name` and `forum_kind` are snapshots taken when the channel was
/// provisioned. Renaming the forum later does not touch them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub forum_id: Option<ForumId>,
    /// Same value as `forum_id`, sent under its own key for clients that
    /// address the parent forum directly.
    #[serde(default)]
    pub parent_id: Option<ForumId>,
    pub forum_name: Option<String>,
    pub forum_kind: Option<ForumKind>,
    pub tenant_id: Option<TenantId>,
    pub mode: ChannelMode,
    pub locked: bool,
    pub moderators: BTreeSet<UserId>,
    /// `None` means no membership list was ever recorded for this channel.
    pub members: Option<BTreeSet<UserId>>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn has_member(&self, uid: &str) -> bool {
        self.members.as_ref().is_some_and(|m| m.contains(uid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub content: String,
    pub sender_id: UserId,
    pub sender_role: Role,
    pub sender_display_name: String,
    pub sender_avatar: Option<String>,
    pub reply_to_id: Option<MessageId>,
    pub reply_to_author_name: Option<String>,
    /// `None` until the store has assigned a timestamp.
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_reply(&self) -> bool {
        self.reply_to_id.is_some()
    }
}
