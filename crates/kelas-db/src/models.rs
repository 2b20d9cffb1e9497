//! Database row types. Each maps directly to one SQLite row.
//! Distinct from kelas-types models to keep the DB layer independent;
//! `into_model` does the decoding and reports bad rows as `MalformedRow`.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use kelas_types::models::{Channel, ChannelMode, Forum, ForumKind, Message, Role, UserProfile};

/// A stored row that could not be decoded into its model.
#[derive(Debug, thiserror::Error)]
#[error("malformed {table} row '{id}': {reason}")]
pub struct MalformedRow {
    pub table: &'static str,
    pub id: String,
    pub reason: String,
}

/// A write tried to move an existing forum or channel to another tenant.
#[derive(Debug, thiserror::Error)]
#[error("{table} '{id}' belongs to tenant {owner:?}, not {requested:?}")]
pub struct TenantMismatch {
    pub table: &'static str,
    pub id: String,
    pub owner: Option<String>,
    pub requested: Option<String>,
}

impl MalformedRow {
    fn new(table: &'static str, id: &str, reason: impl ToString) -> Self {
        Self {
            table,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            // Rows written by SQLite defaults use "YYYY-MM-DD HH:MM:SS" without a zone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

pub fn encode_set(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn decode_set(table: &'static str, id: &str, raw: &str) -> Result<BTreeSet<String>, MalformedRow> {
    serde_json::from_str(raw).map_err(|e| MalformedRow::new(table, id, e))
}

pub struct ProfileRow {
    pub uid: String,
    pub display_name: String,
    pub role: String,
    pub tenant_id: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfileRow {
    pub fn into_model(self) -> Result<UserProfile, MalformedRow> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|e| MalformedRow::new("profiles", &self.uid, e))?;
        Ok(UserProfile {
            uid: self.uid,
            display_name: self.display_name,
            role,
            tenant_id: self.tenant_id,
            photo_url: self.photo_url,
        })
    }
}

pub struct ForumRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub tenant_id: Option<String>,
    pub creator_id: String,
    pub moderators: String,
    pub members: String,
    pub created_at: String,
}

impl ForumRow {
    pub fn into_model(self) -> Result<Forum, MalformedRow> {
        const TABLE: &str = "forums";
        let kind = self.kind.parse::<ForumKind>().map_err(|e| MalformedRow::new(TABLE, &self.id, e))?;
        let moderators = decode_set(TABLE, &self.id, &self.moderators)?;
        let members = decode_set(TABLE, &self.id, &self.members)?;
        let created_at = parse_timestamp(&self.created_at)
            .ok_or_else(|| MalformedRow::new(TABLE, &self.id, "bad created_at"))?;
        Ok(Forum {
            id: self.id,
            name: self.name,
            kind,
            tenant_id: self.tenant_id,
            creator_id: self.creator_id,
            moderators,
            members,
            created_at,
        })
    }
}

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub forum_id: Option<String>,
    pub forum_name: Option<String>,
    pub forum_kind: Option<String>,
    pub tenant_id: Option<String>,
    pub mode: String,
    pub locked: bool,
    pub moderators: String,
    pub members: Option<String>,
    pub created_at: String,
}

impl ChannelRow {
    pub fn into_model(self) -> Result<Channel, MalformedRow> {
        const TABLE: &str = "channels";
        let mode = self.mode.parse::<ChannelMode>().map_err(|e| MalformedRow::new(TABLE, &self.id, e))?;
        let forum_kind = self
            .forum_kind
            .as_deref()
            .map(str::parse::<ForumKind>)
            .transpose()
            .map_err(|e| MalformedRow::new(TABLE, &self.id, e))?;
        let moderators = decode_set(TABLE, &self.id, &self.moderators)?;
        let members = self
            .members
            .as_deref()
            .map(|raw| decode_set(TABLE, &self.id, raw))
            .transpose()?;
        let created_at = parse_timestamp(&self.created_at)
            .ok_or_else(|| MalformedRow::new(TABLE, &self.id, "bad created_at"))?;
        Ok(Channel {
            id: self.id,
            name: self.name,
            parent_id: self.forum_id.clone(),
            forum_id: self.forum_id,
            forum_name: self.forum_name,
            forum_kind,
            tenant_id: self.tenant_id,
            mode,
            locked: self.locked,
            moderators,
            members,
            created_at,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub content: String,
    pub sender_id: String,
    pub sender_role: String,
    pub sender_display_name: String,
    pub sender_avatar: Option<String>,
    pub reply_to_id: Option<String>,
    pub reply_to_author_name: Option<String>,
    pub created_at: Option<String>,
}

impl MessageRow {
    pub fn into_model(self) -> Result<Message, MalformedRow> {
        const TABLE: &str = "messages";
        let sender_role = self
            .sender_role
            .parse::<Role>()
            .map_err(|e| MalformedRow::new(TABLE, &self.id, e))?;
        // An unparseable timestamp is treated like one the store has not resolved yet.
        let created_at = self.created_at.as_deref().and_then(parse_timestamp);
        Ok(Message {
            id: self.id,
            channel_id: self.channel_id,
            content: self.content,
            sender_id: self.sender_id,
            sender_role,
            sender_display_name: self.sender_display_name,
            sender_avatar: self.sender_avatar,
            reply_to_id: self.reply_to_id,
            reply_to_author_name: self.reply_to_author_name,
            created_at,
        })
    }
}
