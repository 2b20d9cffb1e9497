//! Live message feed of one channel, and the send path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use kelas_db::Database;
use kelas_types::models::{Channel, ChannelMode, Message, UserProfile};
use kelas_types::views::{ChannelFeed, MessageView};

use crate::DEFAULT_SUBSCRIPTION_BUFFER;
use crate::error::{SendFailure, SubscribeError};
use crate::subscription::{Subscription, spawn_live_query};

/// Maximum message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Clone)]
pub struct MessageStream {
    db: Arc<Database>,
    buffer: usize,
}

impl MessageStream {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Stream the feed of `channel_id`. The channel's mode is read once
    /// here; modes never change after provisioning.
    pub async fn subscribe(&self, channel_id: &str) -> Result<Subscription<ChannelFeed>, SubscribeError> {
        let channel = self.load_channel(channel_id).await?;
        let label = format!("messages[{}]", channel.id);
        let watched = channel.id.clone();

        debug!("{} subscribing ({})", label, channel.mode);

        Ok(spawn_live_query(
            self.db.clone(),
            self.buffer,
            label,
            move |change| change.touches_channel(&watched),
            move |db| match db.list_messages(&channel.id) {
                Ok(messages) => Some(build_feed(&channel, messages, Utc::now())),
                Err(e) => {
                    // Keep the consumer on its last feed.
                    warn!("Message query for {} failed: {:#}", channel.id, e);
                    None
                }
            },
        ))
    }

    /// One-shot read of the current feed.
    pub async fn feed(&self, channel_id: &str) -> Result<ChannelFeed, SubscribeError> {
        let channel = self.load_channel(channel_id).await?;
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let messages = db.list_messages(&channel.id)?;
            Ok::<_, anyhow::Error>(build_feed(&channel, messages, Utc::now()))
        })
        .await
        .map_err(|e| SubscribeError::Store(e.into()))?
        .map_err(SubscribeError::Store)
    }

    /// Append a message to `channel_id` as `sender`.
    ///
    /// Replies are only accepted in announcement channels, and only to a
    /// top-level message of the same channel.
    pub async fn send(
        &self,
        channel_id: &str,
        content: &str,
        sender: &UserProfile,
        reply_to: Option<&str>,
    ) -> Result<Message, SendFailure> {
        if content.trim().is_empty() {
            return Err(SendFailure::EmptyContent);
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(SendFailure::ContentTooLong { max: MAX_MESSAGE_CHARS });
        }

        let db = self.db.clone();
        let channel_id = channel_id.to_string();
        let content = content.to_string();
        let sender = sender.clone();
        let reply_to = reply_to.map(str::to_string);

        let message = tokio::task::spawn_blocking(move || {
            write_message(&db, &channel_id, content, &sender, reply_to.as_deref())
        })
        .await
        .map_err(|e| SendFailure::Store(e.into()))??;

        info!(
            "{} posted {} in {}{}",
            message.sender_id,
            message.id,
            message.channel_id,
            if message.is_reply() { " (reply)" } else { "" }
        );
        Ok(message)
    }

    async fn load_channel(&self, channel_id: &str) -> Result<Channel, SubscribeError> {
        let db = self.db.clone();
        let id = channel_id.to_string();
        tokio::task::spawn_blocking(move || db.get_channel(&id))
            .await
            .map_err(|e| SubscribeError::Store(e.into()))?
            .map_err(SubscribeError::Store)?
            .ok_or_else(|| SubscribeError::ChannelNotFound(channel_id.to_string()))
    }
}

fn write_message(
    db: &Database,
    channel_id: &str,
    content: String,
    sender: &UserProfile,
    reply_to: Option<&str>,
) -> Result<Message, SendFailure> {
    let channel = db
        .get_channel(channel_id)
        .map_err(SendFailure::Store)?
        .ok_or_else(|| SendFailure::ChannelNotFound(channel_id.to_string()))?;

    let reply_to_author_name = match reply_to {
        None => None,
        Some(target_id) => {
            if channel.mode != ChannelMode::Announcement {
                return Err(SendFailure::ReplyNotAllowed);
            }
            let target = db
                .get_message(target_id)
                .map_err(SendFailure::Store)?
                .filter(|m| m.channel_id == channel.id)
                .ok_or_else(|| SendFailure::ReplyTargetNotFound(target_id.to_string()))?;
            if target.is_reply() {
                return Err(SendFailure::NestedReply(target_id.to_string()));
            }
            Some(target.sender_display_name)
        }
    };

    let message = Message {
        id: Uuid::new_v4().to_string(),
        channel_id: channel.id,
        content,
        sender_id: sender.uid.clone(),
        sender_role: sender.role,
        sender_display_name: sender.display_name.clone(),
        sender_avatar: sender.photo_url.clone(),
        reply_to_id: reply_to.map(str::to_string),
        reply_to_author_name,
        created_at: Some(Utc::now()),
    };

    db.insert_message(&message).map_err(SendFailure::Store)?;
    Ok(message)
}

/// Stable ascending sort by `created_at`. Unresolved timestamps count as
/// `now`; equal keys keep their snapshot order.
pub fn order_messages(mut messages: Vec<Message>, now: DateTime<Utc>) -> Vec<Message> {
    messages.sort_by_key(|m| m.created_at.unwrap_or(now));
    messages
}

/// Sort a channel snapshot and, for announcement channels, fold replies
/// under their main post.
///
/// A reply whose target is missing or is itself a reply is shown as a main
/// post, so every message appears exactly once.
pub fn build_feed(channel: &Channel, messages: Vec<Message>, now: DateTime<Utc>) -> ChannelFeed {
    let ordered = order_messages(messages, now);

    let items = match channel.mode {
        ChannelMode::Discussion => ordered
            .into_iter()
            .map(|message| MessageView {
                message,
                replies: Vec::new(),
            })
            .collect(),
        ChannelMode::Announcement => thread_messages(ordered),
    };

    ChannelFeed {
        channel_id: channel.id.clone(),
        mode: channel.mode,
        items,
    }
}

fn thread_messages(ordered: Vec<Message>) -> Vec<MessageView> {
    let top_level: HashSet<String> = ordered
        .iter()
        .filter(|m| !m.is_reply())
        .map(|m| m.id.clone())
        .collect();

    let mut replies: HashMap<String, Vec<Message>> = HashMap::new();
    let mut mains = Vec::new();
    for message in ordered {
        match &message.reply_to_id {
            Some(target) if top_level.contains(target) => {
                replies.entry(target.clone()).or_default().push(message);
            }
            _ => mains.push(message),
        }
    }

    mains
        .into_iter()
        .map(|message| {
            let replies = replies.remove(&message.id).unwrap_or_default();
            MessageView { message, replies }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use chrono::TimeZone;
    use kelas_types::models::{Forum, ForumKind, Role};

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 7, minute, 0).unwrap()
    }

    fn msg(id: &str, minute: Option<u32>, reply_to: Option<&str>) -> Message {
        Message {
            id: id.into(),
            channel_id: "c".into(),
            content: format!("isi {id}"),
            sender_id: "u".into(),
            sender_role: Role::Student,
            sender_display_name: "U".into(),
            sender_avatar: None,
            reply_to_id: reply_to.map(Into::into),
            reply_to_author_name: None,
            created_at: minute.map(at),
        }
    }

    fn channel(mode: ChannelMode) -> Channel {
        Channel {
            id: "c".into(),
            name: "c".into(),
            forum_id: Some("f".into()),
            parent_id: Some("f".into()),
            forum_name: Some("F".into()),
            forum_kind: Some(ForumKind::Class),
            tenant_id: None,
            mode,
            locked: mode == ChannelMode::Announcement,
            moderators: BTreeSet::new(),
            members: None,
            created_at: at(0),
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn sorts_ascending_by_timestamp() {
        let ordered = order_messages(
            vec![msg("t3", Some(3), None), msg("t1", Some(1), None), msg("t2", Some(2), None)],
            at(59),
        );
        assert_eq!(ids(&ordered), ["t1", "t2", "t3"]);
    }

    #[test]
    fn ties_keep_arrival_order_and_pending_sorts_as_now() {
        let ordered = order_messages(
            vec![
                msg("pending", None, None),
                msg("b", Some(5), None),
                msg("a", Some(5), None),
                msg("late", Some(40), None),
            ],
            at(30),
        );
        assert_eq!(ids(&ordered), ["b", "a", "pending", "late"]);
    }

    #[test]
    fn discussion_feed_is_flat() {
        let feed = build_feed(
            &channel(ChannelMode::Discussion),
            vec![msg("m2", Some(2), None), msg("m1", Some(1), None)],
            at(59),
        );
        assert_eq!(feed.items.len(), 2);
        assert!(feed.items.iter().all(|v| v.replies.is_empty()));
        assert_eq!(feed.items[0].message.id, "m1");
    }

    #[test]
    fn announcement_feed_partitions_every_message_once() {
        let messages = vec![
            msg("r2", Some(6), Some("p1")),
            msg("p1", Some(1), None),
            msg("p2", Some(3), None),
            msg("r1", Some(2), Some("p1")),
            msg("r3", Some(4), Some("p2")),
            msg("orphan", Some(5), Some("gone")),
            msg("nested", Some(7), Some("r1")),
        ];
        let feed = build_feed(&channel(ChannelMode::Announcement), messages, at(59));

        let mains: Vec<_> = feed.items.iter().map(|v| v.message.id.as_str()).collect();
        assert_eq!(mains, ["p1", "p2", "orphan", "nested"]);
        assert_eq!(ids(&feed.items[0].replies), ["r1", "r2"]);
        assert_eq!(ids(&feed.items[1].replies), ["r3"]);
        assert_eq!(feed.message_count(), 7);

        let mut seen: Vec<&str> = feed
            .items
            .iter()
            .flat_map(|v| std::iter::once(&v.message).chain(v.replies.iter()))
            .map(|m| m.id.as_str())
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 7);
    }

    fn profile(uid: &str, role: Role) -> UserProfile {
        UserProfile {
            uid: uid.into(),
            display_name: format!("Nama {uid}"),
            role,
            tenant_id: Some("sma-1".into()),
            photo_url: None,
        }
    }

    fn seed(db: &Database) -> (String, String) {
        let forum = Forum {
            id: "f".into(),
            name: "Kelas 10A".into(),
            kind: ForumKind::Class,
            tenant_id: Some("sma-1".into()),
            creator_id: "t1".into(),
            moderators: BTreeSet::from(["t1".to_string()]),
            members: BTreeSet::from(["t1".to_string(), "s1".to_string()]),
            created_at: Utc::now(),
        };
        let make = |mode: ChannelMode| Channel {
            id: format!("f_{mode}"),
            name: mode.to_string(),
            forum_id: Some(forum.id.clone()),
            parent_id: Some(forum.id.clone()),
            forum_name: Some(forum.name.clone()),
            forum_kind: Some(forum.kind),
            tenant_id: forum.tenant_id.clone(),
            mode,
            locked: mode == ChannelMode::Announcement,
            moderators: forum.moderators.clone(),
            members: Some(forum.members.clone()),
            created_at: forum.created_at,
        };
        let ann = make(ChannelMode::Announcement);
        let chat = make(ChannelMode::Discussion);
        db.provision_forum(&forum, &[ann.clone(), chat.clone()]).unwrap();
        (ann.id, chat.id)
    }

    #[tokio::test]
    async fn send_validates_reply_targets() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (ann, chat) = seed(&db);
        let stream = MessageStream::new(db.clone());
        let teacher = profile("t1", Role::Teacher);
        let student = profile("s1", Role::Student);

        let post = stream.send(&ann, "Ujian hari Senin", &teacher, None).await.unwrap();
        let reply = stream.send(&ann, "Baik, Bu", &student, Some(&post.id)).await.unwrap();
        assert_eq!(reply.reply_to_author_name.as_deref(), Some("Nama t1"));
        assert!(reply.created_at.is_some());

        let nested = stream.send(&ann, "Saya juga", &student, Some(&reply.id)).await;
        assert!(matches!(nested, Err(SendFailure::NestedReply(_))));

        let in_chat = stream.send(&chat, "halo", &student, Some(&post.id)).await;
        assert!(matches!(in_chat, Err(SendFailure::ReplyNotAllowed)));

        let chat_msg = stream.send(&chat, "halo", &student, None).await.unwrap();
        let cross = stream.send(&ann, "?", &student, Some(&chat_msg.id)).await;
        assert!(matches!(cross, Err(SendFailure::ReplyTargetNotFound(_))));

        let blank = stream.send(&chat, "   ", &student, None).await;
        assert!(matches!(blank, Err(SendFailure::EmptyContent)));

        let missing = stream.send("nope", "halo", &student, None).await;
        assert!(matches!(missing, Err(SendFailure::ChannelNotFound(_))));

        assert_eq!(db.list_messages(&ann).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn subscription_emits_threads_on_send() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (ann, _) = seed(&db);
        let stream = MessageStream::new(db.clone());

        let mut sub = stream.subscribe(&ann).await.unwrap();
        let initial = sub.recv().await.unwrap();
        assert_eq!(initial.mode, ChannelMode::Announcement);
        assert!(initial.items.is_empty());

        let post = stream.send(&ann, "Libur", &profile("t1", Role::Teacher), None).await.unwrap();
        stream.send(&ann, "Asyik", &profile("s1", Role::Student), Some(&post.id)).await.unwrap();

        let feed = loop {
            let feed = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .unwrap()
                .unwrap();
            if feed.message_count() == 2 {
                break feed;
            }
        };
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].replies.len(), 1);
    }

    #[tokio::test]
    async fn failed_query_keeps_the_last_feed() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (_, chat) = seed(&db);
        let stream = MessageStream::new(db.clone());
        let student = profile("s1", Role::Student);

        let mut sub = stream.subscribe(&chat).await.unwrap();
        assert!(sub.recv().await.unwrap().items.is_empty());

        stream.send(&chat, "satu", &student, None).await.unwrap();
        let last = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.message_count(), 1);

        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, channel_id, content, sender_id, sender_role, sender_display_name, created_at)
                 VALUES ('ghost', ?1, 'boo', 'x', 'ghost', 'X', '2026-03-02T07:00:00Z')",
                [&chat],
            )?;
            Ok(())
        })
        .unwrap();

        // The re-query hits the bad row, so nothing replaces the last feed.
        stream.send(&chat, "dua", &student, None).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(300), sub.recv()).await.is_err());

        db.with_conn(|conn| {
            conn.execute("UPDATE messages SET sender_role = 'student' WHERE id = 'ghost'", [])?;
            Ok(())
        })
        .unwrap();
        stream.send(&chat, "tiga", &student, None).await.unwrap();

        let recovered = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recovered.message_count(), 4);
        let contents: Vec<_> = recovered.items.iter().map(|i| i.message.content.as_str()).collect();
        assert_eq!(contents, ["boo", "satu", "dua", "tiga"]);
    }

    #[tokio::test]
    async fn unknown_channel_cannot_be_subscribed() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let stream = MessageStream::new(db);
        assert!(matches!(
            stream.subscribe("nope").await,
            Err(SubscribeError::ChannelNotFound(_))
        ));
    }
}
