//! Live, grouped channel directory for one viewer.
//!
//! The store can only scope channels by tenant, so every snapshot is
//! filtered again here by role and membership before grouping.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use kelas_db::Database;
use kelas_db::models::MalformedRow;
use kelas_types::models::{Channel, ForumKind, Role, UnknownTag, UserProfile};
use kelas_types::views::{DirectoryError, DirectorySnapshot, ForumGroup};

use crate::DEFAULT_SUBSCRIPTION_BUFFER;
use crate::error::SubscribeError;
use crate::subscription::{Subscription, spawn_live_query};

/// What to do with channels that never had a membership list recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnlistedMembership {
    /// Visible to everyone the tenant query returns them to.
    #[default]
    Open,
    /// Visible only through the admin or institution-wide rules.
    Restricted,
}

impl FromStr for UnlistedMembership {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "restricted" => Ok(Self::Restricted),
            _ => Err(UnknownTag {
                kind: "unlisted membership policy",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for UnlistedMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Restricted => "restricted",
        })
    }
}

#[derive(Clone)]
pub struct ChannelDirectory {
    db: Arc<Database>,
    unlisted: UnlistedMembership,
    buffer: usize,
}

impl ChannelDirectory {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            unlisted: UnlistedMembership::default(),
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }

    pub fn with_unlisted_membership(mut self, policy: UnlistedMembership) -> Self {
        self.unlisted = policy;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Stream the directory as `viewer` sees it. A snapshot is emitted
    /// immediately and after every channel change in the viewer's scope.
    pub fn subscribe(&self, viewer: &UserProfile) -> Subscription<DirectorySnapshot> {
        let viewer = viewer.clone();
        let policy = self.unlisted;
        let tenant = viewer.tenant_id.clone();
        let label = format!("directory[{}]", viewer.uid);

        debug!(
            "{} subscribing (tenant={})",
            label,
            tenant.as_deref().unwrap_or("<unscoped>")
        );

        spawn_live_query(
            self.db.clone(),
            self.buffer,
            label,
            move |change| change.touches_directory(tenant.as_deref()),
            move |db| Some(load_directory(db, &viewer, policy)),
        )
    }

    /// One-shot directory read with the same semantics as a subscription snapshot.
    pub async fn snapshot(&self, viewer: &UserProfile) -> DirectorySnapshot {
        let db = self.db.clone();
        let viewer = viewer.clone();
        let policy = self.unlisted;
        tokio::task::spawn_blocking(move || load_directory(&db, &viewer, policy))
            .await
            .unwrap_or_else(|e| DirectorySnapshot::failed(DirectoryError::Query(e.to_string())))
    }

    /// Load one channel for `viewer`. Channels outside the viewer's tenant or
    /// hidden from them by [`can_view`] are reported as missing.
    pub async fn channel_for(&self, viewer: &UserProfile, channel_id: &str) -> Result<Channel, SubscribeError> {
        let db = self.db.clone();
        let lookup = channel_id.to_string();
        let channel = tokio::task::spawn_blocking(move || db.get_channel(&lookup))
            .await
            .map_err(|e| SubscribeError::Store(e.into()))?
            .map_err(SubscribeError::Store)?;

        match channel {
            Some(channel) if can_view(&channel, viewer, self.unlisted) => Ok(channel),
            Some(_) => {
                debug!("{} denied access to {}", viewer.uid, channel_id);
                Err(SubscribeError::ChannelNotFound(channel_id.to_string()))
            }
            None => Err(SubscribeError::ChannelNotFound(channel_id.to_string())),
        }
    }
}

/// Query the viewer's tenant scope and derive the grouped view. Failures
/// become an empty snapshot carrying the error.
pub fn load_directory(db: &Database, viewer: &UserProfile, policy: UnlistedMembership) -> DirectorySnapshot {
    match db.list_channels(viewer.tenant_id.as_deref()) {
        Ok(channels) => group_channels(channels, viewer, policy),
        Err(e) => {
            warn!("Directory query for {} failed: {:#}", viewer.uid, e);
            let error = match e.downcast_ref::<MalformedRow>() {
                Some(bad) => DirectoryError::Malformed(bad.to_string()),
                None => DirectoryError::Query(format!("{:#}", e)),
            };
            DirectorySnapshot::failed(error)
        }
    }
}

/// Whether `viewer` may open `channel`: it must be in the viewer's tenant
/// (unscoped viewers see every tenant) and pass [`is_visible`].
pub fn can_view(channel: &Channel, viewer: &UserProfile, policy: UnlistedMembership) -> bool {
    let in_scope = match &viewer.tenant_id {
        Some(tenant) => channel.tenant_id.as_ref() == Some(tenant),
        None => true,
    };
    in_scope && is_visible(channel, viewer, policy)
}

/// Whether `viewer` may see `channel` in the sidebar.
pub fn is_visible(channel: &Channel, viewer: &UserProfile, policy: UnlistedMembership) -> bool {
    if viewer.role == Role::Admin {
        return true;
    }
    if channel.forum_kind.is_some_and(|k| k.is_institution_wide()) {
        return true;
    }
    match &channel.members {
        Some(_) => channel.has_member(&viewer.uid),
        None => policy == UnlistedMembership::Open,
    }
}

/// Filter and partition channels into forum groups.
///
/// Channels carrying both `forum_id` and `forum_name` are grouped by that
/// pair; anything else is standalone. Groups are ordered by forum name, and
/// inside each group locked channels come first, then oldest first.
pub fn group_channels(
    channels: Vec<Channel>,
    viewer: &UserProfile,
    policy: UnlistedMembership,
) -> DirectorySnapshot {
    let mut grouped: BTreeMap<(String, String), Vec<Channel>> = BTreeMap::new();
    let mut standalone = Vec::new();

    for channel in channels {
        if !is_visible(&channel, viewer, policy) {
            continue;
        }
        match (&channel.forum_id, &channel.forum_name) {
            (Some(id), Some(name)) => {
                grouped
                    .entry((name.clone(), id.clone()))
                    .or_default()
                    .push(channel);
            }
            _ => standalone.push(channel),
        }
    }

    let groups = grouped
        .into_iter()
        .map(|((forum_name, forum_id), mut channels)| {
            channels.sort_by(|a, b| {
                b.locked
                    .cmp(&a.locked)
                    .then(a.created_at.cmp(&b.created_at))
                    .then_with(|| a.name.cmp(&b.name))
            });
            let kind = channels
                .iter()
                .find_map(|c| c.forum_kind)
                .unwrap_or(ForumKind::Group);
            ForumGroup {
                forum_id,
                forum_name,
                kind,
                channels,
            }
        })
        .collect();

    standalone.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));

    DirectorySnapshot {
        groups,
        standalone,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use kelas_types::models::{ChannelMode, Forum};

    use super::*;

    fn viewer(uid: &str, role: Role, tenant: Option<&str>) -> UserProfile {
        UserProfile {
            uid: uid.into(),
            display_name: uid.to_uppercase(),
            role,
            tenant_id: tenant.map(Into::into),
            photo_url: None,
        }
    }

    fn channel(id: &str, forum: Option<(&str, &str)>, kind: ForumKind, locked: bool, members: Option<&[&str]>) -> Channel {
        Channel {
            id: id.into(),
            name: id.into(),
            forum_id: forum.map(|(fid, _)| fid.into()),
            parent_id: forum.map(|(fid, _)| fid.into()),
            forum_name: forum.map(|(_, name)| name.into()),
            forum_kind: Some(kind),
            tenant_id: Some("sma-1".into()),
            mode: if locked { ChannelMode::Announcement } else { ChannelMode::Discussion },
            locked,
            moderators: BTreeSet::new(),
            members: members.map(|m| m.iter().map(|s| s.to_string()).collect()),
            created_at: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn visibility_rules() {
        let student = viewer("s1", Role::Student, Some("sma-1"));
        let admin = viewer("a1", Role::Admin, Some("sma-1"));

        let class_member = channel("c1", None, ForumKind::Class, false, Some(&["s1"][..]));
        let class_other = channel("c2", None, ForumKind::Class, false, Some(&["s2"][..]));
        let school_wide = channel("c3", None, ForumKind::School, false, Some(&["t1"][..]));
        let faculty_wide = channel("c4", None, ForumKind::Faculty, false, Some(&[][..]));
        let unlisted = channel("c5", None, ForumKind::Group, false, None);

        assert!(is_visible(&class_member, &student, UnlistedMembership::Open));
        assert!(!is_visible(&class_other, &student, UnlistedMembership::Open));
        assert!(is_visible(&class_other, &admin, UnlistedMembership::Open));
        assert!(is_visible(&school_wide, &student, UnlistedMembership::Open));
        assert!(is_visible(&faculty_wide, &student, UnlistedMembership::Restricted));
        assert!(is_visible(&unlisted, &student, UnlistedMembership::Open));
        assert!(!is_visible(&unlisted, &student, UnlistedMembership::Restricted));
        assert!(is_visible(&unlisted, &admin, UnlistedMembership::Restricted));
    }

    #[test]
    fn grouping_is_a_partition() {
        let admin = viewer("a1", Role::Admin, None);
        let channels = vec![
            channel("d1", Some(("f1", "Kelas 10A")), ForumKind::Class, false, None),
            channel("x", None, ForumKind::Group, false, None),
            channel("a2", Some(("f2", "Guru")), ForumKind::Faculty, true, None),
            channel("a1", Some(("f1", "Kelas 10A")), ForumKind::Class, true, None),
            channel("d2", Some(("f2", "Guru")), ForumKind::Faculty, false, None),
        ];
        let expected: HashMap<String, Option<String>> = channels
            .iter()
            .map(|c| (c.id.clone(), c.forum_id.clone()))
            .collect();

        let snapshot = group_channels(channels, &admin, UnlistedMembership::Open);

        let mut seen = Vec::new();
        for group in &snapshot.groups {
            for c in &group.channels {
                assert_eq!(expected[&c.id].as_deref(), Some(group.forum_id.as_str()));
                seen.push(c.id.clone());
            }
        }
        seen.extend(snapshot.standalone.iter().map(|c| c.id.clone()));
        seen.sort();
        let mut all: Vec<_> = expected.keys().cloned().collect();
        all.sort();
        assert_eq!(seen, all);

        let names: Vec<_> = snapshot.groups.iter().map(|g| g.forum_name.as_str()).collect();
        assert_eq!(names, ["Guru", "Kelas 10A"]);
        assert_eq!(snapshot.groups[1].kind, ForumKind::Class);
        assert_eq!(snapshot.standalone.len(), 1);
    }

    #[test]
    fn locked_channels_lead_their_group() {
        let admin = viewer("a1", Role::Admin, None);
        let mut later_announcement = channel("ann", Some(("f1", "F")), ForumKind::Group, true, None);
        later_announcement.created_at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let channels = vec![
            channel("chat", Some(("f1", "F")), ForumKind::Group, false, None),
            later_announcement,
        ];

        let snapshot = group_channels(channels, &admin, UnlistedMembership::Open);
        let order: Vec<_> = snapshot.groups[0].channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, ["ann", "chat"]);
    }

    #[test]
    fn same_forum_id_with_different_name_splits() {
        let admin = viewer("a1", Role::Admin, None);
        let channels = vec![
            channel("a", Some(("f1", "Lama")), ForumKind::Group, false, None),
            channel("b", Some(("f1", "Baru")), ForumKind::Group, false, None),
        ];
        let snapshot = group_channels(channels, &admin, UnlistedMembership::Open);
        assert_eq!(snapshot.groups.len(), 2);
    }

    fn provision(db: &Database, id: &str, tenant: Option<&str>, members: &[&str]) {
        let members: BTreeSet<String> = members.iter().map(|s| s.to_string()).collect();
        let forum = Forum {
            id: id.into(),
            name: format!("Forum {id}"),
            kind: ForumKind::Group,
            tenant_id: tenant.map(Into::into),
            creator_id: "t1".into(),
            moderators: BTreeSet::from(["t1".to_string()]),
            members: members.clone(),
            created_at: Utc::now(),
        };
        let chat = Channel {
            id: format!("{id}_discussion"),
            name: "diskusi".into(),
            forum_id: Some(forum.id.clone()),
            parent_id: Some(forum.id.clone()),
            forum_name: Some(forum.name.clone()),
            forum_kind: Some(forum.kind),
            tenant_id: forum.tenant_id.clone(),
            mode: ChannelMode::Discussion,
            locked: false,
            moderators: forum.moderators.clone(),
            members: Some(members),
            created_at: forum.created_at,
        };
        db.provision_forum(&forum, &[chat]).unwrap();
    }

    #[tokio::test]
    async fn subscription_follows_tenant_changes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let directory = ChannelDirectory::new(db.clone());
        let student = viewer("s1", Role::Student, Some("sma-1"));

        let mut sub = directory.subscribe(&student);
        let first = sub.recv().await.unwrap();
        assert!(first.groups.is_empty());
        assert!(first.error.is_none());

        provision(&db, "other-school", Some("smp-2"), &["s1"]);
        provision(&db, "not-member", Some("sma-1"), &["s9"]);
        provision(&db, "mine", Some("sma-1"), &["s1"]);

        let latest = loop {
            let snap = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .unwrap()
                .unwrap();
            if !snap.groups.is_empty() {
                break snap;
            }
        };
        let ids: Vec<_> = latest.groups.iter().map(|g| g.forum_id.as_str()).collect();
        assert_eq!(ids, ["mine"]);
    }

    #[tokio::test]
    async fn cancelled_subscription_stops() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let directory = ChannelDirectory::new(db.clone());
        let mut sub = directory.subscribe(&viewer("s1", Role::Student, None));
        sub.recv().await.unwrap();

        sub.cancel();
        provision(&db, "late", None, &["s1"]);

        let next = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn broken_rows_degrade_to_empty() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (id, name, mode, locked, created_at) VALUES ('bad', 'bad', 'voice', 0, '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let snapshot = ChannelDirectory::new(db)
            .snapshot(&viewer("a1", Role::Admin, None))
            .await;
        assert!(snapshot.groups.is_empty());
        assert!(matches!(snapshot.error, Some(DirectoryError::Malformed(_))));
    }

    #[tokio::test]
    async fn subscription_recovers_after_bad_row_is_fixed() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (id, name, mode, locked, created_at) VALUES ('bad', 'bad', 'voice', 0, '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let mut sub = ChannelDirectory::new(db.clone()).subscribe(&viewer("a1", Role::Admin, None));
        let first = sub.recv().await.unwrap();
        assert!(first.groups.is_empty());
        assert!(first.standalone.is_empty());
        assert!(matches!(first.error, Some(DirectoryError::Malformed(ref m)) if m.contains("bad")));

        db.with_conn(|conn| {
            conn.execute("UPDATE channels SET mode = 'discussion' WHERE id = 'bad'", [])?;
            Ok(())
        })
        .unwrap();
        provision(&db, "after", None, &["s1"]);

        let healthy = loop {
            let snap = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .unwrap()
                .unwrap();
            if snap.error.is_none() {
                break snap;
            }
        };
        assert_eq!(healthy.groups.len(), 1);
        assert_eq!(healthy.groups[0].forum_id, "after");
        let standalone: Vec<_> = healthy.standalone.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(standalone, ["bad"]);
    }

    #[tokio::test]
    async fn channel_for_hides_foreign_and_private_channels() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        provision(&db, "mine", Some("sma-1"), &["s1"]);
        provision(&db, "theirs", Some("smp-2"), &["s1"]);
        let directory = ChannelDirectory::new(db.clone());

        let member = viewer("s1", Role::Student, Some("sma-1"));
        let classmate = viewer("s9", Role::Student, Some("sma-1"));
        let unscoped_admin = viewer("a1", Role::Admin, None);

        let channel = directory.channel_for(&member, "mine_discussion").await.unwrap();
        assert_eq!(channel.parent_id.as_deref(), Some("mine"));

        for (who, id) in [(&member, "theirs_discussion"), (&classmate, "mine_discussion"), (&member, "gone")] {
            let err = directory.channel_for(who, id).await.unwrap_err();
            assert!(matches!(err, SubscribeError::ChannelNotFound(ref missing) if missing == id));
        }

        assert!(directory.channel_for(&unscoped_admin, "theirs_discussion").await.is_ok());
    }

    #[test]
    fn can_view_requires_matching_tenant() {
        let open = channel("c", None, ForumKind::School, false, None);
        let elsewhere = viewer("x1", Role::Admin, Some("smp-2"));
        let here = viewer("s1", Role::Student, Some("sma-1"));
        assert!(!can_view(&open, &elsewhere, UnlistedMembership::Open));
        assert!(can_view(&open, &here, UnlistedMembership::Open));
        assert!(can_view(&open, &viewer("a1", Role::Admin, None), UnlistedMembership::Restricted));
    }

    #[test]
    fn unlisted_policy_parses() {
        assert_eq!("Restricted".parse::<UnlistedMembership>().unwrap(), UnlistedMembership::Restricted);
        let err = "public".parse::<UnlistedMembership>().unwrap_err();
        assert_eq!(err.value, "public");
        assert_eq!(err.to_string(), "unknown unlisted membership policy 'public'");
    }
}
