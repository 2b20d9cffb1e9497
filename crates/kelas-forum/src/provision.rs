//! Forum provisioning: one forum plus its announcement and discussion
//! channels, written in a single transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use kelas_db::Database;
use kelas_db::models::TenantMismatch;
use kelas_types::models::{Channel, ChannelMode, ClassId, Forum, ForumId, ForumKind, UserId, UserProfile};

use crate::collaborators::ClassRoster;
use crate::error::ProvisionFailure;

pub const ANNOUNCEMENT_CHANNEL_NAME: &str = "pengumuman";
pub const DISCUSSION_CHANNEL_NAME: &str = "diskusi";

#[derive(Debug, Clone)]
pub struct CreateForum {
    pub name: String,
    pub kind: ForumKind,
    pub source_class_id: Option<ClassId>,
    pub requester: UserProfile,
}

#[derive(Clone)]
pub struct ForumProvisioner {
    db: Arc<Database>,
    roster: Arc<dyn ClassRoster>,
}

impl ForumProvisioner {
    /// Provisioner that reads rosters from the same database it writes to.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            roster: db.clone(),
            db,
        }
    }

    pub fn with_roster(db: Arc<Database>, roster: Arc<dyn ClassRoster>) -> Self {
        Self { db, roster }
    }

    /// Create the forum and both channels, returning the forum id.
    ///
    /// Class forums built from a source class reuse the class id, so
    /// provisioning the same class again overwrites instead of duplicating.
    /// The forum stays with the tenant that first created it.
    pub async fn create_forum(&self, request: CreateForum) -> Result<ForumId, ProvisionFailure> {
        if request.name.trim().is_empty() {
            return Err(ProvisionFailure::InvalidName);
        }

        let db = self.db.clone();
        let roster = self.roster.clone();

        tokio::task::spawn_blocking(move || -> Result<ForumId, ProvisionFailure> {
            let students = match &request.source_class_id {
                Some(class_id) => roster.students(class_id).map_err(|source| ProvisionFailure::Roster {
                    class_id: class_id.clone(),
                    source,
                })?,
                None => Vec::new(),
            };

            let forum_id = forum_id_for(&request, || Uuid::new_v4().to_string());
            let (forum, channels) = plan_forum(&request, forum_id, &students, Utc::now());

            db.provision_forum(&forum, &channels).map_err(|e| {
                if e.downcast_ref::<TenantMismatch>().is_some() {
                    warn!("{} cannot provision {}: {:#}", request.requester.uid, forum.id, e);
                    return ProvisionFailure::TenantConflict(forum.id.clone());
                }
                error!("Provisioning forum {} failed: {:#}", forum.id, e);
                ProvisionFailure::Store(e)
            })?;

            info!(
                "{} created {} forum {} ({}) with {} members",
                request.requester.uid,
                forum.kind,
                forum.id,
                forum.name,
                forum.members.len()
            );
            Ok(forum.id)
        })
        .await
        .map_err(|e| ProvisionFailure::Store(e.into()))?
    }
}

/// The class id for class forums built from a class, otherwise a fresh id.
pub fn forum_id_for(request: &CreateForum, fresh: impl FnOnce() -> String) -> ForumId {
    match (&request.kind, &request.source_class_id) {
        (ForumKind::Class, Some(class_id)) => class_id.clone(),
        _ => fresh(),
    }
}

/// Channel ids derive from the forum id so a re-provisioned forum keeps
/// exactly one channel per mode.
pub fn channel_id(forum_id: &str, mode: ChannelMode) -> String {
    format!("{}_{}", forum_id, mode)
}

/// Build the three documents of a new forum.
///
/// Tenant, forum name and forum kind are copied onto both channels here
/// and never recomputed afterwards.
pub fn plan_forum(
    request: &CreateForum,
    forum_id: ForumId,
    roster: &[UserId],
    now: DateTime<Utc>,
) -> (Forum, [Channel; 2]) {
    let requester = &request.requester;
    let name = request.name.trim().to_string();

    let moderators = BTreeSet::from([requester.uid.clone()]);
    let mut members: BTreeSet<UserId> = roster.iter().cloned().collect();
    members.insert(requester.uid.clone());

    let forum = Forum {
        id: forum_id,
        name,
        kind: request.kind,
        tenant_id: requester.tenant_id.clone(),
        creator_id: requester.uid.clone(),
        moderators,
        members,
        created_at: now,
    };

    let channel = |mode: ChannelMode, name: &str| Channel {
        id: channel_id(&forum.id, mode),
        name: name.to_string(),
        forum_id: Some(forum.id.clone()),
        parent_id: Some(forum.id.clone()),
        forum_name: Some(forum.name.clone()),
        forum_kind: Some(forum.kind),
        tenant_id: forum.tenant_id.clone(),
        mode,
        locked: mode == ChannelMode::Announcement,
        moderators: forum.moderators.clone(),
        members: Some(forum.members.clone()),
        created_at: now,
    };
    let channels = [
        channel(ChannelMode::Announcement, ANNOUNCEMENT_CHANNEL_NAME),
        channel(ChannelMode::Discussion, DISCUSSION_CHANNEL_NAME),
    ];

    (forum, channels)
}
