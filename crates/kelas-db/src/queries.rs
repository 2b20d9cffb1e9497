use crate::Database;
use crate::feed::StoreChange;
use crate::models::{
    ChannelRow, ForumRow, MessageRow, ProfileRow, TenantMismatch, encode_set, format_timestamp,
};
use anyhow::{Result, bail};
use rusqlite::{Connection, Row, Transaction, params};
use tracing::debug;

use kelas_types::models::{Channel, Forum, Message, Tenant, UserProfile};

const CHANNEL_COLUMNS: &str = "id, name, forum_id, forum_name, forum_kind, tenant_id, mode, locked, moderators, members, created_at";

const MESSAGE_COLUMNS: &str = "id, channel_id, content, sender_id, sender_role, sender_display_name, sender_avatar, reply_to_id, reply_to_author_name, created_at";

impl Database {
    // -- Tenants & profiles (owned by the admin/auth subsystems) --

    pub fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tenants (id, name, tier) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, tier = excluded.tier",
                params![tenant.id, tenant.name, tenant.tier],
            )?;
            Ok(())
        })
    }

    pub fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, tier FROM tenants WHERE id = ?1",
                [id],
                |row| {
                    Ok(Tenant {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        tier: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (uid, display_name, role, tenant_id, photo_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(uid) DO UPDATE SET
                    display_name = excluded.display_name,
                    role = excluded.role,
                    tenant_id = excluded.tenant_id,
                    photo_url = excluded.photo_url",
                params![
                    profile.uid,
                    profile.display_name,
                    profile.role.as_str(),
                    profile.tenant_id,
                    profile.photo_url
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT uid, display_name, role, tenant_id, photo_url FROM profiles WHERE uid = ?1",
                [uid],
                |row| {
                    Ok(ProfileRow {
                        uid: row.get(0)?,
                        display_name: row.get(1)?,
                        role: row.get(2)?,
                        tenant_id: row.get(3)?,
                        photo_url: row.get(4)?,
                    })
                },
            )
            .optional()
        })?;

        Ok(row.map(ProfileRow::into_model).transpose()?)
    }

    // -- Class rosters (owned by class management) --

    /// Replace the enrolled student list of a class.
    pub fn replace_class_roster(&self, class_id: &str, student_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM class_roster WHERE class_id = ?1", [class_id])?;
            for student_id in student_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO class_roster (class_id, student_id) VALUES (?1, ?2)",
                    params![class_id, student_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_class_roster(&self, class_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT student_id FROM class_roster WHERE class_id = ?1 ORDER BY student_id",
            )?;
            let ids = stmt
                .query_map([class_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    // -- Forums & channels --

    /// Write a forum and its channels as one transaction.
    ///
    /// Existing rows with the same ids are overwritten (last writer wins),
    /// except for their tenant and creation time. A row owned by another
    /// tenant fails the whole write with [`TenantMismatch`]. On any error
    /// nothing is committed. Listeners are notified only after the commit
    /// succeeds.
    pub fn provision_forum(&self, forum: &Forum, channels: &[Channel]) -> Result<()> {
        for channel in channels {
            if channel.forum_id.as_deref() != Some(forum.id.as_str())
                || channel.parent_id != channel.forum_id
            {
                bail!("channel '{}' does not belong to forum '{}'", channel.id, forum.id);
            }
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            ensure_owner(&tx, "forums", &forum.id, forum.tenant_id.as_deref())?;
            upsert_forum(&tx, forum)?;
            for channel in channels {
                ensure_owner(&tx, "channels", &channel.id, channel.tenant_id.as_deref())?;
                upsert_channel(&tx, channel)?;
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!("Provisioned forum {} with {} channels", forum.id, channels.len());
        self.notify(StoreChange::ChannelsChanged {
            tenant_id: forum.tenant_id.clone(),
        });
        Ok(())
    }

    /// Insert a channel outside of provisioning, for seeding standalone
    /// channels in tests.
    #[cfg(any(test, feature = "test-util"))]
    pub fn insert_standalone_channel(&self, channel: &Channel) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            upsert_channel(&tx, channel)?;
            tx.commit()?;
            Ok(())
        })?;

        self.notify(StoreChange::ChannelsChanged {
            tenant_id: channel.tenant_id.clone(),
        });
        Ok(())
    }

    pub fn get_forum(&self, id: &str) -> Result<Option<Forum>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, kind, tenant_id, creator_id, moderators, members, created_at
                 FROM forums WHERE id = ?1",
                [id],
                |row| {
                    Ok(ForumRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        tenant_id: row.get(3)?,
                        creator_id: row.get(4)?,
                        moderators: row.get(5)?,
                        members: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                },
            )
            .optional()
        })?;

        Ok(row.map(ForumRow::into_model).transpose()?)
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                [id],
                channel_row,
            )
            .optional()
        })?;

        Ok(row.map(ChannelRow::into_model).transpose()?)
    }

    /// Channels visible to a tenant-scoped query. `None` is unscoped and
    /// returns every channel.
    pub fn list_channels(&self, tenant_id: Option<&str>) -> Result<Vec<Channel>> {
        let rows = self.with_conn(|conn| match tenant_id {
            Some(tenant) => query_channels(
                conn,
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE tenant_id = ?1 ORDER BY rowid"),
                [tenant],
            ),
            None => query_channels(
                conn,
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY rowid"),
                params![],
            ),
        })?;

        decode_all(rows, ChannelRow::into_model)
    }

    pub fn list_forum_channels(&self, forum_id: &str) -> Result<Vec<Channel>> {
        let rows = self.with_conn(|conn| {
            query_channels(
                conn,
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE forum_id = ?1 ORDER BY rowid"),
                [forum_id],
            )
        })?;

        decode_all(rows, ChannelRow::into_model)
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    message.id,
                    message.channel_id,
                    message.content,
                    message.sender_id,
                    message.sender_role.as_str(),
                    message.sender_display_name,
                    message.sender_avatar,
                    message.reply_to_id,
                    message.reply_to_author_name,
                    message.created_at.as_ref().map(format_timestamp),
                ],
            )?;
            Ok(())
        })?;

        self.notify(StoreChange::MessagesChanged {
            channel_id: message.channel_id.clone(),
        });
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_row,
            )
            .optional()
        })?;

        Ok(row.map(MessageRow::into_model).transpose()?)
    }

    /// All messages of a channel in insertion order. Callers sort.
    pub fn list_messages(&self, channel_id: &str) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([channel_id], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        decode_all(rows, MessageRow::into_model)
    }
}

/// Fail if `id` already exists in `table` under a different tenant.
fn ensure_owner(tx: &Transaction<'_>, table: &'static str, id: &str, requested: Option<&str>) -> Result<()> {
    let owner: Option<Option<String>> = tx
        .query_row(
            &format!("SELECT tenant_id FROM {table} WHERE id = ?1"),
            [id],
            |row| row.get(0),
        )
        .optional()?;

    match owner {
        Some(owner) if owner.as_deref() != requested => Err(TenantMismatch {
            table,
            id: id.to_string(),
            owner,
            requested: requested.map(str::to_string),
        }
        .into()),
        _ => Ok(()),
    }
}

fn upsert_forum(tx: &Transaction<'_>, forum: &Forum) -> Result<()> {
    tx.execute(
        "INSERT INTO forums (id, name, kind, tenant_id, creator_id, moderators, members, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            kind = excluded.kind,
            creator_id = excluded.creator_id,
            moderators = excluded.moderators,
            members = excluded.members",
        params![
            forum.id,
            forum.name,
            forum.kind.as_str(),
            forum.tenant_id,
            forum.creator_id,
            encode_set(&forum.moderators),
            encode_set(&forum.members),
            format_timestamp(&forum.created_at),
        ],
    )?;
    Ok(())
}

fn upsert_channel(tx: &Transaction<'_>, channel: &Channel) -> Result<()> {
    tx.execute(
        &format!(
            "INSERT INTO channels ({CHANNEL_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                forum_id = excluded.forum_id,
                forum_name = excluded.forum_name,
                forum_kind = excluded.forum_kind,
                mode = excluded.mode,
                locked = excluded.locked,
                moderators = excluded.moderators,
                members = excluded.members"
        ),
        params![
            channel.id,
            channel.name,
            channel.forum_id,
            channel.forum_name,
            channel.forum_kind.map(|k| k.as_str()),
            channel.tenant_id,
            channel.mode.as_str(),
            channel.locked,
            encode_set(&channel.moderators),
            channel.members.as_ref().map(encode_set),
            format_timestamp(&channel.created_at),
        ],
    )?;
    Ok(())
}

fn channel_row(row: &Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        forum_id: row.get(2)?,
        forum_name: row.get(3)?,
        forum_kind: row.get(4)?,
        tenant_id: row.get(5)?,
        mode: row.get(6)?,
        locked: row.get(7)?,
        moderators: row.get(8)?,
        members: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        content: row.get(2)?,
        sender_id: row.get(3)?,
        sender_role: row.get(4)?,
        sender_display_name: row.get(5)?,
        sender_avatar: row.get(6)?,
        reply_to_id: row.get(7)?,
        reply_to_author_name: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn query_channels<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<ChannelRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, channel_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn decode_all<R, T, E>(rows: Vec<R>, decode: fn(R) -> std::result::Result<T, E>) -> Result<Vec<T>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    rows.into_iter()
        .map(|row| decode(row).map_err(anyhow::Error::from))
        .collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
