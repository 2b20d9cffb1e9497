use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (tenants, profiles, rosters)");
        conn.execute_batch(
            "
            CREATE TABLE tenants (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                tier        TEXT
            );

            CREATE TABLE profiles (
                uid             TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL,
                role            TEXT NOT NULL,
                tenant_id       TEXT,
                photo_url       TEXT
            );

            CREATE TABLE class_roster (
                class_id    TEXT NOT NULL,
                student_id  TEXT NOT NULL,
                PRIMARY KEY (class_id, student_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (forums, channels, messages)");
        conn.execute_batch(
            "
            CREATE TABLE forums (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                kind        TEXT NOT NULL,
                tenant_id   TEXT,
                creator_id  TEXT NOT NULL,
                moderators  TEXT NOT NULL,
                members     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE channels (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                forum_id    TEXT REFERENCES forums(id),
                forum_name  TEXT,
                forum_kind  TEXT,
                tenant_id   TEXT,
                mode        TEXT NOT NULL,
                locked      INTEGER NOT NULL,
                moderators  TEXT NOT NULL DEFAULT '[]',
                members     TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_channels_tenant ON channels(tenant_id);

            CREATE TABLE messages (
                id                      TEXT PRIMARY KEY,
                channel_id              TEXT NOT NULL REFERENCES channels(id),
                content                 TEXT NOT NULL,
                sender_id               TEXT NOT NULL,
                sender_role             TEXT NOT NULL,
                sender_display_name     TEXT NOT NULL,
                sender_avatar           TEXT,
                reply_to_id             TEXT REFERENCES messages(id),
                reply_to_author_name    TEXT,
                created_at              TEXT
            );

            CREATE INDEX idx_messages_channel ON messages(channel_id);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
