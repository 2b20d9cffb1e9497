use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};

use kelas_db::Database;
use kelas_forum::{ChannelDirectory, ForumProvisioner, MessageStream, TenantResolver};
use kelas_types::api::Claims;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub provisioner: ForumProvisioner,
    pub directory: ChannelDirectory,
    pub messages: MessageStream,
    pub tenants: TenantResolver,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Wire the forum services over one database.
    pub fn new(db: Arc<Database>, directory: ChannelDirectory, messages: MessageStream, jwt_secret: String) -> Self {
        Self {
            provisioner: ForumProvisioner::new(db.clone()),
            tenants: TenantResolver::new(db.clone()),
            directory,
            messages,
            db,
            jwt_secret,
        }
    }
}

/// Mint a bearer token for `uid`. Production tokens come from the auth
/// service; this is for local tooling and tests sharing the same secret.
pub fn issue_token(secret: &str, uid: &str, ttl: chrono::Duration) -> anyhow::Result<String> {
    let claims = Claims {
        sub: uid.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
