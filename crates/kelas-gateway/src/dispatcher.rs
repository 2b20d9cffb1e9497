use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use kelas_db::Database;
use kelas_forum::{ChannelDirectory, MessageStream};
use kelas_types::models::UserId;

/// Shared gateway state: the forum services every connection streams from,
/// plus the set of live connections.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,
    directory: ChannelDirectory,
    messages: MessageStream,
    jwt_secret: String,

    /// conn_id -> user_id
    connections: RwLock<HashMap<Uuid, UserId>>,

    /// Parent of every connection token. Cancelled on server shutdown.
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        directory: ChannelDirectory,
        messages: MessageStream,
        jwt_secret: String,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                directory,
                messages,
                jwt_secret,
                connections: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    pub fn directory(&self) -> &ChannelDirectory {
        &self.inner.directory
    }

    pub fn messages(&self) -> &MessageStream {
        &self.inner.messages
    }

    pub fn jwt_secret(&self) -> &str {
        &self.inner.jwt_secret
    }

    /// Track a new connection for `user_id`. The returned token is cancelled
    /// when the connection ends or the gateway shuts down.
    pub async fn register(&self, user_id: &str) -> (Uuid, CancellationToken) {
        let conn_id = Uuid::new_v4();
        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, user_id.to_string());
        debug!("Registered connection {} for {}", conn_id, user_id);
        (conn_id, self.inner.shutdown.child_token())
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        if let Some(user_id) = self.inner.connections.write().await.remove(&conn_id) {
            debug!("Unregistered connection {} for {}", conn_id, user_id);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Close every connection and stop their subscriptions.
    pub fn shutdown(&self) {
        info!("Gateway shutting down");
        self.inner.shutdown.cancel();
    }
}
