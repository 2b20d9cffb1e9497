use tokio::sync::broadcast;

use kelas_types::models::{ChannelId, TenantId};

const FEED_CAPACITY: usize = 256;

/// A committed write that live queries may need to re-run for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Channels were created or replaced under this tenant (`None` = unscoped).
    ChannelsChanged { tenant_id: Option<TenantId> },
    /// A message was appended to this channel.
    MessagesChanged { channel_id: ChannelId },
}

impl StoreChange {
    /// Whether a directory query scoped to `tenant` can observe this change.
    /// Unscoped queries see every channel, so they match every channel change.
    pub fn touches_directory(&self, tenant: Option<&str>) -> bool {
        match self {
            Self::ChannelsChanged { tenant_id } => match tenant {
                None => true,
                Some(t) => tenant_id.as_deref() == Some(t),
            },
            Self::MessagesChanged { .. } => false,
        }
    }

    pub fn touches_channel(&self, channel: &str) -> bool {
        matches!(self, Self::MessagesChanged { channel_id } if channel_id == channel)
    }
}

/// Notification fan-out for committed writes.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreChange>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }

    /// Publish a change. Having no listeners is not an error.
    pub fn publish(&self, change: StoreChange) {
        let _ = self.tx.send(change);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
