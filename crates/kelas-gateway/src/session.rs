use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kelas_forum::{SubscribeError, Subscription};
use kelas_types::events::{GatewayCommand, GatewayEvent};
use kelas_types::models::{ChannelId, UserProfile};

use crate::dispatcher::Dispatcher;

/// One forwarding task relaying a subscription into the outbound queue.
struct Watch {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Watch {
    fn spawn<T: Send + 'static>(
        mut sub: Subscription<T>,
        out: mpsc::Sender<GatewayEvent>,
        stop: CancellationToken,
        wrap: fn(T) -> GatewayEvent,
    ) -> Self {
        let token = stop.clone();
        let task = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = sub.recv() => next,
                };
                let Some(snapshot) = next else { break };
                if out.send(wrap(snapshot)).await.is_err() {
                    break;
                }
            }
            // Dropping `sub` stops its producer.
        });
        Self { stop, task }
    }

    /// Stop forwarding and wait until nothing more can be queued by this watch.
    async fn close(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Per-connection subscription state: at most one directory watch and one
/// channel watch.
pub(crate) struct Session {
    profile: UserProfile,
    dispatcher: Dispatcher,
    out: mpsc::Sender<GatewayEvent>,
    conn_token: CancellationToken,
    directory: Option<Watch>,
    channel: Option<(ChannelId, Watch)>,
}

impl Session {
    pub(crate) fn new(
        profile: UserProfile,
        dispatcher: Dispatcher,
        out: mpsc::Sender<GatewayEvent>,
        conn_token: CancellationToken,
    ) -> Self {
        Self {
            profile,
            dispatcher,
            out,
            conn_token,
            directory: None,
            channel: None,
        }
    }

    pub(crate) fn uid(&self) -> &str {
        &self.profile.uid
    }

    pub(crate) async fn handle_command(&mut self, cmd: GatewayCommand) {
        match cmd {
            GatewayCommand::Identify { .. } => {
                debug!("{} sent Identify twice, ignoring", self.profile.uid);
            }
            GatewayCommand::WatchDirectory => self.watch_directory(),
            GatewayCommand::WatchChannel { channel_id } => self.watch_channel(channel_id).await,
            GatewayCommand::UnwatchChannel => {
                if let Some((channel_id, watch)) = self.channel.take() {
                    debug!("{} unwatching {}", self.profile.uid, channel_id);
                    watch.close().await;
                }
            }
        }
    }

    fn watch_directory(&mut self) {
        if self.directory.is_some() {
            return;
        }
        info!("{} watching directory", self.profile.uid);
        let sub = self.dispatcher.directory().subscribe(&self.profile);
        self.directory = Some(Watch::spawn(
            sub,
            self.out.clone(),
            self.conn_token.child_token(),
            GatewayEvent::DirectoryUpdate,
        ));
    }

    async fn watch_channel(&mut self, channel_id: ChannelId) {
        if matches!(&self.channel, Some((current, _)) if *current == channel_id) {
            return;
        }

        // The previous channel must be fully stopped before the new one can
        // emit, so the client never sees an old feed after a new one.
        if let Some((previous, watch)) = self.channel.take() {
            debug!("{} leaving {}", self.profile.uid, previous);
            watch.close().await;
        }

        let subscribed = match self
            .dispatcher
            .directory()
            .channel_for(&self.profile, &channel_id)
            .await
        {
            Ok(channel) => self.dispatcher.messages().subscribe(&channel.id).await,
            Err(e) => Err(e),
        };

        match subscribed {
            Ok(sub) => {
                info!("{} watching {}", self.profile.uid, channel_id);
                let watch = Watch::spawn(
                    sub,
                    self.out.clone(),
                    self.conn_token.child_token(),
                    GatewayEvent::ChannelUpdate,
                );
                self.channel = Some((channel_id, watch));
            }
            Err(e) => {
                if let SubscribeError::Store(source) = &e {
                    warn!("{} could not watch {}: {:#}", self.profile.uid, channel_id, source);
                }
                let _ = self
                    .out
                    .send(GatewayEvent::Error { message: e.to_string() })
                    .await;
            }
        }
    }

    /// Stop every watch owned by this session.
    pub(crate) async fn close(mut self) {
        if let Some(watch) = self.directory.take() {
            watch.close().await;
        }
        if let Some((_, watch)) = self.channel.take() {
            watch.close().await;
        }
    }
}
