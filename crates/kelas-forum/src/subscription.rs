use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use kelas_db::Database;
use kelas_db::feed::StoreChange;

/// Handle to a live view. Snapshots arrive in production order; each one
/// fully replaces the previous.
///
/// The producer stops when [`cancel`](Self::cancel) is called or when the
/// handle is dropped.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// Next snapshot, or `None` once the producer has stopped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a producer that runs `query` once, then again after every store
/// change accepted by `relevant`. `query` runs on the blocking pool;
/// returning `None` skips the emission and keeps the consumer's last view.
pub(crate) fn spawn_live_query<T, Q, R>(
    db: Arc<Database>,
    buffer: usize,
    label: String,
    relevant: R,
    query: Q,
) -> Subscription<T>
where
    T: Send + 'static,
    Q: Fn(&Database) -> Option<T> + Send + Sync + 'static,
    R: Fn(&StoreChange) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    // Subscribe before the first query so no commit can slip between them.
    let mut changes = db.changes();
    let query = Arc::new(query);

    tokio::spawn(async move {
        let mut stale = true;
        loop {
            if stale {
                stale = false;
                let db = db.clone();
                let query = query.clone();
                let produced = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    res = tokio::task::spawn_blocking(move || query(&db)) => res,
                };

                match produced {
                    Ok(Some(snapshot)) => {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            sent = tx.send(snapshot) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!("{} query task failed: {}", label, e),
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => stale = relevant(&change),
                    Err(RecvError::Lagged(n)) => {
                        warn!("{} change feed lagged by {} events, re-querying", label, n);
                        stale = true;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("{} subscription closed", label);
    });

    Subscription { rx, cancel }
}
