//! File-backed state feed.
//!
//! Polls a JSON document on disk and republishes it as snapshot events. The
//! document is an object keyed by worker key (or `null` for the empty set),
//! the same shape a remote feed would push. Unchanged content is not
//! re-emitted; read and parse failures become error events.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rotor_registry::WorkerSnapshot;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::FeedError;
use crate::event::FeedEvent;

pub struct FileFeed {
    path: PathBuf,
    interval: Duration,
}

impl FileFeed {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self { path: path.into(), interval }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Poll the document until shutdown, publishing events into `events`.
    ///
    /// The first successful read is flagged as the initial snapshot; later
    /// reads are only published when the file content changed. The poller
    /// stops on shutdown or when the consumer side of the channel is gone.
    pub async fn run(self, events: mpsc::Sender<FeedEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(
            path = %self.path.display(),
            interval_ms = self.interval.as_millis() as u64,
            "state feed started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        let mut last_payload: Option<Vec<u8>> = None;
        let mut initial = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let event = match self.load().await {
                        Ok((bytes, workers)) => {
                            if last_payload.as_deref() == Some(bytes.as_slice()) {
                                continue;
                            }
                            last_payload = Some(bytes);
                            let event = FeedEvent::Snapshot { initial, workers };
                            initial = false;
                            event
                        }
                        Err(err) => FeedEvent::Error(err),
                    };
                    if events.send(event).await.is_err() {
                        debug!("feed consumer dropped, poller stopping");
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    debug!("state feed stopping");
                    break;
                }
            }
        }
    }

    async fn load(&self) -> Result<(Vec<u8>, WorkerSnapshot), FeedError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let snapshot = serde_json::from_slice(&bytes)?;
        Ok((bytes, snapshot))
    }
}
