//! Applies feed events to the worker registry.

use rotor_registry::{ReconcileDiff, WorkerRegistry};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::event::FeedEvent;

/// Bridges a state feed to the worker registry.
///
/// Snapshot events reconcile the registry; error events are logged and
/// absorbed, so registered workers keep serving on stale state until the
/// feed recovers. Any `mpsc` producer can act as the feed.
#[derive(Clone)]
pub struct FeedSync {
    registry: WorkerRegistry,
}

impl FeedSync {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    /// Apply one feed event. Returns the reconcile diff for snapshot
    /// events, `None` for absorbed errors.
    pub fn apply(&self, event: FeedEvent) -> Option<ReconcileDiff> {
        match event {
            FeedEvent::Snapshot { initial, workers } => {
                let diff = self.registry.reconcile(&workers);
                if initial {
                    info!(workers = self.registry.len(), "initial worker snapshot applied");
                } else if !diff.is_empty() {
                    info!(
                        added = ?diff.added,
                        removed = ?diff.removed,
                        changed = ?diff.changed,
                        workers = self.registry.len(),
                        "worker set updated"
                    );
                } else {
                    debug!("worker snapshot unchanged");
                }
                Some(diff)
            }
            FeedEvent::Error(err) => {
                warn!(
                    error = %err,
                    workers = self.registry.len(),
                    "state feed error, retaining registered workers"
                );
                None
            }
        }
    }

    /// Drain feed events until the channel closes or shutdown is signaled.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            self.apply(event);
                        }
                        None => {
                            debug!("feed channel closed, sync stopping");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("feed sync stopping");
                    break;
                }
            }
        }
    }
}
