//! Events delivered by a state feed.

use rotor_registry::WorkerSnapshot;

use crate::error::FeedError;

/// One delivery from a state feed.
///
/// A feed always publishes the complete desired worker set, never a delta,
/// so a single event is enough to rebuild the registry from scratch.
#[derive(Debug)]
pub enum FeedEvent {
    /// A complete desired-state snapshot.
    Snapshot {
        /// True for the first snapshot after (re)subscription. Errors
        /// before the first successful delivery do not consume this flag.
        initial: bool,
        workers: WorkerSnapshot,
    },
    /// The feed failed to produce a snapshot. Consumers keep whatever
    /// state they already hold.
    Error(FeedError),
}
