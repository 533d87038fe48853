//! rotor-registry: the worker registry and round-robin dispatcher.
//!
//! An externally pushed desired-state snapshot is reconciled into a key to
//! record mapping with a derived dispatch order (ascending `upload_at`,
//! first-seen order on ties) and a cursor that stays stable across
//! reconciles. The dispatcher hands out exactly one worker per call,
//! rotating through that order.
//!
//! The registry handle is `Clone + Send + Sync` and is the only writer of
//! the mapping, order and cursor; the dispatcher and read-only consumers go
//! through its methods.

pub mod dispatcher;
pub mod error;
pub mod normalize;
pub mod record;
pub mod registry;
pub mod snapshot;

pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use record::{WorkerKey, WorkerRecord};
pub use registry::{ReconcileDiff, WorkerRegistry};
pub use snapshot::{RawWorker, WorkerSnapshot};
