//! rotor-feed: desired-state delivery for the worker registry.
//!
//! A state feed pushes complete snapshots of the desired worker set (never
//! deltas) plus error events. [`FeedSync`] applies those events to a
//! `WorkerRegistry`; [`FileFeed`] is the built-in source, polling a JSON
//! document on disk.

pub mod error;
pub mod event;
pub mod file;
pub mod sync;

pub use error::FeedError;
pub use event::FeedEvent;
pub use file::FileFeed;
pub use sync::FeedSync;
