//! Error types for dispatch operations.

use thiserror::Error;

/// Errors surfaced when selecting a worker for dispatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The registry holds no workers; nothing can receive traffic.
    #[error("no worker available")]
    NoWorkerAvailable,
}
