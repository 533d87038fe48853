//! Feed error types.

use thiserror::Error;

/// Errors a state feed can emit in place of a snapshot.
///
/// These are absorbed by the consumer: an error event never clears
/// previously delivered workers.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The backing source could not be read.
    #[error("state source read failed: {0}")]
    Read(#[from] std::io::Error),

    /// The source produced bytes that do not parse as a snapshot.
    #[error("state source returned a malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}
