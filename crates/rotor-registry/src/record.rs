//! Domain types for registered workers.

/// Stable unique identifier of a worker, as keyed by the state feed.
pub type WorkerKey = String;

/// Label value used when the feed omits an opaque label field.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A registered backend worker eligible for proxied traffic.
///
/// This is the registry's view of one worker after snapshot normalization:
/// validated url, millisecond `upload_at`, and labels defaulted where the
/// feed left them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    /// Key the feed registered this worker under. Never empty.
    pub key: WorkerKey,
    /// Base address traffic is forwarded to. Never empty.
    pub url: String,
    /// Logical ordering timestamp, epoch milliseconds.
    pub upload_at: i64,
    /// Opaque version label, `"unknown"` when the feed omits it.
    pub version: String,
    /// Opaque registrar label, `"unknown"` when the feed omits it.
    pub runner_by: String,
}
