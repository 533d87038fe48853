//! Timestamp normalization for feed snapshots.
//!
//! The state feed delivers `upload_at` in heterogeneous shapes: an epoch
//! number, date-like text, or an unresolved server-time placeholder object.
//! [`normalize_upload_at`] maps every shape to epoch milliseconds in one
//! place, at ingestion; anything unreadable falls back to the time the
//! snapshot was received.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Outcome of normalizing a raw `upload_at` value.
///
/// `Fallback` means the value could not be derived from the input and the
/// receipt time was used instead. The registry keeps a previously assigned
/// timestamp when an update normalizes to `Fallback`, so re-delivering an
/// identical snapshot never re-stamps a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadAt {
    /// Derived from the input value.
    Explicit(i64),
    /// Input missing or unreadable; receipt time assigned.
    Fallback(i64),
}

impl UploadAt {
    /// The normalized epoch-millisecond value, whichever way it was derived.
    pub fn millis(self) -> i64 {
        match self {
            UploadAt::Explicit(ms) | UploadAt::Fallback(ms) => ms,
        }
    }
}

/// Normalize a raw snapshot `upload_at` value to epoch milliseconds.
///
/// Accepted inputs:
/// - JSON number: epoch milliseconds as-is (floats truncated);
/// - JSON string: integer text as epoch milliseconds, else RFC 3339, else
///   `YYYY-MM-DD HH:MM:SS`, else `YYYY-MM-DD` (naive forms read as UTC);
/// - JSON object: the feed's unresolved server-time placeholder;
/// - anything else (missing, null, bool, array, unparseable text).
///
/// The last two fall back to `received_at_ms`.
pub fn normalize_upload_at(raw: Option<&Value>, received_at_ms: i64) -> UploadAt {
    let Some(value) = raw else {
        return UploadAt::Fallback(received_at_ms);
    };

    match value {
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                UploadAt::Explicit(ms)
            } else if let Some(f) = n.as_f64() {
                UploadAt::Explicit(f as i64)
            } else {
                UploadAt::Fallback(received_at_ms)
            }
        }
        Value::String(s) => match parse_datetime_text(s) {
            Some(ms) => UploadAt::Explicit(ms),
            None => UploadAt::Fallback(received_at_ms),
        },
        // An object is the feed's unresolved server-time placeholder: the
        // real value never arrives, so the receipt time stands in for it.
        Value::Object(_) => UploadAt::Fallback(received_at_ms),
        _ => UploadAt::Fallback(received_at_ms),
    }
}

/// Parse date-like text to epoch milliseconds.
fn parse_datetime_text(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // Integer text is taken as epoch milliseconds directly.
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

/// Render epoch milliseconds as an RFC 3339 UTC timestamp with millisecond
/// precision, e.g. `2024-05-01T12:00:00.000Z`.
///
/// Out-of-range values render as the epoch origin rather than failing; the
/// health surface never errors on display.
pub fn to_iso8601(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
