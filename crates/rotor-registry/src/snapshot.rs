//! Desired-state snapshot input.
//!
//! The state feed pushes the complete desired worker set as a JSON object
//! keyed by worker key. Entry order in the document matters: it is the
//! tie-break for workers sharing an `upload_at`. The deserializer keeps that
//! order instead of going through an unordered map.

use std::fmt;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;

use crate::record::WorkerKey;

/// One raw worker entry as delivered by the feed, before normalization.
///
/// Unknown fields are ignored; field names are accepted in both snake_case
/// and the feed's camelCase.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawWorker {
    /// Base address. Entries with a missing or blank url are invalid.
    pub url: Option<String>,
    /// Raw ordering timestamp in any of the feed's shapes.
    #[serde(alias = "uploadAt")]
    pub upload_at: Option<Value>,
    /// Opaque version label.
    pub version: Option<String>,
    /// Opaque registrar label.
    #[serde(alias = "runnerBy")]
    pub runner_by: Option<String>,
}

/// The complete desired worker set at one point in time.
///
/// Entries preserve the document order of the feed payload. A duplicate key
/// keeps its first position with the last value, matching how the feed's
/// object semantics resolve duplicates. A JSON `null` document is the empty
/// set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSnapshot {
    entries: Vec<(WorkerKey, RawWorker)>,
}

impl WorkerSnapshot {
    /// Empty desired state: every registered worker is to be removed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from `(key, entry)` pairs, preserving their order.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (WorkerKey, RawWorker)>,
    {
        let mut snapshot = Self::default();
        for (key, raw) in entries {
            snapshot.insert(key, raw);
        }
        snapshot
    }

    fn insert(&mut self, key: WorkerKey, raw: RawWorker) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = raw,
            None => self.entries.push((key, raw)),
        }
    }

    /// Number of entries, valid or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&WorkerKey, &RawWorker)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl<'de> Deserialize<'de> for WorkerSnapshot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SnapshotVisitor;

        impl<'de> Visitor<'de> for SnapshotVisitor {
            type Value = WorkerSnapshot;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of worker key to worker entry, or null")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut snapshot = WorkerSnapshot::default();
                while let Some((key, raw)) = map.next_entry::<WorkerKey, RawWorker>()? {
                    snapshot.insert(key, raw);
                }
                Ok(snapshot)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(WorkerSnapshot::empty())
            }
        }

        deserializer.deserialize_any(SnapshotVisitor)
    }
}
