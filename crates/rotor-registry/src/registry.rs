//! The worker registry: desired-state reconciliation and rotation.
//!
//! [`WorkerRegistry`] owns the key to record mapping, the derived dispatch
//! order (ascending `upload_at`, first-seen order on ties), and the
//! round-robin cursor. All three live behind one mutex: reconciliation and
//! rotation serialize on it, and the rotate step never suspends, so no two
//! callers can observe the same cursor value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::normalize::{normalize_upload_at, UploadAt};
use crate::record::{WorkerKey, WorkerRecord, UNKNOWN_LABEL};
use crate::snapshot::{RawWorker, WorkerSnapshot};

/// Summary of one reconcile pass: which keys appeared, vanished, or had a
/// field change. Informational only; ordering and cursor semantics do not
/// depend on it. Key lists are sorted for stable logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileDiff {
    pub added: Vec<WorkerKey>,
    pub removed: Vec<WorkerKey>,
    pub changed: Vec<WorkerKey>,
}

impl ReconcileDiff {
    /// True when the snapshot left the registry untouched.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// A record plus its first-seen ticket, the `upload_at` tie-break.
///
/// The ticket is assigned once when a key first registers and survives
/// updates, so workers sharing an `upload_at` keep their arrival order no
/// matter how later snapshots list them.
struct Slot {
    record: WorkerRecord,
    seq: u64,
}

struct RegistryState {
    slots: HashMap<WorkerKey, Slot>,
    /// Keys sorted by `(upload_at, seq)`; recomputed on every reconcile.
    order: Vec<WorkerKey>,
    /// Index into `order` of the next worker to dispatch. Always zero when
    /// `order` is empty, always in range otherwise.
    cursor: usize,
    next_seq: u64,
}

/// Shared handle to the worker registry.
///
/// Cloning is cheap; all clones address the same state. Every mutation and
/// read goes through these methods, so the mapping, order and cursor are
/// never exposed for direct writes.
#[derive(Clone)]
pub struct WorkerRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                slots: HashMap::new(),
                order: Vec::new(),
                cursor: 0,
                next_seq: 0,
            })),
        }
    }

    /// Apply a desired-state snapshot received now.
    ///
    /// Entries present in the snapshot are inserted or updated in place;
    /// keys the snapshot no longer names are removed. Applying the same
    /// snapshot twice is a no-op the second time.
    pub fn reconcile(&self, snapshot: &WorkerSnapshot) -> ReconcileDiff {
        self.reconcile_at(snapshot, epoch_ms())
    }

    /// Apply a desired-state snapshot with an explicit receipt time, which
    /// stands in for unresolvable `upload_at` values.
    pub fn reconcile_at(&self, snapshot: &WorkerSnapshot, received_at_ms: i64) -> ReconcileDiff {
        let mut state = self.state.lock().expect("registry lock");
        state.reconcile(snapshot, received_at_ms)
    }

    /// Return the record at the cursor and advance by one, as a single
    /// indivisible step. `None` when no workers are registered.
    pub fn rotate(&self) -> Option<WorkerRecord> {
        let mut state = self.state.lock().expect("registry lock");
        state.rotate()
    }

    /// All records in dispatch order. Never touches the cursor.
    pub fn snapshot(&self) -> Vec<WorkerRecord> {
        let state = self.state.lock().expect("registry lock");
        state
            .order
            .iter()
            .map(|key| state.slots[key].record.clone())
            .collect()
    }

    /// Count of registered workers.
    pub fn len(&self) -> usize {
        self.state.lock().expect("registry lock").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cursor index, for diagnostics.
    pub fn cursor_position(&self) -> usize {
        self.state.lock().expect("registry lock").cursor
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryState {
    fn reconcile(&mut self, snapshot: &WorkerSnapshot, received_at_ms: i64) -> ReconcileDiff {
        let mut diff = ReconcileDiff::default();

        // The key the cursor points at, re-found after the rebuild.
        let cursor_key: Option<WorkerKey> = self.order.get(self.cursor).cloned();

        // Upsert entries carrying a usable url. Invalid entries are treated
        // as absent: never added, removed below if previously present.
        for (key, raw) in snapshot.iter() {
            let Some(url) = valid_url(raw) else {
                warn!(worker = %key, "snapshot entry has no url, skipping");
                continue;
            };

            let upload_at = match normalize_upload_at(raw.upload_at.as_ref(), received_at_ms) {
                UploadAt::Explicit(ms) => ms,
                // A timestamp we had to stamp ourselves stays stable across
                // re-deliveries of the same snapshot.
                UploadAt::Fallback(ms) => self
                    .slots
                    .get(key.as_str())
                    .map(|slot| slot.record.upload_at)
                    .unwrap_or(ms),
            };

            let record = WorkerRecord {
                key: key.clone(),
                url: url.to_string(),
                upload_at,
                version: label_or_unknown(raw.version.as_deref()),
                runner_by: label_or_unknown(raw.runner_by.as_deref()),
            };

            match self.slots.get_mut(key.as_str()) {
                Some(slot) => {
                    if slot.record != record {
                        slot.record = record;
                        diff.changed.push(key.clone());
                    }
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.slots.insert(key.clone(), Slot { record, seq });
                    diff.added.push(key.clone());
                }
            }
        }

        // Remove keys the snapshot no longer names validly.
        let stale: Vec<WorkerKey> = self
            .slots
            .keys()
            .filter(|key| !snapshot.iter().any(|(k, raw)| k == *key && valid_url(raw).is_some()))
            .cloned()
            .collect();
        for key in stale {
            self.slots.remove(&key);
            diff.removed.push(key);
        }

        // Rebuild the dispatch order from scratch.
        let mut keys: Vec<WorkerKey> = self.slots.keys().cloned().collect();
        keys.sort_by_key(|key| {
            let slot = &self.slots[key];
            (slot.record.upload_at, slot.seq)
        });
        self.order = keys;

        // Cursor: follow the previously pointed-at key to its new position;
        // else keep the old index while it is still in range; else zero.
        self.cursor = cursor_key
            .and_then(|key| self.order.iter().position(|k| *k == key))
            .unwrap_or(if self.cursor < self.order.len() { self.cursor } else { 0 });

        diff.added.sort();
        diff.removed.sort();
        diff.changed.sort();

        debug!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            workers = self.order.len(),
            "snapshot reconciled"
        );

        diff
    }

    fn rotate(&mut self) -> Option<WorkerRecord> {
        if self.order.is_empty() {
            return None;
        }
        let key = &self.order[self.cursor];
        let record = self.slots[key].record.clone();
        self.cursor = (self.cursor + 1) % self.order.len();
        Some(record)
    }
}

/// The entry's url, trimmed, when usable.
fn valid_url(raw: &RawWorker) -> Option<&str> {
    match raw.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Some(url),
        _ => None,
    }
}

fn label_or_unknown(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN_LABEL.to_string(),
    }
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T0: i64 = 1_700_000_000_000;

    fn raw(url: &str, upload_at: i64) -> RawWorker {
        RawWorker {
            url: Some(url.to_string()),
            upload_at: Some(json!(upload_at)),
            version: None,
            runner_by: None,
        }
    }

    fn snap(entries: &[(&str, RawWorker)]) -> WorkerSnapshot {
        WorkerSnapshot::from_entries(
            entries.iter().map(|(k, raw)| (k.to_string(), raw.clone())),
        )
    }

    fn keys(registry: &WorkerRegistry) -> Vec<String> {
        registry.snapshot().into_iter().map(|r| r.key).collect()
    }

    #[test]
    fn reconcile_adds_valid_workers() {
        let registry = WorkerRegistry::new();
        let diff = registry.reconcile_at(
            &snap(&[("w-1", raw("http://one", 100)), ("w-2", raw("http://two", 200))]),
            T0,
        );

        assert_eq!(diff.added, ["w-1", "w-2"]);
        assert!(diff.removed.is_empty());
        assert!(diff.changed.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn order_is_ascending_upload_at() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[("w-1", raw("http://one", 100)), ("w-2", raw("http://two", 50))]),
            T0,
        );

        assert_eq!(keys(&registry), ["w-2", "w-1"]);
        assert_eq!(registry.rotate().unwrap().key, "w-2");
        assert_eq!(registry.rotate().unwrap().key, "w-1");
        assert_eq!(registry.rotate().unwrap().key, "w-2");
    }

    #[test]
    fn equal_upload_at_keeps_first_seen_order() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[
                ("w-b", raw("http://b", 100)),
                ("w-a", raw("http://a", 100)),
                ("w-c", raw("http://c", 100)),
            ]),
            T0,
        );
        assert_eq!(keys(&registry), ["w-b", "w-a", "w-c"]);

        // Re-listing the same workers in another order changes nothing.
        let diff = registry.reconcile_at(
            &snap(&[
                ("w-c", raw("http://c", 100)),
                ("w-b", raw("http://b", 100)),
                ("w-a", raw("http://a", 100)),
            ]),
            T0 + 10,
        );
        assert!(diff.is_empty());
        assert_eq!(keys(&registry), ["w-b", "w-a", "w-c"]);
    }

    #[test]
    fn entry_without_url_is_never_registered() {
        let registry = WorkerRegistry::new();
        let no_url = RawWorker { upload_at: Some(json!(100)), ..Default::default() };
        let blank_url = RawWorker { url: Some("   ".to_string()), ..Default::default() };
        let diff = registry.reconcile_at(
            &snap(&[("w-bad", no_url), ("w-blank", blank_url), ("w-ok", raw("http://ok", 1))]),
            T0,
        );

        assert_eq!(diff.added, ["w-ok"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn entry_turning_invalid_is_removed() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(&snap(&[("w-1", raw("http://one", 100))]), T0);

        let gone_bad = RawWorker { upload_at: Some(json!(100)), ..Default::default() };
        let diff = registry.reconcile_at(&snap(&[("w-1", gone_bad)]), T0 + 1);

        assert_eq!(diff.removed, ["w-1"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn keys_absent_from_snapshot_are_removed() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[("w-1", raw("http://one", 100)), ("w-2", raw("http://two", 200))]),
            T0,
        );

        let diff = registry.reconcile_at(&snap(&[("w-2", raw("http://two", 200))]), T0 + 1);
        assert_eq!(diff.removed, ["w-1"]);
        assert_eq!(keys(&registry), ["w-2"]);
    }

    #[test]
    fn empty_snapshot_clears_registry() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(&snap(&[("w-1", raw("http://one", 100))]), T0);

        let diff = registry.reconcile_at(&WorkerSnapshot::empty(), T0 + 1);
        assert_eq!(diff.removed, ["w-1"]);
        assert!(registry.is_empty());
        assert_eq!(registry.cursor_position(), 0);
        assert!(registry.rotate().is_none());
    }

    #[test]
    fn reapplying_same_snapshot_is_a_no_op() {
        let registry = WorkerRegistry::new();
        let snapshot = snap(&[
            ("w-1", raw("http://one", 100)),
            ("w-2", raw("http://two", 200)),
        ]);

        let first = registry.reconcile_at(&snapshot, T0);
        assert!(!first.is_empty());
        let before = registry.snapshot();

        let second = registry.reconcile_at(&snapshot, T0 + 5_000);
        assert!(second.is_empty());
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn fallback_timestamp_sticks_across_redeliveries() {
        let registry = WorkerRegistry::new();
        let placeholder = RawWorker {
            url: Some("http://one".to_string()),
            upload_at: Some(json!({ ".sv": "timestamp" })),
            version: None,
            runner_by: None,
        };
        let snapshot = snap(&[("w-1", placeholder)]);

        registry.reconcile_at(&snapshot, T0);
        assert_eq!(registry.snapshot()[0].upload_at, T0);

        // Same payload later: the stamped value must not move.
        let diff = registry.reconcile_at(&snapshot, T0 + 60_000);
        assert!(diff.is_empty());
        assert_eq!(registry.snapshot()[0].upload_at, T0);
    }

    #[test]
    fn update_in_place_reports_changed() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(&snap(&[("w-1", raw("http://old", 100))]), T0);

        let diff = registry.reconcile_at(&snap(&[("w-1", raw("http://new", 100))]), T0 + 1);
        assert_eq!(diff.changed, ["w-1"]);
        assert!(diff.added.is_empty());
        assert_eq!(registry.snapshot()[0].url, "http://new");
    }

    #[test]
    fn missing_labels_default_to_unknown() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(&snap(&[("w-1", raw("http://one", 100))]), T0);

        let record = &registry.snapshot()[0];
        assert_eq!(record.version, "unknown");
        assert_eq!(record.runner_by, "unknown");
    }

    #[test]
    fn rotation_visits_every_worker_once_per_cycle() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[
                ("w-1", raw("http://one", 100)),
                ("w-2", raw("http://two", 200)),
                ("w-3", raw("http://three", 300)),
            ]),
            T0,
        );

        let cycle: Vec<String> = (0..3).map(|_| registry.rotate().unwrap().key).collect();
        assert_eq!(cycle, ["w-1", "w-2", "w-3"]);
        // Wraps back to the front.
        assert_eq!(registry.rotate().unwrap().key, "w-1");
    }

    #[test]
    fn cursor_follows_worker_across_reorder() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[
                ("w-a", raw("http://a", 100)),
                ("w-b", raw("http://b", 200)),
                ("w-c", raw("http://c", 300)),
            ]),
            T0,
        );
        registry.rotate(); // dispatched w-a, cursor now on w-b

        // A new worker sorts ahead of w-b, shifting its index.
        registry.reconcile_at(
            &snap(&[
                ("w-a", raw("http://a", 100)),
                ("w-b", raw("http://b", 200)),
                ("w-c", raw("http://c", 300)),
                ("w-new", raw("http://new", 150)),
            ]),
            T0 + 1,
        );

        assert_eq!(keys(&registry), ["w-a", "w-new", "w-b", "w-c"]);
        assert_eq!(registry.rotate().unwrap().key, "w-b");
    }

    #[test]
    fn cursor_keeps_index_when_pointed_worker_is_removed() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[
                ("w-a", raw("http://a", 100)),
                ("w-b", raw("http://b", 200)),
                ("w-c", raw("http://c", 300)),
            ]),
            T0,
        );
        registry.rotate(); // cursor on w-b (index 1)

        // w-b vanishes; index 1 is still in range and now holds w-c.
        registry.reconcile_at(
            &snap(&[("w-a", raw("http://a", 100)), ("w-c", raw("http://c", 300))]),
            T0 + 1,
        );

        assert_eq!(registry.cursor_position(), 1);
        assert_eq!(registry.rotate().unwrap().key, "w-c");
    }

    #[test]
    fn cursor_resets_when_out_of_range() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[
                ("w-a", raw("http://a", 100)),
                ("w-b", raw("http://b", 200)),
                ("w-c", raw("http://c", 300)),
            ]),
            T0,
        );
        registry.rotate();
        registry.rotate(); // cursor on w-c (index 2)

        registry.reconcile_at(&snap(&[("w-a", raw("http://a", 100))]), T0 + 1);
        assert_eq!(registry.cursor_position(), 0);
        assert_eq!(registry.rotate().unwrap().key, "w-a");
    }

    #[test]
    fn cursor_survives_update_of_other_workers() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[("w-1", raw("http://one", 100)), ("w-2", raw("http://two", 200))]),
            T0,
        );
        registry.rotate(); // cursor on w-2

        registry.reconcile_at(
            &snap(&[("w-1", raw("http://one-b", 100)), ("w-2", raw("http://two", 200))]),
            T0 + 1,
        );

        assert_eq!(registry.rotate().unwrap().key, "w-2");
        assert_eq!(registry.rotate().unwrap().url, "http://one-b");
    }

    #[test]
    fn snapshot_read_does_not_advance_cursor() {
        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[("w-1", raw("http://one", 100)), ("w-2", raw("http://two", 200))]),
            T0,
        );

        let _ = registry.snapshot();
        let _ = registry.len();
        assert_eq!(registry.cursor_position(), 0);
        assert_eq!(registry.rotate().unwrap().key, "w-1");
    }

    #[test]
    fn rotate_on_empty_registry_returns_none() {
        let registry = WorkerRegistry::new();
        assert!(registry.rotate().is_none());
        assert_eq!(registry.cursor_position(), 0);
    }

    #[test]
    fn concurrent_rotation_hands_out_distinct_slots() {
        use std::collections::HashMap;
        use std::thread;

        let registry = WorkerRegistry::new();
        registry.reconcile_at(
            &snap(&[
                ("w-1", raw("http://one", 100)),
                ("w-2", raw("http://two", 200)),
                ("w-3", raw("http://three", 300)),
            ]),
            T0,
        );

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            handles.push(thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..30 {
                    seen.push(registry.rotate().unwrap().key);
                }
                seen
            }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                *counts.entry(key).or_default() += 1;
            }
        }

        // 120 rotations over 3 workers: exactly 40 each.
        assert_eq!(counts.len(), 3);
        for (_, count) in counts {
            assert_eq!(count, 40);
        }
    }
}
