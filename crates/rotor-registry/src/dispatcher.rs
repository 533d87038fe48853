//! Round-robin dispatch over the registry's ordered sequence.

use crate::error::DispatchError;
use crate::record::WorkerRecord;
use crate::registry::WorkerRegistry;

/// Hands each caller the next worker in rotation.
///
/// `next` is the only operation: one call consumes exactly one rotation
/// step, whatever happens to the dispatched request downstream. A failed
/// request is not retried against another worker.
#[derive(Clone)]
pub struct Dispatcher {
    registry: WorkerRegistry,
}

impl Dispatcher {
    /// Dispatcher over the given registry handle.
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    /// The next worker in rotation: reads the cursor, returns the record
    /// there, and advances, all under one lock acquisition.
    pub fn next(&self) -> Result<WorkerRecord, DispatchError> {
        self.registry.rotate().ok_or(DispatchError::NoWorkerAvailable)
    }
}
