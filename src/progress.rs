//! Per-upload progress tracking
//!
//! Uploads register a counter keyed by the client-supplied progress id; the
//! polling endpoint reads it concurrently while body chunks arrive. This is
//! the only state shared between requests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Byte counters for one in-flight upload.
///
/// `uploaded` may slightly exceed `total`: chunks are counted as delivered
/// by the HTTP stack, which includes framing bytes around the body.
#[derive(Debug)]
pub struct ProgressCounter {
    uploaded: AtomicI64,
    total: i64,
}

impl ProgressCounter {
    fn new(total: i64) -> Self {
        Self {
            uploaded: AtomicI64::new(0),
            total,
        }
    }
}

#[derive(Debug, Error)]
#[error("upload {0} is already in progress")]
pub struct DuplicateUpload(pub String);

/// Thread-safe registry of in-flight upload counters.
#[derive(Default)]
pub struct ProgressRegistry {
    entries: Mutex<HashMap<String, Arc<ProgressCounter>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a counter for `id` and return a guard that owns the entry.
    /// The entry is removed when the guard is dropped, so a registered id
    /// lives exactly as long as its upload session.
    pub fn begin(self: Arc<Self>, id: &str, total: i64) -> Result<ProgressGuard, DuplicateUpload> {
        let counter = Arc::new(ProgressCounter::new(total));

        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(DuplicateUpload(id.to_string()));
        }
        entries.insert(id.to_string(), counter.clone());
        drop(entries);

        Ok(ProgressGuard {
            registry: self,
            id: id.to_string(),
            counter,
        })
    }

    /// Copy the current counters for `id`, or None if no such upload.
    pub fn snapshot(&self, id: &str) -> Option<(i64, i64)> {
        let entries = self.entries.lock();
        entries
            .get(id)
            .map(|c| (c.uploaded.load(Ordering::Relaxed), c.total))
    }

    fn remove(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Owning handle to one registry entry.
pub struct ProgressGuard {
    registry: Arc<ProgressRegistry>,
    id: String,
    counter: Arc<ProgressCounter>,
}

impl ProgressGuard {
    /// Add `delta` received bytes to the counter.
    pub fn bump(&self, delta: i64) {
        self.counter.uploaded.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
