//! Process-wide dataset cache keyed by the candidate source list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::{load_first, LoadOutcome, SourceDescriptor};

type Slot = Arc<Mutex<Option<Arc<LoadOutcome>>>>;

/// Explicit cache of load results.
///
/// Each distinct candidate list gets its own slot. The slot lock is held
/// while loading, so concurrent callers for the same key wait for the first
/// load and then share its outcome; other keys are not blocked. `NoData`
/// outcomes are cached as well until [`DatasetCache::invalidate`] is called.
#[derive(Default)]
pub struct DatasetCache {
    slots: Mutex<HashMap<Vec<SourceDescriptor>, Slot>>,
    loads: AtomicUsize,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached outcome for `sources`, loading it on first use
    pub fn get_or_load(&self, sources: &[SourceDescriptor]) -> Arc<LoadOutcome> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(sources.to_vec()).or_default())
        };

        let mut entry = slot.lock();
        if let Some(outcome) = entry.as_ref() {
            tracing::debug!(sources = sources.len(), "dataset cache hit");
            return Arc::clone(outcome);
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        let outcome = Arc::new(load_first(sources));
        *entry = Some(Arc::clone(&outcome));
        outcome
    }

    /// Forget the outcome for one candidate list. Returns whether it was cached.
    pub fn invalidate(&self, sources: &[SourceDescriptor]) -> bool {
        let removed = self.slots.lock().remove(sources).is_some();
        if removed {
            tracing::debug!(sources = sources.len(), "dataset cache entry invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Number of cached candidate lists
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times the underlying storage has been read
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}
