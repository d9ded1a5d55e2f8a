//! Durable revision counter.

use crate::catalog::{self, HIGH_WATER_KEY, META};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};
use verso_storage::{DocumentStore, Revision};

#[derive(Debug)]
struct CounterState {
    /// Highest revision handed out.
    current: u64,
    /// Highest revision covered by the persisted high-water mark.
    reserved: u64,
    /// Set once persisting the high-water mark has failed.
    failed: bool,
}

/// Hands out strictly increasing revisions that survive restarts.
///
/// The high-water mark is written to `_meta` and synced before any revision
/// below it is returned, so a crash can leave gaps but never reuse a
/// revision. Revisions are reserved `block_size` at a time.
///
/// If the high-water mark cannot be persisted the counter is poisoned:
/// that call and every later one return [`CoreError::Fatal`].
pub struct RevisionCounter {
    store: Arc<dyn DocumentStore>,
    block_size: u64,
    state: Mutex<CounterState>,
}

impl RevisionCounter {
    /// Loads the counter, starting above the persisted high-water mark.
    pub fn load(store: Arc<dyn DocumentStore>, block_size: u64) -> CoreResult<Self> {
        let high_water: u64 = catalog::read(store.as_ref(), META, HIGH_WATER_KEY)?.unwrap_or(0);
        debug!(high_water, "loaded revision counter");
        Ok(Self {
            store,
            block_size: block_size.max(1),
            state: Mutex::new(CounterState {
                current: high_water,
                reserved: high_water,
                failed: false,
            }),
        })
    }

    /// Allocates the next revision.
    ///
    /// # Errors
    ///
    /// Returns `Fatal` if the high-water mark cannot be persisted, now or
    /// on any earlier call.
    pub fn next(&self) -> CoreResult<Revision> {
        let mut state = self.state.lock();
        if state.failed {
            return Err(CoreError::fatal("revision counter failed earlier; reopen the database"));
        }

        let next = state
            .current
            .checked_add(1)
            .ok_or_else(|| CoreError::fatal("revision space exhausted"))?;
        if next > state.reserved {
            let reserve = state.current.saturating_add(self.block_size);
            if let Err(e) = self.persist(reserve) {
                state.failed = true;
                error!(error = %e, "failed to persist revision high-water mark");
                return Err(CoreError::fatal(format!("cannot persist revision high-water mark: {e}")));
            }
            state.reserved = reserve;
        }
        state.current = next;
        Ok(Revision::new(next))
    }

    /// The highest revision handed out so far.
    #[must_use]
    pub fn current(&self) -> Revision {
        Revision::new(self.state.lock().current)
    }

    /// Ensures `revision` and everything below it are never handed out.
    pub fn observe(&self, revision: Revision) {
        let mut state = self.state.lock();
        state.current = state.current.max(revision.as_u64());
        state.reserved = state.reserved.max(state.current);
    }

    /// Whether the counter has been poisoned.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state.lock().failed
    }

    /// Persists the current value so an unused reservation is not skipped
    /// after a clean restart.
    pub fn flush(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.failed || state.reserved == state.current {
            return Ok(());
        }
        self.persist(state.current)?;
        state.reserved = state.current;
        Ok(())
    }

    fn persist(&self, high_water: u64) -> CoreResult<()> {
        catalog::write(self.store.as_ref(), META, HIGH_WATER_KEY, &high_water)?;
        self.store.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for RevisionCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RevisionCounter")
            .field("current", &state.current)
            .field("reserved", &state.reserved)
            .field("failed", &state.failed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FlakyStore;
    use std::collections::HashSet;
    use std::thread;
    use verso_storage::MemoryStore;

    #[test]
    fn revisions_increase_from_one() {
        let counter = RevisionCounter::load(Arc::new(MemoryStore::new()), 1).unwrap();
        assert_eq!(counter.next().unwrap(), Revision::new(1));
        assert_eq!(counter.next().unwrap(), Revision::new(2));
        assert_eq!(counter.current(), Revision::new(2));
    }

    #[test]
    fn reload_never_reuses_a_revision() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        {
            let counter = RevisionCounter::load(Arc::clone(&store), 10).unwrap();
            counter.next().unwrap();
            counter.next().unwrap();
        }
        // Dropped without flush: the whole block counts as used.
        let counter = RevisionCounter::load(store, 10).unwrap();
        assert_eq!(counter.next().unwrap(), Revision::new(11));
    }

    #[test]
    fn flush_releases_unused_reservation() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        {
            let counter = RevisionCounter::load(Arc::clone(&store), 10).unwrap();
            counter.next().unwrap();
            counter.flush().unwrap();
        }
        let counter = RevisionCounter::load(store, 10).unwrap();
        assert_eq!(counter.next().unwrap(), Revision::new(2));
    }

    #[test]
    fn observe_skips_past_loaded_revisions() {
        let counter = RevisionCounter::load(Arc::new(MemoryStore::new()), 1).unwrap();
        counter.observe(Revision::new(40));
        assert_eq!(counter.next().unwrap(), Revision::new(41));
    }

    #[test]
    fn persist_failure_poisons_the_counter() {
        let store = Arc::new(FlakyStore::new());
        let counter = RevisionCounter::load(store.clone(), 1).unwrap();
        counter.next().unwrap();

        store.fail_writes(true);
        assert!(matches!(counter.next(), Err(CoreError::Fatal { .. })));

        store.fail_writes(false);
        assert!(matches!(counter.next(), Err(CoreError::Fatal { .. })));
        assert!(counter.is_failed());
    }

    #[test]
    fn concurrent_callers_get_distinct_revisions() {
        let counter = Arc::new(RevisionCounter::load(Arc::new(MemoryStore::new()), 3).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || (0..50).map(|_| counter.next().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for revision in handle.join().unwrap() {
                assert!(seen.insert(revision));
            }
        }
        assert_eq!(seen.len(), 200);
        assert_eq!(counter.current(), Revision::new(200));
    }
}
