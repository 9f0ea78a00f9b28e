//! Coordinator state storage
//!
//! The arena of coordinator states, keyed by [`JobId`]. There is no
//! parent-to-children index: a parent only knows how many items it is owed.

pub mod sled_store;

pub use sled_store::SledStore;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::coord::state::{CoordinatorState, Transition};
use crate::coord::types::JobId;
use crate::core::config::ScatterConfig;
use crate::core::errors::{Result, ScatterError};

/// Storage trait for coordinator state
pub trait StateStore: Send + Sync {
    /// Insert state for a new coordinator. Fails with `DuplicateStart` if `id` exists.
    fn create(&self, id: JobId, state: CoordinatorState) -> Result<()>;

    fn get(&self, id: JobId) -> Result<Option<CoordinatorState>>;

    /// Atomically record `count` completed items against `id`.
    ///
    /// Concurrent calls for the same id are applied one after another; a
    /// failed call leaves the stored state unchanged.
    fn apply_report(&self, id: JobId, count: u64) -> Result<Transition>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every stored state
    fn clear(&self) -> Result<()>;

    /// Flush pending writes
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Whether calls may block on disk I/O and belong on the blocking pool
    fn is_blocking(&self) -> bool {
        false
    }
}

/// In-memory store. Each entry is guarded by its DashMap shard lock.
#[derive(Default)]
pub struct MemoryStore {
    states: DashMap<JobId, CoordinatorState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn create(&self, id: JobId, state: CoordinatorState) -> Result<()> {
        match self.states.entry(id) {
            Entry::Occupied(_) => Err(ScatterError::DuplicateStart { id }),
            Entry::Vacant(slot) => {
                slot.insert(state);
                Ok(())
            }
        }
    }

    fn get(&self, id: JobId) -> Result<Option<CoordinatorState>> {
        Ok(self.states.get(&id).map(|entry| entry.value().clone()))
    }

    fn apply_report(&self, id: JobId, count: u64) -> Result<Transition> {
        let mut entry = self
            .states
            .get_mut(&id)
            .ok_or(ScatterError::UnknownCoordinator { id })?;
        entry.value_mut().record(id, count)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.states.len())
    }

    fn clear(&self) -> Result<()> {
        self.states.clear();
        Ok(())
    }
}

/// Open the store selected by the configuration
pub fn open_store(config: &ScatterConfig) -> Result<Arc<dyn StateStore>> {
    match &config.state_db_path {
        Some(path) => {
            let store = SledStore::open(path)?;
            if config.purge_on_startup {
                let stale = store.len()?;
                store.clear()?;
                info!(path = %path.display(), purged = stale, "Purged coordinator state on startup");
            }
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}
