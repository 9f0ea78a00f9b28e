//! Sled-backed coordinator state, so a run's bookkeeping survives a restart

use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use super::StateStore;
use crate::coord::state::{CoordinatorState, Transition};
use crate::coord::types::JobId;
use crate::core::errors::{Result, ScatterError};

const STATE_TREE: &str = "coordinator_state";

/// Coordinator states stored as bincode values in a sled tree
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Temporary database, removed when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let tree = db.open_tree(STATE_TREE)?;
        Ok(Self { db, tree })
    }
}

impl StateStore for SledStore {
    fn create(&self, id: JobId, state: CoordinatorState) -> Result<()> {
        let encoded = bincode::serialize(&state)?;
        match self
            .tree
            .compare_and_swap(id.as_bytes(), None::<&[u8]>, Some(encoded))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(ScatterError::DuplicateStart { id }),
        }
    }

    fn get(&self, id: JobId) -> Result<Option<CoordinatorState>> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn apply_report(&self, id: JobId, count: u64) -> Result<Transition> {
        loop {
            let current = self
                .tree
                .get(id.as_bytes())?
                .ok_or(ScatterError::UnknownCoordinator { id })?;

            let mut state: CoordinatorState = bincode::deserialize(&current)?;
            let transition = state.record(id, count)?;
            let updated = bincode::serialize(&state)?;

            match self
                .tree
                .compare_and_swap(id.as_bytes(), Some(&current[..]), Some(updated))?
            {
                Ok(()) => return Ok(transition),
                Err(_) => {
                    debug!(job_id = %id, "Concurrent update on coordinator state, retrying");
                }
            }
        }
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }

    fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        true
    }
}
