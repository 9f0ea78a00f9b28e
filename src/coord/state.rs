//! Per-coordinator aggregation state
//!
//! A coordinator is `Active` until its reported items reach the total it is
//! responsible for, then flips to `Done` exactly once. Every later report is
//! rejected without touching the counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::types::{Job, JobId};
use crate::core::errors::{Result, ScatterError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Active,
    Done,
}

/// Stored state of one coordinator, keyed by its [`JobId`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorState {
    /// Where to report on completion; `None` for the root
    pub parent_id: Option<JobId>,
    pub items_to_be_done: u64,
    pub items_done: u64,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of applying one completion report
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Progress { items_done: u64, remaining: u64 },
    /// Returned once, on the report that brings `items_done` to the total
    Completed { parent_id: Option<JobId>, total: u64 },
}

impl CoordinatorState {
    pub fn new(parent_id: Option<JobId>, items_to_be_done: u64) -> Self {
        Self {
            parent_id,
            items_to_be_done,
            items_done: 0,
            phase: Phase::Active,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn for_job(job: &Job) -> Self {
        Self::new(job.parent_id(), job.size())
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn remaining(&self) -> u64 {
        self.items_to_be_done - self.items_done
    }

    /// Add `count` completed items. On error the state is left as it was.
    pub fn record(&mut self, id: JobId, count: u64) -> Result<Transition> {
        if count < 1 {
            return Err(ScatterError::InvalidReport { id });
        }
        if self.phase == Phase::Done {
            return Err(ScatterError::LateReport { id, count });
        }

        let items_done = self
            .items_done
            .checked_add(count)
            .filter(|done| *done <= self.items_to_be_done)
            .ok_or(ScatterError::CountOverflow {
                id,
                items_done: self.items_done,
                count,
                items_to_be_done: self.items_to_be_done,
            })?;

        self.items_done = items_done;
        if items_done == self.items_to_be_done {
            self.phase = Phase::Done;
            self.completed_at = Some(Utc::now());
            Ok(Transition::Completed {
                parent_id: self.parent_id,
                total: self.items_to_be_done,
            })
        } else {
            Ok(Transition::Progress {
                items_done,
                remaining: self.remaining(),
            })
        }
    }
}
