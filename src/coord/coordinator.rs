//! Coordinator - one node of the scatter-gather tree
//!
//! Handlers never talk to the transport. They mutate the coordinator's own
//! state through the [`StateStore`] and return the messages to send, which the
//! dispatcher delivers asynchronously.

use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::coord::partition::{check_min_partition_size, plan, ScatterPlan};
use crate::coord::state::{CoordinatorState, Transition};
use crate::coord::types::{CompletionReport, Job, JobFinished, LeafTask, Message};
use crate::core::config::ScatterConfig;
use crate::core::errors::{Result, ScatterError};
use crate::storage::StateStore;

/// Scatter and gather logic over the shared state arena
pub struct Coordinator {
    store: Arc<dyn StateStore>,
    min_partition_size: u64,
}

impl Coordinator {
    /// Fails with a configuration error when `min_partition_size` could never
    /// shrink a job
    pub fn new(store: Arc<dyn StateStore>, min_partition_size: u64) -> Result<Self> {
        check_min_partition_size(min_partition_size)?;
        Ok(Self {
            store,
            min_partition_size,
        })
    }

    pub fn from_config(store: Arc<dyn StateStore>, config: &ScatterConfig) -> Result<Self> {
        Self::new(store, config.min_partition_size)
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn min_partition_size(&self) -> u64 {
        self.min_partition_size
    }

    /// Handle the first Start for `job`: create its state and scatter.
    ///
    /// Returns either one Start per sub-job or one LeafTask per item. A repeated
    /// Start for the same id fails with `DuplicateStart` and emits nothing.
    pub fn start(&self, job: &Job) -> Result<Vec<Message>> {
        let id = job.id();
        if job.size() < 1 {
            return Err(ScatterError::InvalidJob {
                id,
                size: job.size(),
            });
        }

        self.store.create(id, CoordinatorState::for_job(job))?;

        match plan(job.size(), self.min_partition_size)? {
            ScatterPlan::Split(sizes) => {
                debug!(
                    job_id = %id,
                    parent_id = ?job.parent_id(),
                    size = job.size(),
                    partitions = sizes.len(),
                    "Splitting job"
                );
                sizes
                    .into_iter()
                    .map(|size| Job::child(id, size).map(Message::Start))
                    .collect()
            }
            ScatterPlan::Leaves(count) => {
                debug!(
                    job_id = %id,
                    parent_id = ?job.parent_id(),
                    leaves = count,
                    "Dispatching leaf tasks"
                );
                Ok((0..count)
                    .map(|_| Message::LeafTask(LeafTask::new(id)))
                    .collect())
            }
        }
    }

    /// Apply a completion report to its target coordinator.
    ///
    /// Returns the upward message on the report that completes the coordinator:
    /// `JobFinished` for the root, otherwise a report of the full total to the parent.
    pub fn on_completion_report(&self, report: &CompletionReport) -> Result<Option<Message>> {
        let id = report.target_id;
        match self.store.apply_report(id, report.count)? {
            Transition::Progress {
                items_done,
                remaining,
            } => {
                trace!(job_id = %id, items_done, remaining, "Recorded completion report");
                Ok(None)
            }
            Transition::Completed {
                parent_id: None,
                total,
            } => {
                info!(job_id = %id, total, "Root job finished");
                Ok(Some(Message::JobFinished(JobFinished { job_id: id })))
            }
            Transition::Completed {
                parent_id: Some(parent_id),
                total,
            } => {
                debug!(job_id = %id, parent_id = %parent_id, total, "Sub-job finished, reporting to parent");
                Ok(Some(Message::CompletionReport(CompletionReport::new(
                    parent_id, total,
                ))))
            }
        }
    }
}
