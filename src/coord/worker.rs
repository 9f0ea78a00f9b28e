//! Worker - executes one leaf task and reports a single completed item

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

use crate::coord::types::{CompletionReport, LeafTask};
use crate::core::errors::{Result, ScatterError};

/// The atomic unit of work behind a leaf task
#[async_trait]
pub trait WorkItem: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, task: &LeafTask) -> anyhow::Result<()>;
}

/// Placeholder work that completes immediately
pub struct NoopWork;

#[async_trait]
impl WorkItem for NoopWork {
    fn name(&self) -> &str {
        "noop"
    }

    async fn run(&self, _task: &LeafTask) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Stateless leaf executor
#[derive(Clone)]
pub struct Worker {
    work: Arc<dyn WorkItem>,
}

impl Worker {
    pub fn new(work: Arc<dyn WorkItem>) -> Self {
        Self { work }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopWork))
    }

    /// Run the work item and produce the `count: 1` report for its coordinator.
    ///
    /// A failing work item yields `WorkFailed` and no report, so its
    /// coordinator never completes.
    pub async fn execute(&self, task: &LeafTask) -> Result<CompletionReport> {
        self.work
            .run(task)
            .await
            .map_err(|e| ScatterError::WorkFailed {
                parent_id: task.parent_id,
                reason: e.to_string(),
            })?;
        trace!(parent_id = %task.parent_id, work = self.work.name(), "Leaf task done");
        Ok(CompletionReport::new(task.parent_id, 1))
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::noop()
    }
}
