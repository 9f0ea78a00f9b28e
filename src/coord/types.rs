//! Message and job types exchanged between coordinators, workers and the requester
//!
//! Every message is addressed by a [`JobId`], the correlation id that routes it
//! to a coordinator's state.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::errors::{Result, ScatterError};

/// Correlation id of one coordinator in the scatter-gather tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Raw bytes, used as the storage key
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of coordination: `size` items owed to `parent_id` (or to the requester for the root)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    parent_id: Option<JobId>,
    size: u64,
}

impl Job {
    /// Create a job with a fresh id. Fails with `InvalidJob` when `size` is 0.
    pub fn new(parent_id: Option<JobId>, size: u64) -> Result<Self> {
        Self::with_id(JobId::new(), parent_id, size)
    }

    /// Create a root job (no parent)
    pub fn root(size: u64) -> Result<Self> {
        Self::new(None, size)
    }

    /// Create a sub-job reporting to `parent_id`
    pub fn child(parent_id: JobId, size: u64) -> Result<Self> {
        Self::new(Some(parent_id), size)
    }

    /// Create a job with an externally supplied id
    pub fn with_id(id: JobId, parent_id: Option<JobId>, size: u64) -> Result<Self> {
        if size < 1 {
            return Err(ScatterError::InvalidJob { id, size });
        }
        Ok(Self {
            id,
            parent_id,
            size,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn parent_id(&self) -> Option<JobId> {
        self.parent_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// One atomic work item, reporting back to the coordinator that dispatched it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafTask {
    pub parent_id: JobId,
}

impl LeafTask {
    pub fn new(parent_id: JobId) -> Self {
        Self { parent_id }
    }
}

/// Items completed under `target_id`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub target_id: JobId,
    pub count: u64,
}

impl CompletionReport {
    pub fn new(target_id: JobId, count: u64) -> Self {
        Self { target_id, count }
    }
}

/// Emitted once by the root coordinator when every item has completed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFinished {
    pub job_id: JobId,
}

/// Everything that travels over the dispatcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Start(Job),
    LeafTask(LeafTask),
    CompletionReport(CompletionReport),
    JobFinished(JobFinished),
}

impl Message {
    /// The id this message is routed by
    pub fn routing_id(&self) -> JobId {
        match self {
            Message::Start(job) => job.id(),
            Message::LeafTask(task) => task.parent_id,
            Message::CompletionReport(report) => report.target_id,
            Message::JobFinished(finished) => finished.job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Start(_) => "start",
            Message::LeafTask(_) => "leaf_task",
            Message::CompletionReport(_) => "completion_report",
            Message::JobFinished(_) => "job_finished",
        }
    }
}
