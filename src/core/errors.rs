use thiserror::Error;

use crate::coord::types::JobId;

/// Unified error type for the scatter-gather coordinator
#[derive(Debug, Error)]
pub enum ScatterError {
    /// A job was constructed or started with fewer than one item
    #[error("Invalid job {id}: size must be at least 1 (got {size})")]
    InvalidJob { id: JobId, size: u64 },

    /// A completion report carried a zero count
    #[error("Invalid completion report for {id}: count must be at least 1")]
    InvalidReport { id: JobId },

    /// Reported items would exceed what the coordinator is responsible for.
    /// Points at a partitioning bug or duplicate delivery upstream.
    #[error(
        "Count overflow on {id}: {items_done} done + {count} reported exceeds {items_to_be_done}"
    )]
    CountOverflow {
        id: JobId,
        items_done: u64,
        count: u64,
        items_to_be_done: u64,
    },

    /// A report arrived after the coordinator had already completed
    #[error("Late report for completed coordinator {id} (count: {count})")]
    LateReport { id: JobId, count: u64 },

    /// A second Start arrived for an id that already has state
    #[error("Duplicate start for coordinator {id}")]
    DuplicateStart { id: JobId },

    #[error("No coordinator state for {id}")]
    UnknownCoordinator { id: JobId },

    /// The leaf work itself failed; no completion is reported for it
    #[error("Work item for {parent_id} failed: {reason}")]
    WorkFailed { parent_id: JobId, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScatterError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel<S: Into<String>>(message: S) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Anomalies caused by the transport re-delivering messages. These are
    /// logged but never corrupt state.
    pub fn is_protocol_anomaly(&self) -> bool {
        matches!(self, Self::LateReport { .. } | Self::DuplicateStart { .. })
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidJob { .. } => "invalid_job",
            Self::InvalidReport { .. } => "invalid_report",
            Self::CountOverflow { .. } => "count_overflow",
            Self::LateReport { .. } => "late_report",
            Self::DuplicateStart { .. } => "duplicate_start",
            Self::UnknownCoordinator { .. } => "unknown_coordinator",
            Self::WorkFailed { .. } => "work_failed",
            Self::Configuration { .. } => "configuration",
            Self::Channel { .. } => "channel",
            Self::Timeout { .. } => "timeout",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Yaml(_) => "yaml",
            Self::Io(_) => "io",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ScatterError>;
