// Core infrastructure modules
pub mod core {
    pub mod errors;
    pub mod config;
    pub mod metrics;
}

pub mod coord;      // Coordinator, worker and requester roles
pub mod dispatch;   // In-process message routing
pub mod storage;    // Coordinator state arena

// Re-exports for convenience
pub use crate::core::errors::{Result, ScatterError};
pub use crate::core::config::{ScatterConfig, ScatterConfigBuilder};
pub use crate::core::metrics::{DispatchMetrics, MetricsSnapshot};
pub use coord::*;
pub use dispatch::{Dispatcher, Fault};
pub use storage::{open_store, MemoryStore, SledStore, StateStore};
