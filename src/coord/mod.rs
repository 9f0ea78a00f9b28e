//! Scatter-gather coordination
//!
//! A coordinator splits its job into sub-jobs (each with its own coordinator)
//! or dispatches leaf tasks to workers, then counts completions until it can
//! report its total upward exactly once.

pub mod types;
pub mod partition;
pub mod state;
pub mod coordinator;
pub mod worker;
pub mod requester;

pub use types::*;
pub use partition::*;
pub use state::*;
pub use coordinator::*;
pub use worker::*;
pub use requester::*;
