//! Message routing between coordinators, workers and requesters

pub mod dispatcher;

pub use dispatcher::{Dispatcher, Fault};
