//! Scheduler layer
//!
//! This layer walks the selected part of the build graph and coordinates
//! step execution: a step is dispatched once all its scheduled
//! predecessors are done, up to a bounded number at a time.

pub mod dispatcher;

pub use dispatcher::{ScheduleRequest, Scheduler};
