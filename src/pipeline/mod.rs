//! Background loops of the alert service.
//!
//! - `PollScheduler`: poll saved queries and notify owners of new listings
//! - `RetentionSweeper`: prune seen listings past the retention window

pub mod poll;
pub mod retention;

pub use poll::{CycleReport, PollOutcome, PollScheduler};
pub use retention::RetentionSweeper;
