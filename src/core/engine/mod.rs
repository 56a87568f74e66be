//! Task execution.
//!
//! - `executor` - runs a planned queue against the instance registry
//! - `report` - per-task outcomes returned to the caller

pub mod executor;
pub mod report;

pub use executor::TaskExecutor;
pub use report::{ClearReport, RunReport, TaskOutcome, TaskStatus};
