// Public modules
pub mod build;
pub mod config;
pub mod connection;
pub mod copy;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod filter;
pub mod github;
pub mod hooks;
pub mod installation;
pub mod instance;
pub mod planner;
pub mod policy;
pub mod registry;
pub mod rollback;
pub mod setup;
pub mod ssh;
pub mod task;

// Re-export common types for convenience
pub use engine::{RunReport, TaskExecutor, TaskOutcome, TaskStatus};
pub use error::{Error, ErrorCode, Result};
pub use filter::Filter;
pub use instance::{Instance, InstanceKey};
pub use task::{Task, TaskKind};
