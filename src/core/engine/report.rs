use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::planner::Warning;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Executed,
    /// Permitted by every policy but not run (`--dry-run`).
    Planned,
    Denied,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl From<&Error> for TaskError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task: Task,
    pub description: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskOutcome {
    pub fn new(task: &Task, status: TaskStatus) -> Self {
        Self {
            task: task.clone(),
            description: task.describe(),
            status,
            reasons: Vec::new(),
            error: None,
            data: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub outcomes: Vec<TaskOutcome>,
    pub warnings: Vec<Warning>,
}

impl RunReport {
    pub fn count(&self, status: TaskStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// True unless a task failed or was denied. Warnings do not count.
    pub fn is_success(&self) -> bool {
        self.count(TaskStatus::Failed) == 0 && self.count(TaskStatus::Denied) == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearedInstance {
    pub instance: String,
    pub folders: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClearReport {
    pub dry_run: bool,
    pub instances: Vec<ClearedInstance>,
    pub warnings: Vec<Warning>,
}
