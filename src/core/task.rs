use serde::{Deserialize, Serialize};

use crate::instance::InstanceKey;
use crate::setup::SetupSource;

/// Task family, used to look up configured policies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Build,
    Release,
    Deploy,
    Rollback,
    Copy,
    Run,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Build => "build",
            TaskKind::Release => "release",
            TaskKind::Deploy => "deploy",
            TaskKind::Rollback => "rollback",
            TaskKind::Copy => "copy",
            TaskKind::Run => "run",
        }
    }
}

/// One unit of work in a run's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    Build {
        commitish: String,
    },
    Release {
        name: String,
        commitish: String,
    },
    Deploy {
        instance: InstanceKey,
        source: SetupSource,
    },
    Rollback {
        instance: InstanceKey,
        /// Installation number to switch back to.
        target: u32,
        target_identification: String,
    },
    CopyShared {
        source: InstanceKey,
        target: InstanceKey,
    },
    Run {
        instance: InstanceKey,
        script: String,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Build { .. } => TaskKind::Build,
            Task::Release { .. } => TaskKind::Release,
            Task::Deploy { .. } => TaskKind::Deploy,
            Task::Rollback { .. } => TaskKind::Rollback,
            Task::CopyShared { .. } => TaskKind::Copy,
            Task::Run { .. } => TaskKind::Run,
        }
    }

    /// The instance a policy filter is matched against; `None` for tasks
    /// that do not touch an instance.
    pub fn instance(&self) -> Option<&InstanceKey> {
        match self {
            Task::Build { .. } | Task::Release { .. } => None,
            Task::Deploy { instance, .. }
            | Task::Rollback { instance, .. }
            | Task::Run { instance, .. } => Some(instance),
            Task::CopyShared { target, .. } => Some(target),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Task::Build { commitish } => format!("build {}", commitish),
            Task::Release { name, commitish } => format!("release {} from {}", name, commitish),
            Task::Deploy { instance, source } => {
                format!("deploy {} to {}", source.identification(), instance)
            }
            Task::Rollback {
                instance,
                target_identification,
                ..
            } => format!("rollback {} to {}", instance, target_identification),
            Task::CopyShared { source, target } => {
                format!("copy shared folders from {} to {}", source, target)
            }
            Task::Run { instance, script } => format!("run {} on {}", script, instance),
        }
    }
}
