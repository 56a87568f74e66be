use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::build;
use crate::config::Config;
use crate::connection::Connection;
use crate::copy;
use crate::deploy;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::github::{self, ArtifactHost};
use crate::instance::{Instance, InstanceKey};
use crate::planner::Plan;
use crate::policy::PolicyEngine;
use crate::registry::InstanceRegistry;
use crate::rollback;
use crate::setup::{Setup, SetupSource};
use crate::task::Task;

use super::report::{ClearReport, ClearedInstance, RunReport, TaskError, TaskOutcome, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct RunScriptResult {
    pub instance: String,
    pub script: String,
    pub folder: String,
    pub output: String,
}

enum Execution {
    Done(Value),
    Skipped(String),
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize task result".to_string())))
}

/// Runs a planned queue, one task at a time, in order.
///
/// The executor owns the instance registry for the run and is its only
/// writer. Artifacts are fetched or built at most once per run.
pub struct TaskExecutor<'a> {
    config: &'a Config,
    registry: InstanceRegistry,
    host: Box<dyn ArtifactHost>,
    policies: PolicyEngine,
    build_connection: Connection,
    dry_run: bool,
    clock: fn() -> DateTime<Utc>,
    releases: HashMap<String, Setup>,
    builds: HashMap<String, Setup>,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(
        config: &'a Config,
        registry: InstanceRegistry,
        host: Box<dyn ArtifactHost>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            registry,
            host,
            policies: PolicyEngine::from_config(config)?,
            build_connection: Connection::local(),
            dry_run: false,
            clock: Utc::now,
            releases: HashMap::new(),
            builds: HashMap::new(),
        })
    }

    pub fn from_config(config: &'a Config) -> Result<Self> {
        let registry = InstanceRegistry::from_config(config)?;
        let host = github::host_from_config(config.agnes.github.as_ref())?;
        Self::new(config, registry, host)
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut InstanceRegistry {
        &mut self.registry
    }

    pub fn host(&self) -> &dyn ArtifactHost {
        self.host.as_ref()
    }

    /// Check and execute every task of `plan`.
    ///
    /// A denied task is reported with all denial reasons and skipped. A
    /// failing task is reported and the queue moves on. Only errors raised
    /// while evaluating policies abort the run.
    pub fn run(&mut self, plan: Plan) -> Result<RunReport> {
        let mut report = RunReport {
            dry_run: self.dry_run,
            outcomes: Vec::new(),
            warnings: plan.warnings,
        };

        for task in &plan.tasks {
            let checked = match self.resolve_for_policies(task) {
                Ok(checked) => checked,
                Err(err) => {
                    log_status!("engine", "Failed {}: {}", task.describe(), err.message);
                    let mut outcome = TaskOutcome::new(task, TaskStatus::Failed);
                    outcome.error = Some(TaskError::from(&err));
                    report.outcomes.push(outcome);
                    continue;
                }
            };
            let reasons = self.policies.check(&checked, &mut self.registry)?;
            if !reasons.is_empty() {
                log_status!("policy", "Denied {}: {}", task.describe(), reasons.join("; "));
                let mut outcome = TaskOutcome::new(task, TaskStatus::Denied);
                let err = Error::policy_denied(task.describe(), reasons.clone());
                outcome.error = Some(TaskError::from(&err));
                outcome.reasons = reasons;
                report.outcomes.push(outcome);
                continue;
            }

            if self.dry_run {
                log_status!("plan", "Would {}", task.describe());
                report.outcomes.push(TaskOutcome::new(task, TaskStatus::Planned));
                continue;
            }

            log_status!("engine", "Starting {}", task.describe());
            let outcome = match self.execute(task) {
                Ok(Execution::Done(data)) => {
                    let mut outcome = TaskOutcome::new(task, TaskStatus::Executed);
                    outcome.data = Some(data);
                    outcome
                }
                Ok(Execution::Skipped(reason)) => {
                    let mut outcome = TaskOutcome::new(task, TaskStatus::Skipped);
                    outcome.reasons.push(reason);
                    outcome
                }
                Err(err) => {
                    log_status!("engine", "Failed {}: {}", task.describe(), err.message);
                    let mut outcome = TaskOutcome::new(task, TaskStatus::Failed);
                    outcome.error = Some(TaskError::from(&err));
                    outcome
                }
            };
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    fn instance_mut(&mut self, key: &InstanceKey) -> Result<&mut Instance> {
        self.registry.get_mut(key).ok_or_else(|| {
            Error::validation_invalid_argument(
                "instance",
                "instance is not configured",
                Some(key.to_string()),
                None,
            )
        })
    }

    /// The task as policies see it. A commitish deploy is checked against
    /// the commit hash it installs, so it is built before the check.
    fn resolve_for_policies(&mut self, task: &Task) -> Result<Task> {
        match task {
            Task::Deploy {
                instance,
                source: SetupSource::Commitish(commitish),
            } => {
                let setup = self.build_setup(commitish)?;
                Ok(Task::Deploy {
                    instance: instance.clone(),
                    source: SetupSource::Commitish(setup.identification().to_string()),
                })
            }
            _ => Ok(task.clone()),
        }
    }

    fn build_setup(&mut self, commitish: &str) -> Result<Setup> {
        if let Some(setup) = self.builds.get(commitish) {
            return Ok(setup.clone());
        }
        let setup = build::build(self.config, &self.build_connection, commitish)?;
        self.builds.insert(commitish.to_string(), setup.clone());
        Ok(setup)
    }

    fn setup_for(&mut self, source: &SetupSource) -> Result<Setup> {
        match source {
            SetupSource::Commitish(commitish) => self.build_setup(commitish),
            SetupSource::Release(name) => {
                if let Some(setup) = self.releases.get(name) {
                    return Ok(setup.clone());
                }
                let archive = github::fetch_release_archive(self.host.as_ref(), name)?;
                let setup = Setup::from_release(name.clone(), archive);
                self.releases.insert(name.clone(), setup.clone());
                Ok(setup)
            }
        }
    }

    fn execute(&mut self, task: &Task) -> Result<Execution> {
        let now = (self.clock)();
        let config = self.config;

        match task {
            Task::Build { commitish } => {
                let setup = self.build_setup(commitish)?;
                let output = build::write_build_output(config, &setup)?;
                to_value(build::BuildResult {
                    commitish: commitish.clone(),
                    commit_hash: setup.identification().to_string(),
                    size: setup.archive.len(),
                    output: Some(output.display().to_string()),
                })
                .map(Execution::Done)
            }
            Task::Release { name, commitish } => {
                let (result, setup) = build::release(
                    config,
                    &self.build_connection,
                    self.host.as_ref(),
                    name,
                    commitish,
                )?;
                self.releases.insert(name.clone(), setup);
                to_value(result).map(Execution::Done)
            }
            Task::Deploy { instance, source } => {
                let setup = self.setup_for(source)?;
                let instance = self.instance_mut(instance)?;
                to_value(deploy::deploy(config, instance, &setup, now)?).map(Execution::Done)
            }
            Task::Rollback {
                instance, target, ..
            } => {
                let instance = self.instance_mut(instance)?;
                to_value(rollback::rollback(config, instance, *target, now)?).map(Execution::Done)
            }
            Task::CopyShared { source, target } => {
                let result = copy::copy_shared(config, &self.registry, source, target)?;
                match result.skipped {
                    Some(reason) => Ok(Execution::Skipped(reason)),
                    None => to_value(result).map(Execution::Done),
                }
            }
            Task::Run { instance, script } => {
                let instance = self.instance_mut(instance)?;
                to_value(run_script(config, instance, script)?).map(Execution::Done)
            }
        }
    }

    /// Remove installation folders without metadata on every instance
    /// matching `target`. Under `--dry-run` they are only listed.
    pub fn clear(&mut self, target: &str) -> Result<ClearReport> {
        let filter = Filter::from_instance_specification(target)?;
        let keys = self.registry.instances_by_filter(&filter)?;
        let dry_run = self.dry_run;
        let mut report = ClearReport {
            dry_run,
            ..ClearReport::default()
        };

        if keys.is_empty() {
            report
                .warnings
                .push(Error::instance_no_match(filter.describe()).into());
        }

        for key in keys {
            let instance = self.instance_mut(&key)?;
            let folders = instance.orphan_folders().to_vec();
            if folders.is_empty() {
                continue;
            }

            if !dry_run {
                let connection = Rc::clone(&instance.connection);
                for folder in &folders {
                    log_status!("clear", "Removing {}", folder);
                    connection.remove_folder(folder)?;
                    instance.forget_orphan(folder);
                }
            }

            report.instances.push(ClearedInstance {
                instance: key.to_string(),
                folders,
            });
        }

        Ok(report)
    }
}

/// Run configured script `name` inside the current installation of `instance`.
pub fn run_script(config: &Config, instance: &mut Instance, name: &str) -> Result<RunScriptResult> {
    instance.load()?;
    let script = config.script(name).ok_or_else(|| {
        Error::validation_invalid_argument(
            "script",
            format!("script '{}' is not configured", name),
            Some(name.to_string()),
            None,
        )
    })?;
    let folder = instance
        .current_installation()
        .map(|installation| installation.folder.clone())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                "instance",
                format!("{} has no current installation", instance.key),
                Some(instance.key.to_string()),
                None,
            )
        })?;

    log_status!("run", "Running '{}' on {}", name, instance.key);
    let output = instance
        .connection
        .execute_script(&folder, &script.script, &BTreeMap::new())?;

    Ok(RunScriptResult {
        instance: instance.key.to_string(),
        script: name.to_string(),
        folder,
        output,
    })
}
