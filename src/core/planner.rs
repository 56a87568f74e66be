//! Turns command arguments into a queue of tasks.
//!
//! Planning loads every instance it looks at and performs every check that
//! does not change anything, so a plan can be shown under `--dry-run`.
//! Problems that only affect one instance become warnings.

use serde::Serialize;

use crate::config::Config;
use crate::deploy;
use crate::error::{Error, ErrorCode, Result};
use crate::filter::Filter;
use crate::github::ArtifactHost;
use crate::instance::InstanceKey;
use crate::registry::InstanceRegistry;
use crate::rollback;
use crate::setup::SetupSource;
use crate::task::Task;

#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

impl From<Error> for Warning {
    fn from(err: Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
    pub warnings: Vec<Warning>,
}

impl Plan {
    fn warn(&mut self, err: Error) {
        log_status!("plan", "{}", err.message);
        self.warnings.push(err.into());
    }
}

/// Instances matching `target`; an empty match is recorded as a warning.
fn resolve_target(
    registry: &mut InstanceRegistry,
    target: &str,
    plan: &mut Plan,
) -> Result<Vec<InstanceKey>> {
    let filter = Filter::from_instance_specification(target)?;
    let keys = registry.instances_by_filter(&filter)?;
    if keys.is_empty() {
        plan.warn(Error::instance_no_match(filter.describe()));
    }
    Ok(keys)
}

pub fn plan_build(commitish: &str) -> Plan {
    Plan {
        tasks: vec![Task::Build {
            commitish: commitish.to_string(),
        }],
        warnings: Vec::new(),
    }
}

pub fn plan_release(name: &str, commitish: &str) -> Plan {
    Plan {
        tasks: vec![Task::Release {
            name: name.to_string(),
            commitish: commitish.to_string(),
        }],
        warnings: Vec::new(),
    }
}

/// A published release of that name, otherwise a commitish to build.
/// Without a configured artifact host everything is a commitish.
pub fn resolve_setup_source(host: &dyn ArtifactHost, name: &str) -> Result<SetupSource> {
    match host.releases() {
        Ok(releases) if releases.iter().any(|release| release.matches(name)) => {
            Ok(SetupSource::Release(name.to_string()))
        }
        Ok(_) => Ok(SetupSource::Commitish(name.to_string())),
        Err(err) if err.code == ErrorCode::ConfigMissingKey => {
            Ok(SetupSource::Commitish(name.to_string()))
        }
        Err(err) => Err(err),
    }
}

/// One deploy per matching instance that has every required file locally.
pub fn plan_deploy(
    config: &Config,
    registry: &mut InstanceRegistry,
    target: &str,
    source: SetupSource,
) -> Result<Plan> {
    let mut plan = Plan::default();

    for key in resolve_target(registry, target, &mut plan)? {
        let missing = deploy::missing_required_files(config, &key);
        if let Some(path) = missing.first() {
            let local = deploy::local_file_path(config, &key, path);
            plan.warn(Error::missing_required_file(
                local.display().to_string(),
                key.to_string(),
            ));
            continue;
        }

        plan.tasks.push(Task::Deploy {
            instance: key,
            source: source.clone(),
        });
    }

    Ok(plan)
}

pub fn plan_rollback(
    registry: &mut InstanceRegistry,
    target: &str,
    rollback_to: Option<&str>,
    rollback_from: Option<&str>,
) -> Result<Plan> {
    let mut plan = Plan::default();

    for key in resolve_target(registry, target, &mut plan)? {
        let Some(instance) = registry.get(&key) else {
            continue;
        };

        match rollback::select_rollback_target(instance, rollback_to, rollback_from) {
            Some(number) => {
                let target_identification = instance
                    .installation(number)
                    .map(|installation| installation.identification.clone())
                    .unwrap_or_default();
                plan.tasks.push(Task::Rollback {
                    instance: key,
                    target: number,
                    target_identification,
                });
            }
            None => {
                let reason = match (instance.current_installation(), rollback_from) {
                    (None, _) => "no current installation".to_string(),
                    (Some(current), Some(from)) if current.identification != from => format!(
                        "current installation is '{}', not '{}'",
                        current.identification, from
                    ),
                    _ => "no earlier installation matches".to_string(),
                };
                plan.warn(Error::rollback_no_target(key.to_string(), reason));
            }
        }
    }

    Ok(plan)
}

/// Copy shared folders into every matching instance from its sibling on the
/// same server and environment at `source_stage`.
pub fn plan_copy(
    registry: &mut InstanceRegistry,
    target: &str,
    source_stage: &str,
) -> Result<Plan> {
    let mut plan = Plan::default();

    for key in resolve_target(registry, target, &mut plan)? {
        let source = InstanceKey::new(&key.server, &key.environment, source_stage);
        let filter = Filter::new(
            Some(vec![source.server.clone()]),
            Some(vec![source.environment.clone()]),
            Some(vec![source.stage.clone()]),
        );
        if registry.instances_by_filter(&filter)?.is_empty() {
            plan.warn(Error::instance_no_match(filter.describe()));
            continue;
        }

        plan.tasks.push(Task::CopyShared {
            source,
            target: key,
        });
    }

    Ok(plan)
}

pub fn plan_run(
    config: &Config,
    registry: &mut InstanceRegistry,
    target: &str,
    script: &str,
) -> Result<Plan> {
    if config.script(script).is_none() {
        let known: Vec<String> = config.application.scripts.keys().cloned().collect();
        return Err(Error::validation_invalid_argument(
            "script",
            format!("script '{}' is not configured", script),
            Some(script.to_string()),
            Some(known),
        ));
    }

    let mut plan = Plan::default();
    for key in resolve_target(registry, target, &mut plan)? {
        plan.tasks.push(Task::Run {
            instance: key,
            script: script.to_string(),
        });
    }

    Ok(plan)
}
