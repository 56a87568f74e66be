//! Promotion and consistency rules checked before a task runs.
//!
//! Policies are plain data evaluated by [`Policy::evaluate`]. A task runs only
//! when every applicable policy permits it; [`PolicyEngine::check`] evaluates
//! all of them and returns every denial, not just the first.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::config::{Config, PolicyConfig};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::instance::InstanceKey;
use crate::registry::InstanceRegistry;
use crate::task::{Task, TaskKind};

/// Ordered stage tiers, lowest first (e.g. dev < staging < production).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layers {
    layers: Vec<Vec<String>>,
}

impl Layers {
    pub fn new(layers: Vec<Vec<String>>) -> Self {
        Self { layers }
    }

    /// Keys must be exactly `0..n`; every stage may appear in one layer only.
    pub fn from_config(layers: &BTreeMap<u32, Vec<String>>, key: &str) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::config_missing_key(format!("{}.layers", key), None));
        }

        for (expected, actual) in layers.keys().enumerate() {
            if expected as u32 != *actual {
                let found: Vec<String> = layers.keys().map(|k| k.to_string()).collect();
                return Err(Error::config_invalid_value(
                    format!("{}.layers", key),
                    Some(found.join(",")),
                    "layer keys must be contiguous integers starting at 0",
                ));
            }
        }

        let mut seen = HashSet::new();
        for (index, stages) in layers {
            if stages.is_empty() {
                return Err(Error::config_invalid_value(
                    format!("{}.layers.{}", key, index),
                    None,
                    "layer must list at least one stage",
                ));
            }
            for stage in stages {
                if !seen.insert(stage.as_str()) {
                    return Err(Error::config_invalid_value(
                        format!("{}.layers", key),
                        Some(stage.clone()),
                        "stage appears in more than one layer",
                    ));
                }
            }
        }

        Ok(Self::new(layers.values().cloned().collect()))
    }

    pub fn layer_index(&self, stage: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|candidate| candidate == stage))
    }

    pub fn is_lowest_layer(&self, index: usize) -> bool {
        index == 0
    }

    pub fn is_highest_layer(&self, index: usize) -> bool {
        index + 1 == self.layers.len()
    }

    pub fn next_lower_layer(&self, index: usize) -> Option<&[String]> {
        index
            .checked_sub(1)
            .and_then(|lower| self.layers.get(lower))
            .map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyKind {
    StageWriteUp { layers: Layers },
    StageWriteDown { layers: Layers },
    SameRelease,
    ReleaseWhitelist { commitishes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    pub kind: PolicyKind,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Permit,
    Deny(String),
}

impl Policy {
    pub fn new(kind: PolicyKind, filter: Option<Filter>) -> Self {
        Self { kind, filter }
    }

    pub fn from_config(config: &PolicyConfig, key: &str) -> Result<Self> {
        let (kind, filter) = match config {
            PolicyConfig::StageWriteUp { layers, filter } => (
                PolicyKind::StageWriteUp {
                    layers: Layers::from_config(layers, key)?,
                },
                filter,
            ),
            PolicyConfig::StageWriteDown { layers, filter } => (
                PolicyKind::StageWriteDown {
                    layers: Layers::from_config(layers, key)?,
                },
                filter,
            ),
            PolicyConfig::SameRelease { filter } => (PolicyKind::SameRelease, filter),
            PolicyConfig::ReleaseWhitelist {
                commitishes,
                filter,
            } => (
                PolicyKind::ReleaseWhitelist {
                    commitishes: commitishes.clone(),
                },
                filter,
            ),
        };

        let filter = match filter {
            Some(spec) => Some(Filter::from_instance_specification(spec).map_err(|_| {
                Error::config_invalid_value(
                    format!("{}.filter", key),
                    Some(spec.clone()),
                    "expected server:environment:stage",
                )
            })?),
            None => None,
        };

        Ok(Self::new(kind, filter))
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            PolicyKind::StageWriteUp { .. } => "stage_write_up",
            PolicyKind::StageWriteDown { .. } => "stage_write_down",
            PolicyKind::SameRelease => "same_release",
            PolicyKind::ReleaseWhitelist { .. } => "release_whitelist",
        }
    }

    /// Filter scoping. Tasks without an instance are always in scope.
    pub fn applies_to(&self, task: &Task) -> bool {
        match (&self.filter, task.instance()) {
            (Some(filter), Some(instance)) => filter.matches(instance),
            _ => true,
        }
    }

    /// Decide `task`. Policies permit task kinds they do not govern.
    ///
    /// Takes the registry mutably because stage checks may need to load
    /// instances the task itself never touches.
    pub fn evaluate(&self, task: &Task, registry: &mut InstanceRegistry) -> Result<Verdict> {
        if !self.applies_to(task) {
            return Ok(Verdict::Permit);
        }

        match (&self.kind, task) {
            (PolicyKind::StageWriteUp { layers }, Task::Deploy { instance, source }) => {
                stage_write_up(layers, instance, source.identification(), registry)
            }
            (PolicyKind::StageWriteDown { layers }, Task::CopyShared { source, target }) => {
                Ok(stage_write_down(layers, source, target))
            }
            (PolicyKind::SameRelease, Task::CopyShared { source, target }) => {
                same_release(source, target, registry)
            }
            (PolicyKind::ReleaseWhitelist { commitishes }, Task::Release { commitish, .. }) => {
                Ok(release_whitelist(commitishes, commitish))
            }
            _ => Ok(Verdict::Permit),
        }
    }
}

fn stage_write_up(
    layers: &Layers,
    instance: &InstanceKey,
    identification: &str,
    registry: &mut InstanceRegistry,
) -> Result<Verdict> {
    let Some(index) = layers.layer_index(&instance.stage) else {
        return Ok(Verdict::Deny(format!(
            "stage '{}' of {} is not part of any layer",
            instance.stage, instance
        )));
    };

    if layers.is_lowest_layer(index) {
        return Ok(Verdict::Permit);
    }

    let Some(lower) = layers.next_lower_layer(index) else {
        return Ok(Verdict::Permit);
    };

    let filter = Filter::new(
        None,
        Some(vec![instance.environment.clone()]),
        Some(lower.to_vec()),
    );
    let candidates = registry.instances_by_filter(&filter)?;
    if candidates.is_empty() {
        return Ok(Verdict::Permit);
    }

    let promoted = candidates.iter().any(|key| {
        registry
            .get(key)
            .is_some_and(|candidate| candidate.has_installed(identification))
    });

    if promoted {
        Ok(Verdict::Permit)
    } else {
        Ok(Verdict::Deny(format!(
            "'{}' was never installed on a {} instance of {} before {}",
            identification,
            lower.join(","),
            instance.environment,
            instance
        )))
    }
}

/// Copying may not skip layers upwards. Copies into the lowest layer and
/// copies out of the highest layer are always allowed.
fn stage_write_down(layers: &Layers, source: &InstanceKey, target: &InstanceKey) -> Verdict {
    let (Some(source_index), Some(target_index)) = (
        layers.layer_index(&source.stage),
        layers.layer_index(&target.stage),
    ) else {
        return Verdict::Deny(format!(
            "stages '{}' and '{}' must both be part of a layer",
            source.stage, target.stage
        ));
    };

    if layers.is_lowest_layer(target_index) || layers.is_highest_layer(source_index) {
        return Verdict::Permit;
    }

    if source_index == target_index || source_index + 1 == target_index {
        return Verdict::Permit;
    }

    Verdict::Deny(format!(
        "copying from {} (layer {}) to {} (layer {}) is not allowed",
        source, source_index, target, target_index
    ))
}

fn same_release(
    source: &InstanceKey,
    target: &InstanceKey,
    registry: &InstanceRegistry,
) -> Result<Verdict> {
    let current = |key: &InstanceKey| {
        registry
            .get(key)
            .and_then(|instance| instance.current_installation())
            .map(|installation| installation.identification.clone())
    };

    let verdict = match (current(source), current(target)) {
        (None, _) => Verdict::Deny(format!("{} has no active installation", source)),
        (_, None) => Verdict::Deny(format!("{} has no active installation", target)),
        (Some(a), Some(b)) if a != b => Verdict::Deny(format!(
            "{} runs '{}' but {} runs '{}'",
            source, a, target, b
        )),
        _ => Verdict::Permit,
    };

    Ok(verdict)
}

fn release_whitelist(commitishes: &[String], commitish: &str) -> Verdict {
    if commitishes.iter().any(|allowed| allowed == commitish) {
        return Verdict::Permit;
    }

    Verdict::Deny(format!(
        "'{}' is not whitelisted for releases (allowed: {})",
        commitish,
        commitishes.join(", ")
    ))
}

/// The configured policies, grouped by the task kind they are listed under.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policies: BTreeMap<TaskKind, Vec<Policy>>,
}

impl PolicyEngine {
    pub fn new(policies: BTreeMap<TaskKind, Vec<Policy>>) -> Self {
        Self { policies }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.policies()?))
    }

    /// Every denial reason for `task`; empty when all policies permit it.
    pub fn check(&self, task: &Task, registry: &mut InstanceRegistry) -> Result<Vec<String>> {
        let mut reasons = Vec::new();

        let Some(policies) = self.policies.get(&task.kind()) else {
            return Ok(reasons);
        };

        for policy in policies {
            if let Verdict::Deny(reason) = policy.evaluate(task, registry)? {
                reasons.push(format!("{}: {}", policy.name(), reason));
            }
        }

        Ok(reasons)
    }
}
