use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::deploy;
use crate::error::{Error, Result};
use crate::hooks::{self, events, HookRunResult};
use crate::instance::Instance;

#[derive(Debug, Clone, Serialize)]
pub struct RollbackResult {
    pub instance: String,
    pub from: u32,
    pub to: u32,
    pub identification: String,
    pub hooks: Vec<HookRunResult>,
}

/// Pick the installation to roll back to.
///
/// Candidates are numbered below the current installation, optionally
/// restricted to `rollback_to`; the closest preceding one wins. `None` when
/// there is no current installation, when `rollback_from` does not name the
/// current one, or when no candidate is left.
pub fn select_rollback_target(
    instance: &Instance,
    rollback_to: Option<&str>,
    rollback_from: Option<&str>,
) -> Option<u32> {
    let current = instance.current_installation()?;

    if rollback_from.is_some_and(|from| from != current.identification) {
        return None;
    }

    instance
        .installations()
        .filter(|installation| installation.number < current.number)
        .filter(|installation| {
            rollback_to.map_or(true, |to| installation.identification == to)
        })
        .map(|installation| installation.number)
        .max()
}

/// Switch `instance` back to the existing installation `target`.
///
/// The rollback hook runs in the installation being left, with
/// `PREVIOUS_INSTALLATION_PATH` naming the target; `after_rollback` runs in
/// the target once it is current.
pub fn rollback(
    config: &Config,
    instance: &mut Instance,
    target: u32,
    now: DateTime<Utc>,
) -> Result<RollbackResult> {
    instance.load()?;
    let connection = Rc::clone(&instance.connection);

    let (from, from_folder) = instance
        .current_installation()
        .map(|installation| (installation.number, installation.folder.clone()))
        .ok_or_else(|| {
            Error::rollback_no_target(instance.key.to_string(), "no current installation")
        })?;
    let (target_folder, identification) = instance
        .installation(target)
        .map(|installation| (installation.folder.clone(), installation.identification.clone()))
        .ok_or_else(|| {
            Error::rollback_no_target(
                instance.key.to_string(),
                format!("installation {} does not exist", target),
            )
        })?;

    log_status!(
        "rollback",
        "Rolling {} back from {} to {}",
        instance.key,
        from,
        identification
    );

    let mut env = BTreeMap::new();
    env.insert(
        hooks::PREVIOUS_INSTALLATION_PATH.to_string(),
        target_folder.clone(),
    );

    let mut hook_results = Vec::new();
    hook_results.push(hooks::run_hooks(
        config,
        events::ROLLBACK,
        Some(&instance.key),
        &connection,
        &from_folder,
        &env,
    )?);

    deploy::switch_to(instance, target, now)?;

    hook_results.push(hooks::run_hooks(
        config,
        events::AFTER_ROLLBACK,
        Some(&instance.key),
        &connection,
        &target_folder,
        &BTreeMap::new(),
    )?);

    Ok(RollbackResult {
        instance: instance.key.to_string(),
        from,
        to: target,
        identification,
        hooks: hook_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::connection::Connection;
    use crate::installation::Installation;
    use crate::instance::InstanceKey;
    use chrono::TimeZone;
    use std::path::Path;
    use tempfile::tempdir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    /// Installations 1 (`h1`), 2 (`h2`) and 3 (`h3`, current) under `root`.
    fn instance(root: &str) -> Instance {
        let mut instance = Instance::new(
            InstanceKey::new("local", "shop.com", "production"),
            root,
            Rc::new(Connection::local()),
            5,
        );
        instance.load().unwrap();
        for number in 1..=3 {
            let name = format!("h{}", number);
            let folder = format!("{}/{}", instance.installations_folder(), name);
            std::fs::create_dir_all(&folder).unwrap();
            let installation = Installation::new(folder, number, name);
            installation.persist(&instance.connection).unwrap();
            instance.add_installation(installation);
        }
        instance
    }

    #[test]
    fn selects_closest_preceding_installation() {
        let dir = tempdir().unwrap();
        let mut instance = instance(&dir.path().to_string_lossy());
        deploy::switch_to(&mut instance, 3, at(1)).unwrap();

        assert_eq!(select_rollback_target(&instance, None, None), Some(2));
        assert_eq!(select_rollback_target(&instance, Some("h1"), None), Some(1));
        assert_eq!(select_rollback_target(&instance, None, Some("h3")), Some(2));
        assert_eq!(select_rollback_target(&instance, None, Some("h9")), None);
        assert_eq!(select_rollback_target(&instance, Some("h3"), None), None);
    }

    #[test]
    fn no_current_means_no_target() {
        let dir = tempdir().unwrap();
        let instance = instance(&dir.path().to_string_lossy());
        assert_eq!(select_rollback_target(&instance, None, None), None);
    }

    #[test]
    fn rollback_switches_and_runs_hooks() {
        let dir = tempdir().unwrap();
        let raw = r#"
application:
  scripts:
    remember:
      hook: rollback
      script: ["echo \"$PREVIOUS_INSTALLATION_PATH\" > rollback.log"]
    confirm:
      hook: after_rollback
      script: ["touch restored"]
servers:
  local:
    path: /unused
    environments:
      shop.com: [production]
"#;
        let config = config::parse(raw, "agnes.yml").unwrap();
        let mut instance = instance(&dir.path().to_string_lossy());
        deploy::switch_to(&mut instance, 3, at(1)).unwrap();

        let result = rollback(&config, &mut instance, 2, at(2)).unwrap();

        assert_eq!((result.from, result.to), (3, 2));
        assert_eq!(instance.current_number(), Some(2));
        let left = Path::new(&instance.installation(3).unwrap().folder).to_path_buf();
        let target = Path::new(&instance.installation(2).unwrap().folder).to_path_buf();
        assert_eq!(
            std::fs::read_to_string(left.join("rollback.log")).unwrap().trim(),
            target.to_string_lossy()
        );
        assert!(target.join("restored").exists());
        assert!(!instance.installation(3).unwrap().is_online());
        assert_eq!(
            std::fs::canonicalize(instance.current_link()).unwrap(),
            std::fs::canonicalize(&target).unwrap()
        );
    }

    #[test]
    fn rollback_without_current_fails() {
        let dir = tempdir().unwrap();
        let raw = "servers:\n  local:\n    path: /unused\n    environments:\n      shop.com: [production]\n";
        let config = config::parse(raw, "agnes.yml").unwrap();
        let mut instance = instance(&dir.path().to_string_lossy());

        let err = rollback(&config, &mut instance, 1, at(1)).unwrap_err();
        assert_eq!(err.code.as_str(), "rollback.no_target");
    }
}
