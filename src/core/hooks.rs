//! Lifecycle hooks.
//!
//! Hooks are configured scripts bound to a named event. Scripts carrying an
//! `instance_filter` only run for instances that match it. Scripts of one
//! event run in `order`, then name order.
//!
//! Events: `build`, `deploy`, `after_deploy`, `rollback`, `after_rollback`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{Config, ScriptConfig};
use crate::connection::Connection;
use crate::error::Result;
use crate::filter::Filter;
use crate::instance::InstanceKey;

pub mod events {
    pub const BUILD: &str = "build";
    pub const DEPLOY: &str = "deploy";
    pub const AFTER_DEPLOY: &str = "after_deploy";
    pub const ROLLBACK: &str = "rollback";
    pub const AFTER_ROLLBACK: &str = "after_rollback";
}

pub const HAS_PREVIOUS_INSTALLATION: &str = "HAS_PREVIOUS_INSTALLATION";
pub const PREVIOUS_INSTALLATION_PATH: &str = "PREVIOUS_INSTALLATION_PATH";

/// Scripts that ran for one event.
#[derive(Debug, Clone, Serialize)]
pub struct HookRunResult {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub scripts: Vec<String>,
}

/// Whether `script` is scoped to `instance`. Unscoped scripts match everything.
fn in_scope(script: &ScriptConfig, instance: Option<&InstanceKey>) -> bool {
    match (&script.instance_filter, instance) {
        (Some(spec), Some(key)) => Filter::from_instance_specification(spec)
            .map(|filter| filter.matches(key))
            .unwrap_or(false),
        _ => true,
    }
}

/// Scripts bound to `event` that apply to `instance`, in execution order.
pub fn resolve_hooks<'a>(
    config: &'a Config,
    event: &str,
    instance: Option<&InstanceKey>,
) -> Vec<(&'a str, &'a ScriptConfig)> {
    config
        .hook_scripts(event)
        .into_iter()
        .filter(|(_, script)| in_scope(script, instance))
        .collect()
}

/// Run every script of `event` for `instance` inside `working_folder`.
/// The first failing command aborts the remaining scripts.
pub fn run_hooks(
    config: &Config,
    event: &str,
    instance: Option<&InstanceKey>,
    connection: &Connection,
    working_folder: &str,
    env: &BTreeMap<String, String>,
) -> Result<HookRunResult> {
    let mut scripts = Vec::new();

    for (name, script) in resolve_hooks(config, event, instance) {
        log_status!("hooks", "Running {} script '{}'", event, name);
        connection.execute_script(working_folder, &script.script, env)?;
        scripts.push(name.to_string());
    }

    Ok(HookRunResult {
        event: event.to_string(),
        instance: instance.map(ToString::to_string),
        scripts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use tempfile::tempdir;

    const CONFIG: &str = r#"
application:
  scripts:
    migrate:
      hook: deploy
      order: 2
      script: ["echo migrate >> hooks.log"]
    warmup:
      hook: deploy
      order: 1
      instance_filter: "*:*:production"
      script: ["echo warmup >> hooks.log"]
    report:
      hook: deploy
      order: 1
      script: ["echo \"previous=$HAS_PREVIOUS_INSTALLATION\" >> hooks.log"]
    notify:
      hook: after_deploy
      script: ["echo notify"]
servers:
  local:
    path: /tmp/agnes
    environments:
      shop.com: [staging, production]
"#;

    fn config() -> Config {
        config::parse(CONFIG, "agnes.yml").unwrap()
    }

    #[test]
    fn resolves_in_order_and_scope() {
        let config = config();
        let staging = InstanceKey::new("local", "shop.com", "staging");
        let production = InstanceKey::new("local", "shop.com", "production");

        let names = |key: &InstanceKey| -> Vec<&str> {
            resolve_hooks(&config, events::DEPLOY, Some(key))
                .into_iter()
                .map(|(name, _)| name)
                .collect()
        };

        assert_eq!(names(&staging), vec!["report", "migrate"]);
        assert_eq!(names(&production), vec!["report", "warmup", "migrate"]);
    }

    #[test]
    fn unscoped_run_includes_filtered_scripts() {
        let config = config();
        let all = resolve_hooks(&config, events::DEPLOY, None);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn runs_scripts_with_environment() {
        let dir = tempdir().unwrap();
        let folder = dir.path().to_string_lossy().to_string();
        let config = config();
        let mut env = BTreeMap::new();
        env.insert(HAS_PREVIOUS_INSTALLATION.to_string(), "false".to_string());

        let result = run_hooks(
            &config,
            events::DEPLOY,
            Some(&InstanceKey::new("local", "shop.com", "staging")),
            &Connection::local(),
            &folder,
            &env,
        )
        .unwrap();

        assert_eq!(result.scripts, vec!["report", "migrate"]);
        let log = std::fs::read_to_string(dir.path().join("hooks.log")).unwrap();
        assert_eq!(log, "previous=false\nmigrate\n");
    }

    #[test]
    fn failing_script_stops_the_hook() {
        let dir = tempdir().unwrap();
        let raw = r#"
application:
  scripts:
    broken:
      hook: rollback
      order: 1
      script: ["exit 3"]
    after:
      hook: rollback
      order: 2
      script: ["touch ran"]
servers:
  local:
    path: /tmp/agnes
    environments:
      shop.com: [staging]
"#;
        let config = config::parse(raw, "agnes.yml").unwrap();

        let err = run_hooks(
            &config,
            events::ROLLBACK,
            None,
            &Connection::local(),
            &dir.path().to_string_lossy(),
            &BTreeMap::new(),
        )
        .unwrap_err();

        assert_eq!(err.code.as_str(), "remote.command_failed");
        assert!(!dir.path().join("ran").exists());
    }
}
