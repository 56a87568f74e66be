//! YAML configuration: loading, `${VAR}` substitution and validation.
//!
//! Everything that can be rejected up front is rejected here, so a run never
//! starts executing tasks against a configuration it cannot fully interpret.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::connection::Platform;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::policy::Policy;
use crate::task::TaskKind;

pub const DEFAULT_CONFIG_FILE: &str = "agnes.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agnes: AgnesConfig,
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgnesConfig {
    #[serde(default)]
    pub github: Option<GithubConfig>,
    #[serde(default)]
    pub build: BuildConfig,
    /// Local folder holding the files listed in `application.files`.
    #[serde(default = "default_config_folder")]
    pub config_folder: String,
}

impl Default for AgnesConfig {
    fn default() -> Self {
        Self {
            github: None,
            build: BuildConfig::default(),
            config_folder: default_config_folder(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    pub api_token: String,
    /// `owner/name`
    pub repository: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_path")]
    pub path: String,
    #[serde(default = "default_build_output")]
    pub output: String,
    /// Clone URL. Falls back to the GitHub repository when unset.
    #[serde(default)]
    pub repository_url: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            path: default_build_path(),
            output: default_build_output(),
            repository_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub shared_folders: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileConfig>,
    #[serde(default)]
    pub scripts: BTreeMap<String, ScriptConfig>,
    #[serde(default)]
    pub policies: BTreeMap<TaskKind, Vec<PolicyConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub path: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    #[serde(default)]
    pub hook: Option<String>,
    #[serde(default)]
    pub instance_filter: Option<String>,
    #[serde(default)]
    pub order: i32,
    pub script: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    StageWriteUp {
        layers: BTreeMap<u32, Vec<String>>,
        #[serde(default)]
        filter: Option<String>,
    },
    StageWriteDown {
        layers: BTreeMap<u32, Vec<String>>,
        #[serde(default)]
        filter: Option<String>,
    },
    SameRelease {
        #[serde(default)]
        filter: Option<String>,
    },
    ReleaseWhitelist {
        commitishes: Vec<String>,
        #[serde(default)]
        filter: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    #[default]
    Local,
    Ssh {
        host: String,
        user: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        identity_file: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub path: String,
    #[serde(default = "default_keep_installations")]
    pub keep_installations: usize,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub script_overrides: HashMap<String, String>,
    #[serde(default)]
    pub environments: BTreeMap<String, Vec<String>>,
}

fn default_config_folder() -> String {
    "config".to_string()
}

fn default_build_path() -> String {
    ".build".to_string()
}

fn default_build_output() -> String {
    "dist".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_keep_installations() -> usize {
    2
}

// ============================================================================
// Loading
// ============================================================================

pub fn load(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::config_invalid_value(
            "config",
            Some(path.display().to_string()),
            format!("cannot read configuration file: {}", e),
        )
        .with_hint(format!(
            "Create {} or pass --config <path>",
            DEFAULT_CONFIG_FILE
        ))
    })?;

    parse(&raw, &path.display().to_string())
}

/// Parse raw YAML (after `${VAR}` substitution from the process environment).
pub fn parse(raw: &str, source: &str) -> Result<Config> {
    let substituted = substitute_env(raw, |name| std::env::var(name).ok())?;
    let config: Config = serde_yml::from_str(&substituted)
        .map_err(|e| Error::config_invalid_yaml(source, e))?;
    config.validate()?;
    Ok(config)
}

/// Replace `${NAME}` placeholders using `lookup`. Unset variables are errors.
pub fn substitute_env(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| Error::internal_unexpected(e.to_string()))?;

    let mut missing = None;
    let result = pattern.replace_all(raw, |caps: &regex::Captures| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(Error::config_missing_key(
            name.clone(),
            Some("environment".to_string()),
        )
        .with_hint(format!("Export {} before running agnes", name)));
    }

    Ok(result.into_owned())
}

// ============================================================================
// Validation and lookups
// ============================================================================

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::config_missing_key("servers", None));
        }

        for (name, server) in &self.servers {
            if server.path.trim().is_empty() {
                return Err(Error::config_missing_key(
                    format!("servers.{}.path", name),
                    None,
                ));
            }
            for (environment, stages) in &server.environments {
                if stages.is_empty() {
                    return Err(Error::config_invalid_value(
                        format!("servers.{}.environments.{}", name, environment),
                        None,
                        "environment must list at least one stage",
                    ));
                }
            }
        }

        for (name, script) in &self.application.scripts {
            if let Some(spec) = &script.instance_filter {
                Filter::from_instance_specification(spec).map_err(|_| {
                    Error::config_invalid_value(
                        format!("application.scripts.{}.instance_filter", name),
                        Some(spec.clone()),
                        "expected server:environment:stage",
                    )
                })?;
            }
        }

        self.policies()?;
        Ok(())
    }

    /// Build the policy set for every task kind.
    pub fn policies(&self) -> Result<BTreeMap<TaskKind, Vec<Policy>>> {
        let mut result = BTreeMap::new();
        for (kind, configs) in &self.application.policies {
            let mut policies = Vec::new();
            for (index, config) in configs.iter().enumerate() {
                let key = format!("application.policies.{}[{}]", kind.as_str(), index);
                policies.push(Policy::from_config(config, &key)?);
            }
            result.insert(*kind, policies);
        }
        Ok(result)
    }

    /// Scripts bound to `hook`, in `order` then name order.
    pub fn hook_scripts(&self, hook: &str) -> Vec<(&str, &ScriptConfig)> {
        let mut scripts: Vec<(&str, &ScriptConfig)> = self
            .application
            .scripts
            .iter()
            .filter(|(_, script)| script.hook.as_deref() == Some(hook))
            .map(|(name, script)| (name.as_str(), script))
            .collect();
        scripts.sort_by_key(|(name, script)| (script.order, *name));
        scripts
    }

    pub fn script(&self, name: &str) -> Option<&ScriptConfig> {
        self.application.scripts.get(name)
    }

    pub fn repository_url(&self) -> Result<String> {
        if let Some(url) = &self.agnes.build.repository_url {
            return Ok(url.clone());
        }
        match &self.agnes.github {
            Some(github) => Ok(format!("https://github.com/{}.git", github.repository)),
            None => Err(Error::config_missing_key(
                "agnes.build.repository_url",
                None,
            )
            .with_hint("Configure agnes.github.repository or agnes.build.repository_url")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
agnes:
  github:
    api_token: secret
    repository: famoser/shop
application:
  shared_folders: [var/persistent]
  files:
    - path: .env.local
      required: true
  scripts:
    migrate:
      hook: after_deploy
      instance_filter: "*:*:production"
      script: ["php bin/console migrate"]
    warmup:
      hook: after_deploy
      order: -1
      script: ["php bin/console cache:warmup"]
  policies:
    deploy:
      - type: stage_write_up
        layers:
          0: [dev]
          1: [staging]
          2: [production]
    release:
      - type: release_whitelist
        commitishes: [master]
servers:
  aws:
    connection:
      type: ssh
      host: example.com
      user: deploy
    path: /var/www
    keep_installations: 3
    platform: bsd
    environments:
      shop.com: [staging, production]
"#;

    #[test]
    fn parses_full_configuration() {
        let config = parse(SAMPLE, "agnes.yml").unwrap();

        let server = &config.servers["aws"];
        assert_eq!(server.keep_installations, 3);
        assert_eq!(server.platform, Platform::Bsd);
        assert!(matches!(
            server.connection,
            ConnectionConfig::Ssh { port: 22, .. }
        ));
        assert_eq!(server.environments["shop.com"], vec!["staging", "production"]);
        assert_eq!(config.application.shared_folders, vec!["var/persistent"]);
        assert!(config.application.files[0].required);
        assert_eq!(config.agnes.config_folder, "config");

        let policies = config.policies().unwrap();
        assert_eq!(policies[&TaskKind::Deploy].len(), 1);
        assert_eq!(policies[&TaskKind::Release].len(), 1);
    }

    #[test]
    fn hook_scripts_respect_order() {
        let config = parse(SAMPLE, "agnes.yml").unwrap();
        let names: Vec<&str> = config
            .hook_scripts("after_deploy")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["warmup", "migrate"]);
        assert!(config.hook_scripts("deploy").is_empty());
    }

    #[test]
    fn repository_url_falls_back_to_github() {
        let config = parse(SAMPLE, "agnes.yml").unwrap();
        assert_eq!(
            config.repository_url().unwrap(),
            "https://github.com/famoser/shop.git"
        );
    }

    #[test]
    fn substitutes_environment_variables() {
        let raw = "token: ${TOKEN}\nother: $NOT_A_PLACEHOLDER";
        let result = substitute_env(raw, |name| {
            (name == "TOKEN").then(|| "abc".to_string())
        })
        .unwrap();
        assert_eq!(result, "token: abc\nother: $NOT_A_PLACEHOLDER");
    }

    #[test]
    fn unset_environment_variable_is_config_error() {
        let err = substitute_env("token: ${MISSING_TOKEN}", |_| None).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
        assert_eq!(err.details["key"], "MISSING_TOKEN");
    }

    #[test]
    fn rejects_missing_servers() {
        let err = parse("application: {}", "agnes.yml").unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }

    #[test]
    fn rejects_sparse_layers() {
        let raw = r#"
application:
  policies:
    deploy:
      - type: stage_write_up
        layers:
          0: [dev]
          2: [production]
servers:
  local:
    path: /tmp/agnes
    environments:
      shop: [dev, production]
"#;
        let err = parse(raw, "agnes.yml").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
        assert!(err.message.contains("contiguous"));
    }

    #[test]
    fn rejects_invalid_yaml() {
        let err = parse("servers: [unclosed", "agnes.yml").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_yaml");
    }
}
