use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::instance::InstanceKey;
use crate::registry::InstanceRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    pub source: String,
    pub target: String,
    pub copied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

/// Copy the content of every shared folder from `source` to `target`.
///
/// Copying an instance onto itself does nothing. Both instances must be
/// reachable through the same connection since the copy runs on one host.
pub fn copy_shared(
    config: &Config,
    registry: &InstanceRegistry,
    source: &InstanceKey,
    target: &InstanceKey,
) -> Result<CopyResult> {
    let mut result = CopyResult {
        source: source.to_string(),
        target: target.to_string(),
        copied: Vec::new(),
        skipped: None,
    };

    if source == target {
        result.skipped = Some("source and target are the same instance".to_string());
        return Ok(result);
    }

    let unknown = |key: &InstanceKey| {
        Error::validation_invalid_argument(
            "instance",
            "instance is not configured",
            Some(key.to_string()),
            None,
        )
    };
    let source_instance = registry.get(source).ok_or_else(|| unknown(source))?;
    let target_instance = registry.get(target).ok_or_else(|| unknown(target))?;

    if !source_instance
        .connection
        .same_channel(&target_instance.connection)
    {
        return Err(Error::validation_invalid_argument(
            "source",
            format!(
                "cannot copy between different connections ({} and {})",
                source_instance.connection.describe(),
                target_instance.connection.describe()
            ),
            Some(source.to_string()),
            None,
        ));
    }

    let connection = &target_instance.connection;
    for name in &config.application.shared_folders {
        let from = source_instance.shared_folder(name);
        if !connection.folder_exists(&from)? {
            continue;
        }

        log_status!("copy", "Copying shared folder {} from {} to {}", name, source, target);
        connection.copy_folder_content(&from, &target_instance.shared_folder(name))?;
        result.copied.push(name.clone());
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use std::path::Path;
    use tempfile::tempdir;

    fn setup(root: &Path) -> (Config, InstanceRegistry) {
        let raw = format!(
            r#"
application:
  shared_folders: [uploads, var/cache]
servers:
  local:
    path: {}
    environments:
      shop.com: [staging, production]
  remote:
    path: /var/www
    connection:
      type: ssh
      host: example.com
      user: deploy
    environments:
      shop.com: [production]
"#,
            root.display()
        );
        let config = config::parse(&raw, "agnes.yml").unwrap();
        let registry = InstanceRegistry::from_config(&config).unwrap();
        (config, registry)
    }

    #[test]
    fn copies_existing_shared_folders() {
        let dir = tempdir().unwrap();
        let (config, registry) = setup(dir.path());
        let uploads = dir.path().join("shop.com/production/shared/uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("a.jpg"), "image").unwrap();

        let result = copy_shared(
            &config,
            &registry,
            &InstanceKey::new("local", "shop.com", "production"),
            &InstanceKey::new("local", "shop.com", "staging"),
        )
        .unwrap();

        assert_eq!(result.copied, vec!["uploads".to_string()]);
        let copied = dir.path().join("shop.com/staging/shared/uploads/a.jpg");
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "image");
    }

    #[test]
    fn same_instance_is_a_no_op() {
        let dir = tempdir().unwrap();
        let (config, registry) = setup(dir.path());
        let key = InstanceKey::new("local", "shop.com", "staging");

        let result = copy_shared(&config, &registry, &key, &key).unwrap();
        assert!(result.skipped.is_some());
        assert!(result.copied.is_empty());
    }

    #[test]
    fn refuses_copies_across_connections() {
        let dir = tempdir().unwrap();
        let (config, registry) = setup(dir.path());

        let err = copy_shared(
            &config,
            &registry,
            &InstanceKey::new("remote", "shop.com", "production"),
            &InstanceKey::new("local", "shop.com", "staging"),
        )
        .unwrap_err();
        assert!(err.message.contains("different connections"));
    }
}
