use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::github::{self, ArtifactHost};
use crate::hooks::{self, events};
use crate::setup::Setup;
use crate::utils::base_path;

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub commitish: String,
    pub commit_hash: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseResult {
    pub name: String,
    pub commitish: String,
    pub commit_hash: String,
    pub asset: String,
}

/// Check out `commitish`, run the `build` hooks and package the result.
///
/// Runs in the local build folder, which is cleared first and removed
/// afterwards. Repository metadata (`.git`) is not part of the archive.
pub fn build(config: &Config, connection: &Connection, commitish: &str) -> Result<Setup> {
    let folder = config.agnes.build.path.trim_end_matches('/').to_string();
    let archive = format!("{}.tar.gz", folder);
    let repository = config.repository_url()?;

    log_status!("build", "Building {} from {}", commitish, repository);

    connection.create_or_clear_folder(&folder)?;
    let commit_hash = connection.checkout_repository(&folder, &repository, commitish)?;
    log_status!("build", "Checked out {} at {}", commitish, commit_hash);

    hooks::run_hooks(
        config,
        events::BUILD,
        None,
        connection,
        &folder,
        &BTreeMap::new(),
    )?;

    connection.remove_folder(&base_path::join_remote_path(&folder, ".git"))?;
    connection.compress_tar_gz(&folder, &archive)?;
    let content = connection.read_file(&archive)?;
    connection.remove_file(&archive)?;
    connection.remove_folder(&folder)?;

    Ok(Setup::from_build(commit_hash, content))
}

/// Write a built archive to `<output>/<hash>.tar.gz`.
pub fn write_build_output(config: &Config, setup: &Setup) -> Result<PathBuf> {
    let output = Path::new(&config.agnes.build.output);
    std::fs::create_dir_all(output).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("create {}", output.display())))
    })?;

    let path = output.join(format!("{}.tar.gz", setup.identification()));
    std::fs::write(&path, &setup.archive)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("write {}", path.display()))))?;

    log_status!("build", "Wrote {}", path.display());
    Ok(path)
}

/// Build `commitish` and publish it as release `name`.
pub fn release(
    config: &Config,
    connection: &Connection,
    host: &dyn ArtifactHost,
    name: &str,
    commitish: &str,
) -> Result<(ReleaseResult, Setup)> {
    let built = build(config, connection, commitish)?;

    log_status!("release", "Publishing {} ({})", name, commitish);
    host.publish_release(name, commitish, &built.archive)?;

    let commit_hash = built.commit_hash.clone().unwrap_or_default();
    let setup = Setup {
        release: Some(name.to_string()),
        ..built
    };

    Ok((
        ReleaseResult {
            name: name.to_string(),
            commitish: commitish.to_string(),
            commit_hash,
            asset: github::asset_name(name),
        },
        setup,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::github::Release;
    use std::cell::RefCell;
    use std::process::Command;
    use tempfile::{tempdir, TempDir};

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=agnes", "-c", "user.email=agnes@example.com"])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success());
    }

    /// A repository with one commit tagged `v1`.
    fn repository() -> TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.php"), "<?php echo 1;").unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "initial"]);
        git(dir.path(), &["tag", "v1"]);
        dir
    }

    fn config(repository: &Path, work: &Path) -> Config {
        let raw = format!(
            r#"
agnes:
  build:
    path: {work}/build
    output: {work}/dist
    repository_url: {repo}
application:
  scripts:
    assets:
      hook: build
      script: ["echo compiled > assets.css"]
servers:
  local:
    path: /unused
    environments:
      shop.com: [staging]
"#,
            work = work.display(),
            repo = repository.display()
        );
        config::parse(&raw, "agnes.yml").unwrap()
    }

    fn entries(archive: &[u8]) -> Vec<String> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.tar.gz");
        std::fs::write(&path, archive).unwrap();
        let output = Command::new("tar").arg("-tzf").arg(&path).output().unwrap();
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim_start_matches("./").to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    #[test]
    fn builds_archive_with_hook_output() {
        let repo = repository();
        let work = tempdir().unwrap();
        let config = config(repo.path(), work.path());

        let setup = build(&config, &Connection::local(), "v1").unwrap();

        assert_eq!(setup.commit_hash.as_deref().map(str::len), Some(40));
        let entries = entries(&setup.archive);
        assert!(entries.contains(&"index.php".to_string()));
        assert!(entries.contains(&"assets.css".to_string()));
        assert!(!entries.iter().any(|entry| entry.starts_with(".git")));
        assert!(!work.path().join("build").exists());
        assert!(!work.path().join("build.tar.gz").exists());

        let written = write_build_output(&config, &setup).unwrap();
        assert!(written.ends_with(format!("{}.tar.gz", setup.identification())));
    }

    #[test]
    fn unknown_commitish_fails() {
        let repo = repository();
        let work = tempdir().unwrap();
        let config = config(repo.path(), work.path());

        let err = build(&config, &Connection::local(), "does-not-exist").unwrap_err();
        assert_eq!(err.code.as_str(), "remote.command_failed");
    }

    #[derive(Default)]
    struct RecordingHost {
        published: RefCell<Vec<(String, String, usize)>>,
    }

    impl ArtifactHost for RecordingHost {
        fn releases(&self) -> Result<Vec<Release>> {
            Ok(Vec::new())
        }

        fn fetch_asset(&self, _: u64) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn publish_release(&self, name: &str, commitish: &str, content: &[u8]) -> Result<()> {
            self.published
                .borrow_mut()
                .push((name.to_string(), commitish.to_string(), content.len()));
            Ok(())
        }
    }

    #[test]
    fn release_publishes_the_build() {
        let repo = repository();
        let work = tempdir().unwrap();
        let config = config(repo.path(), work.path());
        let host = RecordingHost::default();

        let (result, setup) =
            release(&config, &Connection::local(), &host, "v1.0.0", "v1").unwrap();

        assert_eq!(result.asset, "v1.0.0.tar.gz");
        assert_eq!(setup.identification(), "v1.0.0");
        let published = host.published.borrow();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "v1.0.0");
        assert_eq!(published[0].2, setup.archive.len());
    }
}
