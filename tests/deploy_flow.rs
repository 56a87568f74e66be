use std::path::Path;

use agnes::config::{self, Config};
use agnes::connection::Connection;
use agnes::github::{self, ArtifactHost, Asset, Release};
use agnes::planner;
use agnes::registry::InstanceRegistry;
use agnes::setup::SetupSource;
use agnes::{Result, TaskExecutor, TaskStatus};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::{tempdir, TempDir};

/// Serves one archive per release, built from a folder holding `VERSION`.
struct FakeHost {
    releases: Vec<(String, Vec<u8>)>,
}

impl FakeHost {
    fn new(dir: &Path, names: &[&str]) -> Self {
        let releases = names
            .iter()
            .map(|name| {
                let source = dir.join("src").join(name);
                std::fs::create_dir_all(&source).unwrap();
                std::fs::write(source.join("VERSION"), name).unwrap();
                let archive = dir.join(format!("{}.tar.gz", name));
                Connection::local()
                    .compress_tar_gz(&source.to_string_lossy(), &archive.to_string_lossy())
                    .unwrap();
                (name.to_string(), std::fs::read(archive).unwrap())
            })
            .collect();
        Self { releases }
    }
}

impl ArtifactHost for FakeHost {
    fn releases(&self) -> Result<Vec<Release>> {
        Ok(self
            .releases
            .iter()
            .enumerate()
            .map(|(index, (name, _))| Release {
                id: index as u64,
                name: Some(name.clone()),
                tag_name: name.clone(),
                assets: vec![Asset {
                    id: index as u64,
                    name: github::asset_name(name),
                    content_type: "application/gzip".to_string(),
                }],
            })
            .collect())
    }

    fn fetch_asset(&self, asset_id: u64) -> Result<Vec<u8>> {
        Ok(self.releases[asset_id as usize].1.clone())
    }

    fn publish_release(&self, _: &str, _: &str, _: &[u8]) -> Result<()> {
        Ok(())
    }
}

fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
}

fn setup() -> (TempDir, Config) {
    let dir = tempdir().unwrap();
    let raw = format!(
        r#"
application:
  shared_folders: [var/persistent]
  scripts:
    remember_previous:
      hook: deploy
      script: ["echo $HAS_PREVIOUS_INSTALLATION > deployed_after_previous"]
  policies:
    deploy:
      - type: stage_write_up
        layers:
          0: [staging]
          1: [production]
servers:
  local:
    path: {root}/servers
    keep_installations: 2
    environments:
      shop.com: [staging, production]
"#,
        root = dir.path().display()
    );
    (dir, config::parse(&raw, "agnes.yml").unwrap())
}

fn executor<'a>(config: &'a Config, dir: &Path) -> TaskExecutor<'a> {
    let host = FakeHost::new(dir, &["v1.0.0", "v1.0.1", "v1.1.0", "v1.2.0"]);
    TaskExecutor::new(
        config,
        InstanceRegistry::from_config(config).unwrap(),
        Box::new(host),
    )
    .unwrap()
    .with_clock(clock)
}

fn deploy(executor: &mut TaskExecutor<'_>, config: &Config, target: &str, release: &str) {
    let source = planner::resolve_setup_source(executor.host(), release).unwrap();
    assert_eq!(source, SetupSource::Release(release.to_string()));
    let plan = planner::plan_deploy(config, executor.registry_mut(), target, source).unwrap();
    let report = executor.run(plan).unwrap();
    assert!(report.is_success(), "{:?}", report.outcomes);
}

#[test]
fn deploy_promote_prune_and_roll_back() {
    let (dir, config) = setup();
    let mut executor = executor(&config, dir.path());
    let staging = dir.path().join("servers/shop.com/staging");

    // Production cannot receive a release staging has never run.
    let source = planner::resolve_setup_source(executor.host(), "v1.0.0").unwrap();
    let plan =
        planner::plan_deploy(&config, executor.registry_mut(), "local:shop.com:production", source)
            .unwrap();
    let report = executor.run(plan).unwrap();
    assert_eq!(report.outcomes[0].status, TaskStatus::Denied);
    assert_eq!(report.exit_code(), 1);

    for release in ["v1.0.0", "v1.0.1", "v1.1.0"] {
        deploy(&mut executor, &config, "local:shop.com:staging", release);
    }
    assert!(staging.join("installations/v1.0.0").exists());
    assert_eq!(
        std::fs::read_to_string(staging.join("current/VERSION")).unwrap(),
        "v1.1.0"
    );
    assert_eq!(
        std::fs::read_to_string(staging.join("current/deployed_after_previous"))
            .unwrap()
            .trim(),
        "true"
    );

    // Two offline installations remain, so the fourth deploy removes the oldest.
    deploy(&mut executor, &config, "local:shop.com:staging", "v1.2.0");
    assert!(!staging.join("installations/v1.0.0").exists());
    assert!(staging.join("installations/v1.0.1").exists());
    assert!(staging.join("installations/v1.1.0").exists());

    // Promotion is allowed once staging has the release.
    deploy(&mut executor, &config, "local:shop.com:production", "v1.2.0");

    let plan = planner::plan_rollback(executor.registry_mut(), "local:shop.com:staging", None, None)
        .unwrap();
    let report = executor.run(plan).unwrap();
    assert!(report.is_success());
    assert_eq!(
        std::fs::read_to_string(staging.join("current/VERSION")).unwrap(),
        "v1.1.0"
    );
    assert!(staging.join("installations/v1.2.0").exists());

    // Rolling back production has nowhere to go.
    let plan =
        planner::plan_rollback(executor.registry_mut(), "local:shop.com:production", None, None)
            .unwrap();
    assert!(plan.tasks.is_empty());
    assert_eq!(plan.warnings.len(), 1);
}
