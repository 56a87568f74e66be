use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hooks::{self, events, HookRunResult};
use crate::installation::Installation;
use crate::instance::{Instance, InstanceKey};
use crate::setup::Setup;
use crate::utils::base_path;

/// Archive name used while unpacking inside a fresh installation folder.
const UPLOAD_ARCHIVE: &str = ".agnes-upload.tar.gz";

#[derive(Debug, Clone, Serialize)]
pub struct DeployResult {
    pub instance: String,
    pub installation: u32,
    pub identification: String,
    pub folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<u32>,
    pub pruned: Vec<u32>,
    pub hooks: Vec<HookRunResult>,
}

// =============================================================================
// Local files
// =============================================================================

/// Local source of a configured file for one instance:
/// `<config_folder>/<server>/<environment>/<stage>/<path>`.
pub fn local_file_path(config: &Config, key: &InstanceKey, path: &str) -> PathBuf {
    PathBuf::from(&config.agnes.config_folder)
        .join(&key.server)
        .join(&key.environment)
        .join(&key.stage)
        .join(path)
}

/// Required files that have no local copy for `key`.
pub fn missing_required_files(config: &Config, key: &InstanceKey) -> Vec<String> {
    config
        .application
        .files
        .iter()
        .filter(|file| file.required)
        .filter(|file| !local_file_path(config, key, &file.path).is_file())
        .map(|file| file.path.clone())
        .collect()
}

// =============================================================================
// Steps
// =============================================================================

/// First free folder for `setup` below the installations folder, appending
/// `-1`, `-2`, ... when the plain name is taken.
pub fn resolve_installation_folder(instance: &Instance, setup: &Setup) -> Result<String> {
    let base = base_path::join_remote_path(&instance.installations_folder(), &setup.folder_name());
    let mut candidate = base.clone();
    let mut suffix = 0;

    while instance.connection.folder_exists(&candidate)? {
        suffix += 1;
        candidate = format!("{}-{}", base, suffix);
    }

    Ok(candidate)
}

/// Unpack the archive into a new installation folder and write its metadata.
fn upload(instance: &mut Instance, setup: &Setup) -> Result<u32> {
    let connection = Rc::clone(&instance.connection);
    let folder = resolve_installation_folder(instance, setup)?;
    let number = instance.next_installation_number();

    log_status!(
        "deploy",
        "Uploading {} to {} as installation {}",
        setup.identification(),
        instance.key,
        number
    );

    let archive = base_path::join_remote_path(&folder, UPLOAD_ARCHIVE);
    connection.create_or_clear_folder(&folder)?;
    connection.write_file(&archive, &setup.archive)?;
    connection.uncompress_tar_gz(&archive, &folder)?;
    connection.remove_file(&archive)?;

    let installation = Installation::new(folder, number, setup.identification());
    installation.persist(&connection)?;
    instance.add_installation(installation);

    Ok(number)
}

/// Replace every configured shared folder inside the installation with a
/// symlink into the instance's `shared/` folder. The shared folder is seeded
/// from the installation only when it does not exist yet.
pub fn link_shared_folders(config: &Config, instance: &Instance, folder: &str) -> Result<()> {
    let connection = &instance.connection;

    for name in &config.application.shared_folders {
        let shared = instance.shared_folder(name);
        let local = base_path::join_remote_path(folder, name);

        if !connection.folder_exists(&shared)? {
            if connection.folder_exists(&local)? {
                log_status!("deploy", "Seeding shared folder {}", name);
                connection.move_folder(&local, &shared)?;
            } else {
                connection.create_folder(&shared)?;
            }
        }

        connection.remove_folder(&local)?;
        connection.create_folder(base_path::parent(&local))?;
        connection.create_symlink(&local, &shared)?;
    }

    Ok(())
}

/// Copy configured files from the local config folder into the installation.
pub fn upload_files(config: &Config, instance: &Instance, folder: &str) -> Result<()> {
    for file in &config.application.files {
        let local = local_file_path(config, &instance.key, &file.path);
        if !local.is_file() {
            if file.required {
                return Err(Error::missing_required_file(
                    local.display().to_string(),
                    instance.key.to_string(),
                ));
            }
            continue;
        }

        let remote = base_path::join_remote_path(folder, &file.path);
        instance.connection.create_folder(base_path::parent(&remote))?;
        instance.connection.write_file_from(&remote, &local)?;
    }

    Ok(())
}

/// Point `current` at installation `number`.
///
/// The new link is built at `current_` first and renamed onto `current` in
/// one command, so `current` always resolves to either the old or the new
/// installation. If the rename fails the previous installation is put back
/// online.
pub fn switch_to(instance: &mut Instance, number: u32, now: DateTime<Utc>) -> Result<()> {
    let connection = Rc::clone(&instance.connection);
    let target = instance
        .installation(number)
        .map(|installation| installation.folder.clone())
        .ok_or_else(|| {
            Error::internal_unexpected(format!(
                "installation {} does not belong to {}",
                number, instance.key
            ))
        })?;
    let temporary = instance.temporary_link();
    let previous = instance.current_number().filter(|current| *current != number);

    connection.remove_file(&temporary)?;
    connection.create_symlink(&temporary, &target)?;

    let mut closed = None;
    if let Some(installation) = previous.and_then(|n| instance.installation_mut(n)) {
        if installation.is_online() {
            installation.take_offline(now);
            installation.persist(&connection)?;
            closed = Some(installation.number);
        }
    }

    if let Err(err) = connection.replace_symlink(&temporary, &instance.current_link()) {
        if let Some(installation) = closed.and_then(|n| instance.installation_mut(n)) {
            installation.reopen();
            if let Err(restore) = installation.persist(&connection) {
                log_status!(
                    "deploy",
                    "Could not restore metadata of installation {}: {}",
                    installation.number,
                    restore.message
                );
            }
        }
        if let Err(cleanup) = connection.remove_file(&temporary) {
            log_status!("deploy", "Could not remove {}: {}", temporary, cleanup.message);
        }
        return Err(err);
    }

    // `current` now resolves to the new installation whatever happens next.
    instance.set_current(number)?;
    if let Some(installation) = instance.installation_mut(number) {
        installation.take_online(now);
        installation.persist(&connection)?;
    }

    log_status!("deploy", "Switched {} to installation {}", instance.key, number);
    Ok(())
}

/// Delete the oldest offline installations beyond `keep_installations`.
///
/// Installations that were never online sort first, then by the end of
/// their last online period. The current installation is never a candidate.
pub fn prune(instance: &mut Instance) -> Result<Vec<u32>> {
    let current = instance.current_number();
    let mut candidates: Vec<(Option<DateTime<Utc>>, u32, String)> = instance
        .installations()
        .filter(|installation| Some(installation.number) != current)
        .filter(|installation| !installation.is_online())
        .map(|installation| {
            (
                installation.last_online(),
                installation.number,
                installation.folder.clone(),
            )
        })
        .collect();
    candidates.sort();

    let excess = candidates.len().saturating_sub(instance.keep_installations);
    let connection = Rc::clone(&instance.connection);
    let mut removed = Vec::new();

    for (_, number, folder) in candidates.into_iter().take(excess) {
        log_status!("deploy", "Removing installation {} ({})", number, folder);
        connection.remove_folder(&folder)?;
        instance.remove_installation(number)?;
        removed.push(number);
    }

    Ok(removed)
}

fn deploy_env(previous: Option<&Installation>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        hooks::HAS_PREVIOUS_INSTALLATION.to_string(),
        previous.is_some().to_string(),
    );
    if let Some(previous) = previous {
        env.insert(
            hooks::PREVIOUS_INSTALLATION_PATH.to_string(),
            previous.folder.clone(),
        );
    }
    env
}

// =============================================================================
// Deploy
// =============================================================================

/// Install `setup` on `instance` and make it current.
///
/// Any failure before the switch leaves `current` untouched. Failures after
/// the switch (pruning, after-deploy hooks) do not revert it.
pub fn deploy(
    config: &Config,
    instance: &mut Instance,
    setup: &Setup,
    now: DateTime<Utc>,
) -> Result<DeployResult> {
    instance.load()?;
    let connection = Rc::clone(&instance.connection);
    let previous = instance.current_number();
    let env = deploy_env(instance.current_installation());

    let number = upload(instance, setup)?;
    let folder = instance
        .installation(number)
        .map(|installation| installation.folder.clone())
        .ok_or_else(|| Error::internal_unexpected("uploaded installation disappeared"))?;

    link_shared_folders(config, instance, &folder)?;
    upload_files(config, instance, &folder)?;

    let mut hook_results = Vec::new();
    hook_results.push(hooks::run_hooks(
        config,
        events::DEPLOY,
        Some(&instance.key),
        &connection,
        &folder,
        &env,
    )?);

    switch_to(instance, number, now)?;
    let pruned = prune(instance)?;

    hook_results.push(hooks::run_hooks(
        config,
        events::AFTER_DEPLOY,
        Some(&instance.key),
        &connection,
        &folder,
        &env,
    )?);

    Ok(DeployResult {
        instance: instance.key.to_string(),
        installation: number,
        identification: setup.identification().to_string(),
        folder,
        previous,
        pruned,
        hooks: hook_results,
    })
}
