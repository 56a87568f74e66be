use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::installation::{Installation, METADATA_FILE};
use crate::utils::base_path;

pub const INSTALLATIONS_FOLDER: &str = "installations";
pub const SHARED_FOLDER: &str = "shared";
pub const CURRENT_LINK: &str = "current";
pub const TEMPORARY_LINK: &str = "current_";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceKey {
    pub server: String,
    pub environment: String,
    pub stage: String,
}

impl InstanceKey {
    pub fn new(
        server: impl Into<String>,
        environment: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            environment: environment.into(),
            stage: stage.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.server, self.environment, self.stage)
    }
}

/// One deployable unit: a server × environment × stage folder.
///
/// Installations are owned here, keyed by number. `current` only names one of
/// them; the engine is the single writer of both.
#[derive(Debug)]
pub struct Instance {
    pub key: InstanceKey,
    pub path: String,
    pub connection: Rc<Connection>,
    pub keep_installations: usize,
    installations: BTreeMap<u32, Installation>,
    current: Option<u32>,
    orphan_folders: Vec<String>,
    loaded: bool,
}

impl Instance {
    pub fn new(
        key: InstanceKey,
        server_path: &str,
        connection: Rc<Connection>,
        keep_installations: usize,
    ) -> Self {
        let path = base_path::join_remote_path(
            &base_path::join_remote_path(server_path, &key.environment),
            &key.stage,
        );

        Self {
            key,
            path,
            connection,
            keep_installations,
            installations: BTreeMap::new(),
            current: None,
            orphan_folders: Vec::new(),
            loaded: false,
        }
    }

    pub fn installations_folder(&self) -> String {
        base_path::join_remote_path(&self.path, INSTALLATIONS_FOLDER)
    }

    pub fn shared_folder(&self, name: &str) -> String {
        base_path::join_remote_path(&base_path::join_remote_path(&self.path, SHARED_FOLDER), name)
    }

    pub fn current_link(&self) -> String {
        base_path::join_remote_path(&self.path, CURRENT_LINK)
    }

    pub fn temporary_link(&self) -> String {
        base_path::join_remote_path(&self.path, TEMPORARY_LINK)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Read installations and the `current` link from the instance filesystem.
    /// Subfolders without a metadata file are remembered as orphans.
    pub fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        let folder = self.installations_folder();
        let connection = Rc::clone(&self.connection);

        if connection.folder_exists(&folder)? {
            for name in connection.get_folders(&folder)? {
                let installation_folder = base_path::join_remote_path(&folder, &name);
                let metadata = base_path::join_remote_path(&installation_folder, METADATA_FILE);
                if !connection.file_exists(&metadata)? {
                    self.orphan_folders.push(installation_folder);
                    continue;
                }

                let content = connection.read_file(&metadata)?;
                let installation = Installation::from_metadata(installation_folder, &content)?;
                self.installations.insert(installation.number, installation);
            }
        }

        self.current = match connection.read_symlink(&self.current_link())? {
            Some(target) => {
                let link = self.current_link();
                let resolved = base_path::resolve_link_target(base_path::parent(&link), &target);
                self.installations
                    .values()
                    .find(|installation| base_path::normalize(&installation.folder) == resolved)
                    .map(|installation| installation.number)
            }
            None => None,
        };

        self.loaded = true;
        log_status!(
            "registry",
            "Loaded {} installation(s) for {}",
            self.installations.len(),
            self.key
        );
        Ok(())
    }

    pub fn installations(&self) -> impl Iterator<Item = &Installation> {
        self.installations.values()
    }

    pub fn installation(&self, number: u32) -> Option<&Installation> {
        self.installations.get(&number)
    }

    pub fn installation_mut(&mut self, number: u32) -> Option<&mut Installation> {
        self.installations.get_mut(&number)
    }

    pub fn current_installation(&self) -> Option<&Installation> {
        self.current.and_then(|number| self.installations.get(&number))
    }

    pub fn current_number(&self) -> Option<u32> {
        self.current
    }

    pub fn orphan_folders(&self) -> &[String] {
        &self.orphan_folders
    }

    pub fn forget_orphan(&mut self, folder: &str) {
        self.orphan_folders.retain(|orphan| orphan != folder);
    }

    /// Highest number so far plus one; gaps left by deletions are not reused.
    pub fn next_installation_number(&self) -> u32 {
        self.installations
            .keys()
            .next_back()
            .map(|number| number + 1)
            .unwrap_or(1)
    }

    /// Whether any installation, past or present, was built from `identification`.
    pub fn has_installed(&self, identification: &str) -> bool {
        self.installations
            .values()
            .any(|installation| installation.identification == identification)
    }

    pub fn add_installation(&mut self, installation: Installation) {
        self.installations.insert(installation.number, installation);
    }

    pub fn set_current(&mut self, number: u32) -> Result<()> {
        if !self.installations.contains_key(&number) {
            return Err(Error::internal_unexpected(format!(
                "installation {} does not belong to {}",
                number, self.key
            )));
        }
        self.current = Some(number);
        Ok(())
    }

    pub fn remove_installation(&mut self, number: u32) -> Result<Installation> {
        if self.current == Some(number) {
            return Err(Error::internal_unexpected(format!(
                "refusing to remove current installation {} of {}",
                number, self.key
            )));
        }
        self.installations.remove(&number).ok_or_else(|| {
            Error::internal_unexpected(format!(
                "installation {} does not belong to {}",
                number, self.key
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn instance_in(dir: &tempfile::TempDir) -> Instance {
        Instance::new(
            InstanceKey::new("local", "shop.com", "staging"),
            &dir.path().to_string_lossy(),
            Rc::new(Connection::local()),
            2,
        )
    }

    fn write_installation(instance: &Instance, name: &str, number: u32, identification: &str) {
        let folder = format!("{}/{}", instance.installations_folder(), name);
        instance.connection.create_folder(&folder).unwrap();
        Installation::new(folder, number, identification)
            .persist(&instance.connection)
            .unwrap();
    }

    #[test]
    fn paths_follow_layout() {
        let instance = Instance::new(
            InstanceKey::new("aws", "shop.com", "staging"),
            "/var/www",
            Rc::new(Connection::local()),
            2,
        );

        assert_eq!(instance.path, "/var/www/shop.com/staging");
        assert_eq!(instance.installations_folder(), "/var/www/shop.com/staging/installations");
        assert_eq!(instance.current_link(), "/var/www/shop.com/staging/current");
        assert_eq!(
            instance.shared_folder("var/persistent"),
            "/var/www/shop.com/staging/shared/var/persistent"
        );
        assert_eq!(instance.key.to_string(), "aws:shop.com:staging");
    }

    #[test]
    fn load_without_folder_is_empty() {
        let dir = tempdir().unwrap();
        let mut instance = instance_in(&dir);
        instance.load().unwrap();

        assert!(instance.is_loaded());
        assert_eq!(instance.installations().count(), 0);
        assert!(instance.current_installation().is_none());
        assert_eq!(instance.next_installation_number(), 1);
    }

    #[test]
    fn load_reads_metadata_and_current_and_skips_orphans() {
        let dir = tempdir().unwrap();
        let mut instance = instance_in(&dir);
        write_installation(&instance, "v1", 1, "v1");
        write_installation(&instance, "v2", 4, "v2");
        instance
            .connection
            .create_folder(&format!("{}/interrupted", instance.installations_folder()))
            .unwrap();
        instance
            .connection
            .create_symlink(
                &instance.current_link(),
                &format!("{}/v1", instance.installations_folder()),
            )
            .unwrap();

        instance.load().unwrap();

        assert_eq!(instance.installations().count(), 2);
        assert_eq!(instance.current_installation().map(|i| i.number), Some(1));
        assert_eq!(instance.next_installation_number(), 5);
        assert_eq!(instance.orphan_folders().len(), 1);
        assert!(instance.orphan_folders()[0].ends_with("installations/interrupted"));
        assert!(instance.has_installed("v2"));
    }

    #[test]
    fn current_link_outside_installations_is_not_current() {
        let dir = tempdir().unwrap();
        let mut instance = instance_in(&dir);
        write_installation(&instance, "v1", 1, "v1");
        let elsewhere = format!("{}/elsewhere/v1", instance.path);
        instance.connection.create_folder(&elsewhere).unwrap();
        instance
            .connection
            .create_symlink(&instance.current_link(), &elsewhere)
            .unwrap();

        instance.load().unwrap();

        assert_eq!(instance.installations().count(), 1);
        assert!(instance.current_installation().is_none());
    }

    #[test]
    fn dangling_current_link_means_no_current() {
        let dir = tempdir().unwrap();
        let mut instance = instance_in(&dir);
        write_installation(&instance, "v1", 1, "v1");
        instance
            .connection
            .create_symlink(
                &instance.current_link(),
                &format!("{}/gone", instance.installations_folder()),
            )
            .unwrap();

        instance.load().unwrap();
        assert!(instance.current_installation().is_none());
    }

    #[test]
    fn current_installation_cannot_be_removed() {
        let dir = tempdir().unwrap();
        let mut instance = instance_in(&dir);
        instance.add_installation(Installation::new("/x/v1", 1, "v1"));
        instance.set_current(1).unwrap();

        assert!(instance.remove_installation(1).is_err());
        assert!(instance.set_current(9).is_err());
    }
}
