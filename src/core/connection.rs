//! Remote execution channel.
//!
//! Every filesystem operation on an instance is a shell command sent through
//! a [`Connection`], either to the local `sh` or over SSH. Each derived
//! operation either completes or returns an error; this layer never attempts
//! partial cleanup after a failure.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConnectionConfig, ServerConfig};
use crate::error::{Error, RemoteCommandFailedDetails, Result};
use crate::ssh::{execute_local_command, CommandOutput, SshClient};
use crate::utils::base_path;
use crate::utils::shell;
use crate::utils::template;

/// Token used for the atomic symlink replacement command.
pub const REPLACE_SYMLINK_TOKEN: &str = "replace_symlink";

/// Operating system family of a server, selecting command spellings that
/// have no portable form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Linux,
    Bsd,
}

impl Platform {
    /// Command that renames a symlink onto another without following it.
    pub fn replace_symlink_command(&self) -> &'static str {
        match self {
            Platform::Linux => "mv -T",
            Platform::Bsd => "mv -h",
        }
    }

    fn default_tokens(&self) -> HashMap<String, String> {
        let mut tokens = HashMap::new();
        tokens.insert(
            REPLACE_SYMLINK_TOKEN.to_string(),
            self.replace_symlink_command().to_string(),
        );
        tokens
    }
}

#[derive(Debug, Clone)]
pub enum Transport {
    Local,
    Ssh(SshClient),
}

#[derive(Debug, Clone)]
pub struct Connection {
    transport: Transport,
    platform: Platform,
    tokens: HashMap<String, String>,
}

impl Connection {
    pub fn new(
        transport: Transport,
        platform: Platform,
        overrides: &HashMap<String, String>,
    ) -> Self {
        let mut tokens = platform.default_tokens();
        tokens.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            transport,
            platform,
            tokens,
        }
    }

    pub fn local() -> Self {
        Self::new(Transport::Local, Platform::default(), &HashMap::new())
    }

    pub fn from_server_config(name: &str, server: &ServerConfig) -> Result<Self> {
        let transport = match &server.connection {
            ConnectionConfig::Local => Transport::Local,
            ConnectionConfig::Ssh {
                host,
                user,
                port,
                identity_file,
            } => Transport::Ssh(SshClient::new(
                name,
                host,
                user,
                *port,
                identity_file.as_deref(),
            )?),
        };

        Ok(Self::new(transport, server.platform, &server.script_overrides))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn describe(&self) -> String {
        match &self.transport {
            Transport::Local => "local".to_string(),
            Transport::Ssh(client) => format!("{}:{}", client.destination(), client.port),
        }
    }

    /// Whether both connections reach the same host filesystem.
    pub fn same_channel(&self, other: &Connection) -> bool {
        match (&self.transport, &other.transport) {
            (Transport::Local, Transport::Local) => true,
            (Transport::Ssh(a), Transport::Ssh(b)) => {
                a.host == b.host && a.user == b.user && a.port == b.port
            }
            _ => false,
        }
    }

    fn run(&self, command: &str) -> CommandOutput {
        match &self.transport {
            Transport::Local => execute_local_command(command),
            Transport::Ssh(client) => client.execute(command),
        }
    }

    /// Run one command line (after `{{token}}` substitution); stdout on success.
    pub fn execute_command(&self, command: &str) -> Result<String> {
        let rendered = template::render_map(command, &self.tokens);
        let output = self.run(&rendered);

        if !output.success {
            return Err(Error::remote_command_failed(RemoteCommandFailedDetails {
                command: rendered,
                exit_code: output.exit_code,
                output: output.combined(),
                target: self.describe(),
            }));
        }

        Ok(output.stdout)
    }

    /// Run `commands` one after another inside `working_folder`, each with
    /// `env` exported. Stops at the first failing command.
    pub fn execute_script(
        &self,
        working_folder: &str,
        commands: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut stdout = String::new();

        for command in commands {
            let line = format!(
                "cd {} && {}",
                shell::quote_path(working_folder),
                shell::with_env_prefix(command, env)
            );
            stdout.push_str(&self.execute_command(&line)?);
        }

        Ok(stdout)
    }

    // ========================================================================
    // Folders
    // ========================================================================

    pub fn create_or_clear_folder(&self, folder: &str) -> Result<()> {
        let folder = shell::quote_path(folder);
        self.execute_command(&format!("rm -rf {} && mkdir -p {}", folder, folder))?;
        Ok(())
    }

    pub fn create_folder(&self, folder: &str) -> Result<()> {
        self.execute_command(&format!("mkdir -p {}", shell::quote_path(folder)))?;
        Ok(())
    }

    pub fn remove_folder(&self, folder: &str) -> Result<()> {
        self.execute_command(&format!("rm -rf {}", shell::quote_path(folder)))?;
        Ok(())
    }

    pub fn remove_file(&self, path: &str) -> Result<()> {
        self.execute_command(&format!("rm -f {}", shell::quote_path(path)))?;
        Ok(())
    }

    pub fn move_folder(&self, source: &str, target: &str) -> Result<()> {
        self.execute_command(&format!(
            "mkdir -p {} && mv {} {}",
            shell::quote_path(base_path::parent(target)),
            shell::quote_path(source),
            shell::quote_path(target)
        ))?;
        Ok(())
    }

    /// Copy everything inside `source` into `target` (created if missing).
    pub fn copy_folder_content(&self, source: &str, target: &str) -> Result<()> {
        self.execute_command(&format!(
            "mkdir -p {} && cp -a {}/. {}/",
            shell::quote_path(target),
            shell::quote_path(source),
            shell::quote_path(target)
        ))?;
        Ok(())
    }

    /// Immediate subfolder names of `folder`, sorted. Symlinks are skipped.
    pub fn get_folders(&self, folder: &str) -> Result<Vec<String>> {
        let output = self.execute_command(&format!(
            "find {} -mindepth 1 -maxdepth 1 -type d",
            shell::quote_path(folder)
        ))?;

        let mut names: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| base_path::file_name(line).to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    // ========================================================================
    // Existence checks
    // ========================================================================

    fn test(&self, flag: &str, path: &str) -> Result<bool> {
        let output = self.execute_command(&format!(
            "if [ {} {} ]; then echo yes; else echo no; fi",
            flag,
            shell::quote_path(path)
        ))?;
        Ok(output.trim() == "yes")
    }

    pub fn file_exists(&self, path: &str) -> Result<bool> {
        self.test("-f", path)
    }

    pub fn folder_exists(&self, path: &str) -> Result<bool> {
        self.test("-d", path)
    }

    pub fn symlink_exists(&self, path: &str) -> Result<bool> {
        self.test("-L", path)
    }

    /// Raw target of the symlink at `path`, `None` when there is no symlink.
    pub fn read_symlink(&self, path: &str) -> Result<Option<String>> {
        let quoted = shell::quote_path(path);
        let output = self.execute_command(&format!(
            "if [ -L {} ]; then readlink {}; fi",
            quoted, quoted
        ))?;
        let target = output.trim();
        Ok((!target.is_empty()).then(|| target.to_string()))
    }

    // ========================================================================
    // Symlinks
    // ========================================================================

    /// Create a symlink at `link` pointing at `target`, stored relative.
    pub fn create_symlink(&self, link: &str, target: &str) -> Result<()> {
        let relative = base_path::relative_path(base_path::parent(link), target);
        self.execute_command(&format!(
            "ln -s {} {}",
            shell::quote_path(&relative),
            shell::quote_path(link)
        ))?;
        Ok(())
    }

    /// Atomically rename symlink `source` onto `target`.
    pub fn replace_symlink(&self, source: &str, target: &str) -> Result<()> {
        self.execute_command(&format!(
            "{{{{{}}}}} {} {}",
            REPLACE_SYMLINK_TOKEN,
            shell::quote_path(source),
            shell::quote_path(target)
        ))?;
        Ok(())
    }

    // ========================================================================
    // Archives and repositories
    // ========================================================================

    pub fn compress_tar_gz(&self, source_folder: &str, archive: &str) -> Result<()> {
        self.execute_command(&format!(
            "tar -czf {} -C {} .",
            shell::quote_path(archive),
            shell::quote_path(source_folder)
        ))?;
        Ok(())
    }

    pub fn uncompress_tar_gz(&self, archive: &str, target_folder: &str) -> Result<()> {
        self.execute_command(&format!(
            "tar -xzf {} -C {}",
            shell::quote_path(archive),
            shell::quote_path(target_folder)
        ))?;
        Ok(())
    }

    /// Clone `repository` into `folder`, check out `commitish`, return the hash.
    pub fn checkout_repository(
        &self,
        folder: &str,
        repository: &str,
        commitish: &str,
    ) -> Result<String> {
        let folder = shell::quote_path(folder);
        let output = self.execute_command(&format!(
            "git clone -q {} {} && cd {} && git checkout -q {} && git rev-parse HEAD",
            shell::quote_arg(repository),
            folder,
            folder,
            shell::quote_arg(commitish)
        ))?;
        Ok(output.trim().to_string())
    }

    // ========================================================================
    // File content
    // ========================================================================

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match &self.transport {
            Transport::Local => std::fs::read(path)
                .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", path)))),
            Transport::Ssh(client) => {
                let staging = tempfile::NamedTempFile::new().map_err(|e| {
                    Error::internal_io(e.to_string(), Some("create staging file".to_string()))
                })?;
                let output = client.download_file(path, staging.path());
                self.check_transfer(output, &format!("download {}", path))?;
                std::fs::read(staging.path()).map_err(|e| {
                    Error::internal_io(e.to_string(), Some("read staging file".to_string()))
                })
            }
        }
    }

    pub fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        match &self.transport {
            Transport::Local => std::fs::write(path, content)
                .map_err(|e| Error::internal_io(e.to_string(), Some(format!("write {}", path)))),
            Transport::Ssh(client) => {
                let mut staging = tempfile::NamedTempFile::new().map_err(|e| {
                    Error::internal_io(e.to_string(), Some("create staging file".to_string()))
                })?;
                staging.write_all(content).map_err(|e| {
                    Error::internal_io(e.to_string(), Some("write staging file".to_string()))
                })?;
                let output = client.upload_file(staging.path(), path);
                self.check_transfer(output, &format!("upload {}", path))
            }
        }
    }

    pub fn write_file_from(&self, path: &str, local: &Path) -> Result<()> {
        let content = std::fs::read(local).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", local.display())))
        })?;
        self.write_file(path, &content)
    }

    fn check_transfer(&self, output: CommandOutput, command: &str) -> Result<()> {
        if output.success {
            return Ok(());
        }
        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            output: output.combined(),
            target: self.describe(),
        }))
    }
}
