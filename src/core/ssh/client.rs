use crate::error::{Error, Result};
use crate::utils::shell;
use std::path::Path;
use std::process::Command;

/// Legacy scp protocol; some hosts still ship without the sftp subsystem.
const SCP_FLAGS: &[&str] = &["-O"];

#[derive(Debug, Clone)]
pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    /// stdout and stderr together, as an operator would have seen them.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    fn spawn_error(context: &str, err: std::io::Error) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}: {}", context, err),
            success: false,
            exit_code: -1,
        }
    }
}

impl SshClient {
    pub fn new(
        server: &str,
        host: &str,
        user: &str,
        port: u16,
        identity_file: Option<&str>,
    ) -> Result<Self> {
        let identity_file = match identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(server, expanded));
                }
                Some(expanded)
            }
            _ => None,
        };

        Ok(Self {
            host: host.to_string(),
            user: user.to_string(),
            port,
            identity_file,
        })
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // Never prompt; fail fast on dead connections.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    pub fn execute(&self, command: &str) -> CommandOutput {
        let args = self.build_ssh_args(command);

        match Command::new("ssh").args(&args).output() {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: out.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::spawn_error("SSH error", e),
        }
    }

    fn scp_args(&self) -> Vec<String> {
        let mut args: Vec<String> = SCP_FLAGS.iter().map(|f| f.to_string()).collect();

        if let Some(identity_file) = &self.identity_file {
            args.extend(["-i".to_string(), identity_file.clone()]);
        }

        if self.port != 22 {
            args.extend(["-P".to_string(), self.port.to_string()]);
        }

        args
    }

    pub fn upload_file(&self, local_path: &Path, remote_path: &str) -> CommandOutput {
        let mut args = self.scp_args();
        args.push(local_path.to_string_lossy().to_string());
        args.push(format!(
            "{}:{}",
            self.destination(),
            shell::quote_path(remote_path)
        ));

        run_scp(&args)
    }

    pub fn download_file(&self, remote_path: &str, local_path: &Path) -> CommandOutput {
        let mut args = self.scp_args();
        args.push(format!(
            "{}:{}",
            self.destination(),
            shell::quote_path(remote_path)
        ));
        args.push(local_path.to_string_lossy().to_string());

        run_scp(&args)
    }
}

fn run_scp(args: &[String]) -> CommandOutput {
    match Command::new("scp").args(args).output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::spawn_error("scp error", e),
    }
}

pub fn execute_local_command(command: &str) -> CommandOutput {
    match Command::new("sh").args(["-c", command]).output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::spawn_error("Command error", e),
    }
}
