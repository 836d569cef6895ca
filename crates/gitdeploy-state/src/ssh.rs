//! OpenSSH-backed [`RemoteExecutor`] and [`ArtifactTransfer`].
//!
//! Commands are rendered to shell text and sent over `ssh` in batch mode;
//! files are copied with `scp`. Hosts named `localhost`, `127.0.0.1` or `::1`
//! skip ssh entirely and run through a local `sh -c`.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::capabilities::{ArtifactTransfer, Host, RemoteExecutor, RemoteResult};
use crate::command::{CommandOutput, Privilege, RemoteCommand};
use crate::error::RemoteError;

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Connection settings shared by every host in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Login user; `None` lets ssh pick (config file or local user).
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout_secs: u64,
    /// Upper bound for one command; 0 disables the timeout.
    pub command_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
        }
    }
}

/// Remote executor and transfer over OpenSSH.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    settings: SshSettings,
    identity_file: Option<String>,
}

impl SshExecutor {
    pub fn new(settings: SshSettings) -> Self {
        let identity_file = settings
            .identity_file
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| shellexpand::tilde(p).to_string());
        Self {
            settings,
            identity_file,
        }
    }

    fn destination(&self, host: &Host, user: Option<&str>) -> String {
        match user.or(self.settings.user.as_deref()) {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        }
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);
        args
    }

    fn ssh_args(&self, host: &Host, remote_command: &str) -> Vec<String> {
        let mut args = self.common_options();
        if self.settings.port != 22 {
            args.push("-p".to_string());
            args.push(self.settings.port.to_string());
        }
        args.push(self.destination(host, None));
        args.push(remote_command.to_string());
        args
    }

    fn scp_args(&self, host: &Host, user: &str, local: &Path, remote_path: &str) -> Vec<String> {
        let mut args = self.common_options();
        if self.settings.port != 22 {
            args.push("-P".to_string());
            args.push(self.settings.port.to_string());
        }
        args.push(local.to_string_lossy().to_string());
        args.push(format!(
            "{}:{}",
            self.destination(host, Some(user)),
            remote_path
        ));
        args
    }

    async fn spawn(&self, host: &Host, program: &str, args: &[String]) -> RemoteResult<Output> {
        debug!(host = %host, program, "spawning");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemoteError::Spawn {
                program: program.to_string(),
                reason: e.to_string(),
            })?;

        let secs = self.settings.command_timeout_secs;
        if secs == 0 {
            return Ok(child.wait_with_output().await?);
        }
        tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout {
                host: host.to_string(),
                secs,
            })?
            .map_err(RemoteError::from)
    }

    async fn shell(&self, host: &Host, text: &str) -> RemoteResult<CommandOutput> {
        let output = if is_local_host(host) {
            self.spawn(host, "sh", &["-c".to_string(), text.to_string()])
                .await?
        } else {
            let output = self.spawn(host, "ssh", &self.ssh_args(host, text)).await?;
            if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
                return Err(RemoteError::Unreachable {
                    host: host.to_string(),
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            output
        };
        Ok(to_command_output(output))
    }
}

fn to_command_output(output: Output) -> CommandOutput {
    CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    }
}

/// Check whether a host refers to the local machine.
pub fn is_local_host(host: &Host) -> bool {
    matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1")
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_on_one(
        &self,
        host: &Host,
        command: &RemoteCommand,
        privilege: Privilege,
    ) -> RemoteResult<CommandOutput> {
        self.shell(host, &command.render_with(privilege)).await
    }
}

#[async_trait]
impl ArtifactTransfer for SshExecutor {
    async fn copy_to_temp(&self, host: &Host, local: &Path, user: &str) -> RemoteResult<String> {
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let remote_path = format!("/tmp/gitdeploy-{}-{}", uuid::Uuid::new_v4(), file_name);

        let output = if is_local_host(host) {
            self.spawn(
                host,
                "cp",
                &[local.to_string_lossy().to_string(), remote_path.clone()],
            )
            .await?
        } else {
            self.spawn(host, "scp", &self.scp_args(host, user, local, &remote_path))
                .await?
        };

        if !output.status.success() {
            return Err(RemoteError::Transfer {
                host: host.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(remote_path)
    }

    async fn remove_temp(&self, host: &Host, remote_path: &str) -> RemoteResult<()> {
        let cmd = RemoteCommand::Shell(format!("rm -f {}", crate::shell::quote(remote_path)));
        let output = self.run_on_one(host, &cmd, Privilege::User).await?;
        if !output.success() {
            return Err(RemoteError::Transfer {
                host: host.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
