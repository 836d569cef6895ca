//! Deploy configuration loaded from `gitdeploy.toml`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use gitdeploy_state::{Host, SshSettings};
use serde::{Deserialize, Serialize};

use crate::domain::{DeployError, DeployLayout, Result};
use crate::retention::DEFAULT_KEEP_RELEASES;

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gitdeploy.toml";

/// Environment variable overriding the config file path.
pub const CONFIG_ENV_VAR: &str = "GITDEPLOY_CONFIG";

pub const DEFAULT_CONCURRENCY: usize = 8;

fn default_keep_releases() -> usize {
    DEFAULT_KEEP_RELEASES
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Everything a pipeline needs to know about one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Application id; names the release root and the archive.
    pub app: String,
    /// Parent of the application's release root on each host.
    pub root: String,
    /// Owner of the release root.
    pub user: String,
    pub group: String,
    pub hosts: Vec<String>,
    /// Releases kept besides the live one.
    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,
    /// Maximum hosts worked on at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default)]
    pub ssh: SshSettings,
}

impl DeployConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: DeployConfig =
            toml::from_str(raw).map_err(|e| DeployError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|e| match e {
                DeployError::Config(msg) => DeployError::Config(format!("{}: {msg}", path.display())),
                other => other,
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.trim().is_empty() {
            return Err(DeployError::Config("app must not be empty".to_string()));
        }
        if self.app.contains('/') {
            return Err(DeployError::Config(format!(
                "app must not contain '/': {}",
                self.app
            )));
        }
        if self.root.trim().is_empty() {
            return Err(DeployError::Config("root must not be empty".to_string()));
        }
        if self.hosts.is_empty() {
            return Err(DeployError::Config("hosts must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        for host in &self.hosts {
            if host.trim().is_empty() {
                return Err(DeployError::Config("host names must not be empty".to_string()));
            }
            if !seen.insert(host.as_str()) {
                return Err(DeployError::Config(format!("duplicate host: {host}")));
            }
        }
        if self.concurrency == 0 {
            return Err(DeployError::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Replace the fleet, re-validating the result.
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Result<Self> {
        self.hosts = hosts;
        self.validate()?;
        Ok(self)
    }

    pub fn fleet(&self) -> Vec<Host> {
        self.hosts.iter().map(|h| Host::new(h.as_str())).collect()
    }

    pub fn layout(&self) -> DeployLayout {
        DeployLayout::new(&self.root, &self.app)
    }

    /// Local path of the release archive.
    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.join(format!("{}-archive.tar.gz", self.app))
    }

    /// SSH settings, connecting as the deploy user unless set explicitly.
    pub fn ssh_settings(&self) -> SshSettings {
        let mut ssh = self.ssh.clone();
        if ssh.user.is_none() {
            ssh.user = Some(self.user.clone());
        }
        ssh
    }
}
