//! Typed remote commands.
//!
//! Every filesystem operation the deploy engine performs on a host is a
//! [`RemoteCommand`] variant. Backends that speak a shell (ssh, local `sh`)
//! send [`RemoteCommand::render`]; the in-memory fleet interprets the variant
//! directly.

use serde::{Deserialize, Serialize};

use crate::shell::quote;

/// Whether a command needs elevated privileges on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Run as the connecting user.
    User,
    /// Run through `sudo -n`.
    Elevated,
}

/// A single operation against one host's filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteCommand {
    /// Print a file's contents.
    ReadFile { path: String },
    /// Write `contents` plus one trailing newline to `path`.
    WriteFile { path: String, contents: String },
    /// `mkdir -p`, optionally followed by a chown to `user:group`.
    EnsureDir {
        path: String,
        owner: Option<(String, String)>,
    },
    /// Extract a gzipped tarball into `dest`, creating `dest` first.
    Extract { archive: String, dest: String },
    /// Point `link` at `target` by renaming a freshly made symlink over it.
    SwapSymlink { link: String, target: String },
    /// Print a symlink's target. Prints nothing and succeeds when nothing
    /// exists at `path`; fails when `path` exists but is not a symlink.
    ReadLink { path: String },
    /// Print the names of the directories directly under `path`, one per line.
    /// Symlinks are not followed, so a `current` link never appears.
    ListDirs { path: String },
    /// Recursively remove a directory.
    RemoveDir { path: String },
    /// Arbitrary shell text, passed through verbatim.
    Shell(String),
}

impl RemoteCommand {
    /// Render as a single POSIX shell command line.
    pub fn render(&self) -> String {
        match self {
            RemoteCommand::ReadFile { path } => format!("cat {}", quote(path)),
            RemoteCommand::WriteFile { path, contents } => {
                format!("printf '%s\\n' {} > {}", quote(contents), quote(path))
            }
            RemoteCommand::EnsureDir { path, owner: None } => format!("mkdir -p {}", quote(path)),
            RemoteCommand::EnsureDir {
                path,
                owner: Some((user, group)),
            } => format!(
                "mkdir -p {} && chown {} {}",
                quote(path),
                quote(&format!("{user}:{group}")),
                quote(path)
            ),
            RemoteCommand::Extract { archive, dest } => format!(
                "mkdir -p {} && tar -xzf {} -C {}",
                quote(dest),
                quote(archive),
                quote(dest)
            ),
            RemoteCommand::SwapSymlink { link, target } => {
                let staging = format!("{link}.tmp");
                format!(
                    "ln -sfn {} {} && mv -Tf {} {}",
                    quote(target),
                    quote(&staging),
                    quote(&staging),
                    quote(link)
                )
            }
            RemoteCommand::ReadLink { path } => {
                let path = quote(path);
                format!(
                    "if [ -L {path} ]; then readlink {path}; \
                     elif [ -e {path} ]; then echo {path}': not a symbolic link' >&2; exit 1; fi"
                )
            }
            RemoteCommand::ListDirs { path } => format!(
                "find {} -mindepth 1 -maxdepth 1 -type d -printf '%f\\n'",
                quote(path)
            ),
            RemoteCommand::RemoveDir { path } => format!("rm -rf {}", quote(path)),
            RemoteCommand::Shell(text) => text.clone(),
        }
    }

    /// Render with the privilege prefix applied.
    pub fn render_with(&self, privilege: Privilege) -> String {
        match privilege {
            Privilege::User => self.render(),
            Privilege::Elevated => format!("sudo -n sh -c {}", quote(&self.render())),
        }
    }

    /// Short operation name for logs.
    pub fn op_name(&self) -> &'static str {
        match self {
            RemoteCommand::ReadFile { .. } => "read_file",
            RemoteCommand::WriteFile { .. } => "write_file",
            RemoteCommand::EnsureDir { .. } => "ensure_dir",
            RemoteCommand::Extract { .. } => "extract",
            RemoteCommand::SwapSymlink { .. } => "swap_symlink",
            RemoteCommand::ReadLink { .. } => "read_link",
            RemoteCommand::ListDirs { .. } => "list_dirs",
            RemoteCommand::RemoveDir { .. } => "remove_dir",
            RemoteCommand::Shell(_) => "shell",
        }
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
