//! Error types for gitdeploy-state

use thiserror::Error;

/// Errors raised by a [`Repository`](crate::Repository) backend.
#[derive(Error, Debug)]
pub enum RepoError {
    /// The `git` binary could not be spawned
    #[error("failed to run git: {0}")]
    Spawn(String),

    /// A git command exited non-zero
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// A revision expression did not name a commit
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// A ref name was rejected before reaching the backend
    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    /// Backend output could not be parsed
    #[error("unexpected git output: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`RemoteExecutor`](crate::RemoteExecutor) or
/// [`ArtifactTransfer`](crate::ArtifactTransfer) backend.
///
/// A command that ran and exited non-zero is *not* an error at this layer;
/// it comes back as a [`CommandOutput`](crate::CommandOutput) with a
/// non-zero `exit_code`. These variants cover failures to run at all.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The host could not be reached
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// The command did not finish within the configured timeout
    #[error("command on {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },

    /// Copying a file to the host failed
    #[error("transfer to {host} failed: {reason}")]
    Transfer { host: String, reason: String },

    /// Local process spawn failure (ssh/scp/sh)
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_names_the_git_subcommand() {
        let err = RepoError::Command {
            command: "update-ref".to_string(),
            stderr: "fatal: not a valid SHA1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("update-ref"));
        assert!(msg.contains("not a valid SHA1"));
    }

    #[test]
    fn unreachable_error_names_host() {
        let err = RemoteError::Unreachable {
            host: "web3".to_string(),
            reason: "Connection refused".to_string(),
        };
        assert!(err.to_string().contains("web3"));
    }
}
