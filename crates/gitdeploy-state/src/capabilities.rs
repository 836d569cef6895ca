//! Capability trait definitions for gitdeploy
//!
//! These traits define the collaborators the deploy engine consumes:
//! - `Repository`: commit lookup, history ranges and named refs
//! - `RemoteExecutor`: run a command on one host or the whole fleet
//! - `ArtifactTransfer`: scoped copy of a local file to a host
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::command::{CommandOutput, Privilege, RemoteCommand};
use crate::error::{RemoteError, RepoError};

/// Result type for repository operations
pub type RepoResult<T> = std::result::Result<T, RepoError>;

/// Result type for remote operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

// ---------------------------------------------------------------------------
// Repository: version-control history
// ---------------------------------------------------------------------------

/// Commit identifier.
///
/// Equality is by id string only; two expressions naming the same commit are
/// only equal once resolved to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Build from raw text, trimming whitespace. Returns `None` when empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Revision(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form (first 7 chars).
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commit metadata resolved from the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub revision: Revision,
    pub author: String,
    /// First line of the commit message
    pub summary: String,
}

/// One file's line counts within a diff. Counts are `None` for binary files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub added: Option<u64>,
    pub removed: Option<u64>,
}

/// Version-control history the deploy engine reads and annotates.
///
/// Guarantees:
/// - `history_range(Some(a), b)` returns commits reachable from `b` but not
///   from `a`, newest first. With `None` it returns all of `b`'s history.
/// - `lookup_commit` returns `Ok(None)` for unknown expressions; `Err` is
///   reserved for backend failures.
/// - `write_ref` creates or moves the ref; `delete_ref` on a missing ref is
///   a no-op.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The commit HEAD points at.
    async fn head_revision(&self) -> RepoResult<Revision>;

    /// Resolve an id or revision expression to a commit.
    async fn lookup_commit(&self, expr: &str) -> RepoResult<Option<CommitInfo>>;

    /// Commits in `from..to`.
    async fn history_range(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> RepoResult<Vec<CommitInfo>>;

    /// File-level change summary between two trees (`None` = empty tree).
    async fn diff_summary(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> RepoResult<Vec<FileChange>>;

    /// Read a fully qualified ref (e.g. `refs/servers/web1`).
    async fn read_ref(&self, name: &str) -> RepoResult<Option<Revision>>;

    /// Create or move a ref.
    async fn write_ref(&self, name: &str, revision: &Revision) -> RepoResult<()>;

    /// Delete a ref.
    async fn delete_ref(&self, name: &str) -> RepoResult<()>;

    /// All refs under `prefix`, sorted by name.
    async fn list_refs(&self, prefix: &str) -> RepoResult<Vec<(String, Revision)>>;

    /// Write a gzipped tarball of `revision`'s tree to `dest`, overwriting it.
    async fn write_archive(&self, revision: &Revision, dest: &Path) -> RepoResult<()>;
}

// ---------------------------------------------------------------------------
// RemoteExecutor: command execution on hosts
// ---------------------------------------------------------------------------

/// Deploy target identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Host(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Host {
    fn from(name: &str) -> Self {
        Host(name.to_string())
    }
}

/// Runs commands on deploy targets.
///
/// `Ok(output)` means the command ran; check `output.success()`. `Err` means
/// it could not be run on that host at all.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run on a single host.
    async fn run_on_one(
        &self,
        host: &Host,
        command: &RemoteCommand,
        privilege: Privilege,
    ) -> RemoteResult<CommandOutput>;

    /// Run on every host concurrently. Results come back in `hosts` order.
    async fn run_on_all(
        &self,
        hosts: &[Host],
        command: &RemoteCommand,
        privilege: Privilege,
    ) -> Vec<(Host, RemoteResult<CommandOutput>)> {
        let runs = hosts.iter().map(|host| async move {
            (
                host.clone(),
                self.run_on_one(host, command, privilege).await,
            )
        });
        futures::future::join_all(runs).await
    }
}

// ---------------------------------------------------------------------------
// ArtifactTransfer: scoped file copies
// ---------------------------------------------------------------------------

/// Copies local files to a temporary location on a host.
///
/// Callers should go through [`with_remote_copy`], which pairs every copy
/// with its removal.
#[async_trait]
pub trait ArtifactTransfer: Send + Sync {
    /// Copy `local` to a fresh temporary path on `host`, owned by `user`.
    /// Returns the remote path.
    async fn copy_to_temp(&self, host: &Host, local: &Path, user: &str) -> RemoteResult<String>;

    /// Remove a path previously returned by `copy_to_temp`.
    async fn remove_temp(&self, host: &Host, remote_path: &str) -> RemoteResult<()>;
}

/// Copy `local` to `host`, run `action` with the remote path, then remove the
/// copy whatever the action returned.
///
/// A failed removal is logged and does not replace the action's result.
pub async fn with_remote_copy<T, E, F, Fut>(
    transfer: &dyn ArtifactTransfer,
    host: &Host,
    local: &Path,
    user: &str,
    action: F,
) -> std::result::Result<T, E>
where
    E: From<RemoteError>,
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let remote_path = transfer.copy_to_temp(host, local, user).await?;
    let outcome = action(remote_path.clone()).await;
    if let Err(e) = transfer.remove_temp(host, &remote_path).await {
        warn!(host = %host, path = %remote_path, error = %e, "failed to remove temporary copy");
    }
    outcome
}
