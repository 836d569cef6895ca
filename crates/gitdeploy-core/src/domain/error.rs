//! Error taxonomy for the deploy engine.

use std::path::PathBuf;

use gitdeploy_state::{RemoteError, RepoError, Revision};

/// Deploy engine errors.
///
/// Per-host failures during fan-out are not errors of this type; they are
/// recorded in the stage report and the run carries on with the other hosts.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(
        "deployed revisions {a} and {b} are on diverging histories; neither is an ancestor of the other"
    )]
    DivergedHistory { a: Revision, b: Revision },

    #[error(
        "The deployed revision ({id}) was not found in your local repository. Perhaps you need to update first?"
    )]
    UnknownRevision { id: String },

    #[error("cannot resolve target revision: {0}")]
    TargetUnresolved(String),

    #[error("archive not found at {}; run `archive` first", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("repository error: {0}")]
    Repository(#[from] RepoError),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Process exit status for this error.
    ///
    /// `1` unknown deployed revision, `2` diverged history, `3` anything else.
    /// Partial per-host failure (exit `4`) is decided by the caller from the
    /// run report.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::UnknownRevision { .. } => 1,
            DeployError::DivergedHistory { .. } => 2,
            _ => 3,
        }
    }
}

/// Result type for deploy engine operations.
pub type Result<T> = std::result::Result<T, DeployError>;
