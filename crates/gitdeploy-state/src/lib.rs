//! gitdeploy-state: capabilities consumed by the gitdeploy engine
//!
//! This crate owns every interaction with the outside world: the local git
//! history and the remote hosts. The engine in `gitdeploy-core` only sees
//! the traits defined here.
//!
//! ## Layer 0 - Capabilities
//!
//! Focus: version-control reads/writes, command execution, file transfer.
//!
//! ## Key Components
//!
//! - `Repository`: commit lookup, history ranges, named refs, archives
//! - `RemoteExecutor`: typed `RemoteCommand`s on one host or the fleet
//! - `ArtifactTransfer`: scoped temporary copies via `with_remote_copy`
//! - `GitRepository` / `SshExecutor`: production backends
//! - `fakes`: in-memory backends for tests

pub mod capabilities;
pub mod command;
mod error;
pub mod fakes;
mod git_repository;
pub mod shell;
mod ssh;

pub use capabilities::{
    with_remote_copy, ArtifactTransfer, CommitInfo, FileChange, Host, RemoteExecutor,
    RemoteResult, RepoResult, Repository, Revision,
};
pub use command::{CommandOutput, Privilege, RemoteCommand};
pub use error::{RemoteError, RepoError};
pub use git_repository::GitRepository;
pub use ssh::{is_local_host, SshExecutor, SshSettings};
