//! Per-run state shared by the pipeline stages.

use chrono::{DateTime, Utc};
use gitdeploy_state::{CommitInfo, Revision};

use crate::domain::{DeployedRevisionMap, ReleaseName};

/// State fixed at the start of a run plus the memoized fleet view.
///
/// The target commit and release name are resolved once and reused by every
/// stage, so all hosts receive the same revision under the same name.
#[derive(Debug, Clone)]
pub struct DeployContext {
    target: CommitInfo,
    release: ReleaseName,
    started_at: DateTime<Utc>,
    deployed: Option<DeployedRevisionMap>,
}

impl DeployContext {
    pub fn new(target: CommitInfo, started_at: DateTime<Utc>) -> Self {
        Self {
            target,
            release: ReleaseName::from_timestamp(started_at),
            started_at,
            deployed: None,
        }
    }

    pub fn target(&self) -> &CommitInfo {
        &self.target
    }

    pub fn target_revision(&self) -> &Revision {
        &self.target.revision
    }

    /// Name of the release directory this run creates.
    pub fn release(&self) -> &ReleaseName {
        &self.release
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Deployed revisions from the last fetch, if still valid.
    pub fn deployed(&self) -> Option<&DeployedRevisionMap> {
        self.deployed.as_ref()
    }

    pub fn remember_deployed(&mut self, map: DeployedRevisionMap) {
        self.deployed = Some(map);
    }

    /// Forget the memoized fleet view so the next read goes to the hosts.
    pub fn refresh(&mut self) {
        self.deployed = None;
    }
}
