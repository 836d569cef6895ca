//! Tracking which revision each host is running.
//!
//! `fetch` reads the `REVISION` marker behind every host's current link and
//! `mirror` records the answers as local refs under `refs/servers/`, so
//! ordinary `git log refs/servers/web1..HEAD` works between runs.

use std::sync::Arc;

use gitdeploy_state::{
    Host, Privilege, RemoteCommand, RemoteExecutor, Repository, Revision,
};
use tracing::{debug, warn};

use crate::domain::{DeployLayout, DeployedRevisionMap, Result};
use crate::fanout::fan_out;
use crate::obs;

/// Ref namespace holding the last known deployed revision per host.
pub const SERVER_REFS_PREFIX: &str = "refs/servers/";

/// Name of the ref mirroring `host`'s deployed revision.
pub fn server_ref(host: &Host) -> String {
    format!("{SERVER_REFS_PREFIX}{host}")
}

/// Summary of one `mirror` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub written: Vec<Host>,
    pub failed: Vec<(Host, String)>,
}

pub struct RevisionTracker {
    repo: Arc<dyn Repository>,
    executor: Arc<dyn RemoteExecutor>,
    layout: DeployLayout,
    concurrency: usize,
}

impl RevisionTracker {
    pub fn new(
        repo: Arc<dyn Repository>,
        executor: Arc<dyn RemoteExecutor>,
        layout: DeployLayout,
        concurrency: usize,
    ) -> Self {
        Self {
            repo,
            executor,
            layout,
            concurrency,
        }
    }

    /// Read every host's deployed revision.
    ///
    /// Unreachable hosts, a missing current link and an unreadable or empty
    /// marker all yield `None` for that host. Never fails as a whole.
    pub async fn fetch(&self, fleet: &[Host]) -> DeployedRevisionMap {
        let executor = Arc::clone(&self.executor);
        let marker = self.layout.current_marker();
        let outcomes = fan_out(fleet, self.concurrency, move |host| {
            let executor = Arc::clone(&executor);
            let marker = marker.clone();
            async move { Ok::<_, String>(read_marker(executor.as_ref(), &host, &marker).await) }
        })
        .await;

        DeployedRevisionMap::new(
            outcomes
                .into_iter()
                .map(|o| (o.host, o.result.ok().flatten()))
                .collect(),
        )
    }

    /// Point `refs/servers/<host>` at each known revision.
    ///
    /// Hosts without a revision keep whatever ref they had. A failed write is
    /// logged and does not stop the others.
    pub async fn mirror(&self, map: &DeployedRevisionMap) -> MirrorSummary {
        let mut summary = MirrorSummary::default();
        for (host, revision) in map.deployed() {
            match self.repo.write_ref(&server_ref(host), revision).await {
                Ok(()) => summary.written.push(host.clone()),
                Err(e) => {
                    warn!(host = %host, revision = %revision, error = %e, "failed to mirror deployed revision");
                    summary.failed.push((host.clone(), e.to_string()));
                }
            }
        }
        obs::emit_refs_mirrored(summary.written.len(), summary.failed.len());
        summary
    }

    /// Delete every ref under `refs/servers/`. Returns how many were removed.
    pub async fn clear_deployed_refs(&self) -> Result<usize> {
        let refs = self.repo.list_refs(SERVER_REFS_PREFIX).await?;
        for (name, _) in &refs {
            self.repo.delete_ref(name).await?;
            debug!(name = %name, "deleted server ref");
        }
        Ok(refs.len())
    }
}

async fn read_marker(executor: &dyn RemoteExecutor, host: &Host, marker: &str) -> Option<Revision> {
    let command = RemoteCommand::ReadFile {
        path: marker.to_string(),
    };
    match executor.run_on_one(host, &command, Privilege::User).await {
        Ok(output) if output.success() => {
            let revision = Revision::parse(&output.stdout);
            if revision.is_none() {
                debug!(host = %host, "revision marker is empty");
            }
            revision
        }
        Ok(output) => {
            debug!(host = %host, exit_code = output.exit_code, "no readable revision marker");
            None
        }
        Err(e) => {
            warn!(host = %host, error = %e, "could not read deployed revision");
            None
        }
    }
}
