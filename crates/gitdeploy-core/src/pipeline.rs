//! The release pipeline: archive, stage, install, cleanup.
//!
//! Each stage fans out over the fleet and returns a [`StageReport`] with one
//! outcome per host. A host that fails a stage is skipped by the later stages
//! of the same run; the other hosts carry on.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gitdeploy_state::{
    with_remote_copy, ArtifactTransfer, CommitInfo, Host, Privilege, RemoteCommand, RemoteError,
    RemoteExecutor, Repository, Revision,
};
use serde::Serialize;
use tracing::{debug, info, warn, Instrument};

use crate::config::DeployConfig;
use crate::context::DeployContext;
use crate::domain::{DeployError, DeployLayout, DeployedRevisionMap, ReleaseName, Result};
use crate::fanout::{fan_out, HostOutcome};
use crate::obs;
use crate::reconcile::{ReconciliationEngine, Report};
use crate::retention;
use crate::tracker::RevisionTracker;

/// Install outcome recorded for hosts whose stage step failed.
pub const SKIPPED_STAGE_FAILED: &str = "skipped: stage failed";

/// Fleet-facing steps of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Stage,
    Install,
    Prune,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Stage => "stage",
            PipelineStage::Install => "install",
            PipelineStage::Prune => "prune",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-host outcomes of one stage, in fleet order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub outcomes: Vec<HostOutcome<String>>,
}

impl StageReport {
    /// Hosts that completed the stage.
    pub fn succeeded(&self) -> Vec<Host> {
        self.outcomes
            .iter()
            .filter(|o| o.is_ok())
            .map(|o| o.host.clone())
            .collect()
    }

    pub fn failed(&self) -> Vec<&HostOutcome<String>> {
        self.outcomes.iter().filter(|o| !o.is_ok()).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_ok())
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.stage)?;
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(detail) => writeln!(f, "  {}: {detail}", outcome.host)?,
                Err(message) => writeln!(f, "  {}: FAILED {message}", outcome.host)?,
            }
        }
        Ok(())
    }
}

/// Everything `run` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub target: CommitInfo,
    pub release: ReleaseName,
    pub archive: PathBuf,
    pub stage: StageReport,
    pub install: StageReport,
    pub prune: StageReport,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.stage.has_failures() || self.install.has_failures() || self.prune.has_failures()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Deployed {} {} as {}",
            self.target.revision.short(),
            self.target.summary,
            self.release
        )?;
        write!(f, "{}{}{}", self.stage, self.install, self.prune)
    }
}

/// Failure of one host step; flattened to a message in the stage report.
#[derive(Debug, thiserror::Error)]
enum HostError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{op} exited with status {code}: {stderr}")]
    Command {
        op: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("no release staged under {0}")]
    NothingStaged(String),
}

/// Remote capabilities cloned into every per-host task.
#[derive(Clone)]
struct HostOps {
    executor: Arc<dyn RemoteExecutor>,
    transfer: Arc<dyn ArtifactTransfer>,
}

impl HostOps {
    /// Run a command and return its stdout, treating a non-zero exit as failure.
    async fn run(
        &self,
        host: &Host,
        command: RemoteCommand,
        privilege: Privilege,
    ) -> std::result::Result<String, HostError> {
        let output = self.executor.run_on_one(host, &command, privilege).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(HostError::Command {
                op: command.op_name(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Release directory names under `app_root`, ignoring anything that is
    /// not a release.
    async fn releases(
        &self,
        host: &Host,
        app_root: &str,
    ) -> std::result::Result<Vec<String>, HostError> {
        let listing = self
            .run(
                host,
                RemoteCommand::ListDirs {
                    path: app_root.to_string(),
                },
                Privilege::User,
            )
            .await?;
        Ok(listing
            .lines()
            .filter_map(ReleaseName::parse)
            .map(|name| name.as_str().to_string())
            .collect())
    }

    /// Release the current link points at. `Ok(None)` only when the link
    /// does not exist; any other failure to read it is an error.
    async fn current_release(
        &self,
        host: &Host,
        link: &str,
    ) -> std::result::Result<Option<String>, HostError> {
        let target = self
            .run(
                host,
                RemoteCommand::ReadLink {
                    path: link.to_string(),
                },
                Privilege::User,
            )
            .await?;
        let target = target.trim().trim_end_matches('/');
        let name = target.rsplit('/').next().unwrap_or(target);
        Ok((!name.is_empty()).then(|| name.to_string()))
    }
}

/// What every host needs to stage one release.
struct StagePlan {
    archive: PathBuf,
    app_root: String,
    release_dir: String,
    marker: String,
    revision: Revision,
    release: ReleaseName,
    user: String,
    group: String,
}

async fn stage_host(
    ops: &HostOps,
    host: &Host,
    plan: &StagePlan,
) -> std::result::Result<String, HostError> {
    ops.run(
        host,
        RemoteCommand::EnsureDir {
            path: plan.app_root.clone(),
            owner: Some((plan.user.clone(), plan.group.clone())),
        },
        Privilege::Elevated,
    )
    .await?;

    with_remote_copy(
        ops.transfer.as_ref(),
        host,
        &plan.archive,
        &plan.user,
        |remote| async move {
            ops.run(
                host,
                RemoteCommand::Extract {
                    archive: remote,
                    dest: plan.release_dir.clone(),
                },
                Privilege::User,
            )
            .await
        },
    )
    .await?;

    ops.run(
        host,
        RemoteCommand::WriteFile {
            path: plan.marker.clone(),
            contents: plan.revision.as_str().to_string(),
        },
        Privilege::User,
    )
    .await?;

    Ok(format!("staged {} at {}", plan.revision.short(), plan.release))
}

/// Point the current link at `release` in one rename.
async fn install_host(
    ops: &HostOps,
    host: &Host,
    layout: &DeployLayout,
    release: &str,
) -> std::result::Result<String, HostError> {
    ops.run(
        host,
        RemoteCommand::SwapSymlink {
            link: layout.current_link(),
            target: release.to_string(),
        },
        Privilege::Elevated,
    )
    .await?;
    Ok(format!("current -> {release}"))
}

/// Delete old releases on one host. Deletion failures are collected and the
/// remaining candidates are still attempted.
async fn prune_host(
    ops: &HostOps,
    host: &Host,
    layout: &DeployLayout,
    keep: usize,
) -> std::result::Result<String, String> {
    let existing = ops
        .releases(host, layout.app_root())
        .await
        .map_err(|e| e.to_string())?;
    let current = ops
        .current_release(host, &layout.current_link())
        .await
        .map_err(|e| format!("cannot read current link, nothing removed: {e}"))?;
    let doomed = retention::prune(&existing, current.as_deref(), keep);

    let mut removed = Vec::new();
    let mut failures = Vec::new();
    for name in doomed {
        let path = format!("{}/{name}", layout.app_root());
        match ops
            .run(host, RemoteCommand::RemoveDir { path }, Privilege::Elevated)
            .await
        {
            Ok(_) => {
                obs::emit_prune_removed(host.as_str(), &name);
                removed.push(name);
            }
            Err(e) => {
                warn!(host = %host, release = %name, error = %e, "failed to remove old release");
                failures.push(format!("{name}: {e}"));
            }
        }
    }

    if failures.is_empty() {
        Ok(format!("removed {} old release(s)", removed.len()))
    } else {
        Err(format!(
            "removed {}, failed to remove {}",
            removed.len(),
            failures.join("; ")
        ))
    }
}

fn finish(stage: PipelineStage, outcomes: Vec<HostOutcome<String>>) -> StageReport {
    let report = StageReport { stage, outcomes };
    for failed in report.failed() {
        if let Err(message) = &failed.result {
            obs::emit_host_failed(stage.as_str(), failed.host.as_str(), message);
        }
    }
    obs::emit_stage_finished(
        stage.as_str(),
        report.succeeded().len(),
        report.failed().len(),
    );
    report
}

/// Drives deploys of one application to its fleet.
pub struct ReleasePipeline {
    repo: Arc<dyn Repository>,
    ops: HostOps,
    config: DeployConfig,
    layout: DeployLayout,
    fleet: Vec<Host>,
    tracker: RevisionTracker,
}

impl ReleasePipeline {
    pub fn new(
        repo: Arc<dyn Repository>,
        executor: Arc<dyn RemoteExecutor>,
        transfer: Arc<dyn ArtifactTransfer>,
        config: DeployConfig,
    ) -> Self {
        let layout = config.layout();
        let tracker = RevisionTracker::new(
            Arc::clone(&repo),
            Arc::clone(&executor),
            layout.clone(),
            config.concurrency,
        );
        Self {
            repo,
            ops: HostOps { executor, transfer },
            fleet: config.fleet(),
            layout,
            config,
            tracker,
        }
    }

    pub fn fleet(&self) -> &[Host] {
        &self.fleet
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn tracker(&self) -> &RevisionTracker {
        &self.tracker
    }

    /// Resolve the requested revision, or HEAD when none is given.
    pub async fn resolve_target(&self, requested: Option<&str>) -> Result<CommitInfo> {
        let expr = match requested {
            Some(expr) => expr.to_string(),
            None => self
                .repo
                .head_revision()
                .await
                .map_err(|e| DeployError::TargetUnresolved(format!("HEAD: {e}")))?
                .to_string(),
        };
        self.repo
            .lookup_commit(&expr)
            .await?
            .ok_or(DeployError::TargetUnresolved(expr))
    }

    /// Begin a run now.
    pub async fn start(&self, requested: Option<&str>) -> Result<DeployContext> {
        self.start_at(requested, Utc::now()).await
    }

    /// Begin a run whose release is named after `at`.
    pub async fn start_at(
        &self,
        requested: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<DeployContext> {
        let target = self.resolve_target(requested).await?;
        Ok(DeployContext::new(target, at))
    }

    /// Deployed revisions, fetched and mirrored once per context.
    pub async fn deployed_revisions(&self, ctx: &mut DeployContext) -> DeployedRevisionMap {
        if let Some(map) = ctx.deployed() {
            return map.clone();
        }
        let map = self.tracker.fetch(&self.fleet).await;
        self.tracker.mirror(&map).await;
        ctx.remember_deployed(map.clone());
        map
    }

    /// Re-read the fleet, bypassing the memoized view.
    pub async fn refresh_deployed(&self, ctx: &mut DeployContext) -> DeployedRevisionMap {
        ctx.refresh();
        self.deployed_revisions(ctx).await
    }

    /// Reconciliation report against the run's target.
    pub async fn check(&self, ctx: &mut DeployContext) -> Result<Report> {
        let map = self.deployed_revisions(ctx).await;
        ReconciliationEngine::new(self.repo.as_ref())
            .report(&map, ctx.target_revision())
            .await
    }

    /// Oldest deployed revision; fails on divergence or unknown revisions.
    pub async fn preflight(&self, ctx: &mut DeployContext) -> Result<Option<Revision>> {
        let map = self.deployed_revisions(ctx).await;
        ReconciliationEngine::new(self.repo.as_ref())
            .oldest_deployed(&map)
            .await
    }

    /// Write the target's tree to the local archive, replacing any old one.
    pub async fn archive(&self, ctx: &DeployContext) -> Result<PathBuf> {
        let path = self.config.archive_path();
        self.repo
            .write_archive(ctx.target_revision(), &path)
            .await?;
        info!(
            revision = %ctx.target_revision(),
            path = %path.display(),
            "archive written"
        );
        Ok(path)
    }

    /// Extract the archive into a new release directory on every host and
    /// record the target revision in its marker.
    pub async fn stage(&self, ctx: &DeployContext) -> Result<StageReport> {
        let archive = self.config.archive_path();
        if tokio::fs::metadata(&archive).await.is_err() {
            return Err(DeployError::ArchiveMissing(archive));
        }
        obs::emit_stage_started(PipelineStage::Stage.as_str(), self.fleet.len());

        let plan = Arc::new(StagePlan {
            archive,
            app_root: self.layout.app_root().to_string(),
            release_dir: self.layout.release_dir(ctx.release()),
            marker: self.layout.release_marker(ctx.release()),
            revision: ctx.target_revision().clone(),
            release: ctx.release().clone(),
            user: self.config.user.clone(),
            group: self.config.group.clone(),
        });
        let ops = self.ops.clone();
        let outcomes = fan_out(&self.fleet, self.config.concurrency, move |host| {
            let ops = ops.clone();
            let plan = Arc::clone(&plan);
            async move {
                stage_host(&ops, &host, &plan)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await;
        Ok(finish(PipelineStage::Stage, outcomes))
    }

    /// Switch `hosts` to this run's release, then re-read the fleet.
    pub async fn install(&self, ctx: &mut DeployContext, hosts: &[Host]) -> StageReport {
        obs::emit_stage_started(PipelineStage::Install.as_str(), hosts.len());
        let ops = self.ops.clone();
        let layout = self.layout.clone();
        let release = ctx.release().as_str().to_string();
        let outcomes = fan_out(hosts, self.config.concurrency, move |host| {
            let (ops, layout, release) = (ops.clone(), layout.clone(), release.clone());
            async move {
                install_host(&ops, &host, &layout, &release)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await;
        let report = finish(PipelineStage::Install, outcomes);
        self.refresh_deployed(ctx).await;
        report
    }

    /// Switch every host to the newest release already present on it.
    ///
    /// Needs no target revision; the server refs are re-mirrored afterwards.
    pub async fn install_latest(&self) -> StageReport {
        obs::emit_stage_started(PipelineStage::Install.as_str(), self.fleet.len());
        let ops = self.ops.clone();
        let layout = self.layout.clone();
        let outcomes = fan_out(&self.fleet, self.config.concurrency, move |host| {
            let (ops, layout) = (ops.clone(), layout.clone());
            async move {
                let newest = ops
                    .releases(&host, layout.app_root())
                    .await
                    .map_err(|e| e.to_string())?
                    .into_iter()
                    .max()
                    .ok_or_else(|| {
                        HostError::NothingStaged(layout.app_root().to_string()).to_string()
                    })?;
                install_host(&ops, &host, &layout, &newest)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await;
        let report = finish(PipelineStage::Install, outcomes);
        let map = self.tracker.fetch(&self.fleet).await;
        self.tracker.mirror(&map).await;
        report
    }

    /// Delete the local archive. A missing archive is fine.
    pub async fn clean_temp(&self) -> Result<()> {
        let path = self.config.archive_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed local archive");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply the retention policy on `hosts`.
    pub async fn prune(&self, hosts: &[Host]) -> StageReport {
        obs::emit_stage_started(PipelineStage::Prune.as_str(), hosts.len());
        let ops = self.ops.clone();
        let layout = self.layout.clone();
        let keep = self.config.keep_releases;
        let outcomes = fan_out(hosts, self.config.concurrency, move |host| {
            let (ops, layout) = (ops.clone(), layout.clone());
            async move { prune_host(&ops, &host, &layout, keep).await }
        })
        .await;
        finish(PipelineStage::Prune, outcomes)
    }

    /// Clean temp files and prune every host.
    pub async fn cleanup(&self) -> Result<StageReport> {
        self.clean_temp().await?;
        Ok(self.prune(&self.fleet).await)
    }

    /// Full deploy: preflight, archive, stage, install, cleanup.
    ///
    /// Divergence, unknown deployed revisions and an unusable archive abort
    /// before any host is touched. Per-host failures end up in the report.
    pub async fn run(&self, ctx: &mut DeployContext) -> Result<RunReport> {
        let span = obs::deploy_span(ctx.target_revision().as_str(), ctx.release().as_str());
        self.run_stages(ctx).instrument(span).await
    }

    async fn run_stages(&self, ctx: &mut DeployContext) -> Result<RunReport> {
        let oldest = self.preflight(ctx).await?;
        debug!(oldest = ?oldest.as_ref().map(Revision::as_str), "preflight passed");

        let archive = self.archive(ctx).await?;
        let stage = self.stage(ctx).await?;

        let staged = stage.succeeded();
        let mut install = self.install(ctx, &staged).await;
        install.outcomes = merge_skipped(&self.fleet, install.outcomes);

        self.clean_temp().await?;
        let prune = self.prune(&install.succeeded()).await;

        Ok(RunReport {
            target: ctx.target().clone(),
            release: ctx.release().clone(),
            archive,
            stage,
            install,
            prune,
        })
    }

    pub fn archive_path(&self) -> PathBuf {
        self.config.archive_path()
    }

    pub fn layout(&self) -> &DeployLayout {
        &self.layout
    }
}

/// Put `outcomes` back in fleet order, filling hosts that were not attempted
/// with a skipped failure.
fn merge_skipped(fleet: &[Host], outcomes: Vec<HostOutcome<String>>) -> Vec<HostOutcome<String>> {
    let mut outcomes: Vec<Option<HostOutcome<String>>> = outcomes.into_iter().map(Some).collect();
    fleet
        .iter()
        .map(|host| {
            outcomes
                .iter_mut()
                .find(|o| o.as_ref().is_some_and(|o| &o.host == host))
                .and_then(Option::take)
                .unwrap_or_else(|| HostOutcome::failed(host.clone(), SKIPPED_STAGE_FAILED))
        })
        .collect()
}
