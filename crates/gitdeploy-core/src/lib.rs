//! gitdeploy-core: revision-tracked release deployment
//!
//! ## Layer 1 - Engine
//!
//! Focus: knowing what is deployed where and moving the fleet forward.
//!
//! ## Key Components
//!
//! - `AncestryComparator`: partial order of commits from history ranges
//! - `RevisionTracker`: per-host `REVISION` markers mirrored to `refs/servers/*`
//! - `ReconciliationEngine`: oldest deployed revision and the pending report
//! - `ReleasePipeline`: archive, stage, install, cleanup over the fleet
//! - `retention::prune`: which old releases to delete
//! - `DeployContext`: per-run target, release name and fleet view

pub mod ancestry;
pub mod config;
pub mod context;
pub mod domain;
pub mod fanout;
pub mod obs;
pub mod pipeline;
pub mod reconcile;
pub mod retention;
pub mod telemetry;
pub mod tracker;

pub use ancestry::{AncestryComparator, AncestryRelation};
pub use config::{DeployConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
pub use context::DeployContext;
pub use domain::{
    DeployError, DeployLayout, DeployedRevisionMap, ReleaseName, Result, CURRENT_LINK,
    REVISION_MARKER,
};
pub use fanout::{fan_out, HostOutcome};
pub use pipeline::{PipelineStage, ReleasePipeline, RunReport, StageReport, SKIPPED_STAGE_FAILED};
pub use reconcile::{HostLine, Pending, ReconciliationEngine, Report};
pub use retention::{prune, DEFAULT_KEEP_RELEASES};
pub use telemetry::init_tracing;
pub use tracker::{server_ref, MirrorSummary, RevisionTracker, SERVER_REFS_PREFIX};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
