//! Structured lifecycle events for deploy runs.
//!
//! Every event carries a stable `event` field so log pipelines can filter
//! on it:
//! - `pipeline.stage_started` / `pipeline.stage_finished`
//! - `host.failed`
//! - `refs.mirrored`
//! - `prune.removed`

use tracing::{info, warn};

/// Span tagging everything logged during a run with its target revision and
/// release name. Attach it to async work with `Instrument::instrument`.
pub fn deploy_span(target: &str, release: &str) -> tracing::Span {
    tracing::info_span!("gitdeploy.run", target = %target, release = %release)
}

pub fn emit_stage_started(stage: &str, hosts: usize) {
    info!(event = "pipeline.stage_started", stage = %stage, hosts = hosts);
}

pub fn emit_stage_finished(stage: &str, succeeded: usize, failed: usize) {
    info!(
        event = "pipeline.stage_finished",
        stage = %stage,
        succeeded = succeeded,
        failed = failed,
    );
}

/// A host failed its share of a stage; the run continues without it.
pub fn emit_host_failed(stage: &str, host: &str, error: &dyn std::fmt::Display) {
    warn!(event = "host.failed", stage = %stage, host = %host, error = %error);
}

pub fn emit_refs_mirrored(written: usize, failed: usize) {
    info!(event = "refs.mirrored", written = written, failed = failed);
}

pub fn emit_prune_removed(host: &str, release: &str) {
    info!(event = "prune.removed", host = %host, release = %release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_inside_deploy_span() {
        let _span = deploy_span("abcde", "2024-03-01-12-00-05").entered();
        emit_stage_started("stage", 3);
        emit_host_failed("stage", "web2", &"connection refused");
        emit_stage_finished("stage", 2, 1);
    }
}
