#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use gitdeploy_core::{DeployConfig, ReleasePipeline};
use gitdeploy_state::fakes::{MemoryFleet, MemoryRepository};
use gitdeploy_state::{Repository, SshSettings};

pub const APP_ROOT: &str = "/opt/shop";
pub const CURRENT: &str = "/opt/shop/current";

pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub fleet: Arc<MemoryFleet>,
    pub pipeline: ReleasePipeline,
    pub dir: tempfile::TempDir,
}

pub fn config(hosts: &[&str], archive_dir: &Path) -> DeployConfig {
    DeployConfig {
        app: "shop".to_string(),
        root: "/opt".to_string(),
        user: "deploy".to_string(),
        group: "www".to_string(),
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        keep_releases: 5,
        concurrency: 4,
        archive_dir: archive_dir.to_path_buf(),
        ssh: SshSettings::default(),
    }
}

/// Pipeline over `repo` and a fresh in-memory fleet.
pub fn harness_with(repo: MemoryRepository, hosts: &[&str]) -> Harness {
    harness_configured(repo, hosts, |c| c)
}

pub fn harness_configured(
    repo: MemoryRepository,
    hosts: &[&str],
    tweak: impl FnOnce(DeployConfig) -> DeployConfig,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(repo);
    let fleet = Arc::new(MemoryFleet::new(hosts));
    let config = tweak(config(hosts, dir.path()));
    let pipeline = ReleasePipeline::new(
        Arc::clone(&repo) as Arc<dyn Repository>,
        Arc::clone(&fleet) as _,
        Arc::clone(&fleet) as _,
        config,
    );
    Harness {
        repo,
        fleet,
        pipeline,
        dir,
    }
}

/// Two commits, HEAD at `abcde`.
pub fn shop_repo() -> MemoryRepository {
    let repo = MemoryRepository::new();
    repo.commit_with("11111", &[], "Ada", "Initial import", &["README"]);
    repo.commit_with("abcde", &["11111"], "Grace", "Add checkout", &["src/cart.rs"]);
    repo
}

/// Distinct, increasing run timestamps.
pub fn at(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(n)
}

/// Seed `host` as if `revision` had been deployed as `release`.
pub fn seed_deployed(fleet: &MemoryFleet, host: &str, release: &str, revision: &str) {
    fleet.put_file(
        host,
        &format!("{APP_ROOT}/{release}/REVISION"),
        &format!("{revision}\n"),
    );
    fleet.put_symlink(host, CURRENT, release);
}
