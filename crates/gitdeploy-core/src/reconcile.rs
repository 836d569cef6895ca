//! Fleet-wide reconciliation: the oldest deployed revision and what is
//! pending between it and the target.

use std::fmt;

use gitdeploy_state::{CommitInfo, FileChange, Host, Repository, Revision};
use serde::Serialize;

use crate::ancestry::{AncestryComparator, AncestryRelation};
use crate::domain::{DeployError, DeployedRevisionMap, Result};

/// Placeholder id shown for hosts without a deployed revision.
const NO_REVISION: &str = "0000000";

pub struct ReconciliationEngine<'a> {
    repo: &'a dyn Repository,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self { repo }
    }

    /// Resolve a deployed revision locally or fail with `UnknownRevision`.
    pub async fn lookup_or_fail(&self, id: &str) -> Result<CommitInfo> {
        self.repo
            .lookup_commit(id)
            .await?
            .ok_or_else(|| DeployError::UnknownRevision { id: id.to_string() })
    }

    /// The ancestor of every deployed revision, or `None` for a fresh fleet.
    ///
    /// Every revision must resolve locally and all of them must lie on one
    /// line of history; otherwise `UnknownRevision` or `DivergedHistory`.
    pub async fn oldest_deployed(&self, map: &DeployedRevisionMap) -> Result<Option<Revision>> {
        let comparator = AncestryComparator::new(self.repo);
        let mut oldest: Option<Revision> = None;
        let mut seen: Vec<&Revision> = Vec::new();

        for (_, deployed) in map.deployed() {
            if seen.contains(&deployed) {
                continue;
            }
            seen.push(deployed);
            let candidate = self.lookup_or_fail(deployed.as_str()).await?.revision;
            oldest = Some(match oldest {
                None => candidate,
                Some(current) => match comparator.compare(&candidate, &current).await? {
                    AncestryRelation::StrictlyBefore => candidate,
                    AncestryRelation::Equal | AncestryRelation::StrictlyAfter => current,
                    AncestryRelation::Incomparable => {
                        return Err(DeployError::DivergedHistory {
                            a: current,
                            b: candidate,
                        })
                    }
                },
            });
        }
        Ok(oldest)
    }

    /// Per-host lines plus the commits and files pending for `target`.
    pub async fn report(&self, map: &DeployedRevisionMap, target: &Revision) -> Result<Report> {
        let mut hosts = Vec::with_capacity(map.len());
        for (host, deployed) in map.iter() {
            let commit = match deployed {
                Some(rev) => Some(self.lookup_or_fail(rev.as_str()).await?),
                None => None,
            };
            hosts.push(HostLine {
                host: host.clone(),
                commit,
            });
        }

        let target = self.lookup_or_fail(target.as_str()).await?;
        let oldest = self.oldest_deployed(map).await?;
        let pending = if oldest.as_ref() == Some(&target.revision) {
            Pending::UpToDate
        } else {
            let commits = self
                .repo
                .history_range(oldest.as_ref(), &target.revision)
                .await?;
            let files = self
                .repo
                .diff_summary(oldest.as_ref(), &target.revision)
                .await?;
            Pending::Changes {
                from: oldest,
                commits,
                files,
            }
        };

        Ok(Report {
            hosts,
            target,
            pending,
        })
    }
}

/// One host's deployed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostLine {
    pub host: Host,
    /// `None` when nothing is deployed there.
    pub commit: Option<CommitInfo>,
}

/// Work between the oldest deployed revision and the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Pending {
    UpToDate,
    Changes {
        /// `None` means the whole history up to the target is new.
        from: Option<Revision>,
        /// Newest first.
        commits: Vec<CommitInfo>,
        files: Vec<FileChange>,
    },
}

/// Reconciliation report shown by `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub hosts: Vec<HostLine>,
    pub target: CommitInfo,
    pub pending: Pending,
}

impl Report {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self.pending, Pending::UpToDate)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deployed Revisions")?;
        for line in &self.hosts {
            match &line.commit {
                Some(c) => writeln!(
                    f,
                    "{}: {} {} [{}]",
                    line.host,
                    c.revision.short(),
                    c.summary,
                    c.author
                )?,
                None => writeln!(f, "{}: {NO_REVISION} (no deployed revision)", line.host)?,
            }
        }
        writeln!(f)?;
        writeln!(f, "On Deck")?;
        match &self.pending {
            Pending::UpToDate => writeln!(f, "Deployed revision is up to date")?,
            Pending::Changes { commits, files, .. } => {
                for c in commits {
                    writeln!(f, "{} {}", c.revision.short(), c.summary)?;
                }
                if !files.is_empty() {
                    writeln!(f)?;
                }
                for file in files {
                    match (file.added, file.removed) {
                        (Some(added), Some(removed)) => {
                            writeln!(f, " {} | +{added} -{removed}", file.path)?
                        }
                        _ => writeln!(f, " {} | binary", file.path)?,
                    }
                }
                let noun = if files.len() == 1 { "file" } else { "files" };
                writeln!(f, " {} {noun} changed", files.len())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdeploy_state::fakes::MemoryRepository;

    fn map(entries: &[(&str, Option<&str>)]) -> DeployedRevisionMap {
        DeployedRevisionMap::new(
            entries
                .iter()
                .map(|(h, r)| (Host::from(*h), r.and_then(Revision::parse)))
                .collect(),
        )
    }

    fn rev(id: &str) -> Revision {
        Revision::parse(id).unwrap()
    }

    #[tokio::test]
    async fn oldest_of_fresh_fleet_is_none() {
        let repo = MemoryRepository::linear(&["a1"]);
        let engine = ReconciliationEngine::new(&repo);
        let oldest = engine
            .oldest_deployed(&map(&[("h1", None), ("h2", None)]))
            .await
            .unwrap();
        assert_eq!(oldest, None);
    }

    #[tokio::test]
    async fn oldest_of_single_revision_is_that_revision() {
        let repo = MemoryRepository::linear(&["a1", "b2"]);
        let engine = ReconciliationEngine::new(&repo);
        let oldest = engine
            .oldest_deployed(&map(&[("h1", Some("b2")), ("h2", None), ("h3", Some("b2"))]))
            .await
            .unwrap();
        assert_eq!(oldest, Some(rev("b2")));
    }

    #[tokio::test]
    async fn oldest_picks_the_common_ancestor_regardless_of_order() {
        let repo = MemoryRepository::linear(&["a1", "b2", "c3", "d4"]);
        let engine = ReconciliationEngine::new(&repo);
        let oldest = engine
            .oldest_deployed(&map(&[("h1", Some("c3")), ("h2", Some("b2")), ("h3", Some("d4"))]))
            .await
            .unwrap();
        assert_eq!(oldest, Some(rev("b2")));
    }

    #[tokio::test]
    async fn diverged_fleet_is_a_hard_failure() {
        let repo = MemoryRepository::new();
        repo.commit("base", &[], "base");
        repo.commit("left", &["base"], "left");
        repo.commit("right", &["base"], "right");
        let engine = ReconciliationEngine::new(&repo);

        let err = engine
            .oldest_deployed(&map(&[("h1", Some("left")), ("h2", Some("right"))]))
            .await
            .unwrap_err();
        match err {
            DeployError::DivergedHistory { a, b } => {
                assert_eq!(a, rev("left"));
                assert_eq!(b, rev("right"));
            }
            other => panic!("expected DivergedHistory, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_deployed_revision_fails_lookup() {
        let repo = MemoryRepository::linear(&["a1"]);
        let engine = ReconciliationEngine::new(&repo);
        let err = engine.lookup_or_fail("zzzzz").await.unwrap_err();
        assert!(matches!(err, DeployError::UnknownRevision { ref id } if id == "zzzzz"));
        assert_eq!(err.exit_code(), 1);

        let err = engine
            .oldest_deployed(&map(&[("h1", Some("a1")), ("h2", Some("zzzzz"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::UnknownRevision { .. }));
    }

    #[tokio::test]
    async fn report_for_fresh_fleet_covers_whole_history() {
        let repo = MemoryRepository::new();
        repo.commit_with("11111", &[], "Ada", "Initial import", &["README"]);
        repo.commit_with("abcde", &["11111"], "Grace", "Add checkout", &["src/cart.rs"]);
        let engine = ReconciliationEngine::new(&repo);

        let report = engine
            .report(&map(&[("h1", None), ("h2", None)]), &rev("abcde"))
            .await
            .unwrap();
        assert!(report.hosts.iter().all(|line| line.commit.is_none()));
        match &report.pending {
            Pending::Changes { from, commits, files } => {
                assert_eq!(*from, None);
                let ids: Vec<&str> = commits.iter().map(|c| c.revision.as_str()).collect();
                assert_eq!(ids, vec!["abcde", "11111"]);
                assert_eq!(files.len(), 2);
            }
            Pending::UpToDate => panic!("fresh fleet cannot be up to date"),
        }

        let text = report.to_string();
        assert!(text.starts_with("Deployed Revisions\n"));
        assert!(text.contains("h1: 0000000 (no deployed revision)\n"));
        assert!(text.contains("\nOn Deck\n"));
        assert!(text.contains("abcde Add checkout\n"));
        assert!(text.contains(" src/cart.rs | +1 -0\n"));
        assert!(text.contains(" 2 files changed\n"));
    }

    #[tokio::test]
    async fn report_when_fleet_is_at_target() {
        let repo = MemoryRepository::new();
        repo.commit_with("abcdef0123", &[], "Ada", "Ship it", &["a"]);
        let engine = ReconciliationEngine::new(&repo);
        let report = engine
            .report(&map(&[("h1", Some("abcdef0123"))]), &rev("abcdef0123"))
            .await
            .unwrap();
        assert!(report.is_up_to_date());
        let text = report.to_string();
        assert!(text.contains("h1: abcdef0 Ship it [Ada]\n"));
        assert!(text.ends_with("On Deck\nDeployed revision is up to date\n"));
    }

    #[tokio::test]
    async fn report_pending_starts_at_oldest_host() {
        let repo = MemoryRepository::linear(&["a1", "b2", "c3", "d4"]);
        let engine = ReconciliationEngine::new(&repo);
        let report = engine
            .report(&map(&[("h1", Some("c3")), ("h2", Some("b2"))]), &rev("d4"))
            .await
            .unwrap();
        match report.pending {
            Pending::Changes { from, commits, .. } => {
                assert_eq!(from, Some(rev("b2")));
                let ids: Vec<&str> = commits.iter().map(|c| c.revision.as_str()).collect();
                assert_eq!(ids, vec!["d4", "c3"]);
            }
            Pending::UpToDate => panic!("hosts are behind d4"),
        }
    }

    #[tokio::test]
    async fn report_serializes_with_status_tag() {
        let repo = MemoryRepository::linear(&["a1"]);
        let engine = ReconciliationEngine::new(&repo);
        let report = engine
            .report(&map(&[("h1", Some("a1"))]), &rev("a1"))
            .await
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pending"]["status"], "up_to_date");
        assert_eq!(json["hosts"][0]["host"], "h1");
        assert_eq!(json["target"]["revision"], "a1");
    }
}
