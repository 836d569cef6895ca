//! Trait contract tests for Repository, RemoteExecutor and ArtifactTransfer.
//!
//! These tests verify the behavioral contracts of the capability traits
//! using in-memory fakes. Any conforming implementation must pass these.

use std::path::Path;

use gitdeploy_state::fakes::{MemoryFleet, MemoryRepository};
use gitdeploy_state::*;

fn rev(id: &str) -> Revision {
    Revision::parse(id).unwrap()
}

fn ids(commits: &[CommitInfo]) -> Vec<&str> {
    commits.iter().map(|c| c.revision.as_str()).collect()
}

// ===========================================================================
// Repository contract tests
// ===========================================================================

#[tokio::test]
async fn repo_head_follows_last_commit() {
    let repo = MemoryRepository::linear(&["a1", "b2", "c3"]);
    assert_eq!(repo.head_revision().await.unwrap(), rev("c3"));
}

#[tokio::test]
async fn repo_lookup_unknown_is_none_not_error() {
    let repo = MemoryRepository::linear(&["a1"]);
    assert!(repo.lookup_commit("zzzzz").await.unwrap().is_none());
}

#[tokio::test]
async fn repo_lookup_returns_metadata() {
    let repo = MemoryRepository::new();
    repo.commit_with("abcde", &[], "Ada", "Initial import", &["README"]);
    let info = repo.lookup_commit("abcde").await.unwrap().unwrap();
    assert_eq!(info.author, "Ada");
    assert_eq!(info.summary, "Initial import");
}

#[tokio::test]
async fn repo_history_range_excludes_from_side() {
    let repo = MemoryRepository::linear(&["a1", "b2", "c3", "d4"]);
    let range = repo
        .history_range(Some(&rev("b2")), &rev("d4"))
        .await
        .unwrap();
    assert_eq!(ids(&range), vec!["d4", "c3"]);
}

#[tokio::test]
async fn repo_history_range_reversed_is_empty() {
    let repo = MemoryRepository::linear(&["a1", "b2"]);
    let range = repo
        .history_range(Some(&rev("b2")), &rev("a1"))
        .await
        .unwrap();
    assert!(range.is_empty());
}

#[tokio::test]
async fn repo_history_from_root_is_everything() {
    let repo = MemoryRepository::linear(&["a1", "b2", "c3"]);
    let range = repo.history_range(None, &rev("c3")).await.unwrap();
    assert_eq!(ids(&range), vec!["c3", "b2", "a1"]);
}

#[tokio::test]
async fn repo_history_range_on_diverged_branches_is_nonempty_both_ways() {
    let repo = MemoryRepository::new();
    repo.commit("base", &[], "base");
    repo.commit("left", &["base"], "left");
    repo.commit("right", &["base"], "right");

    let l_to_r = repo
        .history_range(Some(&rev("left")), &rev("right"))
        .await
        .unwrap();
    let r_to_l = repo
        .history_range(Some(&rev("right")), &rev("left"))
        .await
        .unwrap();
    assert_eq!(ids(&l_to_r), vec!["right"]);
    assert_eq!(ids(&r_to_l), vec!["left"]);
}

#[tokio::test]
async fn repo_history_range_unknown_revision_errors() {
    let repo = MemoryRepository::linear(&["a1"]);
    let err = repo
        .history_range(Some(&rev("a1")), &rev("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::RevisionNotFound(_)));
}

#[tokio::test]
async fn repo_write_read_list_delete_refs() {
    let repo = MemoryRepository::linear(&["a1", "b2"]);
    repo.write_ref("refs/servers/web1", &rev("a1")).await.unwrap();
    repo.write_ref("refs/servers/web2", &rev("b2")).await.unwrap();
    repo.write_ref("refs/servers/web1", &rev("b2")).await.unwrap();

    assert_eq!(
        repo.read_ref("refs/servers/web1").await.unwrap(),
        Some(rev("b2"))
    );
    let listed = repo.list_refs("refs/servers/").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].0, "refs/servers/web1");

    repo.delete_ref("refs/servers/web1").await.unwrap();
    repo.delete_ref("refs/servers/web1").await.unwrap();
    assert_eq!(repo.read_ref("refs/servers/web1").await.unwrap(), None);
}

#[tokio::test]
async fn repo_write_ref_to_unknown_commit_fails() {
    let repo = MemoryRepository::linear(&["a1"]);
    assert!(repo
        .write_ref("refs/servers/web1", &rev("missing"))
        .await
        .is_err());
}

#[tokio::test]
async fn repo_archive_overwrites_destination() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("app-archive.tar.gz");
    let repo = MemoryRepository::linear(&["a1", "b2"]);

    repo.write_archive(&rev("a1"), &dest).await.unwrap();
    repo.write_archive(&rev("b2"), &dest).await.unwrap();

    let contents = std::fs::read_to_string(&dest).unwrap();
    assert!(contents.contains("b2"));
    assert_eq!(repo.archives().len(), 2);
}

// ===========================================================================
// RemoteExecutor contract tests
// ===========================================================================

#[tokio::test]
async fn fleet_run_on_all_preserves_host_order() {
    let fleet = MemoryFleet::new(&["h1", "h2", "h3"]);
    let hosts: Vec<Host> = ["h3", "h1", "h2"].iter().map(|h| Host::from(*h)).collect();
    let cmd = RemoteCommand::EnsureDir {
        path: "/opt/app".to_string(),
        owner: None,
    };
    let results = fleet.run_on_all(&hosts, &cmd, Privilege::User).await;
    let order: Vec<&str> = results.iter().map(|(h, _)| h.as_str()).collect();
    assert_eq!(order, vec!["h3", "h1", "h2"]);
    assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().success()));
}

#[tokio::test]
async fn fleet_unreachable_host_is_an_error_not_an_exit_code() {
    let fleet = MemoryFleet::new(&["h1"]);
    fleet.set_unreachable("h1", true);
    let err = fleet
        .run_on_one(
            &Host::from("h1"),
            &RemoteCommand::ReadFile {
                path: "/x".to_string(),
            },
            Privilege::User,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Unreachable { .. }));
}

#[tokio::test]
async fn fleet_read_through_symlink() {
    let fleet = MemoryFleet::new(&["h1"]);
    fleet.put_file("h1", "/opt/app/r1/REVISION", "abcde\n");
    fleet.put_symlink("h1", "/opt/app/current", "r1");

    let out = fleet
        .run_on_one(
            &Host::from("h1"),
            &RemoteCommand::ReadFile {
                path: "/opt/app/current/REVISION".to_string(),
            },
            Privilege::User,
        )
        .await
        .unwrap();
    assert!(out.success());
    assert_eq!(out.stdout, "abcde\n");
}

#[tokio::test]
async fn fleet_chown_requires_elevation() {
    let fleet = MemoryFleet::new(&["h1"]);
    let cmd = RemoteCommand::EnsureDir {
        path: "/opt/app".to_string(),
        owner: Some(("deploy".to_string(), "deploy".to_string())),
    };
    let host = Host::from("h1");
    let plain = fleet.run_on_one(&host, &cmd, Privilege::User).await.unwrap();
    assert!(!plain.success());
    let elevated = fleet
        .run_on_one(&host, &cmd, Privilege::Elevated)
        .await
        .unwrap();
    assert!(elevated.success());
}

#[tokio::test]
async fn fleet_read_link_missing_is_empty_success() {
    let fleet = MemoryFleet::new(&["h1"]);
    fleet.put_file("h1", "/opt/app/r1/REVISION", "a\n");
    let host = Host::from("h1");
    let read = |path: &str| RemoteCommand::ReadLink {
        path: path.to_string(),
    };

    let missing = fleet
        .run_on_one(&host, &read("/opt/app/current"), Privilege::User)
        .await
        .unwrap();
    assert!(missing.success());
    assert_eq!(missing.stdout, "");

    let not_a_link = fleet
        .run_on_one(&host, &read("/opt/app/r1"), Privilege::User)
        .await
        .unwrap();
    assert!(!not_a_link.success());

    fleet.put_symlink("h1", "/opt/app/current", "r1");
    let link = fleet
        .run_on_one(&host, &read("/opt/app/current"), Privilege::User)
        .await
        .unwrap();
    assert_eq!(link.stdout, "r1\n");
}

#[tokio::test]
async fn fleet_list_dirs_skips_symlinks() {
    let fleet = MemoryFleet::new(&["h1"]);
    fleet.put_file("h1", "/opt/app/r1/REVISION", "a\n");
    fleet.put_file("h1", "/opt/app/r2/REVISION", "b\n");
    fleet.put_symlink("h1", "/opt/app/current", "r2");

    let out = fleet
        .run_on_one(
            &Host::from("h1"),
            &RemoteCommand::ListDirs {
                path: "/opt/app".to_string(),
            },
            Privilege::User,
        )
        .await
        .unwrap();
    assert_eq!(out.stdout, "r1\nr2\n");
}

// ===========================================================================
// ArtifactTransfer contract tests
// ===========================================================================

#[tokio::test]
async fn transfer_copy_is_removed_after_action() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("app-archive.tar.gz");
    std::fs::write(&local, "tarball").unwrap();

    let fleet = MemoryFleet::new(&["h1"]);
    let host = Host::from("h1");
    let seen: Result<String, RemoteError> =
        with_remote_copy(&fleet, &host, &local, "deploy", |remote| async move {
            Ok(remote)
        })
        .await;
    let remote = seen.unwrap();
    assert!(remote.starts_with("/tmp/"));
    assert!(fleet.files_under("h1", "/tmp").is_empty());
}

#[tokio::test]
async fn transfer_copy_is_removed_even_when_action_fails() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("app-archive.tar.gz");
    std::fs::write(&local, "tarball").unwrap();

    let fleet = MemoryFleet::new(&["h1"]);
    let host = Host::from("h1");
    let result: Result<(), RemoteError> =
        with_remote_copy(&fleet, &host, Path::new(&local), "deploy", |_| async {
            Err(RemoteError::Transfer {
                host: "h1".to_string(),
                reason: "action failed".to_string(),
            })
        })
        .await;
    assert!(result.is_err());
    assert!(fleet.files_under("h1", "/tmp").is_empty());
}
