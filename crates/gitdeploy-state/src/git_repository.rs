//! `git` CLI implementation of the [`Repository`] trait.
//!
//! Every operation shells out to `git` in the configured working directory.
//! Commit records are read with `%x1f`-separated log formats so subjects
//! containing spaces or tabs survive parsing.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::capabilities::{CommitInfo, FileChange, RepoResult, Repository, Revision};
use crate::error::RepoError;

const COMMIT_FORMAT: &str = "--format=%H%x1f%an%x1f%s";

/// Repository backed by a local git working copy.
#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
}

impl GitRepository {
    /// Operate on the repository containing `workdir`.
    pub fn open(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn run(&self, args: &[&str]) -> RepoResult<Output> {
        debug!(args = ?args, "git");
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RepoError::Spawn(e.to_string()))
    }

    /// Run and require a zero exit, returning stdout.
    async fn run_ok(&self, args: &[&str]) -> RepoResult<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(RepoError::Command {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// `rev-parse --verify --quiet`; `None` when the expression names nothing.
    async fn verify(&self, expr: &str) -> RepoResult<Option<Revision>> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", expr]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Revision::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn empty_tree(&self) -> RepoResult<String> {
        let out = self
            .run_ok(&["hash-object", "-t", "tree", "/dev/null"])
            .await?;
        Ok(out.trim().to_string())
    }
}

fn check_ref_name(name: &str) -> RepoResult<()> {
    if !name.starts_with("refs/") || name.contains("..") || name.ends_with('/') {
        return Err(RepoError::InvalidRef(name.to_string()));
    }
    Ok(())
}

fn parse_commit_line(line: &str) -> RepoResult<CommitInfo> {
    let mut fields = line.split('\x1f');
    let id = fields.next().unwrap_or_default();
    let revision =
        Revision::parse(id).ok_or_else(|| RepoError::Parse(format!("commit line: {line:?}")))?;
    Ok(CommitInfo {
        revision,
        author: fields.next().unwrap_or_default().to_string(),
        summary: fields.next().unwrap_or_default().to_string(),
    })
}

fn parse_commit_lines(stdout: &str) -> RepoResult<Vec<CommitInfo>> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_commit_line)
        .collect()
}

fn parse_numstat(stdout: &str) -> Vec<FileChange> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.splitn(3, '\t');
            let added = cols.next()?;
            let removed = cols.next()?;
            let path = cols.next()?;
            Some(FileChange {
                path: path.to_string(),
                added: added.parse().ok(),
                removed: removed.parse().ok(),
            })
        })
        .collect()
}

#[async_trait]
impl Repository for GitRepository {
    async fn head_revision(&self) -> RepoResult<Revision> {
        self.verify("HEAD^{commit}")
            .await?
            .ok_or_else(|| RepoError::RevisionNotFound("HEAD".to_string()))
    }

    async fn lookup_commit(&self, expr: &str) -> RepoResult<Option<CommitInfo>> {
        let Some(revision) = self.verify(&format!("{expr}^{{commit}}")).await? else {
            return Ok(None);
        };
        let out = self
            .run_ok(&["log", "-1", COMMIT_FORMAT, revision.as_str()])
            .await?;
        let line = out
            .lines()
            .next()
            .ok_or_else(|| RepoError::Parse(format!("empty log for {revision}")))?;
        parse_commit_line(line).map(Some)
    }

    async fn history_range(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> RepoResult<Vec<CommitInfo>> {
        let range = match from {
            Some(from) => format!("{from}..{to}"),
            None => to.to_string(),
        };
        let out = self.run_ok(&["log", COMMIT_FORMAT, &range, "--"]).await?;
        parse_commit_lines(&out)
    }

    async fn diff_summary(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> RepoResult<Vec<FileChange>> {
        let base = match from {
            Some(from) => from.to_string(),
            None => self.empty_tree().await?,
        };
        let out = self
            .run_ok(&["diff", "--numstat", &base, to.as_str(), "--"])
            .await?;
        Ok(parse_numstat(&out))
    }

    async fn read_ref(&self, name: &str) -> RepoResult<Option<Revision>> {
        check_ref_name(name)?;
        self.verify(name).await
    }

    async fn write_ref(&self, name: &str, revision: &Revision) -> RepoResult<()> {
        check_ref_name(name)?;
        self.run_ok(&["update-ref", name, revision.as_str()])
            .await
            .map(|_| ())
    }

    async fn delete_ref(&self, name: &str) -> RepoResult<()> {
        check_ref_name(name)?;
        if self.verify(name).await?.is_none() {
            return Ok(());
        }
        self.run_ok(&["update-ref", "-d", name]).await.map(|_| ())
    }

    async fn list_refs(&self, prefix: &str) -> RepoResult<Vec<(String, Revision)>> {
        let out = self
            .run_ok(&[
                "for-each-ref",
                "--sort=refname",
                "--format=%(objectname) %(refname)",
                prefix,
            ])
            .await?;
        out.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let (object, name) = line
                    .split_once(' ')
                    .ok_or_else(|| RepoError::Parse(format!("for-each-ref line: {line:?}")))?;
                let revision = Revision::parse(object)
                    .ok_or_else(|| RepoError::Parse(format!("for-each-ref line: {line:?}")))?;
                Ok((name.to_string(), revision))
            })
            .collect()
    }

    async fn write_archive(&self, revision: &Revision, dest: &Path) -> RepoResult<()> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dest = dest.to_string_lossy();
        self.run_ok(&[
            "archive",
            "--format=tar.gz",
            "-o",
            dest.as_ref(),
            revision.as_str(),
        ])
        .await
        .map(|_| ())
    }
}
