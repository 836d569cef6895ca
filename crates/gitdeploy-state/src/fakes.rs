//! In-memory fakes for capability traits (testing only)
//!
//! Provides `MemoryRepository` (a commit DAG with refs) and `MemoryFleet`
//! (per-host simulated filesystems implementing both `RemoteExecutor` and
//! `ArtifactTransfer`) that satisfy the trait contracts without git, ssh or
//! a real filesystem on the far side.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::capabilities::*;
use crate::command::{CommandOutput, Privilege, RemoteCommand};
use crate::error::{RemoteError, RepoError};

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeCommit {
    parents: Vec<String>,
    author: String,
    summary: String,
    files: Vec<String>,
}

#[derive(Debug, Default)]
struct RepoState {
    commits: HashMap<String, FakeCommit>,
    /// Insertion order, oldest first
    order: Vec<String>,
    head: Option<String>,
    refs: BTreeMap<String, String>,
    archives: Vec<(Revision, std::path::PathBuf)>,
}

impl RepoState {
    fn info(&self, id: &str) -> Option<CommitInfo> {
        self.commits.get(id).map(|c| CommitInfo {
            revision: Revision::parse(id).expect("fake commit ids are non-empty"),
            author: c.author.clone(),
            summary: c.summary.clone(),
        })
    }

    fn ancestors(&self, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                stack.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    fn require(&self, rev: &Revision) -> RepoResult<()> {
        if self.commits.contains_key(rev.as_str()) {
            Ok(())
        } else {
            Err(RepoError::RevisionNotFound(rev.to_string()))
        }
    }

    /// Ids in `from..to`, newest first.
    fn range(&self, from: Option<&Revision>, to: &Revision) -> RepoResult<Vec<String>> {
        self.require(to)?;
        let excluded = match from {
            Some(from) => {
                self.require(from)?;
                self.ancestors(from.as_str())
            }
            None => HashSet::new(),
        };
        let included = self.ancestors(to.as_str());
        Ok(self
            .order
            .iter()
            .rev()
            .filter(|id| included.contains(*id) && !excluded.contains(*id))
            .cloned()
            .collect())
    }
}

/// In-memory repository backed by a commit DAG.
///
/// `commit` appends a commit and moves HEAD to it, like committing on the
/// checked-out branch.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<RepoState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit touching `<id>.txt`, authored by "Test Author".
    pub fn commit(&self, id: &str, parents: &[&str], summary: &str) -> Revision {
        self.commit_with(id, parents, "Test Author", summary, &[&format!("{id}.txt")])
    }

    /// Add a commit with full control over metadata.
    pub fn commit_with(
        &self,
        id: &str,
        parents: &[&str],
        author: &str,
        summary: &str,
        files: &[&str],
    ) -> Revision {
        let mut state = self.state.lock().unwrap();
        state.commits.insert(
            id.to_string(),
            FakeCommit {
                parents: parents.iter().map(|p| p.to_string()).collect(),
                author: author.to_string(),
                summary: summary.to_string(),
                files: files.iter().map(|f| f.to_string()).collect(),
            },
        );
        state.order.push(id.to_string());
        state.head = Some(id.to_string());
        Revision::parse(id).expect("fake commit ids are non-empty")
    }

    /// Build a linear history `ids[0] <- ids[1] <- ...`, HEAD at the last.
    pub fn linear(ids: &[&str]) -> Self {
        let repo = Self::new();
        let mut parent: Option<&str> = None;
        for id in ids {
            let parents: Vec<&str> = parent.into_iter().collect();
            repo.commit(id, &parents, &format!("Commit {id}"));
            parent = Some(id);
        }
        repo
    }

    pub fn set_head(&self, id: &str) {
        self.state.lock().unwrap().head = Some(id.to_string());
    }

    /// Archives written so far, in call order.
    pub fn archives(&self) -> Vec<(Revision, std::path::PathBuf)> {
        self.state.lock().unwrap().archives.clone()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn head_revision(&self) -> RepoResult<Revision> {
        let state = self.state.lock().unwrap();
        state
            .head
            .as_deref()
            .and_then(Revision::parse)
            .ok_or_else(|| RepoError::RevisionNotFound("HEAD".to_string()))
    }

    async fn lookup_commit(&self, expr: &str) -> RepoResult<Option<CommitInfo>> {
        let state = self.state.lock().unwrap();
        let id = if expr == "HEAD" {
            match &state.head {
                Some(head) => head.clone(),
                None => return Ok(None),
            }
        } else if let Some(target) = state.refs.get(expr) {
            target.clone()
        } else {
            expr.trim().to_string()
        };
        Ok(state.info(&id))
    }

    async fn history_range(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> RepoResult<Vec<CommitInfo>> {
        let state = self.state.lock().unwrap();
        let ids = state.range(from, to)?;
        Ok(ids.iter().filter_map(|id| state.info(id)).collect())
    }

    async fn diff_summary(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> RepoResult<Vec<FileChange>> {
        let state = self.state.lock().unwrap();
        let ids = state.range(from, to)?;
        let paths: BTreeSet<String> = ids
            .iter()
            .filter_map(|id| state.commits.get(id))
            .flat_map(|c| c.files.iter().cloned())
            .collect();
        Ok(paths
            .into_iter()
            .map(|path| FileChange {
                path,
                added: Some(1),
                removed: Some(0),
            })
            .collect())
    }

    async fn read_ref(&self, name: &str) -> RepoResult<Option<Revision>> {
        let state = self.state.lock().unwrap();
        Ok(state.refs.get(name).and_then(|id| Revision::parse(id)))
    }

    async fn write_ref(&self, name: &str, revision: &Revision) -> RepoResult<()> {
        let mut state = self.state.lock().unwrap();
        state.require(revision)?;
        state
            .refs
            .insert(name.to_string(), revision.as_str().to_string());
        Ok(())
    }

    async fn delete_ref(&self, name: &str) -> RepoResult<()> {
        self.state.lock().unwrap().refs.remove(name);
        Ok(())
    }

    async fn list_refs(&self, prefix: &str) -> RepoResult<Vec<(String, Revision)>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter_map(|(name, id)| Revision::parse(id).map(|rev| (name.clone(), rev)))
            .collect())
    }

    async fn write_archive(&self, revision: &Revision, dest: &Path) -> RepoResult<()> {
        {
            let state = self.state.lock().unwrap();
            state.require(revision)?;
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, format!("archive of {revision}\n"))?;
        self.state
            .lock()
            .unwrap()
            .archives
            .push((revision.clone(), dest.to_path_buf()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryFleet
// ---------------------------------------------------------------------------

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

fn is_under(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// Simulated filesystem of one host.
#[derive(Debug, Default, Clone)]
struct HostState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, String>,
    /// link path -> target (relative targets resolve against the link's dir)
    symlinks: BTreeMap<String, String>,
    unreachable: bool,
    failing_ops: BTreeSet<&'static str>,
}

impl HostState {
    fn resolve(&self, path: &str) -> String {
        for (link, target) in &self.symlinks {
            let rest = if path == link {
                ""
            } else if is_under(path, link) {
                &path[link.len()..]
            } else {
                continue;
            };
            let base = if target.starts_with('/') {
                target.clone()
            } else {
                format!("{}/{}", parent_of(link), target)
            };
            return format!("{base}{rest}");
        }
        path.to_string()
    }

    fn mkdir_p(&mut self, path: &str) {
        let mut current = path.to_string();
        while current != "/" && current != "." && !current.is_empty() {
            self.dirs.insert(current.clone());
            current = parent_of(&current).to_string();
        }
    }

    fn apply(&mut self, command: &RemoteCommand, privilege: Privilege) -> CommandOutput {
        match command {
            RemoteCommand::ReadFile { path } => match self.files.get(&self.resolve(path)) {
                Some(contents) => CommandOutput::ok(contents.clone()),
                None => CommandOutput::failed(1, format!("cat: {path}: No such file or directory")),
            },
            RemoteCommand::WriteFile { path, contents } => {
                let resolved = self.resolve(path);
                if !self.dirs.contains(parent_of(&resolved)) {
                    return CommandOutput::failed(1, format!("{path}: No such file or directory"));
                }
                self.files.insert(resolved, format!("{contents}\n"));
                CommandOutput::ok("")
            }
            RemoteCommand::EnsureDir { path, owner } => {
                if owner.is_some() && privilege != Privilege::Elevated {
                    return CommandOutput::failed(1, "chown: Operation not permitted");
                }
                self.mkdir_p(path);
                CommandOutput::ok("")
            }
            RemoteCommand::Extract { archive, dest } => {
                let Some(payload) = self.files.get(archive).cloned() else {
                    return CommandOutput::failed(2, format!("tar: {archive}: Cannot open"));
                };
                self.mkdir_p(dest);
                self.files.insert(format!("{dest}/payload"), payload);
                CommandOutput::ok("")
            }
            RemoteCommand::SwapSymlink { link, target } => {
                if !self.dirs.contains(parent_of(link)) {
                    return CommandOutput::failed(1, format!("ln: {link}: No such file or directory"));
                }
                self.symlinks.insert(link.clone(), target.clone());
                CommandOutput::ok("")
            }
            RemoteCommand::ReadLink { path } => match self.symlinks.get(path) {
                Some(target) => CommandOutput::ok(format!("{target}\n")),
                None if self.dirs.contains(path) || self.files.contains_key(path) => {
                    CommandOutput::failed(1, format!("{path}: not a symbolic link"))
                }
                None => CommandOutput::ok(""),
            },
            RemoteCommand::ListDirs { path } => {
                let resolved = self.resolve(path);
                if !self.dirs.contains(&resolved) {
                    return CommandOutput::failed(1, format!("find: '{path}': No such file or directory"));
                }
                let names: Vec<&str> = self
                    .dirs
                    .iter()
                    .filter(|d| parent_of(d) == resolved)
                    .map(|d| &d[resolved.len() + 1..])
                    .collect();
                let mut stdout = names.join("\n");
                if !stdout.is_empty() {
                    stdout.push('\n');
                }
                CommandOutput::ok(stdout)
            }
            RemoteCommand::RemoveDir { path } => {
                self.dirs.retain(|d| d != path && !is_under(d, path));
                self.files.retain(|f, _| !is_under(f, path));
                self.symlinks.retain(|l, _| l != path && !is_under(l, path));
                CommandOutput::ok("")
            }
            RemoteCommand::Shell(_) => {
                CommandOutput::failed(127, "sh: arbitrary shell is not simulated")
            }
        }
    }
}

/// In-memory fleet: one simulated filesystem per registered host.
///
/// Unknown or unreachable hosts return `RemoteError::Unreachable`. Individual
/// operations can be forced to fail per host with [`MemoryFleet::fail_op`].
/// Ownership changes require `Privilege::Elevated`, as on a real host.
#[derive(Debug, Default)]
pub struct MemoryFleet {
    hosts: Mutex<HashMap<Host, HostState>>,
    history: Mutex<Vec<(Host, RemoteCommand, Privilege)>>,
    temp_counter: AtomicUsize,
}

impl MemoryFleet {
    pub fn new(hosts: &[&str]) -> Self {
        let fleet = Self::default();
        {
            let mut map = fleet.hosts.lock().unwrap();
            for host in hosts {
                map.insert(Host::from(*host), HostState::default());
            }
        }
        fleet
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        if let Some(state) = self.hosts.lock().unwrap().get_mut(&Host::from(host)) {
            state.unreachable = unreachable;
        }
    }

    /// Make every command with this [`RemoteCommand::op_name`] exit 1 on `host`.
    pub fn fail_op(&self, host: &str, op: &'static str) {
        if let Some(state) = self.hosts.lock().unwrap().get_mut(&Host::from(host)) {
            state.failing_ops.insert(op);
        }
    }

    pub fn clear_failures(&self, host: &str) {
        if let Some(state) = self.hosts.lock().unwrap().get_mut(&Host::from(host)) {
            state.failing_ops.clear();
        }
    }

    /// Seed a file (parent directories are created).
    pub fn put_file(&self, host: &str, path: &str, contents: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        let state = hosts.entry(Host::from(host)).or_default();
        state.mkdir_p(parent_of(path));
        state.files.insert(path.to_string(), contents.to_string());
    }

    /// Seed a symlink (the link's directory is created).
    pub fn put_symlink(&self, host: &str, link: &str, target: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        let state = hosts.entry(Host::from(host)).or_default();
        state.mkdir_p(parent_of(link));
        state.symlinks.insert(link.to_string(), target.to_string());
    }

    /// Read a file, following symlinks.
    pub fn file(&self, host: &str, path: &str) -> Option<String> {
        let hosts = self.hosts.lock().unwrap();
        let state = hosts.get(&Host::from(host))?;
        state.files.get(&state.resolve(path)).cloned()
    }

    pub fn symlink_target(&self, host: &str, link: &str) -> Option<String> {
        let hosts = self.hosts.lock().unwrap();
        hosts.get(&Host::from(host))?.symlinks.get(link).cloned()
    }

    /// Names of directories directly under `path`, sorted.
    pub fn dirs_in(&self, host: &str, path: &str) -> Vec<String> {
        let hosts = self.hosts.lock().unwrap();
        let Some(state) = hosts.get(&Host::from(host)) else {
            return Vec::new();
        };
        state
            .dirs
            .iter()
            .filter(|d| parent_of(d) == path)
            .map(|d| d[path.len() + 1..].to_string())
            .collect()
    }

    /// Paths of files under `dir`.
    pub fn files_under(&self, host: &str, dir: &str) -> Vec<String> {
        let hosts = self.hosts.lock().unwrap();
        let Some(state) = hosts.get(&Host::from(host)) else {
            return Vec::new();
        };
        state
            .files
            .keys()
            .filter(|f| is_under(f, dir))
            .cloned()
            .collect()
    }

    /// Commands executed on `host`, oldest first.
    pub fn commands(&self, host: &str) -> Vec<(RemoteCommand, Privilege)> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _, _)| h.as_str() == host)
            .map(|(_, c, p)| (c.clone(), *p))
            .collect()
    }

    fn unreachable(host: &Host) -> RemoteError {
        RemoteError::Unreachable {
            host: host.to_string(),
            reason: "simulated host is unreachable".to_string(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for MemoryFleet {
    async fn run_on_one(
        &self,
        host: &Host,
        command: &RemoteCommand,
        privilege: Privilege,
    ) -> RemoteResult<CommandOutput> {
        let mut hosts = self.hosts.lock().unwrap();
        let state = match hosts.get_mut(host) {
            Some(state) if !state.unreachable => state,
            _ => return Err(Self::unreachable(host)),
        };
        self.history
            .lock()
            .unwrap()
            .push((host.clone(), command.clone(), privilege));
        if state.failing_ops.contains(command.op_name()) {
            return Ok(CommandOutput::failed(
                1,
                format!("{}: simulated failure", command.op_name()),
            ));
        }
        Ok(state.apply(command, privilege))
    }
}

#[async_trait]
impl ArtifactTransfer for MemoryFleet {
    async fn copy_to_temp(&self, host: &Host, local: &Path, _user: &str) -> RemoteResult<String> {
        let bytes = std::fs::read(local)?;
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let n = self.temp_counter.fetch_add(1, Ordering::SeqCst);
        let remote_path = format!("/tmp/gitdeploy-{n}-{file_name}");

        let mut hosts = self.hosts.lock().unwrap();
        let state = match hosts.get_mut(host) {
            Some(state) if !state.unreachable => state,
            _ => return Err(Self::unreachable(host)),
        };
        if state.failing_ops.contains("copy_to_temp") {
            return Err(RemoteError::Transfer {
                host: host.to_string(),
                reason: "simulated transfer failure".to_string(),
            });
        }
        state.mkdir_p("/tmp");
        state.files.insert(
            remote_path.clone(),
            String::from_utf8_lossy(&bytes).to_string(),
        );
        Ok(remote_path)
    }

    async fn remove_temp(&self, host: &Host, remote_path: &str) -> RemoteResult<()> {
        let mut hosts = self.hosts.lock().unwrap();
        let state = match hosts.get_mut(host) {
            Some(state) if !state.unreachable => state,
            _ => return Err(Self::unreachable(host)),
        };
        state.files.remove(remote_path);
        Ok(())
    }
}
