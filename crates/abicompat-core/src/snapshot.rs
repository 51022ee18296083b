//! Isolated, disposable checkouts of a revision.
//!
//! A [`Snapshot`] is a fresh temporary directory holding one revision with
//! its submodules initialized. Snapshots are created by a
//! [`SnapshotProvider`] and must be released exactly once; inside the
//! engine a [`SnapshotLease`] guarantees this on every exit path.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{ConfigError, SnapshotError, ToolError};
use crate::revision::RevisionDescriptor;
use crate::tooling::ToolInvocation;

/// Prefix of every snapshot directory.
pub const SNAPSHOT_PREFIX: &str = "abicompat-";

/// A materialized revision on disk.
#[derive(Debug)]
pub struct Snapshot {
    path: PathBuf,
    dir: Option<TempDir>,
    label: String,
    released: bool,
}

impl Snapshot {
    /// Create an empty snapshot in a fresh temporary directory.
    pub fn create(label: impl Into<String>) -> Result<Self, SnapshotError> {
        let dir = tempfile::Builder::new()
            .prefix(SNAPSHOT_PREFIX)
            .tempdir()
            .map_err(SnapshotError::CreateDir)?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            label: label.into(),
            released: false,
        })
    }

    /// Root directory of the checkout.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Revision label this snapshot was created for.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Whether the nested sub-component directory is present.
    pub fn has_sub_component(&self, dir: &Path) -> bool {
        self.path.join(dir).is_dir()
    }

    /// Delete the directory. Safe to call more than once.
    pub fn remove_dir(&mut self) -> Result<(), SnapshotError> {
        if let Some(dir) = self.dir.take() {
            dir.close().map_err(|source| SnapshotError::Remove {
                path: self.path.clone(),
                source,
            })?;
        } else if self.path.exists() {
            std::fs::remove_dir_all(&self.path).map_err(|source| SnapshotError::Remove {
                path: self.path.clone(),
                source,
            })?;
        }
        self.released = true;
        Ok(())
    }
}

/// Materializes revisions into snapshots and disposes of them.
pub trait SnapshotProvider {
    /// Check out `revision` into a new snapshot and record its commit.
    ///
    /// On failure nothing is left behind: a partially populated snapshot is
    /// released before the error is returned.
    fn materialize(&self, revision: &mut RevisionDescriptor) -> Result<Snapshot, SnapshotError>;

    /// Delete the snapshot and prune any bookkeeping kept for it.
    ///
    /// Must tolerate partially populated and already released snapshots.
    fn release(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError>;
}

/// Snapshot owned by a pipeline run, released when dropped.
pub struct SnapshotLease<'a> {
    provider: &'a dyn SnapshotProvider,
    snapshot: Snapshot,
}

impl<'a> SnapshotLease<'a> {
    /// Materialize `revision` and take ownership of the result.
    pub fn acquire(
        provider: &'a dyn SnapshotProvider,
        revision: &mut RevisionDescriptor,
    ) -> Result<Self, SnapshotError> {
        let snapshot = provider.materialize(revision)?;
        debug!(path = %snapshot.path().display(), revision = %revision.pretty(), "Snapshot materialized");
        Ok(Self { provider, snapshot })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Release now, reporting failures to the caller.
    pub fn release(mut self) -> Result<(), SnapshotError> {
        self.provider.release(&mut self.snapshot)
    }
}

impl Drop for SnapshotLease<'_> {
    fn drop(&mut self) {
        if self.snapshot.is_released() {
            return;
        }
        if let Err(e) = self.provider.release(&mut self.snapshot) {
            warn!(
                path = %self.snapshot.path().display(),
                error = %e,
                "Failed to release snapshot"
            );
        }
    }
}

/// Snapshot provider backed by `git worktree`.
#[derive(Debug, Clone)]
pub struct GitSnapshotProvider {
    git: String,
    repo_path: PathBuf,
    sub_component_dir: PathBuf,
}

impl GitSnapshotProvider {
    pub fn new(git: impl Into<String>, repo_path: impl Into<PathBuf>, sub_component_dir: impl Into<PathBuf>) -> Self {
        Self {
            git: git.into(),
            repo_path: repo_path.into(),
            sub_component_dir: sub_component_dir.into(),
        }
    }

    fn git(&self, dir: &Path) -> ToolInvocation {
        ToolInvocation::new(self.git.as_str()).current_dir(dir)
    }

    fn git_error(revision: &str) -> impl FnOnce(ToolError) -> SnapshotError + '_ {
        move |source| SnapshotError::Git {
            revision: revision.to_string(),
            source,
        }
    }

    /// Fetch `revision` from `repository` into `FETCH_HEAD` when a
    /// repository is given; return the ref to check out.
    fn fetch_if_remote(
        &self,
        dir: &Path,
        revision: &str,
        repository: Option<&str>,
    ) -> Result<String, SnapshotError> {
        match repository {
            Some(repository) => {
                debug!(revision = %revision, repository = %repository, "Fetching revision");
                self.git(dir)
                    .args(["fetch", repository, revision])
                    .run_checked()
                    .map_err(Self::git_error(revision))?;
                Ok("FETCH_HEAD".to_string())
            }
            None => Ok(revision.to_string()),
        }
    }

    fn populate(&self, snapshot: &Snapshot, revision: &mut RevisionDescriptor) -> Result<(), SnapshotError> {
        let label = revision.label().to_string();
        let worktree_rev = self.fetch_if_remote(&self.repo_path, &label, revision.repository())?;

        debug!(revision = %label, path = %snapshot.path().display(), "Adding git worktree");
        self.git(&self.repo_path)
            .args(["worktree", "add", "--detach"])
            .path_arg(snapshot.path())
            .arg(worktree_rev)
            .run_checked()
            .map_err(Self::git_error(&label))?;

        let commit = self
            .git(snapshot.path())
            .args(["rev-parse", "HEAD"])
            .run_checked()
            .map_err(Self::git_error(&label))?
            .stdout
            .trim()
            .to_string();
        if commit.is_empty() {
            return Err(SnapshotError::EmptyCommit(label));
        }
        debug!(commit = %commit, "Commit is {}", commit);
        revision.set_resolved_commit(commit);

        self.update_submodules(snapshot, revision)
    }

    /// Initialize submodules, then re-point the nested sub-component if the
    /// revision pins it.
    fn update_submodules(&self, snapshot: &Snapshot, revision: &RevisionDescriptor) -> Result<(), SnapshotError> {
        self.git(snapshot.path())
            .args(["submodule", "update", "--init", "--recursive"])
            .run_checked()
            .map_err(Self::git_error(revision.label()))?;

        let Some(pin) = revision.sub_component() else {
            return Ok(());
        };
        if !snapshot.has_sub_component(&self.sub_component_dir) {
            debug!(
                dir = %self.sub_component_dir.display(),
                "No nested sub-component in snapshot, ignoring pin"
            );
            return Ok(());
        }

        let sub_dir = snapshot.path().join(&self.sub_component_dir);
        let checkout_rev = self.fetch_if_remote(&sub_dir, &pin.revision, pin.repository.as_deref())?;
        self.git(&sub_dir)
            .args(["checkout", checkout_rev.as_str()])
            .run_checked()
            .map_err(Self::git_error(&pin.revision))?;
        Ok(())
    }
}

impl SnapshotProvider for GitSnapshotProvider {
    fn materialize(&self, revision: &mut RevisionDescriptor) -> Result<Snapshot, SnapshotError> {
        let mut snapshot = Snapshot::create(revision.label())?;
        if let Err(e) = self.populate(&snapshot, revision) {
            if let Err(cleanup) = self.release(&mut snapshot) {
                warn!(error = %cleanup, "Cleanup of partial snapshot failed");
            }
            return Err(e);
        }
        Ok(snapshot)
    }

    fn release(&self, snapshot: &mut Snapshot) -> Result<(), SnapshotError> {
        snapshot.remove_dir()?;
        self.git(&self.repo_path)
            .args(["worktree", "prune"])
            .run_checked()
            .map_err(Self::git_error(snapshot.label()))?;
        Ok(())
    }
}

/// Fail unless `repo_path` is inside a git work tree.
pub fn ensure_git_repository(git: &str, repo_path: &Path) -> Result<(), ConfigError> {
    let inside = ToolInvocation::new(git)
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(repo_path)
        .run()
        .map(|o| o.passed() && o.stdout.trim() == "true")
        .unwrap_or(false);
    if inside {
        Ok(())
    } else {
        Err(ConfigError::NotAGitRepository(repo_path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::VersionTag;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::write(dir.path().join("README"), "v1\n").unwrap();
        run_git(dir.path(), &["add", "README"]);
        run_git(dir.path(), &["commit", "-m", "initial"]);
        run_git(dir.path(), &["tag", "v1"]);
        std::fs::write(dir.path().join("README"), "v2\n").unwrap();
        run_git(dir.path(), &["commit", "-am", "second"]);
        dir
    }

    fn worktree_count(repo: &Path) -> usize {
        run_git(repo, &["worktree", "list", "--porcelain"])
            .lines()
            .filter(|l| l.starts_with("worktree "))
            .count()
    }

    #[test]
    fn test_snapshot_remove_dir_is_idempotent() {
        let mut snapshot = Snapshot::create("v1").unwrap();
        let path = snapshot.path().to_path_buf();
        assert!(path.is_dir());

        snapshot.remove_dir().unwrap();
        assert!(!path.exists());
        assert!(snapshot.is_released());
        snapshot.remove_dir().unwrap();
    }

    #[test]
    fn test_materialize_tag_and_release() {
        let repo = make_git_repo();
        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::Old, "v1").unwrap();

        let mut snapshot = provider.materialize(&mut revision).unwrap();
        let path = snapshot.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(path.join("README")).unwrap(), "v1\n");

        let commit = revision.resolved_commit().unwrap();
        assert_eq!(commit.len(), 40);
        assert!(commit.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(worktree_count(repo.path()), 2);

        provider.release(&mut snapshot).unwrap();
        assert!(!path.exists());
        assert_eq!(worktree_count(repo.path()), 1);

        // A second release is harmless.
        provider.release(&mut snapshot).unwrap();
    }

    #[test]
    fn test_unknown_revision_leaves_nothing_behind() {
        let repo = make_git_repo();
        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::New, "no-such-tag").unwrap();

        let err = provider.materialize(&mut revision).unwrap_err();
        assert!(matches!(err, SnapshotError::Git { .. }));
        assert!(revision.resolved_commit().is_none());
        assert_eq!(worktree_count(repo.path()), 1);
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let repo = make_git_repo();
        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::Old, "v1").unwrap();

        let path = {
            let lease = SnapshotLease::acquire(&provider, &mut revision).unwrap();
            lease.snapshot().path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(worktree_count(repo.path()), 1);
    }

    #[test]
    fn test_revision_fetched_from_other_repository() {
        let local = make_git_repo();
        let remote = make_git_repo();
        std::fs::write(remote.path().join("README"), "remote\n").unwrap();
        run_git(remote.path(), &["commit", "-am", "remote only"]);
        run_git(remote.path(), &["tag", "remote-only"]);

        let provider = GitSnapshotProvider::new("git", local.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::New, "remote-only")
            .unwrap()
            .with_repository(Some(remote.path().to_string_lossy().into_owned()));

        let lease = SnapshotLease::acquire(&provider, &mut revision).unwrap();
        assert_eq!(
            std::fs::read_to_string(lease.snapshot().path().join("README")).unwrap(),
            "remote\n"
        );
        lease.release().unwrap();
        assert_eq!(worktree_count(local.path()), 1);
    }

    #[test]
    fn test_pin_ignored_without_sub_component() {
        let repo = make_git_repo();
        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::Old, "v1")
            .unwrap()
            .with_sub_component(Some("deadbeef".to_string()), None);

        let lease = SnapshotLease::acquire(&provider, &mut revision).unwrap();
        assert!(!lease.snapshot().has_sub_component(Path::new("crypto")));
        lease.release().unwrap();
    }

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        dir
    }

    fn commit_file(repo: &Path, file: &str, content: &str) -> String {
        std::fs::write(repo.join(file), content).unwrap();
        run_git(repo, &["add", file]);
        run_git(repo, &["commit", "-m", content.trim()]);
        run_git(repo, &["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Superproject tagged `v1` whose `crypto` submodule records commit c2.
    /// Returns the superproject, the submodule origin and commit c1.
    fn make_repo_with_sub_component() -> (tempfile::TempDir, tempfile::TempDir, String) {
        let sub = init_repo();
        let c1 = commit_file(sub.path(), "F", "c1\n");
        commit_file(sub.path(), "F", "c2\n");

        let superproject = init_repo();
        run_git(superproject.path(), &["config", "protocol.file.allow", "always"]);
        commit_file(superproject.path(), "README", "super\n");
        run_git(
            superproject.path(),
            &[
                "-c",
                "protocol.file.allow=always",
                "submodule",
                "add",
                sub.path().to_str().unwrap(),
                "crypto",
            ],
        );
        run_git(superproject.path(), &["commit", "-m", "add crypto"]);
        run_git(superproject.path(), &["tag", "v1"]);
        (superproject, sub, c1)
    }

    #[test]
    fn test_sub_component_follows_superproject_without_pin() {
        let (repo, _sub, _c1) = make_repo_with_sub_component();
        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::Old, "v1").unwrap();

        let lease = SnapshotLease::acquire(&provider, &mut revision).unwrap();
        assert!(lease.snapshot().has_sub_component(Path::new("crypto")));
        assert_eq!(
            std::fs::read_to_string(lease.snapshot().path().join("crypto/F")).unwrap(),
            "c2\n"
        );
        lease.release().unwrap();
    }

    #[test]
    fn test_sub_component_pinned_to_local_revision() {
        let (repo, _sub, c1) = make_repo_with_sub_component();
        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::Old, "v1")
            .unwrap()
            .with_sub_component(Some(c1.clone()), None);

        let lease = SnapshotLease::acquire(&provider, &mut revision).unwrap();
        let path = lease.snapshot().path().to_path_buf();
        let crypto = path.join("crypto");
        assert_eq!(std::fs::read_to_string(crypto.join("F")).unwrap(), "c1\n");
        assert_eq!(run_git(&crypto, &["rev-parse", "HEAD"]).trim(), c1);

        lease.release().unwrap();
        assert!(!path.exists());
        assert_eq!(worktree_count(repo.path()), 1);
    }

    #[test]
    fn test_sub_component_pinned_from_other_repository() {
        let (repo, _sub, _c1) = make_repo_with_sub_component();
        let fork = init_repo();
        let fork_commit = commit_file(fork.path(), "F", "fork\n");
        run_git(fork.path(), &["tag", "fork-only"]);

        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::New, "v1")
            .unwrap()
            .with_sub_component(
                Some("fork-only".to_string()),
                Some(fork.path().to_string_lossy().into_owned()),
            );

        let lease = SnapshotLease::acquire(&provider, &mut revision).unwrap();
        let crypto = lease.snapshot().path().join("crypto");
        assert_eq!(std::fs::read_to_string(crypto.join("F")).unwrap(), "fork\n");
        assert_eq!(run_git(&crypto, &["rev-parse", "HEAD"]).trim(), fork_commit);
        lease.release().unwrap();
        assert_eq!(worktree_count(repo.path()), 1);
    }

    #[test]
    fn test_unknown_sub_component_pin_leaves_nothing_behind() {
        let (repo, _sub, _c1) = make_repo_with_sub_component();
        let provider = GitSnapshotProvider::new("git", repo.path(), "crypto");
        let mut revision = RevisionDescriptor::new(VersionTag::Old, "v1")
            .unwrap()
            .with_sub_component(Some("no-such-revision".to_string()), None);

        let err = provider.materialize(&mut revision).unwrap_err();
        assert!(matches!(err, SnapshotError::Git { ref revision, .. } if revision == "no-such-revision"));
        assert_eq!(worktree_count(repo.path()), 1);
    }

    #[test]
    fn test_ensure_git_repository() {
        let repo = make_git_repo();
        assert!(ensure_git_repository("git", repo.path()).is_ok());

        let plain = tempfile::tempdir().unwrap();
        assert!(ensure_git_repository("git", plain.path()).is_err());
    }
}
