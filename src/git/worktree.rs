//! Git worktree lifecycle management
//!
//! Provides worktree operations for Instance isolation: Setup, Cleanup, Remove,
//! Prune, dirtiness/collision checks, committing, and pushing.
//!
//! Note: gitoxide's worktree-mutation support is still evolving, so this module
//! uses a hybrid approach: gitoxide (via [`GitBackend`]) for read operations,
//! the `git` CLI for mutations.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::diff::{compute_diff_for_base, DiffInfo};
use super::pr::is_gh_available;
use super::GitBackend;
use crate::error::{Result, WorktreeError};
use crate::seed;

/// Serializable snapshot of a [`WorktreeAdapter`], embedded in a persisted Instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub base_commit_sha: Option<String>,
}

/// Holds {repoPath, worktreePath, branchName, baseCommitSHA} and the operations
/// an Instance performs against them.
pub struct WorktreeAdapter {
    repo_path: PathBuf,
    worktree_path: PathBuf,
    branch_name: String,
    base_commit_sha: Option<String>,
}

impl WorktreeAdapter {
    /// Construct a fresh adapter for a not-yet-created worktree ("new" mode).
    /// `base_commit_sha` is populated by [`Self::setup`].
    pub fn new(repo_path: PathBuf, worktree_path: PathBuf, branch_name: String) -> Self {
        Self {
            repo_path,
            worktree_path,
            branch_name,
            base_commit_sha: None,
        }
    }

    /// Reconstruct an adapter from a persisted [`WorktreeRecord`] ("from storage" mode).
    pub fn from_record(record: WorktreeRecord) -> Self {
        Self {
            repo_path: record.repo_path,
            worktree_path: record.worktree_path,
            branch_name: record.branch_name,
            base_commit_sha: record.base_commit_sha,
        }
    }

    /// Snapshot the adapter's fields for persistence.
    pub fn to_record(&self) -> WorktreeRecord {
        WorktreeRecord {
            repo_path: self.repo_path.clone(),
            worktree_path: self.worktree_path.clone(),
            branch_name: self.branch_name.clone(),
            base_commit_sha: self.base_commit_sha.clone(),
        }
    }

    /// If the branch does not exist, create it at current HEAD, record baseCommitSHA, create
    /// a linked worktree checking out that branch, and invoke file seeding. If the branch
    /// already exists (Resume path), simply add the worktree at its tip without touching
    /// baseCommitSHA.
    #[instrument(skip(self, copy_on_create))]
    pub async fn setup(&mut self, copy_on_create: &[String]) -> Result<()> {
        let backend = GitBackend::open(&self.repo_path)?;
        let branch_exists = backend.branch_exists(&self.branch_name)?;

        if let Some(parent) = self.worktree_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorktreeError::OperationFailed(format!("failed to create worktrees dir: {}", e)))?;
        }

        if branch_exists {
            debug!("branch {} exists, attaching worktree at its tip", self.branch_name);
            self.run_git(&["worktree", "add", path_str(&self.worktree_path), &self.branch_name])
                .await?;
        } else {
            let head_sha = backend.head_commit_id()?;
            debug!("creating new branch {} at HEAD {}", self.branch_name, head_sha);
            self.run_git(&["worktree", "add", "-b", &self.branch_name, path_str(&self.worktree_path)])
                .await?;
            self.base_commit_sha = Some(head_sha);
            seed::seed_files(&self.repo_path, &self.worktree_path, copy_on_create)?;
        }

        info!("worktree ready at {:?} on branch {}", self.worktree_path, self.branch_name);
        Ok(())
    }

    /// Remove the linked worktree directory, delete the branch, and prune stale worktree
    /// references. Best-effort: each step runs even if an earlier one failed; errors are
    /// collected and reported together.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.remove().await {
            errors.push(format!("remove worktree: {}", e));
        }
        if let Err(e) = self.run_git(&["branch", "-D", &self.branch_name]).await {
            errors.push(format!("delete branch: {}", e));
        }
        if let Err(e) = self.prune().await {
            errors.push(format!("prune: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorktreeError::OperationFailed(errors.join("; ")).into())
        }
    }

    /// Remove only the worktree directory; the branch is kept. Used by Pause.
    #[instrument(skip(self))]
    pub async fn remove(&self) -> Result<()> {
        self.run_git(&["worktree", "remove", "--force", path_str(&self.worktree_path)])
            .await?;
        info!("removed worktree at {:?}", self.worktree_path);
        Ok(())
    }

    /// Garbage-collect worktree metadata after a [`Self::remove`].
    pub async fn prune(&self) -> Result<()> {
        self.run_git(&["worktree", "prune"]).await?;
        Ok(())
    }

    /// Is the worktree's index or working tree modified relative to HEAD?
    pub async fn is_dirty(&self) -> Result<bool> {
        GitBackend::is_dirty(&self.worktree_path).await
    }

    /// Is `branch_name` currently HEAD of some other worktree (including the main one)?
    pub async fn is_branch_checked_out_elsewhere(&self) -> Result<bool> {
        GitBackend::is_branch_checked_out_elsewhere(&self.repo_path, &self.branch_name, &self.worktree_path).await
    }

    /// Stage all changes and commit with `msg`; no-op if nothing to commit.
    pub async fn commit_changes(&self, msg: &str) -> Result<()> {
        if !self.is_dirty().await? {
            return Ok(());
        }

        self.run_git_in(&self.worktree_path, &["add", "-A"]).await?;
        self.run_git_in(&self.worktree_path, &["commit", "-m", msg]).await?;
        Ok(())
    }

    /// Commit (if dirty) and push to origin. Requires GitHub CLI authentication.
    pub async fn push_changes(&self, msg: &str) -> Result<()> {
        if !is_gh_available().await {
            return Err(WorktreeError::GhUnavailable.into());
        }

        self.commit_changes(msg).await?;
        self.run_git_in(&self.worktree_path, &["push", "-u", "origin", &self.branch_name])
            .await?;
        Ok(())
    }

    /// Diff HEAD of the worktree against baseCommitSHA. Returns [`WorktreeError::BaseCommitNotSet`]
    /// if baseCommitSHA is unset; callers treat this as "not ready yet".
    pub async fn diff(&self) -> Result<DiffInfo> {
        let base = self
            .base_commit_sha
            .as_ref()
            .ok_or(WorktreeError::BaseCommitNotSet)?;

        compute_diff_for_base(&self.worktree_path, base).await
    }

    pub fn repo_name(&self) -> String {
        self.repo_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn worktree_path(&self) -> &Path {
        &self.worktree_path
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn base_commit_sha(&self) -> Option<&str> {
        self.base_commit_sha.as_deref()
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        self.run_git_in(&self.repo_path, args).await
    }

    async fn run_git_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WorktreeError::OperationFailed(format!("failed to run git {}: {}", args.join(" "), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("git {} failed: {}", args.join(" "), stderr);
            return Err(WorktreeError::OperationFailed(format!("git {} failed: {}", args.join(" "), stderr)).into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::process::Command as TokioCommand;

    async fn init_repo_with_commit() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path();
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            TokioCommand::new("git").current_dir(path).args(&args).output().await.unwrap();
        }
        tokio::fs::write(path.join("README.md"), "hello\n").await.unwrap();
        TokioCommand::new("git").current_dir(path).args(["add", "."]).output().await.unwrap();
        TokioCommand::new("git")
            .current_dir(path)
            .args(["commit", "-m", "initial"])
            .output()
            .await
            .unwrap();
        temp_dir
    }

    #[tokio::test]
    async fn test_setup_creates_new_branch_and_records_base_sha() {
        let repo = init_repo_with_commit().await;
        let worktree_path = repo.path().join("wt").join("feature");
        let mut adapter = WorktreeAdapter::new(repo.path().to_path_buf(), worktree_path.clone(), "feature".to_string());

        adapter.setup(&[]).await.unwrap();

        assert!(worktree_path.join("README.md").exists());
        assert!(adapter.base_commit_sha().is_some());
    }

    #[tokio::test]
    async fn test_setup_resume_path_preserves_base_sha() {
        let repo = init_repo_with_commit().await;
        let worktree_path = repo.path().join("wt").join("feature");
        let mut adapter = WorktreeAdapter::new(repo.path().to_path_buf(), worktree_path.clone(), "feature".to_string());
        adapter.setup(&[]).await.unwrap();
        let sha = adapter.base_commit_sha().unwrap().to_string();
        adapter.remove().await.unwrap();
        adapter.prune().await.unwrap();

        let record = WorktreeRecord {
            repo_path: repo.path().to_path_buf(),
            worktree_path: worktree_path.clone(),
            branch_name: "feature".to_string(),
            base_commit_sha: Some(sha.clone()),
        };
        let mut resumed = WorktreeAdapter::from_record(record);
        resumed.setup(&[]).await.unwrap();

        assert_eq!(resumed.base_commit_sha(), Some(sha.as_str()));
    }

    #[tokio::test]
    async fn test_remove_keeps_branch() {
        let repo = init_repo_with_commit().await;
        let worktree_path = repo.path().join("wt").join("feature");
        let mut adapter = WorktreeAdapter::new(repo.path().to_path_buf(), worktree_path.clone(), "feature".to_string());
        adapter.setup(&[]).await.unwrap();

        adapter.remove().await.unwrap();
        assert!(!worktree_path.exists());

        let backend = GitBackend::open(repo.path()).unwrap();
        assert!(backend.branch_exists("feature").unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_removes_branch_too() {
        let repo = init_repo_with_commit().await;
        let worktree_path = repo.path().join("wt").join("feature");
        let mut adapter = WorktreeAdapter::new(repo.path().to_path_buf(), worktree_path.clone(), "feature".to_string());
        adapter.setup(&[]).await.unwrap();

        adapter.cleanup().await.unwrap();

        let backend = GitBackend::open(repo.path()).unwrap();
        assert!(!backend.branch_exists("feature").unwrap());
    }

    #[tokio::test]
    async fn test_commit_changes_noop_when_clean() {
        let repo = init_repo_with_commit().await;
        let worktree_path = repo.path().join("wt").join("feature");
        let mut adapter = WorktreeAdapter::new(repo.path().to_path_buf(), worktree_path.clone(), "feature".to_string());
        adapter.setup(&[]).await.unwrap();

        adapter.commit_changes("no changes here").await.unwrap();
        assert!(!adapter.is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_changes_commits_dirty_tree() {
        let repo = init_repo_with_commit().await;
        let worktree_path = repo.path().join("wt").join("feature");
        let mut adapter = WorktreeAdapter::new(repo.path().to_path_buf(), worktree_path.clone(), "feature".to_string());
        adapter.setup(&[]).await.unwrap();

        tokio::fs::write(worktree_path.join("new.txt"), "content\n").await.unwrap();
        assert!(adapter.is_dirty().await.unwrap());

        adapter.commit_changes("snapshot").await.unwrap();
        assert!(!adapter.is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn test_diff_fails_without_base_commit_sha() {
        let repo = init_repo_with_commit().await;
        let worktree_path = repo.path().join("wt").join("feature");
        let record = WorktreeRecord {
            repo_path: repo.path().to_path_buf(),
            worktree_path,
            branch_name: "feature".to_string(),
            base_commit_sha: None,
        };
        let adapter = WorktreeAdapter::from_record(record);

        let err = adapter.diff().await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Worktree(WorktreeError::BaseCommitNotSet)));
    }
}
