//! Git backend using pure gitoxide for reads
//!
//! Provides read-only git operations without shelling out, reserving the
//! `git` CLI for mutating operations (see [`super::worktree`]).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use gix::Repository;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{Result, WorktreeError};

/// Git backend using gitoxide
pub struct GitBackend {
    /// The gitoxide repository handle
    repo: Repository,
    /// Path to the repository
    path: PathBuf,
}

impl GitBackend {
    /// Open an existing repository
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let repo = gix::open(&path).map_err(|e| {
            if e.to_string().contains("not a git repository") {
                WorktreeError::NotARepository(path.clone())
            } else {
                WorktreeError::Gix(e.to_string())
            }
        })?;

        debug!("opened repository at {:?}", path);

        Ok(Self { repo, path })
    }

    /// Discover repository from a path (searches parent directories)
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let repo = gix::discover(path).map_err(|_e| WorktreeError::NotARepository(path.to_path_buf()))?;

        let repo_path = repo
            .path()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());

        debug!("discovered repository at {:?}", repo_path);

        Ok(Self { repo, path: repo_path })
    }

    /// Get the repository path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the current branch name
    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head().map_err(|e| WorktreeError::Gix(e.to_string()))?;

        match head.kind {
            gix::head::Kind::Symbolic(reference) => Ok(reference.name.shorten().to_string()),
            gix::head::Kind::Detached { .. } => match head.id() {
                Some(id) => {
                    let id_str = id.to_string();
                    let short = if id_str.len() > 8 { &id_str[..8] } else { &id_str };
                    Ok(format!("HEAD detached at {}", short))
                }
                None => Ok("HEAD (no commits)".to_string()),
            },
            gix::head::Kind::Unborn(full_name) => Ok(full_name.shorten().to_string()),
        }
    }

    /// Check if a branch exists
    pub fn branch_exists(&self, branch_name: &str) -> Result<bool> {
        let refs = self.repo.references().map_err(|e| WorktreeError::Gix(e.to_string()))?;
        let branch_ref = format!("refs/heads/{}", branch_name);

        for reference in refs.all().map_err(|e| WorktreeError::Gix(e.to_string()))? {
            if let Ok(r) = reference {
                if r.name().as_bstr() == branch_ref.as_bytes() {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Get the HEAD commit ID
    pub fn head_commit_id(&self) -> Result<String> {
        let head = self.repo.head().map_err(|e| WorktreeError::Gix(e.to_string()))?;
        match head.id() {
            Some(id) => Ok(id.to_string()),
            None => Err(WorktreeError::OperationFailed("HEAD has no commits".to_string()).into()),
        }
    }

    /// Check whether the working tree at `path` has uncommitted changes (staged or not).
    ///
    /// Shells out to `git status --porcelain`: gix's status walk covers most of this, but
    /// porcelain output already accounts for gitignore and submodules without extra wiring.
    pub async fn is_dirty(path: &Path) -> Result<bool> {
        let output = Command::new("git")
            .current_dir(path)
            .args(["status", "--porcelain"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WorktreeError::OperationFailed(format!("failed to run git status: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::OperationFailed(format!("git status failed: {}", stderr)).into());
        }

        Ok(!output.stdout.is_empty())
    }

    /// Check if `branch_name` is checked out in a worktree other than `exclude_path`.
    pub async fn is_branch_checked_out_elsewhere(path: &Path, branch_name: &str, exclude_path: &Path) -> Result<bool> {
        let output = Command::new("git")
            .current_dir(path)
            .args(["worktree", "list", "--porcelain"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WorktreeError::OperationFailed(format!("failed to list worktrees: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::OperationFailed(format!("git worktree list failed: {}", stderr)).into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let branch_ref = format!("branch refs/heads/{}", branch_name);
        let mut current_path: Option<PathBuf> = None;

        for line in stdout.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(p));
            } else if line == branch_ref {
                if let Some(p) = &current_path {
                    if p != exclude_path {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Get the main branch name (main or master)
    pub fn detect_main_branch(&self) -> Result<String> {
        if self.branch_exists("main")? {
            Ok("main".to_string())
        } else if self.branch_exists("master")? {
            Ok("master".to_string())
        } else {
            self.current_branch()
        }
    }

    /// Get the repository name (directory name)
    pub fn repo_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Get the gitoxide repository handle
    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::process::Command as TokioCommand;

    fn init_test_repo() -> (TempDir, GitBackend) {
        let temp_dir = TempDir::new().unwrap();
        let repo = gix::init(temp_dir.path()).unwrap();
        let backend = GitBackend {
            repo,
            path: temp_dir.path().to_path_buf(),
        };
        (temp_dir, backend)
    }

    async fn init_committed_repo() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path();
        for args in [
            vec!["init"],
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

    #[test]
    fn test_repo_name() {
        let (_temp, backend) = init_test_repo();
        assert!(!backend.repo_name().is_empty());
    }

    #[test]
    fn test_detect_main_branch_unborn() {
        let (_temp, backend) = init_test_repo();
        let branch = backend.detect_main_branch();
        assert!(branch.is_ok());
    }

    #[tokio::test]
    async fn test_is_dirty_clean_repo() {
        let temp_dir = init_committed_repo().await;
        assert!(!GitBackend::is_dirty(temp_dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_dirty_with_modification() {
        let temp_dir = init_committed_repo().await;
        tokio::fs::write(temp_dir.path().join("README.md"), "changed\n").await.unwrap();
        assert!(GitBackend::is_dirty(temp_dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_dirty_with_untracked_file() {
        let temp_dir = init_committed_repo().await;
        tokio::fs::write(temp_dir.path().join("new.txt"), "new\n").await.unwrap();
        assert!(GitBackend::is_dirty(temp_dir.path()).await.unwrap());
    }
}
