//! Diff computation against a fixed base commit
//!
//! Diffs are always taken against an Instance's baseCommitSHA (the repository HEAD
//! sampled when the worktree was created), not literal `HEAD`, so the reported change
//! set stays stable across commits made inside the worktree.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{Result, WorktreeError};

/// Default diff cache TTL (500ms)
pub const DEFAULT_DIFF_CACHE_TTL: Duration = Duration::from_millis(500);

/// Computed diff information: {added, removed, content} plus bookkeeping.
#[derive(Debug, Clone)]
pub struct DiffInfo {
    /// The raw diff output
    pub content: String,
    /// Number of files changed
    pub files_changed: usize,
    /// Lines added
    pub added: usize,
    /// Lines removed
    pub removed: usize,
    /// When the diff was computed
    pub computed_at: Instant,
    /// Base commit the diff was taken against
    pub base_commit: String,
}

impl DiffInfo {
    /// Create an empty diff info
    pub fn empty() -> Self {
        Self {
            content: String::new(),
            files_changed: 0,
            added: 0,
            removed: 0,
            computed_at: Instant::now(),
            base_commit: String::new(),
        }
    }

    /// Check if this diff is stale
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.computed_at.elapsed() > ttl
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.files_changed > 0 || self.added > 0 || self.removed > 0
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        if !self.has_changes() {
            "No changes".to_string()
        } else {
            format!("{} file(s), +{} -{} lines", self.files_changed, self.added, self.removed)
        }
    }
}

/// Cached diff computation, generic over key type (an Instance title).
pub struct DiffCache<K> {
    cache: Arc<RwLock<HashMap<K, Arc<DiffInfo>>>>,
    ttl: Duration,
}

impl<K: Eq + std::hash::Hash + Clone + std::fmt::Debug + Send + Sync + 'static> DiffCache<K> {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_DIFF_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Get a cached diff, or compute a fresh one against `base_commit_sha`.
    #[instrument(skip(self, worktree_path))]
    pub async fn get_diff(&self, key: &K, worktree_path: &Path, base_commit_sha: &str) -> Result<Arc<DiffInfo>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(key) {
                if !cached.is_stale(self.ttl) && cached.base_commit == base_commit_sha {
                    debug!("diff cache hit for {:?}", key);
                    return Ok(Arc::clone(cached));
                }
            }
        }

        debug!("diff cache miss for {:?}, computing", key);
        let info = Arc::new(compute_diff_for_base(worktree_path, base_commit_sha).await?);
        let mut cache = self.cache.write().await;
        cache.insert(key.clone(), Arc::clone(&info));
        Ok(info)
    }

    pub async fn invalidate(&self, key: &K) {
        let mut cache = self.cache.write().await;
        cache.remove(key);
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }
}

impl<K: Eq + std::hash::Hash + Clone + std::fmt::Debug + Send + Sync + 'static> Default for DiffCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for DiffCache<K> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            ttl: self.ttl,
        }
    }
}

/// Diff the worktree at `path` against `base_commit_sha` (not literal `HEAD`).
pub async fn compute_diff_for_base(path: &Path, base_commit_sha: &str) -> Result<DiffInfo> {
    let diff_output = Command::new("git")
        .current_dir(path)
        .args(["diff", base_commit_sha])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| WorktreeError::OperationFailed(format!("failed to diff: {}", e)))?;

    let mut diff = if diff_output.status.success() {
        String::from_utf8_lossy(&diff_output.stdout).to_string()
    } else {
        String::new()
    };

    let untracked_output = Command::new("git")
        .current_dir(path)
        .args(["ls-files", "--others", "--exclude-standard"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| WorktreeError::OperationFailed(format!("failed to list untracked files: {}", e)))?;

    if untracked_output.status.success() {
        let untracked = String::from_utf8_lossy(&untracked_output.stdout);
        for file in untracked.lines().filter(|l| !l.is_empty()) {
            let file_diff = Command::new("git")
                .current_dir(path)
                .args(["diff", "--no-index", "--src-prefix=a/", "--dst-prefix=b/", "--", "/dev/null", file])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await;

            if let Ok(output) = file_diff {
                let file_diff_str = String::from_utf8_lossy(&output.stdout);
                if !file_diff_str.is_empty() {
                    if !diff.is_empty() && !diff.ends_with("\n\n") {
                        if diff.ends_with('\n') {
                            diff.push('\n');
                        } else {
                            diff.push_str("\n\n");
                        }
                    }
                    diff.push_str(&file_diff_str);
                }
            }
        }
    }

    let stat_output = Command::new("git")
        .current_dir(path)
        .args(["diff", "--stat", base_commit_sha])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| WorktreeError::OperationFailed(format!("failed to diff --stat: {}", e)))?;

    let (mut files_changed, added, removed) = if stat_output.status.success() {
        parse_diff_stat(&String::from_utf8_lossy(&stat_output.stdout))
    } else {
        (0, 0, 0)
    };

    if untracked_output.status.success() {
        let untracked_count = String::from_utf8_lossy(&untracked_output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .count();
        files_changed += untracked_count;
    }

    Ok(DiffInfo {
        content: diff,
        files_changed,
        added,
        removed,
        computed_at: Instant::now(),
        base_commit: base_commit_sha.to_string(),
    })
}

/// Parse `git diff --stat` output to extract statistics
fn parse_diff_stat(output: &str) -> (usize, usize, usize) {
    let mut files_changed = 0;
    let mut lines_added = 0;
    let mut lines_removed = 0;

    for line in output.lines() {
        if line.contains("changed") {
            for part in line.split(',') {
                let part = part.trim();
                if part.contains("file") {
                    if let Some(num) = part.split_whitespace().next() {
                        files_changed = num.parse().unwrap_or(0);
                    }
                } else if part.contains("insertion") {
                    if let Some(num) = part.split_whitespace().next() {
                        lines_added = num.parse().unwrap_or(0);
                    }
                } else if part.contains("deletion") {
                    if let Some(num) = part.split_whitespace().next() {
                        lines_removed = num.parse().unwrap_or(0);
                    }
                }
            }
            break;
        }
    }

    (files_changed, lines_added, lines_removed)
}
