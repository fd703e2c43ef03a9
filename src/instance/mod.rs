//! Instance — the per-session aggregate and lifecycle state machine (component D)
//!
//! An Instance owns exactly one Worktree Adapter and, while started, exactly one
//! Multiplexer Adapter. It implements the Ready/Running/Paused transitions in
//! §4.D, with rollback on partial failure.

mod slug;

pub use slug::slugify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::error::{Error, InstanceError, Result, WorktreeError};
use crate::git::{DiffCache, DiffInfo, WorktreeAdapter, WorktreeRecord};
use crate::tmux::{Multiplexer, MultiplexerFactory};

/// The deliberate pause between `SendKeys` and `TapEnter` in [`Instance::send_prompt`]:
/// some terminal encodings fold a submit sent too quickly after printable text into a
/// literal newline rather than a submit.
const SEND_PROMPT_SETTLE: Duration = Duration::from_millis(100);

/// Instance lifecycle status. A small closed set, not an integer with implicit ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ready,
    Running,
    Paused,
    Loading,
}

/// Diff snapshot against the Worktree's immutable base commit, persisted alongside
/// the Instance so the UI has something to show before the next refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub content: String,
    pub files_changed: usize,
    pub added: usize,
    pub removed: usize,
}

impl From<&DiffInfo> for DiffStats {
    fn from(info: &DiffInfo) -> Self {
        Self {
            content: info.content.clone(),
            files_changed: info.files_changed,
            added: info.added,
            removed: info.removed,
        }
    }
}

/// The per-session aggregate: owns one Worktree Adapter and, while started, one
/// Multiplexer Adapter.
#[derive(Serialize, Deserialize)]
pub struct Instance {
    pub title: String,
    pub path: PathBuf,
    pub branch: String,
    pub status: Status,
    pub program: String,
    pub auto_yes: bool,
    pub width: u16,
    pub height: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub diff_stats: Option<DiffStats>,
    pub worktree: WorktreeRecord,

    /// Runtime flag; not persisted — reconstructed at load.
    #[serde(skip)]
    started: bool,

    /// Live handle to the session, present only while started and not Paused. An `Arc`
    /// so a caller (the CLI's Attach path) can clone out a shareable handle and release
    /// the Storage lock before the long-running interactive attach, while still sharing
    /// the same in-flight-attach guard the Instance retains.
    #[serde(skip)]
    multiplexer: Option<Arc<dyn Multiplexer>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("title", &self.title)
            .field("branch", &self.branch)
            .field("status", &self.status)
            .field("started", &self.started)
            .finish()
    }
}

impl Instance {
    /// Construct a brand-new, not-yet-started Instance. `worktree_path` and `branch`
    /// are generated from `title` and the caller-supplied prefix/directory; this does
    /// not check for collisions against other Instances — that is Storage's job, since
    /// only Storage holds the full list.
    pub fn new(
        title: String,
        path: PathBuf,
        program: String,
        auto_yes: bool,
        branch_prefix: &str,
        worktrees_dir: &std::path::Path,
    ) -> Self {
        let slug = slugify(&title);
        let branch = format!("{branch_prefix}{slug}");
        let repo_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("unknown").to_string();
        let short_uuid = uuid::Uuid::new_v4().to_string().split('-').next().unwrap_or("").to_string();
        let worktree_path = worktrees_dir.join(repo_name).join(format!("{slug}-{short_uuid}"));
        let now = Utc::now();

        Self {
            worktree: WorktreeRecord {
                repo_path: path.clone(),
                worktree_path,
                branch_name: branch.clone(),
                base_commit_sha: None,
            },
            title,
            path,
            branch,
            status: Status::Ready,
            program,
            auto_yes,
            width: 0,
            height: 0,
            created_at: now,
            updated_at: now,
            diff_stats: None,
            started: false,
            multiplexer: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// `Ready -> Running` via `Start(firstTime=true)`: create the Worktree Adapter,
    /// run Setup, then start the Multiplexer. On Multiplexer failure, roll back the
    /// worktree.
    #[instrument(skip(self, factory, copy_on_create))]
    pub async fn start_first(&mut self, factory: &dyn MultiplexerFactory, copy_on_create: &[String]) -> Result<()> {
        let mut adapter = WorktreeAdapter::new(
            self.worktree.repo_path.clone(),
            self.worktree.worktree_path.clone(),
            self.branch.clone(),
        );

        adapter.setup(copy_on_create).await?;

        let mux = factory.create(&self.title);
        if let Err(primary) = mux.start(&self.worktree.worktree_path, &self.program).await {
            let cleanup = adapter.cleanup().await.err().map(|e| e.to_string());
            return Err(InstanceError::transition_failed(primary, cleanup).into());
        }

        self.worktree = adapter.to_record();
        self.multiplexer = Some(mux);
        self.started = true;
        self.status = Status::Running;
        self.touch();
        info!(title = %self.title, branch = %self.branch, "instance started");
        Ok(())
    }

    /// `Ready -> Running` via `Start(firstTime=false)`: re-attach to the persisted
    /// Worktree and Restore the Multiplexer session. No worktree mutation, so no
    /// rollback is needed on failure.
    #[instrument(skip(self, factory))]
    pub async fn start_restore(&mut self, factory: &dyn MultiplexerFactory) -> Result<()> {
        let mux = factory.create(&self.title);
        mux.restore().await?;

        self.multiplexer = Some(mux);
        self.started = true;
        self.status = Status::Running;
        self.touch();
        Ok(())
    }

    /// `Running -> Paused`.
    #[instrument(skip(self))]
    pub async fn pause(&mut self) -> Result<()> {
        if self.status != Status::Running {
            return Err(InstanceError::PreconditionViolated(format!(
                "instance '{}' is not Running",
                self.title
            ))
            .into());
        }

        let adapter = WorktreeAdapter::from_record(self.worktree.clone());

        if adapter.is_dirty().await? {
            let msg = format!(
                "[claudesquad] update from '{}' on {} (paused)",
                self.title,
                Utc::now().to_rfc2822()
            );
            adapter.commit_changes(&msg).await?;
        }

        let mux = self
            .multiplexer
            .as_ref()
            .ok_or_else(|| InstanceError::PreconditionViolated(format!("instance '{}' has no live session", self.title)))?;
        mux.close().await?;

        if adapter.worktree_path().exists() {
            adapter.remove().await?;
            adapter.prune().await?;
        }

        if let Err(e) = copy_to_clipboard(&self.branch) {
            warn!(title = %self.title, error = %e, "best-effort clipboard write failed");
        }

        self.multiplexer = None;
        self.status = Status::Paused;
        self.touch();
        info!(title = %self.title, "instance paused");
        Ok(())
    }

    /// `Paused -> Running`.
    #[instrument(skip(self, factory))]
    pub async fn resume(&mut self, factory: &dyn MultiplexerFactory) -> Result<()> {
        if self.status != Status::Paused {
            return Err(InstanceError::PreconditionViolated(format!("instance '{}' is not Paused", self.title)).into());
        }

        let mut adapter = WorktreeAdapter::from_record(self.worktree.clone());

        if adapter.is_branch_checked_out_elsewhere().await? {
            return Err(InstanceError::PreconditionViolated(
                "branch is checked out, please switch to a different branch".to_string(),
            )
            .into());
        }

        adapter.setup(&[]).await?;

        let mux = factory.create(&self.title);
        if let Err(primary) = mux.start(&self.worktree.worktree_path, &self.program).await {
            let cleanup = adapter.cleanup().await.err().map(|e| e.to_string());
            return Err(InstanceError::transition_failed(primary, cleanup).into());
        }

        self.worktree = adapter.to_record();
        self.multiplexer = Some(mux);
        self.status = Status::Running;
        self.touch();
        info!(title = %self.title, "instance resumed");
        Ok(())
    }

    /// Destroy this Instance's resources. Best-effort: both steps run regardless of
    /// whether the first failed, and errors are combined rather than swallowed.
    /// A never-started Instance is a no-op success.
    #[instrument(skip(self))]
    pub async fn kill(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        let mut errors = Vec::new();

        if let Some(mux) = self.multiplexer.take() {
            if let Err(e) = mux.close().await {
                errors.push(format!("close session: {e}"));
            }
        }

        let adapter = WorktreeAdapter::from_record(self.worktree.clone());
        if let Err(e) = adapter.cleanup().await {
            errors.push(format!("cleanup worktree: {e}"));
        }

        self.started = false;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(InstanceError::transition_failed(errors.join("; "), None).into())
        }
    }

    /// Hand the controlling terminal to the session until the user detaches. Rejects a
    /// second concurrent attach to the same session (spec.md §4.A).
    pub async fn attach(&self) -> Result<crate::tmux::AttachResult> {
        self.running_multiplexer()?.attach().await
    }

    /// Returns empty string (not an error) when not started or Paused.
    pub async fn preview(&self) -> Result<String> {
        match (&self.multiplexer, self.status) {
            (Some(mux), Status::Running) => mux.capture_pane_content().await,
            _ => Ok(String::new()),
        }
    }

    /// Delegates to the Multiplexer; returns `(false, false)` when not started.
    pub async fn has_updated(&self) -> Result<(bool, bool)> {
        match (&self.multiplexer, self.status) {
            (Some(mux), Status::Running) => mux.has_updated().await,
            _ => Ok((false, false)),
        }
    }

    /// If `autoYes` is on and started, issue the submit keystroke. Used by the daemon.
    pub async fn tap_enter_if_auto_yes(&self) -> Result<()> {
        if !self.auto_yes || self.status != Status::Running {
            return Ok(());
        }
        match &self.multiplexer {
            Some(mux) => mux.tap_enter().await,
            None => Ok(()),
        }
    }

    /// `SendKeys(text)`, sleep, then `TapEnter()`.
    pub async fn send_prompt(&self, text: &str) -> Result<()> {
        let mux = self.running_multiplexer()?;
        mux.send_keys(text).await?;
        sleep(SEND_PROMPT_SETTLE).await;
        mux.tap_enter().await
    }

    /// Forward to the Multiplexer; fails when not started or Paused.
    pub async fn set_preview_size(&mut self, width: u16, height: u16) -> Result<()> {
        self.running_multiplexer()?.set_detached_size(width, height).await?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Refresh `diff_stats` against `cache`, keyed by this instance's title, so repeated
    /// calls within the cache's TTL reuse the last computed diff instead of re-shelling
    /// out to `git`. If the base commit SHA isn't set yet, clear cached stats and return
    /// success rather than an error. When Paused, the previous snapshot is retained
    /// unchanged.
    pub async fn update_diff_stats(&mut self, cache: &DiffCache<String>) -> Result<()> {
        if self.status == Status::Paused {
            return Ok(());
        }

        let adapter = WorktreeAdapter::from_record(self.worktree.clone());
        let Some(base_sha) = adapter.base_commit_sha() else {
            self.diff_stats = None;
            return Ok(());
        };

        match cache.get_diff(&self.title, adapter.worktree_path(), base_sha).await {
            Ok(info) => {
                self.diff_stats = Some(DiffStats::from(info.as_ref()));
                Ok(())
            }
            Err(Error::Worktree(WorktreeError::BaseCommitNotSet)) => {
                self.diff_stats = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// A title can be changed only while `started` is false.
    pub fn set_title(&mut self, title: String) -> Result<()> {
        if self.started {
            return Err(InstanceError::AlreadyStarted.into());
        }
        self.title = title;
        self.touch();
        Ok(())
    }

    fn running_multiplexer(&self) -> Result<&dyn Multiplexer> {
        if self.status != Status::Running {
            return Err(InstanceError::PreconditionViolated(format!("instance '{}' is not Running", self.title)).into());
        }
        self.multiplexer
            .as_deref()
            .ok_or_else(|| InstanceError::PreconditionViolated(format!("instance '{}' has no live session", self.title)).into())
    }

    /// Mark this Instance `started` with no live Multiplexer, used when loading a
    /// Paused record from Storage (spec.md §4.E load semantics).
    pub(crate) fn mark_started_detached(&mut self) {
        self.started = true;
    }

    /// Attach a just-created/just-restored Multiplexer handle, used by Storage's load path.
    pub(crate) fn attach_multiplexer(&mut self, mux: Arc<dyn Multiplexer>) {
        self.multiplexer = Some(mux);
    }

    /// Clone out a shareable handle to the live Multiplexer, if Running. Lets a caller
    /// (the CLI's Attach path) release the Storage lock before handing the controlling
    /// terminal over for the duration of an interactive session.
    pub fn multiplexer_handle(&self) -> Option<Arc<dyn Multiplexer>> {
        match self.status {
            Status::Running => self.multiplexer.clone(),
            _ => None,
        }
    }
}

fn copy_to_clipboard(text: &str) -> std::result::Result<(), arboard::Error> {
    let mut clipboard = arboard::Clipboard::new()?;
    clipboard.set_text(text.to_string())
}
