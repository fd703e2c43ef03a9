//! Error types for claude-squad
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for claude-squad
#[derive(Error, Debug)]
pub enum Error {
    #[error("Instance error: {0}")]
    Instance(#[from] InstanceError),

    #[error("Multiplexer error: {0}")]
    Multiplexer(#[from] MultiplexerError),

    #[error("Worktree error: {0}")]
    Worktree(#[from] WorktreeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File seeding error: {0}")]
    Seed(#[from] SeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Instance lifecycle errors
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("instance '{0}' is not in the right state for this operation")]
    PreconditionViolated(String),

    #[error("an instance titled '{0}' already exists")]
    TitleCollision(String),

    #[error("branch '{0}' is already owned by another instance")]
    BranchCollision(String),

    #[error("instance '{0}' not found")]
    NotFound(String),

    #[error("title can only be changed before the instance has started")]
    AlreadyStarted,

    #[error("{primary}{}", cleanup.as_ref().map(|c| format!(" (cleanup also failed: {c})")).unwrap_or_default())]
    TransitionFailed {
        primary: String,
        cleanup: Option<String>,
    },
}

impl InstanceError {
    /// Combine a primary transition failure with an optional rollback failure, so a failed
    /// cleanup is reported alongside the original cause rather than swallowed.
    pub fn transition_failed(primary: impl std::fmt::Display, cleanup: Option<String>) -> Self {
        Self::TransitionFailed {
            primary: primary.to_string(),
            cleanup,
        }
    }
}

/// Multiplexer (tmux) adapter errors
#[derive(Error, Debug)]
pub enum MultiplexerError {
    #[error("tmux is not installed or not in PATH")]
    NotInstalled,

    #[error("tmux command failed: {command} - {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("tmux command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("session '{0}' not found in tmux")]
    SessionNotFound(String),

    #[error("failed to capture pane content: {0}")]
    CaptureFailed(String),

    #[error("semaphore acquire failed")]
    SemaphoreError,

    #[error("PTY error: {0}")]
    PtyError(String),

    #[error("session '{0}' already exists")]
    AlreadyExists(String),

    #[error("timed out waiting for session '{0}' to appear")]
    StartTimeout(String),

    #[error("session '{0}' is already attached from another client")]
    AlreadyAttached(String),
}

impl From<pty_process::Error> for MultiplexerError {
    fn from(e: pty_process::Error) -> Self {
        MultiplexerError::PtyError(e.to_string())
    }
}

impl From<pty_process::Error> for Error {
    fn from(e: pty_process::Error) -> Self {
        Error::Multiplexer(MultiplexerError::PtyError(e.to_string()))
    }
}

/// Worktree adapter (git) errors
#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("git operation failed: {0}")]
    OperationFailed(String),

    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("branch '{0}' is checked out in another worktree")]
    BranchCheckedOutElsewhere(String),

    #[error("gitoxide error: {0}")]
    Gix(String),

    #[error("base commit has not been recorded yet")]
    BaseCommitNotSet,

    #[error("gh CLI is not installed or not authenticated")]
    GhUnavailable,
}

impl From<gix::open::Error> for WorktreeError {
    fn from(e: gix::open::Error) -> Self {
        WorktreeError::Gix(e.to_string())
    }
}

impl From<gix::discover::Error> for WorktreeError {
    fn from(e: gix::discover::Error) -> Self {
        WorktreeError::Gix(e.to_string())
    }
}

/// Storage (persistence) errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to load instance list: {0}")]
    LoadFailed(String),

    #[error("failed to save instance list: {0}")]
    SaveFailed(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("failed to create directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// File seeding (copy-on-create) errors
#[derive(Error, Debug)]
pub enum SeedError {
    #[error("failed to copy '{path}' into worktree: {source}")]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;
