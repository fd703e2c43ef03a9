//! Git operations for the worktree adapter
//!
//! - `GitBackend` — gitoxide-backed read operations
//! - `WorktreeAdapter` — worktree lifecycle mutations (hybrid gix + `git` CLI)
//! - `diff` — diffing against a fixed base commit
//! - `pr` — GitHub PR / `gh` CLI detection

mod backend;
mod diff;
mod pr;
mod worktree;

pub use backend::*;
pub use diff::*;
pub use pr::*;
pub use worktree::*;
