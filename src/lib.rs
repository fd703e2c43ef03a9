//! Claude Squad - a terminal supervisor for running many interactive coding
//! agents in parallel, each in its own tmux session and git worktree.
//!
//! # Architecture
//!
//! The engine is the Session Lifecycle Engine: a state machine binding
//! together a multiplexer session, a git worktree/branch, and persisted
//! metadata, guaranteeing the three are created, paused, resumed, and
//! destroyed atomically under partial failure.
//!
//! # Modules
//!
//! - [`instance`] - the per-session aggregate and lifecycle state machine
//! - [`tmux`] - the Multiplexer Adapter, its `tmux`-backed implementation, and PTY attach
//! - [`git`] - the Worktree Adapter, pure-Rust git reads via gitoxide hybridized with CLI mutations
//! - [`seed`] - file seeding (copy-on-create) invoked once per new worktree
//! - [`storage`] - durable Instance list, loaded at startup and rewritten on every change
//! - [`autoyes`] - background ticker submitting "enter" to running, auto-yes Instances
//! - [`config`] - layered user configuration
//! - [`error`] - error types

pub mod autoyes;
pub mod config;
pub mod error;
pub mod git;
pub mod instance;
pub mod seed;
pub mod storage;
pub mod tmux;

pub use config::Config;
pub use error::{Error, Result};
pub use instance::{Instance, Status};
pub use storage::Storage;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
