//! Async tmux integration module
//!
//! Provides non-blocking tmux operations:
//! - `TmuxExecutor` - Semaphore-controlled async command execution
//! - `Multiplexer` / `TmuxMultiplexer` - the Multiplexer Adapter contract and its
//!   `tmux`-backed implementation
//! - `prompt::has_prompt` - awaiting-input heuristic used by `HasUpdated`
//! - `attach_to_session` - Async PTY-based session attachment

mod attach;
mod executor;
mod multiplexer;
mod prompt;

pub use attach::*;
pub use executor::*;
pub use multiplexer::*;
pub use prompt::*;

#[cfg(test)]
pub use multiplexer::fake;
