//! The Multiplexer Adapter (component 4.A)
//!
//! `Multiplexer` is the object-safe trait every Instance drives; `TmuxMultiplexer`
//! is the production implementation shelling out to `tmux`. A `FakeMultiplexer`
//! (test-only) backs the lifecycle tests in spec.md §8 without spawning a real
//! `tmux` process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, instrument};
use xxhash_rust::xxh3::xxh3_64;

use super::attach::{attach_to_session, AttachResult};
use super::executor::TmuxExecutor;
use super::prompt::has_prompt;
use crate::error::{MultiplexerError, Result};

/// Bounded polling budget for `Start()` waiting for the session to become observable.
const START_POLL_ATTEMPTS: u32 = 20;
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The Multiplexer Adapter contract (spec.md §4.A), implemented for a single named session.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Create a detached session whose first window runs `program` in `working_dir`.
    /// Waits, with bounded retries, until the session is observable.
    async fn start(&self, working_dir: &Path, program: &str) -> Result<()>;

    /// Verify that an externally-named session with this name exists.
    async fn restore(&self) -> Result<()>;

    /// Hand the user's controlling terminal to the session until they detach.
    async fn attach(&self) -> Result<AttachResult>;

    /// Kill the session; succeeds even if absent (idempotent destroy).
    async fn close(&self) -> Result<()>;

    /// Cheap liveness query.
    async fn does_session_exist(&self) -> Result<bool>;

    /// Inform the session of a virtual client size.
    async fn set_detached_size(&self, width: u16, height: u16) -> Result<()>;

    /// Return the current screen as text.
    async fn capture_pane_content(&self) -> Result<String>;

    /// (changedSinceLastCall, hasPrompt) — compares a hash of the visible pane to the
    /// one cached at the previous call, and checks the bottom line against known
    /// awaiting-input patterns.
    async fn has_updated(&self) -> Result<(bool, bool)>;

    /// Stream literal characters to the session without submitting.
    async fn send_keys(&self, text: &str) -> Result<()>;

    /// Send the submit key.
    async fn tap_enter(&self) -> Result<()>;
}

/// `tmux`-backed `Multiplexer`.
pub struct TmuxMultiplexer {
    session_name: String,
    executor: TmuxExecutor,
    last_hash: Mutex<Option<u64>>,
    /// Held for the duration of an in-flight `attach()`; a second concurrent `attach()`
    /// on the same session is rejected rather than racing for the controlling terminal.
    attach_lock: Mutex<()>,
}

impl TmuxMultiplexer {
    pub fn new(session_name: String, executor: TmuxExecutor) -> Self {
        Self {
            session_name,
            executor,
            last_hash: Mutex::new(None),
            attach_lock: Mutex::new(()),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    #[instrument(skip(self))]
    async fn start(&self, working_dir: &Path, program: &str) -> Result<()> {
        if self.executor.session_exists(&self.session_name).await? {
            return Err(MultiplexerError::AlreadyExists(self.session_name.clone()).into());
        }

        self.executor.create_session(&self.session_name, working_dir, Some(program)).await?;

        for _ in 0..START_POLL_ATTEMPTS {
            if self.executor.session_exists(&self.session_name).await? {
                return Ok(());
            }
            sleep(START_POLL_INTERVAL).await;
        }

        Err(MultiplexerError::StartTimeout(self.session_name.clone()).into())
    }

    async fn restore(&self) -> Result<()> {
        if self.executor.session_exists(&self.session_name).await? {
            Ok(())
        } else {
            Err(MultiplexerError::SessionNotFound(self.session_name.clone()).into())
        }
    }

    async fn attach(&self) -> Result<AttachResult> {
        let _guard = self
            .attach_lock
            .try_lock()
            .map_err(|_| MultiplexerError::AlreadyAttached(self.session_name.clone()))?;
        attach_to_session(&self.session_name).await
    }

    async fn close(&self) -> Result<()> {
        match self.executor.kill_session(&self.session_name).await {
            Ok(()) => Ok(()),
            Err(crate::error::Error::Multiplexer(MultiplexerError::CommandFailed { .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn does_session_exist(&self) -> Result<bool> {
        self.executor.session_exists(&self.session_name).await
    }

    async fn set_detached_size(&self, width: u16, height: u16) -> Result<()> {
        self.executor.resize_window(&self.session_name, width, height).await
    }

    async fn capture_pane_content(&self) -> Result<String> {
        self.executor.capture_pane(&self.session_name, Some(-1000), None).await
    }

    async fn has_updated(&self) -> Result<(bool, bool)> {
        let content = self.capture_pane_content().await?;
        let hash = xxh3_64(content.as_bytes());

        let mut guard = self.last_hash.lock().await;
        let changed = *guard != Some(hash);
        *guard = Some(hash);
        drop(guard);

        let prompt = has_prompt(&content);
        debug!(changed, prompt, session = %self.session_name, "has_updated");
        Ok((changed, prompt))
    }

    async fn send_keys(&self, text: &str) -> Result<()> {
        self.executor.send_keys_literal(&self.session_name, text).await
    }

    async fn tap_enter(&self) -> Result<()> {
        self.executor.send_keys(&self.session_name, "Enter").await
    }
}

/// Constructs a [`Multiplexer`] for a given session name. Lets `Instance` remain generic
/// over the production `tmux` backend and, in tests, an in-memory fake. Returns an `Arc`
/// rather than a `Box` so callers can clone out a handle (e.g. to attach without holding
/// Storage's lock for the interactive duration) while still sharing the same
/// in-flight-attach guard as the copy the `Instance` retains.
pub trait MultiplexerFactory: Send + Sync {
    fn create(&self, session_name: &str) -> Arc<dyn Multiplexer>;
}

/// Production factory backed by a shared [`TmuxExecutor`].
pub struct TmuxMultiplexerFactory {
    executor: TmuxExecutor,
}

impl TmuxMultiplexerFactory {
    pub fn new(executor: TmuxExecutor) -> Self {
        Self { executor }
    }
}

impl MultiplexerFactory for TmuxMultiplexerFactory {
    fn create(&self, session_name: &str) -> Arc<dyn Multiplexer> {
        Arc::new(TmuxMultiplexer::new(session_name.to_string(), self.executor.clone()))
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    /// Per-session state tracked by a [`FakeMultiplexer`].
    #[derive(Default, Clone)]
    struct FakeSession {
        exists: bool,
        width: u16,
        height: u16,
        fail_start: bool,
        prompt_script: VecDeque<bool>,
        tap_enter_count: usize,
    }

    /// Shared in-memory registry backing all `FakeMultiplexer`s created for a test.
    #[derive(Default)]
    pub struct FakeRegistry {
        sessions: Mutex<HashMap<String, FakeSession>>,
    }

    impl FakeRegistry {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Make the next `start()` for `session_name` fail (simulating S5).
        pub async fn set_fail_start(&self, session_name: &str, fail: bool) {
            let mut sessions = self.sessions.lock().await;
            sessions.entry(session_name.to_string()).or_default().fail_start = fail;
        }

        /// Script the `hasPrompt` sequence `has_updated()` returns on successive calls;
        /// once exhausted, `hasPrompt` is `false`.
        pub async fn script_prompts(&self, session_name: &str, script: Vec<bool>) {
            let mut sessions = self.sessions.lock().await;
            sessions.entry(session_name.to_string()).or_default().prompt_script = script.into();
        }

        pub async fn session_exists(&self, session_name: &str) -> bool {
            self.sessions.lock().await.get(session_name).map(|s| s.exists).unwrap_or(false)
        }

        pub async fn tap_enter_count(&self, session_name: &str) -> usize {
            self.sessions.lock().await.get(session_name).map(|s| s.tap_enter_count).unwrap_or(0)
        }

        pub async fn detached_size(&self, session_name: &str) -> (u16, u16) {
            self.sessions
                .lock()
                .await
                .get(session_name)
                .map(|s| (s.width, s.height))
                .unwrap_or((0, 0))
        }
    }

    pub struct FakeMultiplexer {
        session_name: String,
        registry: Arc<FakeRegistry>,
        attach_lock: Mutex<()>,
    }

    impl FakeMultiplexer {
        pub fn new(session_name: String, registry: Arc<FakeRegistry>) -> Self {
            Self {
                session_name,
                registry,
                attach_lock: Mutex::new(()),
            }
        }
    }

    #[async_trait]
    impl Multiplexer for FakeMultiplexer {
        async fn start(&self, _working_dir: &Path, _program: &str) -> Result<()> {
            let mut sessions = self.registry.sessions.lock().await;
            let session = sessions.entry(self.session_name.clone()).or_default();
            if session.exists {
                return Err(MultiplexerError::AlreadyExists(self.session_name.clone()).into());
            }
            if session.fail_start {
                return Err(MultiplexerError::StartTimeout(self.session_name.clone()).into());
            }
            session.exists = true;
            Ok(())
        }

        async fn restore(&self) -> Result<()> {
            let sessions = self.registry.sessions.lock().await;
            if sessions.get(&self.session_name).map(|s| s.exists).unwrap_or(false) {
                Ok(())
            } else {
                Err(MultiplexerError::SessionNotFound(self.session_name.clone()).into())
            }
        }

        async fn attach(&self) -> Result<AttachResult> {
            let _guard = self
                .attach_lock
                .try_lock()
                .map_err(|_| MultiplexerError::AlreadyAttached(self.session_name.clone()))?;
            // Simulate occupying the controlling terminal for a moment, so a concurrent
            // attach attempt in a test has a window in which to observe the lock held.
            sleep(Duration::from_millis(20)).await;
            Ok(AttachResult::Detached)
        }

        async fn close(&self) -> Result<()> {
            let mut sessions = self.registry.sessions.lock().await;
            if let Some(session) = sessions.get_mut(&self.session_name) {
                session.exists = false;
            }
            Ok(())
        }

        async fn does_session_exist(&self) -> Result<bool> {
            Ok(self.registry.session_exists(&self.session_name).await)
        }

        async fn set_detached_size(&self, width: u16, height: u16) -> Result<()> {
            let mut sessions = self.registry.sessions.lock().await;
            let session = sessions.entry(self.session_name.clone()).or_default();
            session.width = width;
            session.height = height;
            Ok(())
        }

        async fn capture_pane_content(&self) -> Result<String> {
            Ok(String::new())
        }

        async fn has_updated(&self) -> Result<(bool, bool)> {
            let mut sessions = self.registry.sessions.lock().await;
            let session = sessions.entry(self.session_name.clone()).or_default();
            let prompt = session.prompt_script.pop_front().unwrap_or(false);
            Ok((true, prompt))
        }

        async fn send_keys(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn tap_enter(&self) -> Result<()> {
            let mut sessions = self.registry.sessions.lock().await;
            let session = sessions
                .get_mut(&self.session_name)
                .ok_or_else(|| MultiplexerError::SessionNotFound(self.session_name.clone()))?;
            if !session.exists {
                return Err(MultiplexerError::SessionNotFound(self.session_name.clone()).into());
            }
            session.tap_enter_count += 1;
            Ok(())
        }
    }

    pub struct FakeMultiplexerFactory {
        registry: Arc<FakeRegistry>,
    }

    impl FakeMultiplexerFactory {
        pub fn new(registry: Arc<FakeRegistry>) -> Self {
            Self { registry }
        }
    }

    impl MultiplexerFactory for FakeMultiplexerFactory {
        fn create(&self, session_name: &str) -> Arc<dyn Multiplexer> {
            Arc::new(FakeMultiplexer::new(session_name.to_string(), self.registry.clone()))
        }
    }
}
