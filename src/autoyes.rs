//! AutoYes Daemon (component F)
//!
//! A single periodic ticker. Each tick, for every Instance where `autoYes` is true
//! and status is Running and `HasUpdated()` reports `hasPrompt`, issue `TapEnter`.
//! Errors are logged, never propagated; the daemon never mutates Instance status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::instance::Status;
use crate::storage::Storage;

/// Drives one tick of the AutoYes policy over the current instance list.
pub async fn run_tick(storage: &Mutex<Storage>) {
    let mut storage = storage.lock().await;
    let mut mutated = false;

    for instance in storage.instances_mut() {
        if !instance.auto_yes || instance.status != Status::Running {
            continue;
        }

        match instance.has_updated().await {
            Ok((_, has_prompt)) if has_prompt => match instance.tap_enter_if_auto_yes().await {
                Ok(()) => {
                    mutated = true;
                    debug!(title = %instance.title, "autoyes tapped enter");
                }
                Err(e) => warn!(title = %instance.title, error = %e, "autoyes tap_enter failed"),
            },
            Ok(_) => {}
            Err(e) => warn!(title = %instance.title, error = %e, "autoyes has_updated failed"),
        }
    }

    if mutated {
        if let Err(e) = storage.save() {
            warn!(error = %e, "autoyes failed to persist instance list after a tick");
        }
    }
}

/// Runs [`run_tick`] on a fixed interval until the returned handle is dropped or aborted.
pub fn spawn(storage: Arc<Mutex<Storage>>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        loop {
            ticker.tick().await;
            run_tick(&storage).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::tmux::fake::{FakeMultiplexerFactory, FakeRegistry};
    use std::path::PathBuf;
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
    async fn test_s6_autoyes_bounded_tap_enter_count() {
        let repo = init_repo_with_commit().await;
        let mut instance = Instance::new(
            "AutoYes Demo".to_string(),
            repo.path().to_path_buf(),
            "claude".to_string(),
            true,
            "u/",
            &repo.path().join("worktrees"),
        );

        let registry = FakeRegistry::new();
        let factory = FakeMultiplexerFactory::new(registry.clone());
        instance.start_first(&factory, &[]).await.unwrap();

        registry
            .script_prompts("AutoYes Demo", vec![true, true, true, true, true, false, false])
            .await;

        let storage_path = repo.path().join("instances.json");
        let mut storage = crate::storage::Storage::load(storage_path).unwrap();
        storage.insert(instance).unwrap();
        let storage = Arc::new(Mutex::new(storage));

        for _ in 0..7 {
            run_tick(&storage).await;
        }

        assert_eq!(registry.tap_enter_count("AutoYes Demo").await, 5);
    }

    #[tokio::test]
    async fn test_autoyes_skips_non_running_instances() {
        let instance = Instance::new(
            "Idle".to_string(),
            PathBuf::from("/repo"),
            "claude".to_string(),
            true,
            "u/",
            &PathBuf::from("/worktrees"),
        );

        let dir = TempDir::new().unwrap();
        let mut storage = crate::storage::Storage::load(dir.path().join("instances.json")).unwrap();
        storage.insert(instance).unwrap();
        let storage = Arc::new(Mutex::new(storage));

        run_tick(&storage).await;
        // Ready status, never started: no panic, no tap_enter attempted.
        let storage = storage.lock().await;
        assert_eq!(storage.instances()[0].status, Status::Ready);
    }
}
