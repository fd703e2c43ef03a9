//! Storage — durable list of Instances (component E)
//!
//! A single JSON document holding an ordered list of Instance serializations,
//! loaded at startup and rewritten atomically (temp file + rename) after every
//! mutation.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{InstanceError, Result, StorageError};
use crate::git::DiffCache;
use crate::instance::{Instance, Status};
use crate::tmux::MultiplexerFactory;

/// Ordered list of Instances, backed by a JSON document on disk.
pub struct Storage {
    path: PathBuf,
    instances: Vec<Instance>,
    /// Shared diff cache, keyed by Instance title; not persisted.
    diff_cache: DiffCache<String>,
}

impl Storage {
    /// Load the instance list from `path`, if it exists, without starting any
    /// Instance's adapters. Use [`Self::reconnect_all`] afterward to perform the
    /// load-time Restore/detached-reconstruct pass.
    pub fn load(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                instances: Vec::new(),
                diff_cache: DiffCache::new(),
            });
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| StorageError::LoadFailed(e.to_string()))?;
        let instances: Vec<Instance> = serde_json::from_str(&raw).map_err(|e| StorageError::LoadFailed(e.to_string()))?;

        Ok(Self {
            path,
            instances,
            diff_cache: DiffCache::new(),
        })
    }

    /// The shared diff cache backing [`Instance::update_diff_stats`], keyed by title.
    pub fn diff_cache(&self) -> &DiffCache<String> {
        &self.diff_cache
    }

    /// Per spec.md §4.E load semantics: for each record, if Paused, mark `started`
    /// and construct a detached Multiplexer without starting it; otherwise invoke
    /// Start(firstTime=false). A Restore failure aborts loading that one instance
    /// (it is reported, not kept) but does not abort the batch.
    pub async fn reconnect_all(&mut self, factory: &dyn MultiplexerFactory) {
        let mut kept = Vec::with_capacity(self.instances.len());

        for mut instance in self.instances.drain(..) {
            match instance.status {
                Status::Paused => {
                    instance.mark_started_detached();
                    instance.attach_multiplexer(factory.create(&instance.title));
                    kept.push(instance);
                }
                _ => match instance.start_restore(factory).await {
                    Ok(()) => kept.push(instance),
                    Err(e) => warn!(title = %instance.title, error = %e, "failed to restore instance, dropping from active set"),
                },
            }
        }

        self.instances = kept;
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    pub fn find(&self, title: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.title == title)
    }

    pub fn find_mut(&mut self, title: &str) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.title == title)
    }

    /// Insert a new Instance, enforcing title/branch/worktreePath uniqueness
    /// (spec.md §9's resolution of the branch-collision open question).
    pub fn insert(&mut self, instance: Instance) -> Result<()> {
        if self.instances.iter().any(|i| i.title == instance.title) {
            return Err(InstanceError::TitleCollision(instance.title).into());
        }
        if self.instances.iter().any(|i| i.branch == instance.branch) {
            return Err(InstanceError::BranchCollision(instance.branch).into());
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Remove the named Instance from the list (post-Kill), dropping its diff cache entry.
    pub async fn remove(&mut self, title: &str) -> Option<Instance> {
        let index = self.instances.iter().position(|i| i.title == title)?;
        self.diff_cache.invalidate(&title.to_string()).await;
        Some(self.instances.remove(index))
    }

    /// Atomically rewrite the whole document: write to a sibling temp file, then rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::SaveFailed(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(&self.instances).map_err(|e| StorageError::SaveFailed(e.to_string()))?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StorageError::SaveFailed(e.to_string()))?;
        use std::io::Write;
        tmp.write_all(json.as_bytes()).map_err(|e| StorageError::SaveFailed(e.to_string()))?;
        tmp.persist(&self.path).map_err(|e| StorageError::SaveFailed(e.to_string()))?;

        info!(count = self.instances.len(), path = ?self.path, "instance list saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use tempfile::TempDir;

    fn instance(title: &str) -> Instance {
        Instance::new(
            title.to_string(),
            PathBuf::from("/repo"),
            "claude".to_string(),
            false,
            "u/",
            &PathBuf::from("/worktrees"),
        )
    }

    #[test]
    fn test_insert_rejects_title_collision() {
        let dir = TempDir::new().unwrap();
        let mut storage = Storage::load(dir.path().join("instances.json")).unwrap();
        storage.insert(instance("Fix Bug")).unwrap();
        let err = storage.insert(instance("Fix Bug")).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_insert_rejects_branch_collision_across_titles() {
        let dir = TempDir::new().unwrap();
        let mut storage = Storage::load(dir.path().join("instances.json")).unwrap();
        storage.insert(instance("Fix bug!")).unwrap();
        let err = storage.insert(instance("Fix bug?")).unwrap_err();
        assert!(err.to_string().contains("already owned"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("instances.json");
        let mut storage = Storage::load(path.clone()).unwrap();
        storage.insert(instance("Fix Bug")).unwrap();
        storage.save().unwrap();

        let reloaded = Storage::load(path).unwrap();
        assert_eq!(reloaded.instances().len(), 1);
        assert_eq!(reloaded.instances()[0].title, "Fix Bug");
    }

    #[tokio::test]
    async fn test_remove_drops_instance() {
        let dir = TempDir::new().unwrap();
        let mut storage = Storage::load(dir.path().join("instances.json")).unwrap();
        storage.insert(instance("Fix Bug")).unwrap();
        assert!(storage.remove("Fix Bug").await.is_some());
        assert!(storage.instances().is_empty());
    }
}
