//! File seeding (component C)
//!
//! Copies a fixed list of repo-relative paths into a freshly created worktree,
//! preserving bytes and permission bits. Invoked exactly once, immediately after
//! the worktree directory is created by [`crate::git::WorktreeAdapter::setup`].

use std::path::Path;

use tracing::{debug, instrument};

use crate::error::{Result, SeedError};

/// For each path in `copy_on_create`, if the source exists under `repo_path`, copy it
/// verbatim to the same relative location under `worktree_path`, creating parent
/// directories as needed and preserving the source's permission bits. Missing source
/// files are silently skipped — not an error.
#[instrument(skip(copy_on_create))]
pub fn seed_files(repo_path: &Path, worktree_path: &Path, copy_on_create: &[String]) -> Result<()> {
    for rel_path in copy_on_create {
        let source = repo_path.join(rel_path);
        if !source.exists() {
            debug!("seed source {:?} does not exist, skipping", source);
            continue;
        }

        let dest = worktree_path.join(rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SeedError::CopyFailed {
                path: source.clone(),
                source: e,
            })?;
        }

        std::fs::copy(&source, &dest).map_err(|e| SeedError::CopyFailed {
            path: source.clone(),
            source: e,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&source)
                .map_err(|e| SeedError::CopyFailed {
                    path: source.clone(),
                    source: e,
                })?
                .permissions()
                .mode();
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(mode)).map_err(|e| SeedError::CopyFailed {
                path: dest.clone(),
                source: e,
            })?;
        }

        debug!("seeded {:?} -> {:?}", source, dest);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seed_copies_existing_files() {
        let repo = TempDir::new().unwrap();
        let worktree = TempDir::new().unwrap();

        std::fs::write(repo.path().join(".env"), "SECRET=1\n").unwrap();
        std::fs::create_dir_all(repo.path().join("config")).unwrap();
        std::fs::write(repo.path().join("config/secrets.json"), "{}").unwrap();

        seed_files(
            repo.path(),
            worktree.path(),
            &[".env".to_string(), "config/secrets.json".to_string(), "missing.txt".to_string()],
        )
        .unwrap();

        assert_eq!(std::fs::read_to_string(worktree.path().join(".env")).unwrap(), "SECRET=1\n");
        assert_eq!(std::fs::read_to_string(worktree.path().join("config/secrets.json")).unwrap(), "{}");
        assert!(!worktree.path().join("missing.txt").exists());
    }

    #[test]
    fn test_seed_skips_missing_sources_without_error() {
        let repo = TempDir::new().unwrap();
        let worktree = TempDir::new().unwrap();

        let result = seed_files(repo.path(), worktree.path(), &["nope.txt".to_string()]);
        assert!(result.is_ok());
        assert!(!worktree.path().join("nope.txt").exists());
    }

    #[test]
    fn test_seed_empty_list_is_noop() {
        let repo = TempDir::new().unwrap();
        let worktree = TempDir::new().unwrap();
        seed_files(repo.path(), worktree.path(), &[]).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_seed_preserves_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let repo = TempDir::new().unwrap();
        let worktree = TempDir::new().unwrap();

        let source = repo.path().join(".env");
        std::fs::write(&source, "SECRET=1\n").unwrap();
        std::fs::set_permissions(&source, std::fs::Permissions::from_mode(0o600)).unwrap();

        seed_files(repo.path(), worktree.path(), &[".env".to_string()]).unwrap();

        let dest_mode = std::fs::metadata(worktree.path().join(".env")).unwrap().permissions().mode();
        assert_eq!(dest_mode & 0o777, 0o600);
    }
}
