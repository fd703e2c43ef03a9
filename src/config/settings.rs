//! User configuration settings
//!
//! Layered configuration: defaults -> config file -> environment variables,
//! following the teacher's figment pipeline.

use std::path::PathBuf;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default program to run in new instances (e.g. "claude")
    pub default_program: String,

    /// Whether new instances auto-confirm their agent's prompts by default
    pub auto_yes: bool,

    /// How often the AutoYes daemon polls running instances, in milliseconds
    pub daemon_poll_interval_ms: u64,

    /// Branch name prefix template for new instances. `{username}` is
    /// substituted with the current OS user at read time.
    pub branch_prefix: String,

    /// Paths (relative to the repo root) copied into every new worktree
    /// immediately after it is created.
    pub copy_on_create: Vec<String>,

    /// Maximum concurrent tmux commands
    pub max_concurrent_tmux: usize,

    /// Content capture cache TTL in milliseconds
    pub capture_cache_ttl_ms: u64,

    /// Diff cache TTL in milliseconds
    pub diff_cache_ttl_ms: u64,

    /// UI refresh rate in FPS, for the thin CLI front end's polling loop
    pub ui_refresh_fps: u32,

    /// Override for the worktrees directory (defaults under the data dir)
    pub worktrees_dir: Option<PathBuf>,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_program: "claude".to_string(),
            auto_yes: false,
            daemon_poll_interval_ms: 1000,
            branch_prefix: "{username}/".to_string(),
            copy_on_create: Vec::new(),
            max_concurrent_tmux: 16,
            capture_cache_ttl_ms: 50,
            diff_cache_ttl_ms: 500,
            ui_refresh_fps: 30,
            worktrees_dir: None,
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CS_").split("_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        Ok(config)
    }

    /// Resolve `branch_prefix`'s `{username}` placeholder against the current OS user.
    pub fn resolved_branch_prefix(&self) -> String {
        self.branch_prefix.replace("{username}", &whoami::username())
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the instance list file path
    pub fn instances_file_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("instances.json"))
    }

    /// Get the worktrees directory path
    pub fn worktrees_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.worktrees_dir {
            Ok(dir.clone())
        } else {
            Ok(Self::data_dir()?.join("worktrees"))
        }
    }

    /// Get the log file path used while attached to a session's terminal.
    pub fn log_file_path(&self) -> Result<PathBuf> {
        if let Some(ref file) = self.log_file {
            Ok(file.clone())
        } else {
            Ok(Self::data_dir()?.join("claude-squad.log"))
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = Self::project_dirs()?;

        std::fs::create_dir_all(dirs.config_dir())
            .map_err(|_| Error::Config(ConfigError::DirectoryCreationFailed(dirs.config_dir().to_path_buf())))?;

        std::fs::create_dir_all(dirs.data_dir())
            .map_err(|_| Error::Config(ConfigError::DirectoryCreationFailed(dirs.data_dir().to_path_buf())))?;

        let worktrees_dir = self.worktrees_dir()?;
        std::fs::create_dir_all(&worktrees_dir)
            .map_err(|_| Error::Config(ConfigError::DirectoryCreationFailed(worktrees_dir)))?;

        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|_| Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf())))?;
        }

        let toml = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(&config_path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "claude-squad", "claude-squad")
            .ok_or_else(|| Error::Config(ConfigError::LoadFailed("could not determine home directory".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_program, "claude");
        assert!(!config.auto_yes);
        assert_eq!(config.max_concurrent_tmux, 16);
        assert_eq!(config.capture_cache_ttl_ms, 50);
        assert_eq!(config.ui_refresh_fps, 30);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("default_program"));
        assert!(toml.contains("claude"));
    }

    #[test]
    fn test_branch_prefix_username_substitution() {
        let config = Config::default();
        let resolved = config.resolved_branch_prefix();
        assert!(!resolved.contains("{username}"));
        assert!(resolved.ends_with('/'));
    }

    #[test]
    fn test_log_file_path_defaults_under_data_dir() {
        let config = Config::default();
        let path = config.log_file_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "claude-squad.log");
    }

    #[test]
    fn test_branch_prefix_without_placeholder_is_unchanged() {
        let mut config = Config::default();
        config.branch_prefix = "agents/".to_string();
        assert_eq!(config.resolved_branch_prefix(), "agents/");
    }
}
