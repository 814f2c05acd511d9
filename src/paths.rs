/// Centralized platform-specific path computation
///
/// Provides the default locations for the configuration file and the SQLite
/// database, following the XDG Base Directory specification on Unix-like
/// systems.
use std::path::{Path, PathBuf};

const PROJECT_DIR: &str = "vcs-ingest";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Get the appropriate data directory for the current platform
    ///
    /// - Windows: %LOCALAPPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_DATA_HOME or ~/.local/share
    pub fn data_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            std::env::var("LOCALAPPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else if cfg!(target_os = "macos") {
            home_relative(std::env::var("HOME").ok(), "Library/Application Support")
        } else {
            xdg_or_home(
                std::env::var("XDG_DATA_HOME").ok(),
                std::env::var("HOME").ok(),
                ".local/share",
            )
        }
    }

    /// Get the appropriate config directory for the current platform
    ///
    /// - Windows: %APPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_CONFIG_HOME or ~/.config
    pub fn config_dir() -> PathBuf {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else if cfg!(target_os = "macos") {
            home_relative(std::env::var("HOME").ok(), "Library/Application Support")
        } else {
            xdg_or_home(
                std::env::var("XDG_CONFIG_HOME").ok(),
                std::env::var("HOME").ok(),
                ".config",
            )
        }
    }

    /// Returns: {data_dir}/vcs-ingest
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(PROJECT_DIR)
    }

    /// Returns: {config_dir}/vcs-ingest
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(PROJECT_DIR)
    }

    /// Get default database path
    ///
    /// Returns: {data_dir}/vcs-ingest/ingest.db
    pub fn default_database_path() -> PathBuf {
        Self::project_data_dir().join("ingest.db")
    }

    /// Get default config file path
    ///
    /// Returns: {config_dir}/vcs-ingest/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }

    /// Default parent directory for scratch extraction of archives
    pub fn default_scratch_dir() -> PathBuf {
        std::env::temp_dir()
    }
}

fn xdg_or_home(xdg: Option<String>, home: Option<String>, fallback: &str) -> PathBuf {
    match xdg.filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => home_relative(home, fallback),
    }
}

fn home_relative(home: Option<String>, suffix: &str) -> PathBuf {
    home.map(|h| Path::new(&h).join(suffix))
        .unwrap_or_else(|| PathBuf::from("."))
}
