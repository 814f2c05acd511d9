/// Configuration system for vcs-ingest
///
/// Supports loading from multiple sources with priority:
/// CLI args > Environment variables > Config file > Defaults
use crate::error::{ConfigError, IngestError};
use crate::history::DataPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Archives smaller than this are never considered too large for scratch
/// extraction, whatever the configured limit.
pub const MIN_FILE_SIZE_LIMIT_GB: f64 = 0.01;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relational store configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Which per-commit data to fetch from history
    #[serde(default)]
    pub data: DataConfig,

    /// Scratch directory policy for archive materialization
    #[serde(default)]
    pub scratch: ScratchConfig,

    /// Worker pool and loader configuration
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Data-fetch policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DataConfig {
    /// Attach per-file deltas to each commit
    #[serde(default)]
    pub commit_deltas: bool,

    /// Attach patch text to each delta (requires `commit_deltas`)
    #[serde(default)]
    pub commit_patches: bool,

    /// Ask the backend to detect renames and copies when diffing
    #[serde(default)]
    pub detect_renames: bool,
}

/// Scratch directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchConfig {
    /// Parent directory for extracted archive metadata. A ramdisk works well.
    #[serde(default = "default_scratch_dir")]
    pub dir: PathBuf,

    /// Largest archive, in gigabytes, that is extracted into `dir`. Larger
    /// archives are expected to be unpacked next to the archive already.
    #[serde(default = "default_file_size_limit_gb")]
    pub file_size_limit_gb: f64,
}

/// How extracted commits reach the store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoaderStrategy {
    /// One transaction per repository, commits and deltas
    #[default]
    Transactional,
    /// Single loader streaming commit rows with relaxed constraints
    BulkCopy,
}

/// Worker pool and loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of extraction workers; 0 means available parallelism
    #[serde(default)]
    pub workers: usize,

    /// Capacity of the work queue and of the commit queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Loading strategy
    #[serde(default)]
    pub loader: LoaderStrategy,

    /// Commit rows per transaction on the bulk-copy path
    #[serde(default = "default_commits_per_transaction")]
    pub commits_per_transaction: usize,

    /// How many times a failed bulk batch is replayed before giving up
    #[serde(default = "default_bulk_batch_retries")]
    pub bulk_batch_retries: usize,
}

// Default value functions
fn default_database_path() -> PathBuf {
    crate::paths::PlatformPaths::default_database_path()
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}

fn default_scratch_dir() -> PathBuf {
    crate::paths::PlatformPaths::default_scratch_dir()
}

fn default_file_size_limit_gb() -> f64 {
    0.1
}

fn default_queue_capacity() -> usize {
    64
}

fn default_commits_per_transaction() -> usize {
    10_000
}

fn default_bulk_batch_retries() -> usize {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            dir: default_scratch_dir(),
            file_size_limit_gb: default_file_size_limit_gb(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: default_queue_capacity(),
            loader: LoaderStrategy::default(),
            commits_per_transaction: default_commits_per_transaction(),
            bulk_batch_retries: default_bulk_batch_retries(),
        }
    }
}

impl fmt::Display for LoaderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderStrategy::Transactional => write!(f, "transactional"),
            LoaderStrategy::BulkCopy => write!(f, "bulk_copy"),
        }
    }
}

impl FromStr for LoaderStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transactional" => Ok(LoaderStrategy::Transactional),
            "bulk_copy" | "bulk-copy" | "bulk" => Ok(LoaderStrategy::BulkCopy),
            other => Err(ConfigError::InvalidValue {
                key: "ingest.loader".to_string(),
                reason: format!("must be 'transactional' or 'bulk_copy', got '{}'", other),
            }),
        }
    }
}

impl DataConfig {
    /// The extraction policy this configuration describes
    pub fn policy(&self) -> DataPolicy {
        DataPolicy {
            deltas: self.commit_deltas,
            patches: self.commit_patches,
            detect_renames: self.detect_renames,
        }
    }
}

impl IngestConfig {
    /// Worker count with 0 resolved to the machine's available parallelism
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl ScratchConfig {
    /// Size limit with the lower bound applied
    pub fn effective_limit_gb(&self) -> f64 {
        self.file_size_limit_gb.max(MIN_FILE_SIZE_LIMIT_GB)
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, IngestError> {
        let config_path = crate::paths::PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.data.commit_patches && !self.data.commit_deltas {
            return Err(ConfigError::InvalidValue {
                key: "data.commit_patches".to_string(),
                reason: "may only be enabled along with data.commit_deltas".to_string(),
            }
            .into());
        }

        if self.ingest.loader == LoaderStrategy::BulkCopy && self.data.commit_deltas {
            return Err(ConfigError::InvalidValue {
                key: "ingest.loader".to_string(),
                reason: "bulk_copy loads commit rows only; disable data.commit_deltas".to_string(),
            }
            .into());
        }

        let limit = self.scratch.file_size_limit_gb;
        if limit.is_nan() || limit < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "scratch.file_size_limit_gb".to_string(),
                reason: format!("must be a non-negative number, got {}", limit),
            }
            .into());
        }

        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.queue_capacity".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.ingest.commits_per_transaction == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.commits_per_transaction".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("VCS_INGEST_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Ok(workers) = std::env::var("VCS_INGEST_WORKERS")
            && let Ok(n) = workers.parse()
        {
            self.ingest.workers = n;
        }

        if let Ok(dir) = std::env::var("VCS_INGEST_TMP_DIR") {
            self.scratch.dir = PathBuf::from(dir);
        }

        if let Ok(loader) = std::env::var("VCS_INGEST_LOADER") {
            match loader.parse() {
                Ok(strategy) => self.ingest.loader = strategy,
                Err(e) => tracing::warn!("Ignoring VCS_INGEST_LOADER: {}", e),
            }
        }
    }

    /// Load from `path` (or the default location), then apply environment
    /// overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::load_or_default()?,
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
