/// Centralized error types for vcs-ingest using thiserror
///
/// The taxonomy mirrors how failures propagate through a run: fatal errors stop
/// the whole run, repository-level errors abandon a single repository, and
/// row-level problems on the bulk path are only counted.
use thiserror::Error;

/// Main error type for the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Locator error: {0}")]
    Locate(#[from] LocateError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Errors raised while enumerating candidate repositories
#[derive(Error, Debug)]
pub enum LocateError {
    #[error("Cannot read directory '{path}': {reason}")]
    Unreadable { path: String, reason: String },
}

/// Errors related to archive materialization
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to open archive '{path}': {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Failed to read archive '{path}': {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to create scratch directory in '{dir}': {reason}")]
    ScratchFailed { dir: String, reason: String },

    #[error("Failed to write archive entry '{entry}': {reason}")]
    WriteFailed { entry: String, reason: String },

    #[error("Archive entry escapes the extraction root: {0}")]
    UnsafeEntry(String),

    #[error("No version-control metadata found in archive: {0}")]
    NotRecognized(String),
}

/// Errors related to VCS detection and history extraction
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Version-control system not recognized at: {0}")]
    NotRecognized(String),

    #[error("No history backend available for {0}")]
    Unsupported(String),

    #[error("Failed to open repository '{path}': {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Repository has no remote with a clone URL")]
    NoCloneUrl,

    #[error("No active branch (detached HEAD state)")]
    DetachedHead,

    #[error("Failed to walk history from '{reference}': {reason}")]
    WalkFailed { reference: String, reason: String },

    #[error("Failed to read commit {id}: {reason}")]
    CommitFailed { id: String, reason: String },

    #[error("Failed to diff commit {id}: {reason}")]
    DiffFailed { id: String, reason: String },
}

/// Errors related to the relational store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to database '{path}': {reason}")]
    ConnectionFailed { path: String, reason: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Repository is not registered in the store: {0}")]
    RepositoryNotRegistered(String),

    #[error("Transaction for repository '{repository}' failed: {reason}")]
    TransactionFailed { repository: String, reason: String },

    #[error("Bulk batch {batch} failed after {attempts} attempt(s): {reason}")]
    BatchFailed {
        batch: usize,
        attempts: usize,
        reason: String,
    },

    #[error("Failed to restore constraints: {0}")]
    RestoreFailed(String),

    #[error("Schema lock on '{0}' is held by another loader")]
    LockBusy(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock file error: {0}")]
    Lock(#[from] std::io::Error),
}

// Conversion from anyhow::Error to IngestError
impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        IngestError::Other(format!("{:#}", err))
    }
}

// Helper methods for IngestError
impl IngestError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        IngestError::Other(msg.into())
    }

    /// Whether this error must terminate the whole run rather than a single
    /// repository
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::Config(_) | IngestError::Locate(_) => true,
            IngestError::Store(err) => err.is_fatal(),
            IngestError::Archive(_)
            | IngestError::History(_)
            | IngestError::Io(_)
            | IngestError::Json(_)
            | IngestError::Other(_) => false,
        }
    }
}

impl StoreError {
    /// Connection, precondition and schema-restoration failures leave the run
    /// unable to continue; everything else is scoped to one repository.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionFailed { .. }
                | StoreError::PreconditionFailed(_)
                | StoreError::RestoreFailed(_)
                | StoreError::BatchFailed { .. }
                | StoreError::LockBusy(_)
        )
    }
}
