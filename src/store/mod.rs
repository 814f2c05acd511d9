//! Relational store access
//!
//! Every caller opens its own connection through [`Store::connect`]; SQLite
//! in WAL mode with a busy timeout lets the extraction workers write
//! concurrently without a pool.

pub mod bulk;
pub mod lock;
pub mod schema;
pub mod transactional;

pub use bulk::{BulkLoader, BulkReport, CommitRow, ConstraintWindow, CopyTarget, SqliteCopyTarget};
pub use lock::{LockMode, SchemaLockGuard};
pub use transactional::{LoadReport, TransactionalLoader};

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Handle on the SQLite database file
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(
            config.path.clone(),
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Open a connection to an existing database
    pub fn connect(&self) -> Result<Connection, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.db_path, flags)
            .map_err(|e| self.connection_failed(e))?;
        self.configure(&conn)?;
        Ok(conn)
    }

    /// Create the database file and its parent directory when missing, then
    /// apply the reference schema
    pub fn init_schema(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::ConnectionFailed {
                path: self.db_path.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(&self.db_path).map_err(|e| self.connection_failed(e))?;
        self.configure(&conn)?;
        schema::apply(&conn)?;

        tracing::info!("Initialized schema in {}", self.db_path.display());
        Ok(())
    }

    fn configure(&self, conn: &Connection) -> Result<(), StoreError> {
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| self.connection_failed(e))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| self.connection_failed(e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::debug!("Journal mode is {} for {}", mode, self.db_path.display());
        }
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| self.connection_failed(e))?;
        Ok(())
    }

    fn connection_failed(&self, err: rusqlite::Error) -> StoreError {
        StoreError::ConnectionFailed {
            path: self.db_path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Whether the `commits` table holds no rows
pub fn commits_is_empty(conn: &Connection) -> Result<bool, StoreError> {
    let any: Option<i64> = conn
        .query_row("SELECT 1 FROM commits LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(any.is_none())
}

/// Read-only identifier maps built once per run
#[derive(Debug, Clone, Default)]
pub struct Lookups {
    users: HashMap<String, i64>,
    repositories: HashMap<String, i64>,
}

impl Lookups {
    /// Load every user email and repository clone URL.
    ///
    /// When several users share an email the lowest id wins.
    pub fn load(conn: &Connection) -> Result<Self, StoreError> {
        let mut users = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT id, email FROM users WHERE email IS NOT NULL AND email != '' ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (id, email) = row?;
            users.entry(email).or_insert(id);
        }

        let mut repositories = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, clone_url FROM repositories")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (id, clone_url) = row?;
            repositories.insert(clone_url, id);
        }

        tracing::info!(
            "Loaded {} user emails and {} repositories",
            users.len(),
            repositories.len()
        );
        Ok(Self {
            users,
            repositories,
        })
    }

    /// Exact email match; unmatched emails resolve to `None`
    pub fn user_id(&self, email: &str) -> Option<i64> {
        self.users.get(email).copied()
    }

    pub fn repository_id(&self, clone_url: &str) -> Option<i64> {
        self.repositories.get(clone_url).copied()
    }

    /// Repository id, or the error that abandons an unregistered repository
    pub fn require_repository(&self, clone_url: &str) -> Result<i64, StoreError> {
        self.repository_id(clone_url)
            .ok_or_else(|| StoreError::RepositoryNotRegistered(clone_url.to_string()))
    }
}
