//! Reference SQLite schema for the ingestion tables.
//!
//! Deployments may bring their own schema as long as it offers the same
//! tables and columns. Secondary indexes on `commits` are kept separate from
//! the table DDL so the bulk-copy window can drop and rebuild them.

use rusqlite::Connection;

/// Table DDL, safe to replay on an initialised database
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS repositories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        primary_language TEXT,
        clone_url TEXT NOT NULL UNIQUE,
        clone_path TEXT,
        vcs TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT,
        name TEXT,
        email TEXT
    );",
    "CREATE INDEX IF NOT EXISTS users_email_idx ON users(email);",
    "CREATE TABLE IF NOT EXISTS commits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repository_id INTEGER NOT NULL REFERENCES repositories(id),
        author_id INTEGER REFERENCES users(id),
        committer_id INTEGER REFERENCES users(id),
        hash TEXT NOT NULL,
        vcs_id TEXT NOT NULL,
        message TEXT NOT NULL,
        author_date TEXT NOT NULL,
        commit_date TEXT NOT NULL,
        file_changed_count INTEGER NOT NULL,
        insertions_count INTEGER NOT NULL,
        deletions_count INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS commit_diff_deltas (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        commit_id INTEGER NOT NULL REFERENCES commits(id),
        file_status TEXT NOT NULL,
        is_file_binary BOOLEAN NOT NULL,
        similarity INTEGER,
        old_file_path TEXT,
        new_file_path TEXT,
        patch TEXT
    );",
    "CREATE INDEX IF NOT EXISTS commit_diff_deltas_commit_id_idx
        ON commit_diff_deltas(commit_id);",
];

/// A named index on the `commits` table
#[derive(Debug, Clone, Copy)]
pub struct CommitIndex {
    pub name: &'static str,
    pub create: &'static str,
}

/// Indexes the bulk-copy window drops and rebuilds.
///
/// `commits_repository_hash_key` is what makes re-ingesting a repository
/// idempotent on the transactional path.
pub const COMMIT_INDEXES: &[CommitIndex] = &[
    CommitIndex {
        name: "commits_repository_id_idx",
        create: "CREATE INDEX IF NOT EXISTS commits_repository_id_idx ON commits(repository_id);",
    },
    CommitIndex {
        name: "commits_author_id_idx",
        create: "CREATE INDEX IF NOT EXISTS commits_author_id_idx ON commits(author_id);",
    },
    CommitIndex {
        name: "commits_committer_id_idx",
        create: "CREATE INDEX IF NOT EXISTS commits_committer_id_idx ON commits(committer_id);",
    },
    CommitIndex {
        name: "commits_repository_hash_key",
        create: "CREATE UNIQUE INDEX IF NOT EXISTS commits_repository_hash_key
            ON commits(repository_id, hash);",
    },
];

/// Create every table and index that does not exist yet
pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    create_commit_indexes(conn)
}

pub fn create_commit_indexes(conn: &Connection) -> rusqlite::Result<()> {
    for index in COMMIT_INDEXES {
        conn.execute_batch(index.create)?;
    }
    Ok(())
}

pub fn drop_commit_indexes(conn: &Connection) -> rusqlite::Result<()> {
    for index in COMMIT_INDEXES {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {};", index.name))?;
    }
    Ok(())
}

/// Names of the `commits` indexes currently present
pub fn existing_commit_indexes(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'index' AND tbl_name = 'commits' AND sql IS NOT NULL
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}
