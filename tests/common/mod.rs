//! Helpers shared by the integration tests
#![allow(dead_code)]

use anyhow::Result;
use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature, Time};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vcs_ingest::store::Store;

pub const AUTHOR_EMAIL: &str = "grace@example.com";

/// Git repository at `dir` on branch `main`, with `origin` pointing at `url`
pub fn init_repo(dir: &Path, url: &str) -> Result<Repository> {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(dir, &opts)?;
    repo.remote("origin", url)?;
    Ok(repo)
}

/// Write `files` and commit everything on top of HEAD at time `when`
pub fn commit(repo: &Repository, files: &[(&str, &str)], message: &str, when: i64) -> Result<()> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| anyhow::anyhow!("bare repository"))?
        .to_path_buf();
    for (name, content) in files {
        let path = workdir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }

    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let author = Signature::new("Grace Hopper", AUTHOR_EMAIL, &Time::new(when, -300))?;
    let committer = Signature::new("Grace Hopper", AUTHOR_EMAIL, &Time::new(when, -300))?;
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    repo.commit(Some("HEAD"), &author, &committer, message, &tree, &parents)?;
    Ok(())
}

/// Root commit followed by two children by the same author
pub fn three_commit_repo(dir: &Path, url: &str) -> Result<Repository> {
    let repo = init_repo(dir, url)?;
    commit(&repo, &[("README.md", "# compiler\n")], "Initial import", 1_500_000_000)?;
    commit(&repo, &[("src/lexer.rs", "pub struct Lexer;\n")], "Add lexer", 1_500_003_600)?;
    commit(
        &repo,
        &[("src/lexer.rs", "pub struct Lexer {\n    pos: usize,\n}\n")],
        "Track lexer position",
        1_500_007_200,
    )?;
    Ok(repo)
}

/// Fresh store with the schema applied
pub fn create_store(dir: &Path) -> Result<Store> {
    let store = Store::new(dir.join("ingest.db"), Duration::from_secs(5));
    store.init_schema()?;
    Ok(store)
}

pub fn register_repository(store: &Store, name: &str, url: &str) -> Result<i64> {
    let conn = store.connect()?;
    conn.execute(
        "INSERT INTO repositories(name, clone_url, vcs) VALUES (?1, ?2, 'git')",
        rusqlite::params![name, url],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn register_user(store: &Store, name: &str, email: &str) -> Result<i64> {
    let conn = store.connect()?;
    conn.execute(
        "INSERT INTO users(name, email) VALUES (?1, ?2)",
        rusqlite::params![name, email],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count(store: &Store, sql: &str) -> Result<i64> {
    Ok(store.connect()?.query_row(sql, [], |row| row.get(0))?)
}

/// Directory listing relative to `dir`, for before/after comparisons
pub fn listing(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().strip_prefix(dir).unwrap_or(e.path()).to_path_buf())
        .collect();
    entries.sort();
    entries
}
