//! Fixtures shared by unit tests

use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature, Time};
use std::cell::Cell;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A throwaway git repository with deterministic signatures
pub(crate) struct GitFixture {
    pub dir: TempDir,
    pub repo: Repository,
    clock: Cell<i64>,
}

impl GitFixture {
    pub const ORIGIN_URL: &'static str = "https://example.com/fixture.git";
    pub const AUTHOR_NAME: &'static str = "Ada Lovelace";
    pub const AUTHOR_EMAIL: &'static str = "ada@example.com";
    pub const COMMITTER_NAME: &'static str = "Charles Babbage";
    pub const COMMITTER_EMAIL: &'static str = "charles@example.com";

    /// Empty repository on branch `main` with an `origin` remote
    pub fn init() -> Self {
        let dir = TempDir::new().unwrap();
        Self::init_at(dir)
    }

    pub fn init_at(dir: TempDir) -> Self {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir.path(), &opts).unwrap();
        repo.remote("origin", Self::ORIGIN_URL).unwrap();

        Self {
            dir,
            repo,
            clock: Cell::new(1_400_000_000),
        }
    }

    /// Repository in `parent/name`, removed with the fixture
    pub fn init_in(parent: &Path, name: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix(name)
            .rand_bytes(0)
            .tempdir_in(parent)
            .unwrap();
        Self::init_at(dir)
    }

    pub fn set_origin(&self, url: &str) {
        self.repo.remote_set_url("origin", url).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file into the working tree and stage it
    pub fn write(&self, name: &str, content: impl AsRef<[u8]>) {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();

        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
    }

    /// Delete a file from the working tree and stage the removal
    pub fn remove(&self, name: &str) {
        fs::remove_file(self.path().join(name)).unwrap();

        let mut index = self.repo.index().unwrap();
        index.remove_path(Path::new(name)).unwrap();
        index.write().unwrap();
    }

    /// Write `files`, then commit everything staged on top of HEAD
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> git2::Oid {
        for (name, content) in files {
            self.write(name, content);
        }

        let mut index = self.repo.index().unwrap();
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        let when = self.clock.get();
        self.clock.set(when + 3600);
        let author = Signature::new(
            Self::AUTHOR_NAME,
            Self::AUTHOR_EMAIL,
            &Time::new(when, 120),
        )
        .unwrap();
        let committer = Signature::new(
            Self::COMMITTER_NAME,
            Self::COMMITTER_EMAIL,
            &Time::new(when + 60, 0),
        )
        .unwrap();

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &author, &committer, message, &tree, &parents)
            .unwrap()
    }
}

/// Pack `dir` into a tar archive at `archive`, with every entry rooted
/// under `root_name/`
pub(crate) fn tar_directory(dir: &Path, root_name: &str, archive: &Path) {
    let file = fs::File::create(archive).unwrap();
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);
    builder.append_dir_all(root_name, dir).unwrap();
    builder.into_inner().unwrap();
}

/// Fresh database with the reference schema in a temporary directory
pub(crate) fn test_store() -> (TempDir, crate::store::Store) {
    let dir = TempDir::new().unwrap();
    let store = crate::store::Store::new(
        dir.path().join("ingest.db"),
        std::time::Duration::from_secs(5),
    );
    store.init_schema().unwrap();
    (dir, store)
}

pub(crate) fn register_repository(
    store: &crate::store::Store,
    repo: &crate::types::Repository,
) -> i64 {
    register_url(store, &repo.name, &repo.clone_url)
}

pub(crate) fn register_url(store: &crate::store::Store, name: &str, clone_url: &str) -> i64 {
    let conn = store.connect().unwrap();
    conn.execute(
        "INSERT INTO repositories(name, clone_url, vcs) VALUES (?1, ?2, 'git')",
        rusqlite::params![name, clone_url],
    )
    .unwrap();
    conn.last_insert_rowid()
}

pub(crate) fn register_user(store: &crate::store::Store, name: &str, email: &str) -> i64 {
    let conn = store.connect().unwrap();
    conn.execute(
        "INSERT INTO users(name, email) VALUES (?1, ?2)",
        rusqlite::params![name, email],
    )
    .unwrap();
    conn.last_insert_rowid()
}

/// A repository of `commits` distinct commits authored by ada@example.com
pub(crate) fn sample_repository(commits: usize, with_deltas: bool) -> crate::types::Repository {
    use crate::types::{Commit, DeltaStatus, Developer, DiffDelta, Repository, VcsKind};

    let commits = (0..commits)
        .map(|i| {
            let date = chrono::DateTime::parse_from_rfc3339("2015-06-01T12:00:00+02:00")
                .unwrap()
                + chrono::Duration::minutes(i as i64);
            Commit {
                vcs_id: format!("{:040x}", i + 1),
                message: format!("Change {}", i),
                author: Developer::new("Ada", "ada@example.com"),
                committer: Developer::new("Nobody", "nobody@example.com"),
                author_date: date,
                commit_date: date,
                diff_delta: with_deltas.then(|| {
                    vec![DiffDelta {
                        status: DeltaStatus::Added,
                        binary: false,
                        similarity: None,
                        old_file_path: None,
                        new_file_path: Some(format!("file-{}.rs", i)),
                        patch: None,
                    }]
                }),
                file_changed_count: 1,
                insertions_count: i + 1,
                deletions_count: 0,
            }
        })
        .collect();

    Repository {
        name: "sample".to_string(),
        vcs: VcsKind::Git,
        clone_url: "https://example.com/sample.git".to_string(),
        clone_path: std::path::PathBuf::from("/repos/sample"),
        default_branch: "main".to_string(),
        commits,
    }
}
