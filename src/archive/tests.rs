//! Tests for the archive materializer

use super::*;
use crate::history::HistoryHandle;
use crate::history::git::GitHandle;
use crate::test_support::{GitFixture, tar_directory};
use std::collections::BTreeSet;

fn listing(dir: &Path) -> BTreeSet<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

/// A git fixture packed as `<repos>/parser.tar`
fn packed_repository(repos: &Path) -> PathBuf {
    let fixture = GitFixture::init();
    fixture.commit(&[("src/lib.rs", "pub fn parse() {}\n")], "first");
    fixture.commit(&[("src/lib.rs", "pub fn parse() -> u8 { 0 }\n")], "second");

    let archive = repos.join("parser.tar");
    tar_directory(fixture.path(), "parser", &archive);
    archive
}

fn raw_header(path: &[u8], entry_type: tar::EntryType, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.as_gnu_mut().unwrap().name[..path.len()].copy_from_slice(path);
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(0o644);
    header.set_cksum();
    header
}

#[test]
fn test_directory_is_used_in_place() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let repo = repos.path().join("lexer");
    fs::create_dir_all(repo.join(".git")).unwrap();

    let materialized = Materializer::new(scratch.path(), 1.0)
        .materialize(&repo)
        .unwrap();

    assert_eq!(materialized.history_root, repo);
    assert_eq!(materialized.clone_path, repo);
    assert_eq!(materialized.name, "lexer");
    assert!(!materialized.is_scratch());
    assert!(listing(scratch.path()).is_empty());
}

#[test]
fn test_small_archive_extracts_metadata_only() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = packed_repository(repos.path());

    let materialized = Materializer::new(scratch.path(), 1.0)
        .materialize(&archive)
        .unwrap();

    assert!(materialized.is_scratch());
    assert_eq!(materialized.clone_path, repos.path().join("parser"));
    assert_eq!(materialized.name, "parser");

    let root = &materialized.history_root;
    assert!(root.starts_with(scratch.path()));
    assert!(
        root.file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SCRATCH_PREFIX)
    );
    assert!(root.join(".git/HEAD").is_file());
    // Working tree files are not part of the metadata subtree
    assert!(!root.join("src").exists());

    let handle = GitHandle::open(root).unwrap();
    assert_eq!(handle.clone_url().unwrap(), GitFixture::ORIGIN_URL);
    assert_eq!(handle.walk("main").unwrap().len(), 2);
}

#[test]
fn test_cleanup_restores_filesystem() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = packed_repository(repos.path());

    let scratch_before = listing(scratch.path());
    let repos_before = listing(repos.path());

    let materialized = Materializer::new(scratch.path(), 1.0)
        .materialize(&archive)
        .unwrap();
    assert_ne!(listing(scratch.path()), scratch_before);
    materialized.cleanup().unwrap();

    assert_eq!(listing(scratch.path()), scratch_before);
    assert_eq!(listing(repos.path()), repos_before);
}

#[test]
fn test_drop_removes_scratch() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = packed_repository(repos.path());

    {
        let materialized = Materializer::new(scratch.path(), 1.0)
            .materialize(&archive)
            .unwrap();
        assert!(materialized.history_root.exists());
    }

    assert!(listing(scratch.path()).is_empty());
}

#[test]
fn test_oversized_archive_uses_sibling_directory() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = packed_repository(repos.path());

    let materialized = Materializer::new(scratch.path(), 0.0)
        .materialize(&archive)
        .unwrap();

    assert_eq!(materialized.history_root, repos.path().join("parser"));
    assert!(!materialized.is_scratch());
    assert!(listing(scratch.path()).is_empty());

    // Never removes a directory it did not create
    fs::create_dir_all(repos.path().join("parser/.git")).unwrap();
    materialized.cleanup().unwrap();
    assert!(repos.path().join("parser/.git").is_dir());
}

#[test]
fn test_unrecognized_archive_fails_without_scratch() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let plain = TempDir::new().unwrap();
    fs::write(plain.path().join("README"), b"no history here").unwrap();
    let archive = repos.path().join("plain.tar");
    tar_directory(plain.path(), "plain", &archive);

    let result = Materializer::new(scratch.path(), 1.0).materialize(&archive);

    assert!(matches!(result, Err(ArchiveError::NotRecognized(_))));
    assert!(listing(scratch.path()).is_empty());
}

#[test]
fn test_corrupt_archive_fails() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = repos.path().join("broken.tar");
    fs::write(&archive, vec![0xAB; 700]).unwrap();

    let result = Materializer::new(scratch.path(), 1.0).materialize(&archive);

    assert!(result.is_err());
    assert!(listing(scratch.path()).is_empty());
}

#[test]
fn test_escaping_entry_is_rejected_and_scratch_removed() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = repos.path().join("evil.tar");

    let mut builder = tar::Builder::new(File::create(&archive).unwrap());
    let dir = raw_header(b"evil/.git/", tar::EntryType::Directory, 0);
    builder.append(&dir, io::empty()).unwrap();
    let head = raw_header(b"evil/.git/HEAD", tar::EntryType::Regular, 4);
    builder.append(&head, &b"ref\n"[..]).unwrap();
    let escape = raw_header(b"evil/.git/../../escaped", tar::EntryType::Regular, 4);
    builder.append(&escape, &b"boom"[..]).unwrap();
    builder.into_inner().unwrap();

    let result = Materializer::new(scratch.path(), 1.0).materialize(&archive);

    assert!(matches!(result, Err(ArchiveError::UnsafeEntry(_))));
    assert!(listing(scratch.path()).is_empty());
    assert!(!scratch.path().join("escaped").exists());
}

#[cfg(unix)]
#[test]
fn test_symlinks_are_recreated() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = repos.path().join("linked.tar");

    let mut builder = tar::Builder::new(File::create(&archive).unwrap());
    let dir = raw_header(b"linked/.git/", tar::EntryType::Directory, 0);
    builder.append(&dir, io::empty()).unwrap();
    let mut link = raw_header(b"linked/.git/current", tar::EntryType::Symlink, 0);
    link.set_link_name("HEAD").unwrap();
    link.set_cksum();
    builder.append(&link, io::empty()).unwrap();
    builder.into_inner().unwrap();

    let materialized = Materializer::new(scratch.path(), 1.0)
        .materialize(&archive)
        .unwrap();

    let target = fs::read_link(materialized.history_root.join(".git/current")).unwrap();
    assert_eq!(target, PathBuf::from("HEAD"));
}

#[cfg(unix)]
#[test]
fn test_file_entry_replaces_earlier_symlink() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    let victim = outside.path().join("victim");
    fs::write(&victim, b"untouched").unwrap();
    let archive = repos.path().join("linked.tar");

    let mut builder = tar::Builder::new(File::create(&archive).unwrap());
    let dir = raw_header(b"linked/.git/", tar::EntryType::Directory, 0);
    builder.append(&dir, io::empty()).unwrap();
    let mut link = raw_header(b"linked/.git/HEAD", tar::EntryType::Symlink, 0);
    let target = victim.as_os_str().as_encoded_bytes();
    link.as_gnu_mut().unwrap().linkname[..target.len()].copy_from_slice(target);
    link.set_cksum();
    builder.append(&link, io::empty()).unwrap();
    let head = raw_header(b"linked/.git/HEAD", tar::EntryType::Regular, 5);
    builder.append(&head, &b"owned"[..]).unwrap();
    builder.into_inner().unwrap();

    let materialized = Materializer::new(scratch.path(), 1.0)
        .materialize(&archive)
        .unwrap();

    assert_eq!(fs::read_to_string(&victim).unwrap(), "untouched");
    let head = materialized.history_root.join(".git/HEAD");
    assert!(!fs::symlink_metadata(&head).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_to_string(&head).unwrap(), "owned");
}

#[test]
fn test_entries_under_other_roots_are_ignored() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let archive = repos.path().join("mixed.tar");

    let mut builder = tar::Builder::new(File::create(&archive).unwrap());
    for (path, entry_type, body) in [
        (&b"mixed/.git/"[..], tar::EntryType::Directory, &b""[..]),
        (&b"mixed/.git/HEAD"[..], tar::EntryType::Regular, &b"ref\n"[..]),
        (&b"other/.git/"[..], tar::EntryType::Directory, &b""[..]),
        (&b"other/.git/config"[..], tar::EntryType::Regular, &b"[core]\n"[..]),
    ] {
        let header = raw_header(path, entry_type, body.len() as u64);
        builder.append(&header, body).unwrap();
    }
    builder.into_inner().unwrap();

    let materialized = Materializer::new(scratch.path(), 1.0)
        .materialize(&archive)
        .unwrap();

    let root = &materialized.history_root;
    assert!(root.join(".git/HEAD").is_file());
    assert!(!root.join(".git/config").exists());
}

#[test]
fn test_archive_without_matching_root_is_not_recognized() {
    let scratch = TempDir::new().unwrap();
    let repos = TempDir::new().unwrap();
    let fixture = GitFixture::init();
    fixture.commit(&[("README.md", "# lexer\n")], "first");
    let archive = repos.path().join("parser.tar");
    tar_directory(fixture.path(), "lexer", &archive);

    let result = Materializer::new(scratch.path(), 1.0).materialize(&archive);

    assert!(matches!(result, Err(ArchiveError::NotRecognized(_))));
    assert!(listing(scratch.path()).is_empty());
}

#[test]
fn test_subtree_relative() {
    assert_eq!(
        subtree_relative(Path::new("repo/.git/objects/ab"), "repo", ".git").unwrap(),
        Some(PathBuf::from(".git/objects/ab"))
    );
    assert_eq!(
        subtree_relative(Path::new("./repo/.git"), "repo", ".git").unwrap(),
        Some(PathBuf::from(".git"))
    );
    assert_eq!(
        subtree_relative(Path::new("repo/src/main.rs"), "repo", ".git").unwrap(),
        None
    );
    assert_eq!(
        subtree_relative(Path::new("other/.git/HEAD"), "repo", ".git").unwrap(),
        None
    );
    assert_eq!(subtree_relative(Path::new(".git/HEAD"), "repo", ".git").unwrap(), None);
    assert!(subtree_relative(Path::new("/repo/.git/HEAD"), "repo", ".git").is_err());
}

#[test]
fn test_from_config_clamps_limit() {
    let config = ScratchConfig {
        dir: PathBuf::from("/tmp"),
        file_size_limit_gb: 0.0,
    };
    let materializer = Materializer::from_config(&config);
    assert_eq!(materializer.limit_gb, config.effective_limit_gb());
    assert!(materializer.limit_gb > 0.0);
}
