/// End-to-end runs of the ingestion pipeline against real repositories
mod common;

use anyhow::Result;
use common::{AUTHOR_EMAIL, count, create_store, listing, register_repository, register_user};
use std::fs::{self, File};
use std::sync::Arc;
use tempfile::TempDir;
use vcs_ingest::archive::Materializer;
use vcs_ingest::config::{Config, LoaderStrategy};
use vcs_ingest::detect::detect_dir;
use vcs_ingest::error::{IngestError, StoreError};
use vcs_ingest::history::{BackendRegistry, DataPolicy, HistoryExtractor};
use vcs_ingest::ingest::{Coordinator, Destination, RepositoryReader};
use vcs_ingest::types::VcsKind;

const COMPILER_URL: &str = "https://example.com/team/compiler.git";

fn config_for(db: &std::path::Path, scratch: &std::path::Path, loader: LoaderStrategy) -> Config {
    let mut config = Config::default();
    config.database.path = db.to_path_buf();
    config.scratch.dir = scratch.to_path_buf();
    config.ingest.workers = 3;
    config.ingest.loader = loader;
    config
}

#[tokio::test]
async fn test_three_commit_repository_end_to_end() -> Result<()> {
    let repos = TempDir::new()?;
    let db_dir = TempDir::new()?;
    let scratch = TempDir::new()?;

    common::three_commit_repo(&repos.path().join("team/compiler"), COMPILER_URL)?;
    let store = create_store(db_dir.path())?;
    register_repository(&store, "compiler", COMPILER_URL)?;
    let grace = register_user(&store, "Grace", AUTHOR_EMAIL)?;

    let config = config_for(store.path(), scratch.path(), LoaderStrategy::Transactional);
    let summary = Coordinator::new(config, Destination::Database(LoaderStrategy::Transactional))
        .run(repos.path(), 1)
        .await?;

    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.inserted, 2);

    // The root commit has no diff base and is never stored
    assert_eq!(count(&store, "SELECT COUNT(*) FROM commits")?, 2);
    assert_eq!(
        count(&store, "SELECT COUNT(*) FROM commits WHERE message = 'Initial import'")?,
        0
    );
    assert_eq!(
        count(
            &store,
            &format!("SELECT COUNT(*) FROM commits WHERE author_id = {}", grace)
        )?,
        2
    );
    assert_eq!(count(&store, "SELECT COUNT(DISTINCT hash) FROM commits")?, 2);
    assert_eq!(count(&store, "SELECT COUNT(*) FROM commit_diff_deltas")?, 0);

    Ok(())
}

#[tokio::test]
async fn test_bulk_rerun_fails_before_any_row_is_written() -> Result<()> {
    let repos = TempDir::new()?;
    let db_dir = TempDir::new()?;
    let scratch = TempDir::new()?;

    common::three_commit_repo(&repos.path().join("compiler"), COMPILER_URL)?;
    let store = create_store(db_dir.path())?;
    register_repository(&store, "compiler", COMPILER_URL)?;

    let config = config_for(store.path(), scratch.path(), LoaderStrategy::BulkCopy);
    let coordinator = Coordinator::new(config, Destination::Database(LoaderStrategy::BulkCopy));

    let first = coordinator.run(repos.path(), 0).await?;
    assert_eq!(first.bulk.map(|b| b.rows_written), Some(2));

    let second = coordinator.run(repos.path(), 0).await;
    match second {
        Err(IngestError::Store(StoreError::PreconditionFailed(_))) => {}
        other => panic!("expected a precondition failure, got {:?}", other),
    }
    assert_eq!(count(&store, "SELECT COUNT(*) FROM commits")?, 2);

    Ok(())
}

#[test]
fn test_oversized_archive_reads_unpacked_sibling() -> Result<()> {
    let repos = TempDir::new()?;
    let scratch = TempDir::new()?;

    let sibling = repos.path().join("compiler");
    common::three_commit_repo(&sibling, COMPILER_URL)?;

    // Sparse file well above the 0.01 GB floor; never read
    let archive = repos.path().join("compiler.tar");
    File::create(&archive)?.set_len(50_000_000)?;

    let materializer = Materializer::new(scratch.path(), 0.01);
    let materialized = materializer.materialize(&archive)?;
    assert!(!materialized.is_scratch());
    assert_eq!(materialized.history_root, sibling);
    assert_eq!(detect_dir(&materialized.history_root), Some(VcsKind::Git));
    materialized.cleanup()?;

    let before = listing(repos.path());
    let reader = RepositoryReader::new(
        materializer,
        Arc::new(BackendRegistry::with_defaults()),
        HistoryExtractor::new(DataPolicy::default()),
    );
    let repository = reader.read(&archive)?;

    assert_eq!(repository.name, "compiler");
    assert_eq!(repository.clone_path, sibling);
    assert_eq!(repository.clone_url, COMPILER_URL);
    assert_eq!(repository.commits.len(), 2);
    assert_eq!(fs::read_dir(scratch.path())?.count(), 0);
    // The sibling directory was not created by the materializer and survives
    assert_eq!(listing(repos.path()), before);

    Ok(())
}

#[tokio::test]
async fn test_document_output_for_packed_repository() -> Result<()> {
    let repos = TempDir::new()?;
    let staging = TempDir::new()?;
    let scratch = TempDir::new()?;
    let out = TempDir::new()?;

    let source = staging.path().join("compiler");
    common::three_commit_repo(&source, COMPILER_URL)?;
    {
        let mut builder = tar::Builder::new(File::create(repos.path().join("compiler.tar"))?);
        builder.append_dir_all("compiler", &source)?;
        builder.finish()?;
    }

    let mut config = config_for(&out.path().join("unused.db"), scratch.path(), LoaderStrategy::Transactional);
    config.data.commit_deltas = true;
    let summary = Coordinator::new(config, Destination::Documents(out.path().to_path_buf()))
        .run(repos.path(), 0)
        .await?;

    assert_eq!(summary.documents, 1);
    let document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("compiler.json"))?)?;
    assert_eq!(document["clone_url"], COMPILER_URL);
    assert_eq!(document["vcs"], "git");
    assert_eq!(document["commits"].as_array().map(Vec::len), Some(2));
    assert_eq!(document["commits"][0]["diff_delta"][0]["new_file_path"], "src/lexer.rs");
    assert_eq!(fs::read_dir(scratch.path())?.count(), 0);

    Ok(())
}
