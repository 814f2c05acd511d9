//! Run coordination: locate, materialize, detect, extract and load
//!
//! A [`Coordinator`] run is a small pipeline of tokio tasks:
//!
//! - one blocking producer walking the [`Locator`] into a bounded path queue
//! - `workers` tasks pulling paths and running a [`RepositoryPipeline`] in a
//!   blocking task per repository
//! - with the bulk-copy strategy, one blocking loader task draining a bounded
//!   queue of [`CommitRow`]s into a [`BulkLoader`]
//!
//! Repository failures are logged and counted. Locator, store connection and
//! bulk-window failures abort the run once in-flight work has been cleaned up.

use crate::archive::{Materialized, Materializer};
use crate::config::{Config, LoaderStrategy};
use crate::detect::detect_dir;
use crate::error::{HistoryError, IngestError, StoreError};
use crate::history::{BackendRegistry, HistoryExtractor};
use crate::locator::Locator;
use crate::output;
use crate::store::{
    BulkLoader, BulkReport, CommitRow, LoadReport, Lookups, SqliteCopyTarget, Store,
    TransactionalLoader, commits_is_empty,
};
use crate::types::Repository;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};

/// Where extracted repositories go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Database(LoaderStrategy),
    /// One JSON document per repository, laid out like the repositories
    /// below the run root
    Documents(PathBuf),
}

/// Progress of one candidate through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStage {
    Discovered,
    Materialized,
    Detected,
    Extracted,
    Loaded,
    Failed,
}

impl fmt::Display for RepoStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepoStage::Discovered => "discovered",
            RepoStage::Materialized => "materialized",
            RepoStage::Detected => "detected",
            RepoStage::Extracted => "extracted",
            RepoStage::Loaded => "loaded",
            RepoStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A repository-level failure and the last stage the repository reached
#[derive(Debug, thiserror::Error)]
#[error("{error} (last stage: {stage})")]
pub struct RepoFailure {
    pub stage: RepoStage,
    #[source]
    pub error: IngestError,
}

impl RepoFailure {
    fn at(stage: RepoStage, error: impl Into<IngestError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

/// What became of a repository that made it through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Loaded(LoadReport),
    /// Rows handed to the bulk loader
    Forwarded(usize),
    Written(PathBuf),
}

/// Counters for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Commits extracted across all successful repositories
    pub commits: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub deltas: usize,
    pub documents: usize,
    pub bulk: Option<BulkReport>,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome, commits: usize) {
        self.succeeded += 1;
        self.commits += commits;
        match outcome {
            Outcome::Loaded(report) => {
                self.inserted += report.inserted;
                self.duplicates += report.duplicates;
                self.deltas += report.deltas;
            }
            Outcome::Forwarded(_) => {}
            Outcome::Written(_) => self.documents += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.commits += other.commits;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.deltas += other.deltas;
        self.documents += other.documents;
    }
}

/// Materialize, detect and extract a single candidate path
#[derive(Clone)]
pub struct RepositoryReader {
    materializer: Materializer,
    registry: Arc<BackendRegistry>,
    extractor: HistoryExtractor,
}

impl RepositoryReader {
    pub fn new(
        materializer: Materializer,
        registry: Arc<BackendRegistry>,
        extractor: HistoryExtractor,
    ) -> Self {
        Self {
            materializer,
            registry,
            extractor,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Materializer::from_config(&config.scratch),
            Arc::new(BackendRegistry::with_defaults()),
            HistoryExtractor::new(config.data.policy()),
        )
    }

    /// Read `path` into a [`Repository`], removing any scratch directory
    /// before returning
    pub fn read(&self, path: &Path) -> Result<Repository, RepoFailure> {
        let materialized = self
            .materializer
            .materialize(path)
            .map_err(|e| RepoFailure::at(RepoStage::Discovered, e))?;

        let result = self.read_materialized(&materialized);

        let scratch = materialized.is_scratch();
        if let Err(e) = materialized.cleanup() {
            tracing::warn!(
                "Failed to remove scratch directory for {}: {}",
                path.display(),
                e
            );
        } else if scratch {
            tracing::debug!("Removed scratch directory for {}", path.display());
        }

        result
    }

    fn read_materialized(&self, materialized: &Materialized) -> Result<Repository, RepoFailure> {
        let root = &materialized.history_root;
        let kind = detect_dir(root).ok_or_else(|| {
            RepoFailure::at(
                RepoStage::Materialized,
                HistoryError::NotRecognized(root.display().to_string()),
            )
        })?;

        let extracted = self
            .registry
            .get(kind)
            .and_then(|backend| backend.open(root))
            .and_then(|handle| {
                self.extractor.repository(
                    handle.as_ref(),
                    kind,
                    &materialized.name,
                    &materialized.clone_path,
                )
            });

        extracted.map_err(|e| RepoFailure::at(RepoStage::Detected, e))
    }
}

/// Where a pipeline hands off extracted repositories
#[derive(Clone)]
enum Sink {
    Transactional(TransactionalLoader),
    Bulk {
        lookups: Arc<Lookups>,
        rows: mpsc::Sender<CommitRow>,
    },
    Documents {
        out_dir: PathBuf,
        root: PathBuf,
        /// Document paths already written during this run
        claimed: Arc<Mutex<HashSet<PathBuf>>>,
    },
}

impl Sink {
    fn deliver(&self, repo: &Repository) -> Result<Outcome, IngestError> {
        match self {
            Sink::Transactional(loader) => Ok(Outcome::Loaded(loader.load(repo)?)),
            Sink::Bulk { lookups, rows } => {
                let repository_id = lookups.require_repository(&repo.clone_url)?;
                let mut forwarded = 0;
                for commit in &repo.commits {
                    let row = CommitRow::resolve(commit.clone(), repository_id, lookups);
                    if rows.blocking_send(row).is_err() {
                        return Err(IngestError::other("bulk loader stopped accepting rows"));
                    }
                    forwarded += 1;
                }
                Ok(Outcome::Forwarded(forwarded))
            }
            Sink::Documents {
                out_dir,
                root,
                claimed,
            } => {
                let relative = output::document_path(root, &repo.clone_path);
                if !claimed.blocking_lock().insert(relative.clone()) {
                    return Err(IngestError::other(format!(
                        "document {} was already written by another repository",
                        relative.display()
                    )));
                }
                Ok(Outcome::Written(output::write_document(out_dir, &relative, repo)?))
            }
        }
    }
}

/// Per-repository work: read the history, then hand it to the sink
#[derive(Clone)]
struct RepositoryPipeline {
    reader: RepositoryReader,
    sink: Sink,
}

impl RepositoryPipeline {
    fn process(&self, path: &Path) -> Result<(Outcome, usize), RepoFailure> {
        let repo = self.reader.read(path)?;
        tracing::debug!(
            "Extracted {} commits from {} ({})",
            repo.commits.len(),
            repo.name,
            repo.clone_url
        );

        let outcome = self
            .sink
            .deliver(&repo)
            .map_err(|e| RepoFailure::at(RepoStage::Extracted, e))?;
        Ok((outcome, repo.commits.len()))
    }
}

/// Drives a whole ingestion run
pub struct Coordinator {
    config: Config,
    destination: Destination,
    registry: Arc<BackendRegistry>,
}

impl Coordinator {
    pub fn new(config: Config, destination: Destination) -> Self {
        Self {
            config,
            destination,
            registry: Arc::new(BackendRegistry::with_defaults()),
        }
    }

    /// Replace the default backend set
    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest every repository found `depth` levels below `root`
    pub async fn run(&self, root: &Path, depth: usize) -> Result<RunSummary, IngestError> {
        let started = Instant::now();
        let abort = Arc::new(AtomicBool::new(false));

        let (sink, loader) = self.prepare_sink(root, abort.clone()).await?;
        let pipeline = RepositoryPipeline {
            reader: RepositoryReader::new(
                Materializer::from_config(&self.config.scratch),
                self.registry.clone(),
                HistoryExtractor::new(self.config.data.policy()),
            ),
            sink,
        };

        let capacity = self.config.ingest.queue_capacity.max(1);
        let (path_tx, path_rx) = mpsc::channel::<PathBuf>(capacity);
        let producer = spawn_producer(root.to_path_buf(), depth, path_tx, abort.clone());

        let workers = self.config.ingest.effective_workers();
        tracing::info!(
            "Ingesting repositories under {} (depth {}, {} workers)",
            root.display(),
            depth,
            workers
        );

        let path_rx = Arc::new(Mutex::new(path_rx));
        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            tasks.spawn(run_worker(
                worker,
                pipeline.clone(),
                path_rx.clone(),
                abort.clone(),
            ));
        }
        // Workers hold the remaining row senders and path receivers, so the
        // producer's sends fail once the last worker exits
        drop(pipeline);
        drop(path_rx);

        let mut summary = RunSummary::default();
        let mut worker_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((tally, fatal)) => {
                    summary.merge(tally);
                    if let Some(err) = fatal {
                        worker_error.get_or_insert(err);
                    }
                }
                Err(e) => {
                    abort.store(true, Ordering::SeqCst);
                    worker_error.get_or_insert(IngestError::other(format!(
                        "worker task failed: {}",
                        e
                    )));
                }
            }
        }

        let located = producer
            .await
            .map_err(|e| IngestError::other(format!("locator task failed: {}", e)))?;

        if let Some(loader) = loader {
            let report = loader
                .await
                .map_err(|e| IngestError::other(format!("bulk loader task failed: {}", e)))??;
            summary.inserted = report.rows_written;
            summary.duplicates = report.duplicates;
            summary.bulk = Some(report);
        }

        let discovered = located?;
        summary.discovered = discovered;
        if let Some(err) = worker_error {
            return Err(err);
        }

        tracing::info!(
            "Run finished in {:.2?}: {} discovered, {} succeeded, {} failed, {} commits",
            started.elapsed(),
            summary.discovered,
            summary.succeeded,
            summary.failed,
            summary.commits
        );
        Ok(summary)
    }

    /// Fatal preflight plus, for bulk copy, the loader task
    async fn prepare_sink(
        &self,
        root: &Path,
        abort: Arc<AtomicBool>,
    ) -> Result<(Sink, Option<JoinHandle<Result<BulkReport, StoreError>>>), IngestError> {
        let strategy = match &self.destination {
            Destination::Documents(dir) => {
                std::fs::create_dir_all(dir)?;
                let sink = Sink::Documents {
                    out_dir: dir.clone(),
                    root: root.to_path_buf(),
                    claimed: Arc::new(Mutex::new(HashSet::new())),
                };
                return Ok((sink, None));
            }
            Destination::Database(strategy) => *strategy,
        };

        let store = Store::from_config(&self.config.database);
        match strategy {
            LoaderStrategy::Transactional => {
                let lookups = {
                    let store = store.clone();
                    tokio::task::spawn_blocking(move || -> Result<Lookups, StoreError> {
                        let conn = store.connect()?;
                        Lookups::load(&conn)
                    })
                    .await
                    .map_err(|e| IngestError::other(format!("preflight task failed: {}", e)))??
                };
                let loader = TransactionalLoader::new(store, Arc::new(lookups));
                Ok((Sink::Transactional(loader), None))
            }
            LoaderStrategy::BulkCopy => {
                let (target, lookups) = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
                    let target = SqliteCopyTarget::open(&store)?;
                    if !commits_is_empty(target.connection())? {
                        return Err(StoreError::PreconditionFailed(format!(
                            "bulk copy requires an empty commits table in {}",
                            store.path().display()
                        )));
                    }
                    let lookups = Lookups::load(target.connection())?;
                    Ok((target, lookups))
                })
                .await
                .map_err(|e| IngestError::other(format!("preflight task failed: {}", e)))??;

                let capacity = self.config.ingest.queue_capacity.max(1);
                let (row_tx, row_rx) = mpsc::channel(capacity);
                let batch_size = self.config.ingest.commits_per_transaction;
                let retries = self.config.ingest.bulk_batch_retries;
                let loader = spawn_bulk_loader(target, batch_size, retries, row_rx, abort);

                let sink = Sink::Bulk {
                    lookups: Arc::new(lookups),
                    rows: row_tx,
                };
                Ok((sink, Some(loader)))
            }
        }
    }
}

fn spawn_producer(
    root: PathBuf,
    depth: usize,
    paths: mpsc::Sender<PathBuf>,
    abort: Arc<AtomicBool>,
) -> JoinHandle<Result<usize, IngestError>> {
    tokio::task::spawn_blocking(move || {
        let locator = Locator::new(&root, depth).with_cancellation_flag(abort.clone());
        let mut discovered = 0;

        for candidate in locator {
            match candidate {
                Ok(path) => {
                    discovered += 1;
                    tracing::debug!("Discovered {}", path.display());
                    if paths.blocking_send(path).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Locator failed, aborting run: {}", e);
                    abort.store(true, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        }

        tracing::debug!("Locator finished with {} candidates", discovered);
        Ok(discovered)
    })
}

fn spawn_bulk_loader(
    target: SqliteCopyTarget,
    batch_size: usize,
    retries: usize,
    mut rows: mpsc::Receiver<CommitRow>,
    abort: Arc<AtomicBool>,
) -> JoinHandle<Result<BulkReport, StoreError>> {
    tokio::task::spawn_blocking(move || {
        let mut loader = BulkLoader::new(target, batch_size, retries);
        let result = loader.run(std::iter::from_fn(|| rows.blocking_recv()));
        if let Err(e) = &result {
            tracing::error!("Bulk load failed, aborting run: {}", e);
            abort.store(true, Ordering::SeqCst);
        }
        result
    })
}

async fn run_worker(
    worker: usize,
    pipeline: RepositoryPipeline,
    paths: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    abort: Arc<AtomicBool>,
) -> (RunSummary, Option<IngestError>) {
    let mut tally = RunSummary::default();

    loop {
        if abort.load(Ordering::SeqCst) {
            tracing::debug!("Worker {} stopping: run aborted", worker);
            break;
        }
        let next = paths.lock().await.recv().await;
        let Some(path) = next else {
            break;
        };

        let job = pipeline.clone();
        let job_path = path.clone();
        let processed = tokio::task::spawn_blocking(move || job.process(&job_path)).await;

        match processed {
            Ok(Ok((outcome, commits))) => {
                tracing::info!(
                    "Repository {} {}: {} commits",
                    path.display(),
                    RepoStage::Loaded,
                    commits
                );
                tally.record(&outcome, commits);
            }
            Ok(Err(failure)) => {
                tracing::error!(
                    "Repository {} {}: {}",
                    path.display(),
                    RepoStage::Failed,
                    failure
                );
                tally.failed += 1;
                if failure.error.is_fatal() {
                    tracing::error!("Worker {} aborting run", worker);
                    abort.store(true, Ordering::SeqCst);
                    return (tally, Some(failure.error));
                }
            }
            Err(e) => {
                tracing::error!("Repository {} task panicked: {}", path.display(), e);
                tally.failed += 1;
            }
        }
    }

    (tally, None)
}
