use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vcs_ingest::config::{Config, LoaderStrategy};
use vcs_ingest::ingest::{Coordinator, Destination, RepositoryReader};
use vcs_ingest::output;
use vcs_ingest::store::Store;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every repository under ROOT and load it into the store
    Ingest {
        /// Directory holding the repositories
        root: PathBuf,

        /// How many directory levels below ROOT the repositories sit
        #[arg(short, long, default_value_t = 0)]
        depth: usize,

        /// Number of extraction workers (0 = available parallelism)
        #[arg(short = 'g', long)]
        workers: Option<usize>,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Load through the bulk-copy window instead of per-repository
        /// transactions
        #[arg(long, conflicts_with = "out_dir")]
        bulk: bool,

        /// Write one JSON document per repository here instead of loading
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Print one repository as a JSON document
    Export {
        /// Repository working directory or .tar archive
        repo: PathBuf,

        /// Include per-file deltas
        #[arg(long)]
        deltas: bool,

        /// Include patch text (implies --deltas)
        #[arg(long)]
        patches: bool,

        /// Scratch directory for archive extraction
        #[arg(long, env = "VCS_INGEST_TMP_DIR")]
        tmp_dir: Option<PathBuf>,

        /// Archives above this size (GB) are read from their unpacked sibling
        #[arg(long)]
        file_size_limit: Option<f64>,

        /// Analysis document (file path or `stdin`) to embed the repository in
        #[arg(long)]
        analysis: Option<String>,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Create the database and apply the schema
    InitDb {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is reserved for documents
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ingest {
            root,
            depth,
            workers,
            config,
            bulk,
            out_dir,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(workers) = workers {
                config.ingest.workers = workers;
            }
            if bulk {
                config.ingest.loader = LoaderStrategy::BulkCopy;
            }
            config.validate()?;

            let destination = match out_dir {
                Some(dir) => Destination::Documents(dir),
                None => Destination::Database(config.ingest.loader),
            };

            let summary = Coordinator::new(config, destination)
                .run(&root, depth)
                .await
                .with_context(|| format!("Ingestion of {} failed", root.display()))?;

            tracing::info!(
                "{} of {} repositories processed ({} failed), {} commits inserted, {} duplicates",
                summary.succeeded,
                summary.discovered,
                summary.failed,
                summary.inserted,
                summary.duplicates
            );
        }

        Command::Export {
            repo,
            deltas,
            patches,
            tmp_dir,
            file_size_limit,
            analysis,
            config,
        } => {
            let mut config = Config::load(config.as_deref())?;
            config.data.commit_deltas |= deltas || patches;
            config.data.commit_patches |= patches;
            if let Some(dir) = tmp_dir {
                config.scratch.dir = dir;
            }
            if let Some(limit) = file_size_limit {
                config.scratch.file_size_limit_gb = limit;
            }
            // Export never loads, so the loader strategy is irrelevant here
            config.ingest.loader = LoaderStrategy::Transactional;
            config.validate()?;

            let reader = RepositoryReader::from_config(&config);
            let target = repo.clone();
            let repository = tokio::task::spawn_blocking(move || reader.read(&target))
                .await
                .context("Export task failed")?
                .with_context(|| format!("Failed to read {}", repo.display()))?;

            let document = match analysis {
                Some(source) => {
                    let analysis = output::read_analysis(&source)
                        .with_context(|| format!("Failed to read analysis from {}", source))?;
                    output::merge_into_analysis(analysis, &repository)?
                }
                None => serde_json::to_value(&repository)?,
            };
            println!("{}", serde_json::to_string_pretty(&document)?);
        }

        Command::InitDb { config } => {
            let config = Config::load(config.as_deref())?;
            let store = Store::from_config(&config.database);
            tokio::task::spawn_blocking(move || store.init_schema())
                .await
                .context("Schema task failed")??;
        }
    }

    Ok(())
}
