//! # Ragline CLI (`ragline`)
//!
//! ## Usage
//!
//! ```bash
//! ragline --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragline ingest <paths…>` | Load, chunk, embed and index documents |
//! | `ragline search "<query>"` | Retrieve the most similar chunks |
//! | `ragline ask "<query>"` | Answer a question from the indexed documents |
//! | `ragline remove <document-id>` | Drop a document from the index |
//! | `ragline stats` | Show index statistics |
//! | `ragline completions <shell>` | Print shell completions |
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `warn`).

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ragline::{ask, config, ingest, remove, search, stats};

/// Ragline: a local-first retrieval-augmented generation engine.
///
/// All commands except `completions` read a TOML configuration file given
/// by `--config`. See `config/ragline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragline",
    about = "Ragline: ingest documents, search them, and answer questions with citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest files or directories into the index.
    ///
    /// Directories are walked recursively using `[ingest]` include and
    /// exclude globs. Re-ingesting an unchanged file is a no-op; a changed
    /// file replaces its previous version.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Retrieve the chunks most similar to a query.
    Search {
        query: String,

        /// Number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Drop results scoring below this value.
        #[arg(long)]
        threshold: Option<f32>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question using retrieved context.
    ///
    /// Requires a `[generation]` provider. Press Ctrl-C to cancel.
    Ask {
        query: String,

        /// Print the answer and citations as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove a document (by id, as shown by `search`) and save.
    Remove { document_id: String },

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ragline", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { paths } => {
            ingest::run_ingest(&cfg, &paths).await?;
        }
        Commands::Search {
            query,
            k,
            threshold,
            json,
        } => {
            search::run_search(&cfg, &query, k, threshold, json).await?;
        }
        Commands::Ask { query, json } => {
            ask::run_ask(&cfg, &query, json).await?;
        }
        Commands::Remove { document_id } => {
            remove::run_remove(&cfg, &document_id)?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json)?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
