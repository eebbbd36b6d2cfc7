//! # corpus-index CLI (`cdx`)
//!
//! The `cdx` binary drives the indexing pipeline and queries the result.
//!
//! ## Usage
//!
//! ```bash
//! cdx --config ./cdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cdx build` | Scan the source tree, chunk, embed, and persist the index pair |
//! | `cdx append <files...>` | Embed and add chunks from specific files |
//! | `cdx search "<query>"` | Hybrid lexical + semantic search |
//! | `cdx verify` | Check vector/metadata parity of the persisted pair |
//! | `cdx stats` | Print index contents summary |
//!
//! Progress is written to stderr; command output goes to stdout so it
//! stays parseable for scripts.

mod batcher;
mod build;
mod checkpoint;
mod chunker;
mod config;
mod embedding;
mod error;
mod index;
mod models;
mod progress;
mod reader;
mod retrieve;
mod search;
mod stats;
mod tokens;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::progress::ProgressMode;

/// corpus-index CLI — structure-aware chunking, checkpointed embedding,
/// and hybrid retrieval over a persisted vector index.
#[derive(Parser)]
#[command(
    name = "cdx",
    about = "Structure-aware chunking, checkpointed embedding, and hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./cdx.toml")]
    config: PathBuf,

    /// Progress output: auto (human when stderr is a TTY), human, json, off.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the index from the configured source tree.
    ///
    /// Scans `sources.root`, chunks every matching file, embeds the chunks
    /// in batches, and writes the vector/metadata pair. Embedding progress
    /// is checkpointed; re-running after a failure resumes past completed
    /// batches.
    Build,

    /// Add chunks from specific files to an existing index.
    ///
    /// Chunks already present (same source and text hash) are skipped.
    Append {
        /// Files to chunk, embed, and append.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Search the index.
    ///
    /// Fuses BM25 over chunk text with L2 nearest-neighbour similarity.
    /// Falls back to lexical-only ranking when the embedding provider is
    /// unavailable.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long = "top-k")]
        top_k: Option<usize>,

        /// Skip query embedding and rank by BM25 only.
        #[arg(long)]
        lexical_only: bool,
    },

    /// Check the persisted vector/metadata pair for corruption.
    ///
    /// Exits non-zero when the vector count and record count disagree or
    /// either file is unreadable. Never modifies the pair.
    Verify,

    /// Print a summary of the index contents.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let progress_mode = match cli.progress.as_str() {
        "auto" => ProgressMode::default_for_tty(),
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        "off" => ProgressMode::Off,
        other => anyhow::bail!("Unknown progress mode: {}. Use auto, human, json, or off.", other),
    };
    let reporter = progress_mode.reporter();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build => {
            build::run_build(&cfg, reporter.as_ref()).await?;
        }
        Commands::Append { files } => {
            build::run_append(&cfg, &files, reporter.as_ref()).await?;
        }
        Commands::Search {
            query,
            top_k,
            lexical_only,
        } => {
            search::run_search(&cfg, &query, top_k, lexical_only).await?;
        }
        Commands::Verify => {
            stats::run_verify(&cfg)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}
