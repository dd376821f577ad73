//! # docquery CLI (`dq`)
//!
//! Answers questions from a folder of PDF and DOCX documents, falling back to
//! a generation service when nothing in the documents matches.
//!
//! ## Usage
//!
//! ```bash
//! dq --config ./config/dq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dq ask "<query>"` | Resolve one query and print the answer |
//! | `dq preprocess` | Extract and cache every document |
//! | `dq status` | Show cache freshness per document |
//! | `dq extract <path>` | Print the extracted text of one file |
//! | `dq serve` | Start the HTTP query endpoint |
//!
//! Logs go to stderr; set `RUST_LOG` (default `docquery=info`) to adjust.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use docquery::config::{self, ExtractionConfig};
use docquery::extract::Extractor;
use docquery::progress::ProgressMode;
use docquery::resolver::{format_result, Resolver};
use docquery::{server, status};

/// docquery: answer questions from your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dq.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dq",
    about = "Answer questions from a folder of PDF and DOCX documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a query against the documents and print the answer.
    ///
    /// Prints matching snippets as `found in <document> (page <n>): <snippet>`,
    /// or the fallback's reply when nothing matches.
    Ask {
        /// The question or phrase to look up.
        query: String,

        /// Print the result as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Extract and cache the text of every document.
    ///
    /// Later queries then only read the cache. Documents that fail are
    /// reported and skipped; the command itself still succeeds.
    Preprocess {
        /// Progress output on stderr.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Show every document and whether its cached text is fresh.
    Status,

    /// Print the extracted text of one file, bypassing the cache.
    Extract {
        /// Path to a PDF or DOCX file.
        path: PathBuf,
    },

    /// Start the HTTP query endpoint on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Human,
    Json,
    Off,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docquery=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ask { query, json } => {
            let resolver = load_resolver(&cli.config)?;
            let result = resolver.resolve(&query).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", format_result(&result));
            }
        }
        Commands::Preprocess { progress } => {
            let resolver = load_resolver(&cli.config)?;
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let reporter = progress.mode().reporter();
            let summary = resolver.preprocess(reporter.as_ref(), &cancel).await?;
            println!(
                "{} documents: {} cached, {} extracted, {} failed, {} unsupported",
                summary.total,
                summary.cached,
                summary.extracted,
                summary.failed,
                summary.unsupported
            );
        }
        Commands::Status => {
            let resolver = load_resolver(&cli.config)?;
            status::run_status(&resolver).await?;
        }
        Commands::Extract { path } => {
            // Works without a config file
            let extraction = config::load_config(&cli.config)
                .map(|c| c.extraction)
                .unwrap_or_else(|_| ExtractionConfig::default());
            let extracted = Extractor::new(&extraction)
                .extract_path(&path)
                .await
                .with_context(|| format!("Failed to extract {}", path.display()))?;
            println!("{}", extracted.text);
        }
        Commands::Serve => {
            let resolver = load_resolver(&cli.config)?;
            server::run_server(Arc::new(resolver)).await?;
        }
    }

    Ok(())
}

fn load_resolver(path: &Path) -> anyhow::Result<Resolver> {
    let cfg = config::load_config(path)?;
    Resolver::from_config(Arc::new(cfg))
}
