//! # PDF RAG CLI (`rag`)
//!
//! Command-line front end for ingesting PDFs, asking questions against the
//! global index or a single session, and maintaining session storage.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create both databases and run schema migrations |
//! | `rag ingest <path>` | Ingest one PDF (into a session) or every PDF in a folder |
//! | `rag ask "<question>"` | Answer from the global index or `--session` |
//! | `rag history` | Print stored exchanges |
//! | `rag cleanup` | Remove sessions that have no chat history |
//! | `rag forget <session_id>` | Remove one session completely |
//! | `rag serve` | Start the HTTP server |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter);
//! results go to stdout.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pdf_rag::cleanup;
use pdf_rag::config;
use pdf_rag::history::HistoryStore;
use pdf_rag::migrate;
use pdf_rag::models::IngestStatus;
use pdf_rag::pipeline::RagPipeline;
use pdf_rag::server;

/// Session-scoped question answering over PDF documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for every option.
#[derive(Parser)]
#[command(name = "rag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index and history databases. Idempotent.
    Init,

    /// Ingest a PDF file or a folder of PDFs.
    ///
    /// A single file is stored under a session (a new one unless `--session`
    /// is given) and indexed globally. A folder is ingested straight into the
    /// global index.
    Ingest {
        path: PathBuf,

        /// Session to store a single file under.
        #[arg(long)]
        session: Option<String>,
    },

    /// Ask a question.
    Ask {
        question: String,

        /// Answer only from this session's uploads.
        #[arg(long)]
        session: Option<String>,
    },

    /// Print chat history, for one session or all of them.
    History {
        #[arg(long)]
        session: Option<String>,
    },

    /// Remove every session folder without chat history.
    Cleanup {
        /// Only report what would be removed.
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove a session's folder, index records and history.
    Forget { session_id: String },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized successfully.");
        }
        Commands::Ingest { path, session } => {
            let pipeline = RagPipeline::from_config(&cfg).await?;
            if path.is_dir() {
                let summary = pipeline.ingest_folder(&path).await?;
                println!("ingest {}", path.display());
                println!("  files found: {}", summary.files_seen);
                println!("  inserted: {}", summary.inserted);
                println!("  skipped (duplicate): {}", summary.skipped_duplicate);
                println!("  failed: {}", summary.failed);
                println!("  no text: {}", summary.no_text);
                println!("  chunks written: {}", summary.chunks_written);
            } else {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let report = pipeline
                    .ingest_upload(bytes, &filename, session.as_deref())
                    .await?;
                println!("ingest {}", report.filename);
                println!("  session: {}", report.session_id.as_deref().unwrap_or("-"));
                println!("  pages: {}", report.pages);
                println!("  file hash: {}", report.file_hash);
                match report.status {
                    IngestStatus::Inserted => println!("  status: inserted"),
                    IngestStatus::SkippedDuplicate => println!("  status: skipped (duplicate)"),
                    IngestStatus::NoText => println!("  status: skipped (no text)"),
                }
            }
            pipeline.close().await;
            println!("ok");
        }
        Commands::Ask { question, session } => {
            let pipeline = RagPipeline::from_config(&cfg).await?;
            let answer = pipeline.answer(&question, session.as_deref()).await?;
            pipeline.close().await;

            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &answer.sources {
                    println!("  {}", source);
                }
            }
        }
        Commands::History { session } => {
            let history = HistoryStore::open(&cfg.history.path).await?;
            let records = match session {
                Some(id) => history.get_history(&id).await?,
                None => history.get_all_history().await?,
            };
            history.close().await;

            if records.is_empty() {
                println!("No history.");
            }
            for record in records {
                println!(
                    "[{}] {}",
                    record.session_id,
                    record.session_name.as_deref().unwrap_or("")
                );
                println!("  Q: {}", record.query);
                println!("  A: {}", record.response);
                if !record.sources.is_empty() {
                    println!("  sources: {}", record.sources);
                }
            }
        }
        Commands::Cleanup { dry_run } => {
            let pipeline = RagPipeline::from_config(&cfg).await?;
            let history = HistoryStore::open(&cfg.history.path).await?;
            let report = cleanup::cleanup_unused_sessions(
                &pipeline,
                &history,
                &cfg.storage.cleanup_log,
                dry_run,
            )
            .await?;
            pipeline.close().await;
            history.close().await;

            println!("{}", report.message);
            for session_id in &report.sessions {
                println!("  {}", session_id);
            }
        }
        Commands::Forget { session_id } => {
            let pipeline = RagPipeline::from_config(&cfg).await?;
            let history = HistoryStore::open(&cfg.history.path).await?;
            let forgotten = cleanup::forget_session(&pipeline, &history, &session_id).await?;
            pipeline.close().await;
            history.close().await;

            println!("forget {}", session_id);
            println!("  folder removed: {}", forgotten.index.folder_removed);
            println!("  records removed: {}", forgotten.index.records_removed);
            println!("  records retained: {}", forgotten.index.records_retained);
            println!("  history removed: {}", forgotten.history_removed);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
