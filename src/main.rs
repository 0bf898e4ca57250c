//! # Chat Recall CLI (`recall`)
//!
//! ## Usage
//!
//! ```bash
//! recall --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and run schema migrations |
//! | `recall import <file>` | Import conversations from a JSONL archive |
//! | `recall embed pending` | Backfill missing message embeddings |
//! | `recall search "<query>"` | Search messages, optionally with context windows |
//! | `recall serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Keyword-only search, no embedding provider needed
//! recall search "tomato watering" --mode lexical
//!
//! # Hybrid search returning conversation windows
//! recall search "tomato watering" --context 2 --max-tokens 400
//!
//! # Machine-readable output
//! recall search "tomato watering" --context 2 --json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_recall::search::SearchOptions;
use chat_recall::{config, embed_cmd, import, migrate, search, server};
use chat_recall_core::api::SearchMode;

/// Chat Recall: hybrid contextual search over imported chat archives.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recall.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Chat Recall: hybrid contextual search over imported chat archives",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Import conversations from a JSONL file (one conversation per line).
    Import {
        /// Path to the JSONL archive.
        file: PathBuf,
    },

    /// Search imported messages.
    ///
    /// Without `--context`, `--before` or `--after`, prints one entry per
    /// matched message. With any of them, prints conversation windows
    /// around each match.
    Search {
        /// The search query string.
        query: String,

        /// `hybrid`, `semantic`, or `lexical`. Hybrid and semantic need an
        /// embedding provider.
        #[arg(long, default_value = "hybrid", value_parser = parse_mode)]
        mode: SearchMode,

        /// Messages of context on each side of a match (0-10).
        #[arg(long)]
        context: Option<usize>,

        /// Messages of context before a match; overrides `--context`.
        #[arg(long)]
        before: Option<usize>,

        /// Messages of context after a match; overrides `--context`.
        #[arg(long)]
        after: Option<usize>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Token budget per window (0 = unlimited).
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Keep overlapping windows separate.
        #[arg(long)]
        no_dedup: bool,

        /// Use fixed window sizes instead of extending to turn boundaries.
        #[arg(long)]
        no_adaptive: bool,

        /// Omit CTX/MATCH marker lines from window content.
        #[arg(long)]
        no_markers: bool,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed messages that have no stored vector.
    Pending {
        /// Maximum number of messages to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without embedding anything.
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_mode(s: &str) -> Result<SearchMode, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Search {
            query,
            mode,
            context,
            before,
            after,
            limit,
            max_tokens,
            no_dedup,
            no_adaptive,
            no_markers,
            json,
        } => {
            let options = SearchOptions {
                mode,
                context,
                before,
                after,
                limit,
                max_tokens,
                no_dedup,
                no_adaptive,
                no_markers,
                json,
            };
            search::run_search(&cfg, &query, &options).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
