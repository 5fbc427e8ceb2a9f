//! # corpus-rag CLI (`crag`)
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the SQLite database and schema |
//! | `crag import <file>` | Load a JSON corpus (documents + knowledge graph) |
//! | `crag search "<query>"` | Run hybrid retrieval and print cited results |
//! | `crag expand "<entity>"` | Show an entity's relationship neighbourhood |
//! | `crag stats` | Print corpus and graph counts |
//! | `crag serve` | Start the HTTP retrieval server |
//!
//! ## Examples
//!
//! ```bash
//! crag init
//! crag import demos/display-tech.json
//! crag search "lightfield displays" --persona david --limit 5
//! crag search "diffractive backlighting patents" --json
//! crag expand "Leia Inc" --max-hops 2
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use corpus_rag::engine::RetrieveOptions;
use corpus_rag::{config, import, migrate, search, server, stats};

/// corpus-rag: relationship-aware hybrid retrieval over a document corpus
/// and knowledge graph.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "corpus-rag — relationship-aware hybrid retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    /// Log filter when `RUST_LOG` is unset (e.g. `info`, `corpus_rag=debug`).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; safe to run repeatedly.
    Init,

    /// Import a JSON corpus file.
    ///
    /// Documents are chunked (and embedded when a provider is configured);
    /// entities, aliases and edges are upserted; the mention index is
    /// rebuilt for every imported document.
    Import {
        /// Path to the corpus file.
        file: PathBuf,
    },

    /// Run hybrid retrieval for a query.
    Search {
        /// The search query string.
        query: String,

        /// Persona id from `[personas.<id>]`.
        #[arg(long)]
        persona: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Relationship expansion depth (clamped to `max_hops_limit`).
        #[arg(long)]
        max_hops: Option<usize>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Resolve an entity and print its relationship neighbourhood.
    Expand {
        /// Entity name, alias, or free text containing one.
        name: String,

        #[arg(long)]
        max_hops: Option<usize>,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP retrieval server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

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
            persona,
            limit,
            max_hops,
            json,
        } => {
            let options = RetrieveOptions {
                persona_id: persona,
                limit,
                max_hops,
                tier_weights: None,
            };
            search::run_search(&cfg, &query, options, json).await?;
        }
        Commands::Expand { name, max_hops } => {
            search::run_expand(&cfg, &name, max_hops).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
