//! # ArchMen CLI (`archmen`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `archmen init` | Create the SQLite database and run schema migrations |
//! | `archmen serve` | Start the HTTP server |
//! | `archmen create <kind> <title>` | Create an assessment or archetype |
//! | `archmen chunk <file>` | Preview chunk boundaries for a file |
//! | `archmen process <kind> <id> <file>` | Chunk, embed, and store a file |
//! | `archmen search <kind> <id> "<query>"` | Similarity search within one parent |
//!
//! ## Examples
//!
//! ```bash
//! archmen init --config ./config/archmen.toml
//! archmen create archetype "The Sage"
//! archmen process archetype 6f1c… ./docs/sage.md
//! archmen search archetype 6f1c… "seeking truth" --limit 3
//! archmen serve --config ./config/archmen.toml
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use archmen::config::{self, Config};
use archmen::pipeline::{process_content, ProcessContext, ProcessInput, SettingsPatch};
use archmen::sqlite_store::SqliteStore;
use archmen::{db, embedding, migrate, server};
use archmen_core::chunk;
use archmen_core::embedding::{embed_checked, truncate_input};
use archmen_core::models::{ContentOwner, OwnerKind};
use archmen_core::store::KnowledgeStore;

/// ArchMen, a retrieval-augmented knowledge service for archetype discovery.
#[derive(Parser)]
#[command(name = "archmen", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/archmen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Create an assessment or archetype and print its id.
    Create {
        /// `assessment` or `archetype`.
        kind: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Print the chunks a file would be split into.
    Chunk {
        file: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Chunk, embed, and store a text file as the content of a parent.
    ///
    /// Replaces any content previously stored for that parent.
    Process {
        /// `assessment` or `archetype`.
        kind: String,
        id: String,
        file: PathBuf,
        #[arg(long)]
        source_url: Option<String>,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Similarity search within the content of one parent.
    Search {
        /// `assessment` or `archetype`.
        kind: String,
        id: String,
        query: String,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("archmen=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_kind(kind: &str) -> anyhow::Result<OwnerKind> {
    match OwnerKind::parse(kind) {
        Some(k) => Ok(k),
        None => bail!("Unknown kind '{}'. Must be assessment or archetype.", kind),
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn open_store(cfg: &Config) -> anyhow::Result<SqliteStore> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteStore::new(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Chunk previews work without a config file.
    if let Commands::Chunk {
        file,
        chunk_size,
        chunk_overlap,
    } = &cli.command
    {
        let cfg = config::load_config(&cli.config).unwrap_or_default();
        let text = read_text(file)?;
        let pieces = chunk::chunk_text(
            &text,
            chunk_size.unwrap_or(cfg.chunking.chunk_size),
            chunk_overlap.unwrap_or(cfg.chunking.chunk_overlap),
        )?;
        println!("{} chunks", pieces.len());
        for p in &pieces {
            let preview: String = p.text.chars().take(60).collect();
            println!(
                "[{}] {}..{} ({} chars, overlap {}) {:?}",
                p.index,
                p.start,
                p.end,
                p.size(),
                p.overlap,
                preview
            );
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Create {
            kind,
            title,
            description,
        } => {
            let kind = parse_kind(&kind)?;
            let store = open_store(&cfg).await?;
            let parent = store
                .create_parent(kind, &title, description.as_deref())
                .await?;
            println!("{}", parent.id);
        }
        Commands::Process {
            kind,
            id,
            file,
            source_url,
            chunk_size,
            chunk_overlap,
        } => {
            let owner = ContentOwner::new(parse_kind(&kind)?, id);
            let text = read_text(&file)?;
            let store = open_store(&cfg).await?;
            let embedder = embedding::create_provider(&cfg.embedding)?;
            let ctx = ProcessContext {
                config: &cfg,
                store: &store,
                embedder: embedder.as_ref(),
            };
            let outcome = process_content(
                &ctx,
                ProcessInput {
                    owner: owner.clone(),
                    text,
                    source_url,
                    settings: SettingsPatch {
                        chunk_size,
                        chunk_overlap,
                        ..Default::default()
                    },
                },
            )
            .await?;
            println!("Stored {} chunks for {}", outcome.chunks.len(), owner);
        }
        Commands::Search {
            kind,
            id,
            query,
            threshold,
            limit,
        } => {
            let owner = ContentOwner::new(parse_kind(&kind)?, id);
            let threshold = threshold.unwrap_or(cfg.retrieval.threshold);
            if !(0.0..=1.0).contains(&threshold) {
                bail!("threshold must be between 0 and 1, got {}", threshold);
            }
            let limit = limit.unwrap_or(cfg.retrieval.limit);
            if limit == 0 {
                bail!("limit must be at least 1");
            }
            let store = open_store(&cfg).await?;
            if store.get_parent(&owner).await?.is_none() {
                bail!("{} not found", owner);
            }
            let embedder = embedding::create_provider(&cfg.embedding)?;
            let model = store
                .get_settings(&owner)
                .await?
                .map(|s| s.embedding_model)
                .unwrap_or_else(|| cfg.embedding.model.clone());
            let input = truncate_input(&query, cfg.embedding.max_input_chars);
            let query_vec = embed_checked(embedder.as_ref(), &model, input).await?;
            let results = store
                .similarity_search(&query_vec, &owner, threshold, limit)
                .await?;

            if results.is_empty() {
                println!("No results.");
            }
            for (i, hit) in results.iter().enumerate() {
                let preview: String = hit.content.chars().take(120).collect();
                println!(
                    "{}. [{:.3}] chunk {}: {}",
                    i + 1,
                    hit.similarity,
                    hit.chunk_index,
                    preview.replace('\n', " ")
                );
            }
        }
        Commands::Chunk { .. } => {}
    }

    Ok(())
}
