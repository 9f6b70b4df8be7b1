//! Railyard CLI.
//!
//! Command-line interface for the main indexer, the overlay indexer, and
//! the per-track `build-all` orchestrator. See `SPEC_FULL.md` §4.3-4.7.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};

use railyard_core::embedder::{Embedder, EmbeddingConfig};
use railyard_core::fingerprint::FingerprintStore;
use railyard_core::indexer::{orchestrator, MainIndexer, Orchestrator, OverlayIndexer};
use railyard_core::types::{EngineId, Track};
use railyard_core::{RailyardConfig, Store};

/// Railyard - semantic code search over a multi-engine development platform
#[derive(Parser, Debug)]
#[command(name = "railyard", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Path to `railyard.toml`. Defaults to `./railyard.toml` if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build (or rebuild) one track's main index table.
    Index {
        /// Track name.
        #[arg(long)]
        track: String,

        /// Optional tree-sitter language hint for the track manifest (accepted
        /// for wire compatibility; unused by this chunker).
        #[arg(long)]
        language: Option<String>,

        /// Glob patterns selecting which files belong to this track.
        #[arg(long = "pattern")]
        file_patterns: Vec<String>,

        /// Repository root to index.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Re-embed every file regardless of its recorded fingerprint.
        #[arg(long)]
        force: bool,

        /// Path to the local fingerprint database.
        #[arg(long)]
        fingerprint_db: Option<PathBuf>,
    },

    /// Build every track named in a manifest, isolating per-track failures.
    BuildAll {
        /// Path to the track manifest (TOML).
        #[arg(long)]
        manifest: PathBuf,

        /// Restrict the build to these track names (default: all).
        #[arg(long = "tracks", value_delimiter = ',')]
        tracks: Vec<String>,

        /// Repository root to index.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Re-embed every file regardless of its recorded fingerprint.
        #[arg(long)]
        force: bool,

        /// Path to the local fingerprint database.
        #[arg(long)]
        fingerprint_db: Option<PathBuf>,
    },

    /// Overlay indexer subcommands.
    Overlay {
        #[command(subcommand)]
        command: OverlayCommands,
    },

    /// Start the MCP server (delegates to `railyard-mcp`).
    Mcp,
}

#[derive(Subcommand, Debug)]
enum OverlayCommands {
    /// Rebuild an engine's overlay table from its worktree's divergence from
    /// mainline.
    Build {
        /// Engine id (sanitized to `^[A-Za-z0-9_-]+$`).
        #[arg(long = "engine-id")]
        engine_id: String,

        /// Worktree to diff against mainline.
        #[arg(long)]
        worktree: PathBuf,

        /// Track the engine was built against.
        #[arg(long)]
        track: String,

        /// Glob patterns selecting which files belong to this track.
        #[arg(long = "file-patterns")]
        file_patterns: Vec<String>,

        /// pgvector database URL. Falls back to `COCOINDEX_DATABASE_URL` if
        /// omitted.
        #[arg(long = "database-url")]
        database_url: Option<String>,
    },

    /// Drop an engine's overlay table and metadata row.
    Cleanup {
        /// Engine id.
        #[arg(long = "engine-id")]
        engine_id: String,

        /// pgvector database URL. Falls back to `COCOINDEX_DATABASE_URL` if
        /// omitted.
        #[arg(long = "database-url")]
        database_url: Option<String>,
    },

    /// Report an engine's overlay metadata.
    Status {
        /// Engine id.
        #[arg(long = "engine-id")]
        engine_id: String,

        /// pgvector database URL. Falls back to `COCOINDEX_DATABASE_URL` if
        /// omitted.
        #[arg(long = "database-url")]
        database_url: Option<String>,
    },
}

fn build_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());
    cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
    cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls).context("failed to create Postgres connection pool")
}

fn default_fingerprint_db() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("railyard").join("fingerprints.sqlite3")
}

fn database_url(explicit: Option<String>) -> Result<String> {
    match explicit {
        Some(url) => Ok(url),
        None => std::env::var("COCOINDEX_DATABASE_URL")
            .context("--database-url or COCOINDEX_DATABASE_URL must be set"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(&cli.log_level).init();

    let config = RailyardConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Index { track, language, file_patterns, repo, force, fingerprint_db } => {
            let pool = build_pool(&database_url(None)?)?;
            let store = Store::new(pool);
            let embedder = Embedder::new(&EmbeddingConfig::default())?;
            let fp_path = fingerprint_db.unwrap_or_else(default_fingerprint_db);
            if let Some(parent) = fp_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let fingerprints = FingerprintStore::open(&fp_path)?;

            let indexer = MainIndexer::new(&store, &embedder, &fingerprints);
            let track = Track { name: track, language, file_patterns };
            let report = indexer.build_track(&repo, &track, &config, force).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::BuildAll { manifest, tracks, repo, force, fingerprint_db } => {
            let all_tracks = orchestrator::load_manifest(&manifest)?;
            let selected = orchestrator::filter_tracks(all_tracks, &tracks)?;

            let pool = build_pool(&database_url(None)?)?;
            let store = Store::new(pool);
            let embedder = Embedder::new(&EmbeddingConfig::default())?;
            let fp_path = fingerprint_db.unwrap_or_else(default_fingerprint_db);
            if let Some(parent) = fp_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let fingerprints = FingerprintStore::open(&fp_path)?;

            let orchestrator = Orchestrator::new(&store, &embedder, &fingerprints);
            let outcomes = orchestrator.build_all(&repo, &selected, &config, force).await;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);

            if outcomes.iter().any(|o| matches!(o, railyard_core::indexer::TrackOutcome::Failed { .. })) {
                anyhow::bail!("one or more tracks failed to build");
            }
        }

        Commands::Overlay { command } => match command {
            OverlayCommands::Build { engine_id, worktree, track, file_patterns, database_url: db_url } => {
                let pool = build_pool(&database_url(db_url)?)?;
                let store = Store::new(pool);
                let embedder = Embedder::new(&EmbeddingConfig::default())?;
                let engine_id = EngineId::parse(engine_id)?;
                let track = Track { name: track, language: None, file_patterns };

                let indexer = OverlayIndexer::new(&store, &embedder);
                let outcome = indexer.build(&worktree, &engine_id, &track, &config).await?;
                // Compact, single-line JSON: callers like railyard-mcp's
                // overlay_refresh tool parse this as the last line of stdout.
                println!("{}", serde_json::to_string(&outcome)?);
            }
            OverlayCommands::Cleanup { engine_id, database_url: db_url } => {
                let pool = build_pool(&database_url(db_url)?)?;
                let store = Store::new(pool);
                let embedder = Embedder::new(&EmbeddingConfig::default())?;
                let engine_id = EngineId::parse(engine_id)?;

                let indexer = OverlayIndexer::new(&store, &embedder);
                indexer.cleanup(&engine_id, &config).await?;
                println!(r#"{{"status":"ok"}}"#);
            }
            OverlayCommands::Status { engine_id, database_url: db_url } => {
                let pool = build_pool(&database_url(db_url)?)?;
                let store = Store::new(pool);
                let embedder = Embedder::new(&EmbeddingConfig::default())?;
                let engine_id = EngineId::parse(engine_id)?;

                let indexer = OverlayIndexer::new(&store, &embedder);
                match indexer.status(&engine_id).await? {
                    Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
                    None => println!(r#"{{"status":"not_found"}}"#),
                }
            }
        },

        Commands::Mcp => {
            let status = std::process::Command::new("railyard-mcp")
                .status()
                .context("failed to spawn railyard-mcp")?;
            std::process::exit(status.code().unwrap_or(1));
        }
    }

    Ok(())
}
