//! Railyard MCP server.
//!
//! Exposes `search_code`, `overlay_status`, and `overlay_refresh` to AI
//! coding agents over the Model Context Protocol's stdio transport. See
//! `SPEC_FULL.md` §6 for the full environment contract.

mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use railyard_core::embedder::{Embedder, EmbeddingConfig};
use railyard_core::{RailyardConfig, Store};
use rmcp::transport::stdio;
use rmcp::ServiceExt;

use tools::{RailyardMcpServer, ServerContext};

/// Railyard MCP server
#[derive(Parser, Debug)]
#[command(name = "railyard-mcp", version, about)]
struct Args {
    /// Path to the `railyard.toml` configuration file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Log level.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Environment variables this server reads. Unset vars fall back to
/// documented defaults; `COCOINDEX_DATABASE_URL` is the only hard
/// requirement.
struct Env {
    database_url: String,
    engine_id: Option<String>,
    track: String,
    /// `COCOINDEX_MAIN_TABLE`, split on `,`. One or more table names; more
    /// than one means dispatcher (cross-track) search mode.
    main_tables: Vec<String>,
    overlay_table: Option<String>,
    worktree: std::path::PathBuf,
}

impl Env {
    fn load() -> Result<Self> {
        let database_url = std::env::var("COCOINDEX_DATABASE_URL")
            .context("COCOINDEX_DATABASE_URL must be set")?;
        let engine_id = std::env::var("COCOINDEX_ENGINE_ID").ok();
        let track = std::env::var("COCOINDEX_TRACK").unwrap_or_else(|_| "default".to_string());
        let main_tables = std::env::var("COCOINDEX_MAIN_TABLE")
            .ok()
            .map(|raw| raw.split(',').map(str::trim).filter(|t| !t.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let overlay_table = std::env::var("COCOINDEX_OVERLAY_TABLE").ok();
        let worktree = std::env::var("COCOINDEX_WORKTREE")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("."));
        Ok(Self { database_url, engine_id, track, main_tables, overlay_table, worktree })
    }
}

fn build_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());
    cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
    cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
        .context("failed to create Postgres connection pool")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let env = Env::load()?;
    let config = RailyardConfig::load(args.config.as_deref())?;

    let pool = build_pool(&env.database_url)?;
    let store = Store::new(pool);

    let embedder = Embedder::new(&EmbeddingConfig::default())?;

    let main_tables = if env.main_tables.is_empty() {
        vec![config.main_table_name(&env.track)]
    } else {
        env.main_tables
    };
    let overlay_table = match (&env.engine_id, &env.overlay_table) {
        (_, Some(t)) => Some(t.clone()),
        (Some(id), None) => {
            railyard_core::types::EngineId::parse(id.clone()).ok().map(|e| e.overlay_table_name(&config.overlay_table_prefix))
        }
        (None, None) => None,
    };

    tracing::info!(
        track = %env.track,
        main_tables = ?main_tables,
        overlay_table = ?overlay_table,
        "railyard-mcp starting"
    );

    let context = ServerContext {
        store,
        embedder,
        main_tables,
        overlay_table,
        engine_id: env.engine_id,
        track: env.track,
        worktree: env.worktree,
        database_url: env.database_url,
        config,
        last_refresh_accepted_ms: Arc::new(std::sync::atomic::AtomicI64::new(0)),
    };

    let server = RailyardMcpServer::new(context);
    let service = server.serve(stdio()).await.context("failed to start MCP service")?;
    service.waiting().await.context("MCP service exited with an error")?;

    Ok(())
}
