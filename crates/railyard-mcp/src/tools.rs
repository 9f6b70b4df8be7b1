//! MCP tool definitions for Railyard.
//!
//! Three tools are exposed: `search_code` (dual-table if an overlay is
//! configured, single-table otherwise), `overlay_status`, and
//! `overlay_refresh`. See `SPEC_FULL.md` §4.6 and §6.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo,
};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use railyard_core::embedder::Embedder;
use railyard_core::indexer::OverlayIndexer;
use railyard_core::search::{DEFAULT_MIN_SCORE, DEFAULT_TOP_K};
use railyard_core::{RailyardConfig, SearchEngine, Store};

/// Cooldown between accepted `overlay_refresh` calls, per `SPEC_FULL.md` §5.
const REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// Timeout for the `overlay build` subprocess invoked by `overlay_refresh`.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything the MCP server needs to serve its three tools, assembled once
/// at startup from the environment.
pub struct ServerContext {
    /// The pgvector-backed store.
    pub store: Store,
    /// The embedding engine.
    pub embedder: Embedder,
    /// `COCOINDEX_MAIN_TABLE` split on `,`. One entry unless this server is
    /// bound to a dispatcher (cross-track) search.
    pub main_tables: Vec<String>,
    /// The engine's overlay table name, if this server is bound to one.
    pub overlay_table: Option<String>,
    /// The engine id this server is bound to, if any.
    pub engine_id: Option<String>,
    /// The track name, used when invoking `overlay build`.
    pub track: String,
    /// The worktree `overlay build` diffs against mainline.
    pub worktree: PathBuf,
    /// The pgvector connection string, forwarded to the `overlay build`
    /// subprocess invoked by `overlay_refresh`.
    pub database_url: String,
    /// Table-naming and glob-pattern configuration.
    pub config: RailyardConfig,
    /// Unix millis of the last accepted `overlay_refresh` call. `0` means
    /// none has been accepted yet.
    pub last_refresh_accepted_ms: Arc<AtomicI64>,
}

/// Parameters for `search_code`.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchCodeParams {
    /// Natural-language or symbol-name query.
    pub query: String,
    /// Maximum number of results to return (default: 10).
    pub top_k: Option<usize>,
    /// Minimum cosine-similarity score a result must clear (default: 0.0).
    pub min_score: Option<f64>,
}

/// The Railyard MCP server.
#[derive(Clone)]
pub struct RailyardMcpServer {
    context: Arc<ServerContext>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl RailyardMcpServer {
    /// Construct a new MCP server bound to the given context.
    pub fn new(context: ServerContext) -> Self {
        Self { context: Arc::new(context), tool_router: Self::tool_router() }
    }

    #[tool(
        name = "search_code",
        description = "Search the codebase with semantic similarity. If this server is bound to an engine with a built overlay, merges the engine's uncommitted changes over the track's committed main index (overlay wins on conflicts, deleted files are suppressed). Returns ranked code chunks with file paths, locations, and scores."
    )]
    async fn search_code(&self, params: Parameters<SearchCodeParams>) -> Result<CallToolResult, McpError> {
        let top_k = params.0.top_k.unwrap_or(DEFAULT_TOP_K);
        let min_score = params.0.min_score.unwrap_or(DEFAULT_MIN_SCORE);
        let engine = SearchEngine::new(&self.context.store, &self.context.embedder);

        let results = match (&self.context.overlay_table, &self.context.engine_id, self.context.main_tables.as_slice()) {
            (Some(overlay_table), Some(engine_id), [main_table, ..]) => {
                engine
                    .search_engine(main_table, overlay_table, engine_id, &params.0.query, top_k, min_score)
                    .await
            }
            (_, _, [main_table]) => engine.search_main(main_table, &params.0.query, top_k, min_score).await,
            (_, _, main_tables) => {
                engine.search_dispatcher(main_tables, &params.0.query, top_k, min_score).await
            }
        };

        match results {
            Ok(rows) if rows.is_empty() => {
                Ok(CallToolResult::success(vec![Content::text("No results found.".to_string())]))
            }
            Ok(rows) => {
                let json = serde_json::to_string_pretty(&rows)
                    .map_err(|e| McpError::internal_error(format!("failed to serialize results: {e}"), None))?;
                Ok(CallToolResult::success(vec![Content::text(json)]))
            }
            Err(e) => Err(McpError::internal_error(format!("search failed: {e}"), None)),
        }
    }

    #[tool(
        name = "overlay_status",
        description = "Report whether this engine's overlay table has been built, and if so, when and against which branch/commit."
    )]
    async fn overlay_status(&self) -> Result<CallToolResult, McpError> {
        let Some(engine_id) = &self.context.engine_id else {
            return Ok(CallToolResult::success(vec![Content::text(
                r#"{"status":"not_bound","message":"this server was not started with an engine id"}"#.to_string(),
            )]));
        };
        let parsed = railyard_core::types::EngineId::parse(engine_id.clone())
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        let indexer = OverlayIndexer::new(&self.context.store, &self.context.embedder);
        match indexer.status(&parsed).await {
            Ok(Some(meta)) => {
                let json = serde_json::to_string_pretty(&meta)
                    .map_err(|e| McpError::internal_error(format!("failed to serialize status: {e}"), None))?;
                Ok(CallToolResult::success(vec![Content::text(json)]))
            }
            Ok(None) => Ok(CallToolResult::success(vec![Content::text(
                r#"{"status":"not_found"}"#.to_string(),
            )])),
            Err(e) => Err(McpError::internal_error(format!("status lookup failed: {e}"), None)),
        }
    }

    #[tool(
        name = "overlay_refresh",
        description = "Rebuild this engine's overlay table from its worktree's current divergence from mainline. Rate-limited to once per 30 seconds; calls within the cooldown are rejected without touching the store."
    )]
    async fn overlay_refresh(&self) -> Result<CallToolResult, McpError> {
        let Some(engine_id) = &self.context.engine_id else {
            return Err(McpError::invalid_params("this server was not started with an engine id", None));
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let last = self.context.last_refresh_accepted_ms.load(Ordering::SeqCst);
        let elapsed_ms = now_ms.saturating_sub(last);
        if last != 0 && elapsed_ms < REFRESH_COOLDOWN.as_millis() as i64 {
            let retry_after_sec = (REFRESH_COOLDOWN.as_millis() as i64 - elapsed_ms) / 1000;
            return Ok(CallToolResult::success(vec![Content::text(format!(
                r#"{{"status":"rate_limited","retry_after_sec":{retry_after_sec}}}"#
            ))]));
        }
        // Accept now, before the subprocess runs: the cooldown guards against
        // overlapping rebuilds, not against slow ones.
        self.context.last_refresh_accepted_ms.store(now_ms, Ordering::SeqCst);

        let mut cmd = Command::new("railyard");
        cmd.arg("overlay")
            .arg("build")
            .arg("--engine-id")
            .arg(engine_id)
            .arg("--worktree")
            .arg(&self.context.worktree)
            .arg("--track")
            .arg(&self.context.track)
            .arg("--file-patterns")
            .arg("*")
            .arg("--database-url")
            .arg(&self.context.database_url);

        let start = Instant::now();
        let output = match timeout(REFRESH_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(McpError::internal_error(format!("failed to spawn overlay build: {e}"), None)),
            Err(_) => {
                return Ok(CallToolResult::success(vec![Content::text(
                    r#"{"status":"timeout","message":"overlay build did not finish within 60 seconds"}"#.to_string(),
                )]));
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let json = serde_json::json!({
                "status": "error",
                "message": message,
                "duration_ms": duration_ms,
            });
            return Ok(CallToolResult::success(vec![Content::text(json.to_string())]));
        }

        // The indexer may log progress lines to stdout ahead of its final
        // result; only the last line is the JSON payload (overlay.py's
        // `build()` does the same: a single `print(json.dumps(result))`).
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str(line.trim()).ok())
            .unwrap_or(serde_json::json!({}));

        let json = serde_json::json!({
            "status": "ok",
            "files_indexed": parsed.get("files_indexed").and_then(serde_json::Value::as_i64).unwrap_or(0),
            "chunks_indexed": parsed.get("chunks_indexed").and_then(serde_json::Value::as_i64).unwrap_or(0),
            "duration_ms": duration_ms,
        });
        Ok(CallToolResult::success(vec![Content::text(json.to_string())]))
    }
}

#[tool_handler]
impl ServerHandler for RailyardMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Railyard provides semantic code search over a multi-engine development \
                 platform. Use search_code for queries; if this server is bound to an \
                 engine, call overlay_refresh after making changes so search reflects them, \
                 and overlay_status to check when the overlay was last built."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}
