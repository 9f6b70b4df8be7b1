//! Overlay indexer: `build`, `cleanup`, `status`.
//!
//! Materializes an engine's uncommitted-branch divergence from mainline into
//! `ovl_<engine>`, so search can merge a speculative view over the main
//! index without ever touching it. See `SPEC_FULL.md` §4.4.

use std::path::Path;

use serde::Serialize;

use crate::chunker::{chunk_text, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::config::RailyardConfig;
use crate::embedder::Embedder;
use crate::error::RailyardResult;
use crate::repo::RepoDiff;
use crate::store::Store;
use crate::types::{EngineId, OverlayMeta, Track, Vector, VectorRow};

/// Outcome of an overlay `build` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Neither changed nor deleted files matched the track's patterns; the
    /// overlay table was left untouched.
    NoChanges,
    /// The overlay table was rebuilt.
    Built {
        /// Files read, chunked, and embedded into the new overlay table.
        files_indexed: i64,
        /// Chunks embedded into the new overlay table.
        chunks_indexed: i64,
        /// Files deleted relative to mainline, recorded for search-time
        /// suppression of stale main-table rows.
        deleted_files: Vec<String>,
    },
}

/// Builds, tears down, and reports on one engine's overlay table.
pub struct OverlayIndexer<'a> {
    store: &'a Store,
    embedder: &'a Embedder,
}

impl<'a> OverlayIndexer<'a> {
    /// Construct an overlay indexer over the given store and embedder.
    pub fn new(store: &'a Store, embedder: &'a Embedder) -> Self {
        Self { store, embedder }
    }

    /// Rebuild `engine_id`'s overlay table from `worktree`'s divergence from
    /// mainline, restricted to `track`'s file patterns.
    ///
    /// If neither changed nor deleted files (after filtering) exist, the
    /// overlay table is left as-is and [`BuildOutcome::NoChanges`] is
    /// returned — an unnecessary rebuild would needlessly invalidate any
    /// in-flight search against the current overlay.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RailyardError::StoreError`] on a database
    /// failure, or [`crate::error::RailyardError::RepoError`] if the git
    /// diff cannot be computed.
    pub async fn build(
        &self,
        worktree: &Path,
        engine_id: &EngineId,
        track: &Track,
        config: &RailyardConfig,
    ) -> RailyardResult<BuildOutcome> {
        let included = config.included_patterns_for_track(&track.name, &track.file_patterns);
        let excluded = config.excluded_patterns_for_track(&track.name);
        let include_set = super::main::build_globset(included)?;
        let exclude_set = super::main::build_globset(excluded)?;

        let changed = RepoDiff::changed_files(worktree)?;
        let deleted = RepoDiff::deleted_files(worktree)?;

        let changed: Vec<String> = changed
            .into_iter()
            .filter(|f| matches_track(&include_set, &exclude_set, f))
            .collect();
        let deleted: Vec<String> = deleted
            .into_iter()
            .filter(|f| matches_track(&include_set, &exclude_set, f))
            .collect();

        if changed.is_empty() && deleted.is_empty() {
            return Ok(BuildOutcome::NoChanges);
        }

        let mut rows = Vec::new();
        for filename in &changed {
            let path = worktree.join(filename);
            let content = match std::fs::read(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable overlay file");
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&content).to_string();
            let chunks = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);
            let chunk_texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedder.embed_batch(&chunk_texts);

            for (chunk, embedding) in chunks.iter().zip(embeddings) {
                if let Some(values) = embedding {
                    rows.push(VectorRow {
                        filename: filename.clone(),
                        location: chunk.location.clone(),
                        code: chunk.text.clone(),
                        embedding: Vector::new(values),
                    });
                }
            }
        }

        let table = engine_id.overlay_table_name(&config.overlay_table_prefix);
        self.store.rebuild_overlay_table(&table, &rows).await?;

        let files_indexed = changed.len() as i64;
        let chunks_indexed = rows.len() as i64;
        let now = crate::store::now();

        let existing = self.store.get_overlay_meta(engine_id.as_str()).await?;
        let meta = OverlayMeta {
            engine_id: engine_id.as_str().to_string(),
            track: track.name.clone(),
            branch: RepoDiff::branch(worktree),
            last_commit: RepoDiff::head_commit(worktree).unwrap_or_else(|_| "unknown".to_string()),
            files_indexed,
            chunks_indexed,
            deleted_files: deleted.clone(),
            created_at: existing.map(|m| m.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.upsert_overlay_meta(&meta).await?;

        tracing::info!(
            engine = %engine_id,
            table = %table,
            files_indexed,
            chunks_indexed,
            deleted = deleted.len(),
            "overlay build complete"
        );

        Ok(BuildOutcome::Built { files_indexed, chunks_indexed, deleted_files: deleted })
    }

    /// Drop `engine_id`'s overlay table and metadata row. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RailyardError::StoreError`] on a database
    /// failure.
    pub async fn cleanup(&self, engine_id: &EngineId, config: &RailyardConfig) -> RailyardResult<()> {
        let table = engine_id.overlay_table_name(&config.overlay_table_prefix);
        self.store.drop_overlay_table(&table).await?;
        self.store.delete_overlay_meta(engine_id.as_str()).await?;
        Ok(())
    }

    /// Fetch `engine_id`'s overlay metadata, if any overlay has been built.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RailyardError::StoreError`] on a database
    /// failure.
    pub async fn status(&self, engine_id: &EngineId) -> RailyardResult<Option<OverlayMeta>> {
        self.store.get_overlay_meta(engine_id.as_str()).await
    }
}

fn matches_track(include: &globset::GlobSet, exclude: &globset::GlobSet, filename: &str) -> bool {
    let path = Path::new(filename);
    if !exclude.is_empty() && super::main::matches_any_component(exclude, path) {
        return false;
    }
    include.is_empty() || include.is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_track_filters_by_include_and_exclude() {
        let include = super::super::main::build_globset(&["*.go".to_string()]).unwrap();
        let exclude = super::super::main::build_globset(&["vendor".to_string()]).unwrap();
        assert!(matches_track(&include, &exclude, "handler.go"));
        assert!(!matches_track(&include, &exclude, "handler.py"));
        assert!(!matches_track(&include, &exclude, "vendor/lib.go"));
    }
}
