//! Search engine: single-table, multi-track dispatcher, and engine
//! (main+overlay) query modes. Grounded in the reference `search` /
//! `merge_results` / `query_table` functions. See `SPEC_FULL.md` §4.5-4.6.

use std::collections::HashMap;

use crate::embedder::Embedder;
use crate::error::{RailyardError, RailyardResult};
use crate::store::Store;
use crate::types::{SearchResult, Vector};

/// Default number of results returned by a search unless the caller asks
/// for more.
pub const DEFAULT_TOP_K: usize = 10;

/// Default minimum cosine-similarity score a result must clear.
pub const DEFAULT_MIN_SCORE: f64 = 0.0;

/// Runs searches against one or more vector tables and merges the results.
pub struct SearchEngine<'a> {
    store: &'a Store,
    embedder: &'a Embedder,
}

impl<'a> SearchEngine<'a> {
    /// Construct a search engine over the given store and embedder.
    pub fn new(store: &'a Store, embedder: &'a Embedder) -> Self {
        Self { store, embedder }
    }

    fn embed_query(&self, query: &str) -> RailyardResult<Vector> {
        let values = self.embedder.embed_single(query)?;
        Ok(Vector::new(values))
    }

    /// Search a single main table.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::TableMissing`] if `table` does not exist, or
    /// [`RailyardError::StoreError`] on any other database failure.
    pub async fn search_main(
        &self,
        table: &str,
        query: &str,
        top_k: usize,
        min_score: f64,
    ) -> RailyardResult<Vec<SearchResult>> {
        let embedding = self.embed_query(query)?;
        self.store.query_table(table, &embedding, top_k, min_score).await
    }

    /// Fan out a query across `tables` concurrently, dropping any table that
    /// does not exist (`TableMissing`) with a logged warning rather than
    /// failing the whole search — tracks are independently built and some
    /// may not have a main table yet. Results are deduped by
    /// `(filename, location)`, keeping the highest score, and truncated to
    /// `top_k`.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] if any table query fails for a
    /// reason other than not existing.
    pub async fn search_dispatcher(
        &self,
        tables: &[String],
        query: &str,
        top_k: usize,
        min_score: f64,
    ) -> RailyardResult<Vec<SearchResult>> {
        let embedding = self.embed_query(query)?;

        let futures = tables.iter().map(|table| {
            let embedding = &embedding;
            async move { (table.clone(), self.store.query_table(table, embedding, top_k, min_score).await) }
        });
        let results = futures_util::future::join_all(futures).await;

        let mut merged: HashMap<(String, String), SearchResult> = HashMap::new();
        for (table, result) in results {
            match result {
                Ok(rows) => merge_keep_max(&mut merged, rows),
                Err(RailyardError::TableMissing { table: missing }) => {
                    tracing::warn!(table = %missing, "table missing from dispatcher fan-out, skipping");
                    let _ = table;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(finalize(merged, top_k))
    }

    /// Query both a track's main table and an engine's overlay table
    /// concurrently and merge them with overlay-wins semantics: every
    /// overlay row is kept; a main-table row is discarded if its filename
    /// is in the engine's `deleted_files`, or if an overlay row already
    /// occupies its `(filename, location)` key. If the overlay table does
    /// not exist yet (no build has run), it contributes no rows.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on a main-table or metadata
    /// query failure other than the overlay table not existing.
    pub async fn search_engine(
        &self,
        main_table: &str,
        overlay_table: &str,
        engine_id: &str,
        query: &str,
        top_k: usize,
        min_score: f64,
    ) -> RailyardResult<Vec<SearchResult>> {
        let embedding = self.embed_query(query)?;

        let (main_result, overlay_result, deleted_result) = tokio::join!(
            self.store.query_table(main_table, &embedding, top_k, min_score),
            self.store.query_table(overlay_table, &embedding, top_k, min_score),
            self.store.deleted_files(engine_id)
        );

        let main_rows = main_result?;
        let overlay_rows = match overlay_result {
            Ok(rows) => rows,
            Err(RailyardError::TableMissing { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        let deleted = deleted_result?;
        let deleted_set: std::collections::HashSet<&str> = deleted.iter().map(String::as_str).collect();

        let mut merged: HashMap<(String, String), SearchResult> = HashMap::new();
        for row in overlay_rows {
            merged.insert((row.filename.clone(), row.location.clone()), row);
        }
        for row in main_rows {
            if deleted_set.contains(row.filename.as_str()) {
                continue;
            }
            let key = (row.filename.clone(), row.location.clone());
            merged.entry(key).or_insert(row);
        }

        Ok(finalize(merged, top_k))
    }
}

fn merge_keep_max(merged: &mut HashMap<(String, String), SearchResult>, rows: Vec<SearchResult>) {
    for row in rows {
        let key = (row.filename.clone(), row.location.clone());
        match merged.get(&key) {
            Some(existing) if existing.score >= row.score => {}
            _ => {
                merged.insert(key, row);
            }
        }
    }
}

fn finalize(merged: HashMap<(String, String), SearchResult>, top_k: usize) -> Vec<SearchResult> {
    let mut rows: Vec<SearchResult> = merged.into_values().collect();
    rows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    rows.truncate(top_k);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(filename: &str, location: &str, score: f64) -> SearchResult {
        SearchResult { filename: filename.into(), code: String::new(), location: location.into(), score }
    }

    #[test]
    fn merge_keep_max_prefers_higher_score_on_duplicate_key() {
        let mut merged = HashMap::new();
        merge_keep_max(&mut merged, vec![result("a.go", "0:0", 0.5)]);
        merge_keep_max(&mut merged, vec![result("a.go", "0:0", 0.9)]);
        let rows = finalize(merged, 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 0.9);
    }

    #[test]
    fn finalize_sorts_descending_and_truncates() {
        let mut merged = HashMap::new();
        merged.insert(("a".into(), "0".into()), result("a", "0", 0.1));
        merged.insert(("b".into(), "0".into()), result("b", "0", 0.9));
        merged.insert(("c".into(), "0".into()), result("c", "0", 0.5));
        let rows = finalize(merged, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filename, "b");
        assert_eq!(rows[1].filename, "c");
    }

    #[test]
    fn overlay_wins_merge_drops_deleted_main_rows_and_duplicate_keys() {
        let overlay_rows = vec![result("a.go", "0:0", 0.7)];
        let main_rows = vec![result("a.go", "0:0", 0.95), result("b.go", "0:0", 0.6), result("c.go", "0:0", 0.4)];
        let deleted: std::collections::HashSet<&str> = ["c.go"].into_iter().collect();

        let mut merged: HashMap<(String, String), SearchResult> = HashMap::new();
        for row in overlay_rows {
            merged.insert((row.filename.clone(), row.location.clone()), row);
        }
        for row in main_rows {
            if deleted.contains(row.filename.as_str()) {
                continue;
            }
            let key = (row.filename.clone(), row.location.clone());
            merged.entry(key).or_insert(row);
        }

        let rows = finalize(merged, 10);
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.filename == "a.go").unwrap();
        assert_eq!(a.score, 0.7, "overlay row must win over the main row at the same key");
        assert!(rows.iter().any(|r| r.filename == "b.go"));
        assert!(!rows.iter().any(|r| r.filename == "c.go"));
    }
}
