//! Postgres + pgvector storage layer.
//!
//! Dynamically named tables (`main_<track>_embeddings`, `ovl_<engine>`) rule
//! out `diesel`'s compile-time `table!` schema macros, so this module talks
//! to Postgres with raw parameterized SQL over `tokio-postgres`, pooled by
//! `deadpool-postgres`. See `DESIGN.md` for why this diverges from the
//! diesel-based store in the example pack. Every function that builds a
//! table name goes through [`crate::types::EngineId::overlay_table_name`] or
//! [`crate::config::RailyardConfig::main_table_name`] — never string
//! concatenation of raw caller input.

use chrono::Utc;
use deadpool_postgres::Pool;

use crate::error::{RailyardError, RailyardResult};
use crate::types::{OverlayMeta, SearchResult, Vector, VectorRow};

/// Minimum overlay row count before an IVFFlat index is created; below this,
/// a sequential scan is relied on (IVFFlat needs a minimum population to be
/// useful).
pub const IVFFLAT_MIN_ROWS: usize = 10;

/// IVFFlat `lists` parameter, per `SPEC_FULL.md` §6.
pub const IVFFLAT_LISTS: u32 = 10;

/// Handle to the pgvector-backed store.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Wrap an existing connection pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Ensure `table` exists with the vector-row schema and has an IVFFlat
    /// cosine index on `embedding`.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn ensure_main_table(&self, table: &str) -> RailyardResult<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    filename TEXT NOT NULL,
                    location TEXT,
                    code TEXT NOT NULL,
                    embedding vector(384),
                    PRIMARY KEY (filename, location)
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_embedding
                    ON {table} USING ivfflat (embedding vector_cosine_ops)
                    WITH (lists = {IVFFLAT_LISTS});"
            ))
            .await?;
        Ok(())
    }

    /// Upsert `rows` into `table` by `(filename, location)`.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn upsert_main_rows(&self, table: &str, rows: &[VectorRow]) -> RailyardResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        {
            let stmt = tx
                .prepare(&format!(
                    "INSERT INTO {table} (filename, location, code, embedding)
                     VALUES ($1, $2, $3, $4::vector)
                     ON CONFLICT (filename, location) DO UPDATE SET
                        code = excluded.code,
                        embedding = excluded.embedding"
                ))
                .await?;
            for row in rows {
                tx.execute(
                    &stmt,
                    &[&row.filename, &row.location, &row.code, &row.embedding.to_sql_literal()],
                )
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Rebuild `table` atomically: create if missing, truncate, insert all
    /// `rows`, and (if `rows.len() >= IVFFLAT_MIN_ROWS`) ensure the IVFFlat
    /// index. On any failure the transaction is rolled back and no partial
    /// state is visible.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn rebuild_overlay_table(&self, table: &str, rows: &[VectorRow]) -> RailyardResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                filename TEXT NOT NULL,
                location TEXT,
                code TEXT NOT NULL,
                embedding vector(384),
                PRIMARY KEY (filename, location)
            );
            TRUNCATE TABLE {table};"
        ))
        .await?;

        if !rows.is_empty() {
            let stmt = tx
                .prepare(&format!(
                    "INSERT INTO {table} (filename, location, code, embedding) VALUES ($1, $2, $3, $4::vector)"
                ))
                .await?;
            for row in rows {
                tx.execute(
                    &stmt,
                    &[&row.filename, &row.location, &row.code, &row.embedding.to_sql_literal()],
                )
                .await?;
            }
        }

        if rows.len() >= IVFFLAT_MIN_ROWS {
            tx.batch_execute(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_embedding
                    ON {table} USING ivfflat (embedding vector_cosine_ops)
                    WITH (lists = {IVFFLAT_LISTS});"
            ))
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// `DROP TABLE IF EXISTS` for an overlay table. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn drop_overlay_table(&self, table: &str) -> RailyardResult<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!("DROP TABLE IF EXISTS {table};"))
            .await?;
        Ok(())
    }

    /// Upsert the `overlay_meta` row for `engine_id`. `updated_at` is always
    /// set to now; `created_at` is set only on first insert.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn upsert_overlay_meta(&self, meta: &OverlayMeta) -> RailyardResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS overlay_meta (
                    engine_id TEXT PRIMARY KEY,
                    track TEXT,
                    branch TEXT,
                    last_commit TEXT,
                    files_indexed INT,
                    chunks_indexed INT,
                    deleted_files TEXT,
                    created_at TIMESTAMPTZ,
                    updated_at TIMESTAMPTZ
                )",
                &[],
            )
            .await?;
        let deleted_json = serde_json::to_string(&meta.deleted_files)?;
        client
            .execute(
                "INSERT INTO overlay_meta
                    (engine_id, track, branch, last_commit, files_indexed, chunks_indexed, deleted_files, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                 ON CONFLICT (engine_id) DO UPDATE SET
                    track = excluded.track,
                    branch = excluded.branch,
                    last_commit = excluded.last_commit,
                    files_indexed = excluded.files_indexed,
                    chunks_indexed = excluded.chunks_indexed,
                    deleted_files = excluded.deleted_files,
                    updated_at = excluded.updated_at",
                &[
                    &meta.engine_id,
                    &meta.track,
                    &meta.branch,
                    &meta.last_commit,
                    &meta.files_indexed,
                    &meta.chunks_indexed,
                    &deleted_json,
                    &meta.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    /// Delete the `overlay_meta` row for `engine_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn delete_overlay_meta(&self, engine_id: &str) -> RailyardResult<()> {
        let client = self.pool.get().await?;
        client
            .execute("DELETE FROM overlay_meta WHERE engine_id = $1", &[&engine_id])
            .await?;
        Ok(())
    }

    /// Fetch the `overlay_meta` row for `engine_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn get_overlay_meta(&self, engine_id: &str) -> RailyardResult<Option<OverlayMeta>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT engine_id, track, branch, last_commit, files_indexed, chunks_indexed,
                        deleted_files, created_at, updated_at
                 FROM overlay_meta WHERE engine_id = $1",
                &[&engine_id],
            )
            .await?;
        let Some(row) = row else { return Ok(None) };

        let deleted_raw: Option<String> = row.get(6);
        let deleted_files: Vec<String> = match deleted_raw {
            Some(s) if !s.is_empty() => serde_json::from_str(&s)?,
            _ => Vec::new(),
        };

        Ok(Some(OverlayMeta {
            engine_id: row.get(0),
            track: row.get(1),
            branch: row.get(2),
            last_commit: row.get(3),
            files_indexed: row.get(4),
            chunks_indexed: row.get(5),
            deleted_files,
            created_at: row.get(7),
            updated_at: row.get(8),
        }))
    }

    /// Fetch `deleted_files` for `engine_id`, or `[]` if no row exists.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`] on connection or query failure.
    pub async fn deleted_files(&self, engine_id: &str) -> RailyardResult<Vec<String>> {
        Ok(self
            .get_overlay_meta(engine_id)
            .await?
            .map(|m| m.deleted_files)
            .unwrap_or_default())
    }

    /// Nearest-neighbor query against `table` for `embedding`, probing
    /// `LIMIT = 2 * top_k` rows and filtering by `min_score` client-side, per
    /// `SPEC_FULL.md` §4.5.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::TableMissing`] if `table` does not exist
    /// (callers in dispatcher mode swallow this); any other failure is
    /// [`RailyardError::StoreError`].
    pub async fn query_table(
        &self,
        table: &str,
        embedding: &Vector,
        top_k: usize,
        min_score: f64,
    ) -> RailyardResult<Vec<SearchResult>> {
        let client = self.pool.get().await?;
        let literal = embedding.to_sql_literal();
        let limit = (top_k * 2) as i64;

        let query = format!(
            "SELECT filename, code, location, 1 - (embedding <=> $1::vector) AS score
             FROM {table}
             ORDER BY embedding <=> $1::vector
             LIMIT $2"
        );

        let rows = client.query(&query, &[&literal, &limit]).await.map_err(|e| {
            if is_undefined_table(&e) {
                RailyardError::TableMissing { table: table.to_string() }
            } else {
                RailyardError::from(e)
            }
        })?;

        Ok(rows
            .into_iter()
            .map(|row| SearchResult {
                filename: row.get(0),
                code: row.get(1),
                location: row.get(2),
                score: row.get(3),
            })
            .filter(|r| r.score >= min_score)
            .collect())
    }
}

/// Detect Postgres's `undefined_table` SQLSTATE (42P01) so dispatcher-mode
/// search can swallow it per-table rather than aborting the whole fan-out.
fn is_undefined_table(err: &tokio_postgres::Error) -> bool {
    err.code().map(|c| c.code() == "42P01").unwrap_or(false)
}

/// Helper used by overlay build to timestamp the metadata row.
pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_table_sqlstate_is_42p01() {
        assert_eq!(tokio_postgres::error::SqlState::UNDEFINED_TABLE.code(), "42P01");
    }
}
