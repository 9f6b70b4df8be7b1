//! Core domain types shared across the chunker, embedder, indexers, and search
//! engine. These form the API contract between modules — see §3 of
//! `SPEC_FULL.md` for the authoritative data model.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RailyardError, RailyardResult};

/// Dimensionality of every embedding vector produced and stored by this crate.
///
/// Vectors from different embedders are not comparable; correctness depends on
/// a single embedder identity being used everywhere (see [`crate::embedder`]).
pub const VECTOR_DIM: usize = 384;

/// A fixed-dimension embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector(pub Vec<f32>);

impl Vector {
    /// Wrap a raw `Vec<f32>`, asserting it has the expected dimensionality.
    ///
    /// # Panics
    ///
    /// Panics if `values.len() != VECTOR_DIM`. This is a programmer error (a
    /// misconfigured embedder), not a runtime condition callers should recover
    /// from, so it is not part of [`RailyardError`].
    pub fn new(values: Vec<f32>) -> Self {
        assert_eq!(
            values.len(),
            VECTOR_DIM,
            "embedder produced a vector of dimension {} but VECTOR_DIM is {VECTOR_DIM}",
            values.len()
        );
        Self(values)
    }

    /// Render as the `[x1,x2,...]` literal pgvector expects inside a query.
    pub fn to_sql_literal(&self) -> String {
        let mut s = String::with_capacity(self.0.len() * 8 + 2);
        s.push('[');
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                s.push(',');
            }
            s.push_str(&v.to_string());
        }
        s.push(']');
        s
    }
}

/// A chunk of a file's text, with its stable intra-file location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// The chunk's text.
    pub text: String,
    /// `"<chunk_index>:<byte_offset>"` — opaque, unique within one file.
    pub location: String,
}

/// A row in a `main_<track>_embeddings` or `ovl_<engine>` table.
///
/// Both tables share this shape and primary key `(filename, location)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRow {
    /// Path of the source file, relative to the repository root.
    pub filename: String,
    /// `"<chunk_index>:<byte_offset>"`.
    pub location: String,
    /// The chunk's source text.
    pub code: String,
    /// The chunk's embedding.
    pub embedding: Vector,
}

/// One row of `overlay_meta`, keyed by `engine_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayMeta {
    /// The engine this metadata row describes.
    pub engine_id: String,
    /// Track the engine was built against.
    pub track: String,
    /// Branch name at build time (`"unknown"` if it could not be determined).
    pub branch: String,
    /// HEAD commit of the worktree at build time.
    pub last_commit: String,
    /// Number of files embedded into the overlay table.
    pub files_indexed: i64,
    /// Number of chunks embedded into the overlay table.
    pub chunks_indexed: i64,
    /// Files the engine has deleted relative to mainline, filtered by the
    /// track's file patterns.
    pub deleted_files: Vec<String>,
    /// When this row was first created.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When this row was last updated (equals `created_at` on first build).
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A named partition of the repository with its own file-pattern selection
/// and its own main index table. Immutable for the lifetime of an index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Track name, e.g. `"backend"`.
    pub name: String,
    /// Optional tree-sitter language hint. Accepted for wire compatibility
    /// with the track manifest but unused by this implementation's chunker
    /// (see SPEC_FULL.md §4.1).
    #[serde(default)]
    pub language: Option<String>,
    /// Glob patterns selecting which files belong to this track.
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

/// Regex defining the engine-identity trust boundary.
///
/// This is the sole defense against injection into dynamically constructed
/// table names: no table name may be built from an id that does not match.
static ENGINE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_-]+$").expect("static regex is valid"));

/// A validated engine identity.
///
/// Construct only via [`EngineId::parse`], which is the chokepoint that
/// enforces the sanitization regex before the id is ever interpolated into a
/// table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(String);

impl EngineId {
    /// Validate `raw` against `^[A-Za-z0-9_-]+$`.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::InvalidIdentity`] if `raw` does not match.
    pub fn parse(raw: impl Into<String>) -> RailyardResult<Self> {
        let raw = raw.into();
        if ENGINE_ID_RE.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(RailyardError::InvalidIdentity { id: raw })
        }
    }

    /// The raw, validated identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The overlay table name for this engine, given a configured prefix.
    ///
    /// This is the single chokepoint that turns a validated identity into a
    /// SQL identifier: `-` is replaced with `_` and the prefix prepended.
    /// Never interpolate a raw, unvalidated id into SQL anywhere else.
    pub fn overlay_table_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0.replace('-', "_"))
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single search hit, as returned by the search engine and the
/// `search_code` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Path of the matched file.
    pub filename: String,
    /// The matched chunk's text.
    pub code: String,
    /// The matched chunk's location.
    pub location: String,
    /// Cosine similarity score in `[0, 1]`, computed as `1 - cosine_distance`.
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_id_accepts_alnum_dash_underscore() {
        assert!(EngineId::parse("feature-123_x").is_ok());
    }

    #[test]
    fn engine_id_rejects_sql_metacharacters() {
        assert!(EngineId::parse("a'; DROP TABLE overlay_meta; --").is_err());
        assert!(EngineId::parse("a b").is_err());
        assert!(EngineId::parse("").is_err());
    }

    #[test]
    fn overlay_table_name_replaces_dash_and_prepends_prefix() {
        let id = EngineId::parse("feature-123").expect("valid id");
        assert_eq!(id.overlay_table_name("ovl_"), "ovl_feature_123");
    }

    #[test]
    fn vector_sql_literal_is_bracketed_csv() {
        let v = Vector::new(vec![1.0, 0.5, -2.0]);
        assert_eq!(v.to_sql_literal(), "[1,0.5,-2]");
    }
}
