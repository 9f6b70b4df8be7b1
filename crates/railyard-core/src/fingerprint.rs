//! Local content-fingerprint store.
//!
//! Resolves the Open Question in `spec.md` §9: the upstream dataflow
//! framework the original system relies on detects which files need
//! re-embedding by its own unspecified mechanism. This reimplementation
//! supplies a `(filename, content_hash)` table, local to the main indexer,
//! so that a track rebuild skips files whose content has not changed since
//! the last successful index.
//!
//! Backed by `rusqlite`, matching the teacher's own choice of embedded
//! database for local bookkeeping that is not part of the externally
//! specified vector-store schema (`SPEC_FULL.md` §6).

use std::path::Path;

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use crate::error::RailyardResult;

/// A local store of per-track file fingerprints, used to skip re-embedding
/// unchanged files on repeat main-indexer runs.
pub struct FingerprintStore {
    conn: Connection,
}

impl FingerprintStore {
    /// Open (creating if necessary) the fingerprint database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RailyardError::StoreError`] if the database
    /// cannot be opened or migrated.
    pub fn open(path: &Path) -> RailyardResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                track TEXT NOT NULL,
                filename TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                indexed_at TEXT NOT NULL,
                PRIMARY KEY (track, filename)
            );",
        )?;
        Ok(Self { conn })
    }

    /// Open an in-memory store, for tests.
    pub fn open_in_memory() -> RailyardResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                track TEXT NOT NULL,
                filename TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                indexed_at TEXT NOT NULL,
                PRIMARY KEY (track, filename)
            );",
        )?;
        Ok(Self { conn })
    }

    /// Returns `true` if `filename` in `track` was last indexed with the
    /// same content hash as `content`.
    pub fn is_unchanged(&self, track: &str, filename: &str, content: &[u8]) -> RailyardResult<bool> {
        let hash = hash_content(content);
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT content_hash FROM fingerprints WHERE track = ?1 AND filename = ?2",
                params![track, filename],
                |row| row.get(0),
            )
            .ok();
        Ok(stored.as_deref() == Some(hash.as_str()))
    }

    /// Record (or update) `filename`'s fingerprint for `track`.
    pub fn record(&self, track: &str, filename: &str, content: &[u8]) -> RailyardResult<()> {
        let hash = hash_content(content);
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO fingerprints (track, filename, content_hash, indexed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(track, filename) DO UPDATE SET
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at",
            params![track, filename, hash, now],
        )?;
        Ok(())
    }
}

/// SHA-256 hash of `content`, hex-encoded.
fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_file_is_not_unchanged() {
        let store = FingerprintStore::open_in_memory().expect("open");
        assert!(!store.is_unchanged("backend", "a.go", b"hello").unwrap());
    }

    #[test]
    fn recorded_file_with_same_content_is_unchanged() {
        let store = FingerprintStore::open_in_memory().expect("open");
        store.record("backend", "a.go", b"hello").unwrap();
        assert!(store.is_unchanged("backend", "a.go", b"hello").unwrap());
    }

    #[test]
    fn recorded_file_with_different_content_is_changed() {
        let store = FingerprintStore::open_in_memory().expect("open");
        store.record("backend", "a.go", b"hello").unwrap();
        assert!(!store.is_unchanged("backend", "a.go", b"goodbye").unwrap());
    }

    #[test]
    fn fingerprints_are_scoped_per_track() {
        let store = FingerprintStore::open_in_memory().expect("open");
        store.record("backend", "a.go", b"hello").unwrap();
        assert!(!store.is_unchanged("frontend", "a.go", b"hello").unwrap());
    }
}
