//! Per-track manifest loading and orchestrated `build-all`.
//!
//! Grounded in the reference `build_all` driver: load every track named in
//! a manifest, optionally restrict to an allowlist, and build each one's
//! main table. Unlike the reference's plain sequential loop, one track's
//! failure here never aborts the rest — each track's outcome is isolated
//! and collected. See `SPEC_FULL.md` §4.7.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::main::{MainBuildReport, MainIndexer};
use crate::config::RailyardConfig;
use crate::embedder::Embedder;
use crate::error::{RailyardError, RailyardResult};
use crate::fingerprint::FingerprintStore;
use crate::store::Store;
use crate::types::Track;

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default, rename = "track")]
    tracks: Vec<Track>,
}

/// Load a track manifest from `path`.
///
/// Tracks with an empty `name` are silently dropped — they cannot name a
/// main table and have no addressable identity. An empty manifest (after
/// dropping nameless tracks) is an error: there is nothing to build.
///
/// # Errors
///
/// Returns [`RailyardError::ConfigError`] if the file cannot be read,
/// fails to parse, or resolves to zero usable tracks.
pub fn load_manifest(path: &Path) -> RailyardResult<Vec<Track>> {
    let raw = std::fs::read_to_string(path).map_err(|e| RailyardError::ConfigError {
        message: format!("failed to read track manifest {}: {e}", path.display()),
    })?;
    let parsed: ManifestFile = toml::from_str(&raw).map_err(|e| RailyardError::ConfigError {
        message: format!("failed to parse track manifest {}: {e}", path.display()),
    })?;

    let tracks: Vec<Track> = parsed.tracks.into_iter().filter(|t| !t.name.is_empty()).collect();
    if tracks.is_empty() {
        return Err(RailyardError::ConfigError {
            message: format!("track manifest {} names no usable tracks", path.display()),
        });
    }
    Ok(tracks)
}

/// Apply a `--tracks` allowlist filter. An empty `filter` means "all
/// tracks".
///
/// # Errors
///
/// Returns [`RailyardError::ConfigError`] listing the available track names
/// if the filter matches none of them.
pub fn filter_tracks(tracks: Vec<Track>, filter: &[String]) -> RailyardResult<Vec<Track>> {
    if filter.is_empty() {
        return Ok(tracks);
    }
    let available: Vec<String> = tracks.iter().map(|t| t.name.clone()).collect();
    let selected: Vec<Track> = tracks.into_iter().filter(|t| filter.contains(&t.name)).collect();
    if selected.is_empty() {
        return Err(RailyardError::ConfigError {
            message: format!(
                "--tracks filter {filter:?} matched none of the manifest's tracks: {available:?}"
            ),
        });
    }
    Ok(selected)
}

/// The result of building one track, isolated from its siblings' failures.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrackOutcome {
    /// The track built successfully.
    Ok {
        /// The track's name.
        track: String,
        /// The build report.
        report: MainBuildReport,
    },
    /// The track failed to build; its siblings were still attempted.
    Failed {
        /// The track's name.
        track: String,
        /// A human-readable description of the failure.
        error: String,
    },
}

/// Drives a `build-all` run across every track in a manifest.
pub struct Orchestrator<'a> {
    store: &'a Store,
    embedder: &'a Embedder,
    fingerprints: &'a FingerprintStore,
}

impl<'a> Orchestrator<'a> {
    /// Construct an orchestrator over the given store, embedder, and
    /// fingerprint store.
    pub fn new(store: &'a Store, embedder: &'a Embedder, fingerprints: &'a FingerprintStore) -> Self {
        Self { store, embedder, fingerprints }
    }

    /// Build every track in `tracks` against `repo_path`, isolating each
    /// track's failure from the rest.
    pub async fn build_all(
        &self,
        repo_path: &Path,
        tracks: &[Track],
        config: &RailyardConfig,
        force: bool,
    ) -> Vec<TrackOutcome> {
        let indexer = MainIndexer::new(self.store, self.embedder, self.fingerprints);
        let mut outcomes = Vec::with_capacity(tracks.len());

        for track in tracks {
            match indexer.build_track(repo_path, track, config, force).await {
                Ok(report) => outcomes.push(TrackOutcome::Ok { track: track.name.clone(), report }),
                Err(e) => {
                    tracing::warn!(track = %track.name, error = %e, "track build failed, continuing with remaining tracks");
                    outcomes.push(TrackOutcome::Failed { track: track.name.clone(), error: e.to_string() });
                }
            }
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn write_manifest(contents: &str) -> NamedTempFile {
        let file = NamedTempFile::new().expect("tempfile");
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn load_manifest_drops_nameless_tracks() {
        let file = write_manifest(
            r#"
            [[track]]
            name = "backend"
            file_patterns = ["*.go"]

            [[track]]
            name = ""
            file_patterns = ["*.py"]
            "#,
        );
        let tracks = load_manifest(file.path()).expect("manifest");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "backend");
    }

    #[test]
    fn load_manifest_errors_on_empty_result() {
        let file = write_manifest("");
        assert!(load_manifest(file.path()).is_err());
    }

    #[test]
    fn filter_tracks_errors_listing_available_on_no_match() {
        let tracks = vec![
            Track { name: "backend".into(), language: None, file_patterns: vec![] },
            Track { name: "frontend".into(), language: None, file_patterns: vec![] },
        ];
        let err = filter_tracks(tracks, &["nonexistent".to_string()]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("backend"));
        assert!(msg.contains("frontend"));
    }

    #[test]
    fn filter_tracks_empty_filter_returns_all() {
        let tracks = vec![Track { name: "backend".into(), language: None, file_patterns: vec![] }];
        let filtered = filter_tracks(tracks, &[]).unwrap();
        assert_eq!(filtered.len(), 1);
    }
}
