//! Railyard table-naming and pattern configuration.
//!
//! Resolved with the following precedence (highest wins):
//!
//! 1. Explicit path passed to [`RailyardConfig::load`] (e.g. CLI `--config`)
//! 2. Project-level `./railyard.toml` in the current directory
//! 3. Built-in defaults
//!
//! This mirrors the teacher's own `Config::load` layering, adapted to the
//! keys named in `SPEC_FULL.md` §6: `main_table_template`,
//! `overlay_table_prefix`, `excluded_patterns`, and a `tracks` override map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RailyardError, RailyardResult};

/// Default template for main-table names. Must contain `{track}`.
pub const DEFAULT_MAIN_TABLE_TEMPLATE: &str = "main_{track}_embeddings";

/// Default prefix for overlay-table names.
pub const DEFAULT_OVERLAY_TABLE_PREFIX: &str = "ovl_";

/// Default exclusion globs applied when enumerating track files.
pub fn default_excluded_patterns() -> Vec<String> {
    vec![
        ".*".to_string(),
        "vendor".to_string(),
        "node_modules".to_string(),
        "dist".to_string(),
        "__pycache__".to_string(),
        ".git".to_string(),
    ]
}

const CONFIG_FILENAME: &str = "railyard.toml";

/// Per-track pattern overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackOverrides {
    /// Overrides the track's included patterns if set.
    #[serde(default)]
    pub included_patterns: Option<Vec<String>>,
    /// Overrides the track's excluded patterns if set.
    #[serde(default)]
    pub excluded_patterns: Option<Vec<String>>,
}

/// Railyard's table-naming and pattern configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailyardConfig {
    /// Template for main-table names; must contain the literal `{track}`.
    #[serde(default = "default_main_table_template")]
    pub main_table_template: String,
    /// Prefix prepended to a sanitized engine id to form its overlay table.
    #[serde(default = "default_overlay_table_prefix")]
    pub overlay_table_prefix: String,
    /// Globs excluded from every track unless overridden per-track.
    #[serde(default = "default_excluded_patterns")]
    pub excluded_patterns: Vec<String>,
    /// Per-track overrides, keyed by track name.
    #[serde(default)]
    pub tracks: HashMap<String, TrackOverrides>,
}

fn default_main_table_template() -> String {
    DEFAULT_MAIN_TABLE_TEMPLATE.to_string()
}

fn default_overlay_table_prefix() -> String {
    DEFAULT_OVERLAY_TABLE_PREFIX.to_string()
}

impl Default for RailyardConfig {
    fn default() -> Self {
        Self {
            main_table_template: default_main_table_template(),
            overlay_table_prefix: default_overlay_table_prefix(),
            excluded_patterns: default_excluded_patterns(),
            tracks: HashMap::new(),
        }
    }
}

impl RailyardConfig {
    /// Load configuration, searching `explicit_path` first, then
    /// `./railyard.toml`, falling back to defaults if neither exists.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::ConfigError`] if a config file exists but
    /// fails to parse, or if `main_table_template` does not contain
    /// `{track}`.
    pub fn load(explicit_path: Option<&Path>) -> RailyardResult<Self> {
        let path = Self::resolve_path(explicit_path);
        let cfg = match path {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit_path {
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }
        let cwd_path = PathBuf::from(CONFIG_FILENAME);
        if cwd_path.exists() {
            return Some(cwd_path);
        }
        None
    }

    fn from_file(path: &Path) -> RailyardResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| RailyardError::ConfigError {
            message: format!("failed to read config file {}: {e}", path.display()),
        })?;
        toml::from_str(&raw).map_err(|e| RailyardError::ConfigError {
            message: format!("failed to parse config file {}: {e}", path.display()),
        })
    }

    fn validate(&self) -> RailyardResult<()> {
        if !self.main_table_template.contains("{track}") {
            return Err(RailyardError::ConfigError {
                message: format!(
                    "main_table_template {:?} must contain the literal \"{{track}}\"",
                    self.main_table_template
                ),
            });
        }
        Ok(())
    }

    /// Resolve the main-table name for `track`.
    pub fn main_table_name(&self, track: &str) -> String {
        self.main_table_template.replace("{track}", track)
    }

    /// Resolve the included-file globs for `track`, given the track's
    /// manifest-declared default patterns. A per-track override replaces the
    /// defaults wholesale; there is no merging.
    pub fn included_patterns_for_track<'a>(
        &'a self,
        track: &str,
        manifest_defaults: &'a [String],
    ) -> &'a [String] {
        self.tracks
            .get(track)
            .and_then(|t| t.included_patterns.as_deref())
            .unwrap_or(manifest_defaults)
    }

    /// Resolve the excluded-file globs for `track`.
    pub fn excluded_patterns_for_track(&self, track: &str) -> &[String] {
        self.tracks
            .get(track)
            .and_then(|t| t.excluded_patterns.as_deref())
            .unwrap_or(&self.excluded_patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = RailyardConfig::default();
        assert_eq!(cfg.main_table_template, "main_{track}_embeddings");
        assert_eq!(cfg.overlay_table_prefix, "ovl_");
        assert_eq!(
            cfg.excluded_patterns,
            vec![".*", "vendor", "node_modules", "dist", "__pycache__", ".git"]
        );
    }

    #[test]
    fn main_table_name_substitutes_track() {
        let cfg = RailyardConfig::default();
        assert_eq!(cfg.main_table_name("backend"), "main_backend_embeddings");
    }

    #[test]
    fn rejects_template_missing_track_placeholder() {
        let cfg = RailyardConfig {
            main_table_template: "main_embeddings".to_string(),
            ..RailyardConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn per_track_override_replaces_not_merges() {
        let mut cfg = RailyardConfig::default();
        cfg.tracks.insert(
            "backend".to_string(),
            TrackOverrides {
                included_patterns: Some(vec!["*.rs".to_string()]),
                excluded_patterns: None,
            },
        );
        let manifest_defaults = vec!["*.go".to_string(), "*.rs".to_string()];
        assert_eq!(
            cfg.included_patterns_for_track("backend", &manifest_defaults),
            &["*.rs".to_string()]
        );
        assert_eq!(
            cfg.included_patterns_for_track("frontend", &manifest_defaults),
            manifest_defaults.as_slice()
        );
    }

    #[test]
    fn load_falls_back_to_defaults_when_no_file_present() {
        let cfg = RailyardConfig::load(Some(Path::new("/nonexistent/railyard.toml")))
            .expect("defaults should always load");
        assert_eq!(cfg.main_table_template, DEFAULT_MAIN_TABLE_TEMPLATE);
    }
}
