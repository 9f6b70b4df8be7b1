//! Automatic embedding model management.
//!
//! Downloads and caches the ONNX embedding model and tokenizer on first use.
//! Models are stored in `~/.railyard/models/<model-name>/`.
//!
//! ## Model selection
//!
//! Vector-space consistency (`SPEC_FULL.md` §9) requires every embedding in
//! every table to come from the same embedder configuration. This module
//! therefore exposes exactly one [`ModelSpec`], [`EMBEDDER_MODEL`] — there is
//! no runtime model switch. Changing it is a breaking change to every
//! existing vector table.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{RailyardError, RailyardResult};

/// Metadata for the embedding model this deployment is bound to.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Human-readable model name, also used as the on-disk cache directory.
    pub name: &'static str,
    /// HuggingFace model ID.
    pub hf_repo: &'static str,
    /// URL to the ONNX model file.
    pub model_url: &'static str,
    /// URL to the tokenizer.json file.
    pub tokenizer_url: &'static str,
    /// Output embedding dimensions. Must equal [`crate::types::VECTOR_DIM`].
    pub dimensions: usize,
    /// Maximum sequence length the model supports.
    pub max_seq_length: usize,
    /// Approximate download size in bytes (for progress display).
    pub approx_size_bytes: u64,
}

/// The single embedder this deployment is bound to.
///
/// `sentence-transformers/all-MiniLM-L6-v2`, matching the reference
/// implementation's `EMBEDDING_MODEL` constant and its 384-dimensional
/// output.
pub const EMBEDDER_MODEL: ModelSpec = ModelSpec {
    name: "all-MiniLM-L6-v2",
    hf_repo: "sentence-transformers/all-MiniLM-L6-v2",
    model_url: "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx",
    tokenizer_url: "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json",
    dimensions: 384,
    max_seq_length: 256,
    approx_size_bytes: 90_000_000,
};

/// Get the models directory: `~/.railyard/models/`
fn models_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("railyard")
        .join("models")
}

/// Get the directory for a specific model: `~/.railyard/models/<name>/`
pub fn model_dir(spec: &ModelSpec) -> PathBuf {
    models_base_dir().join(spec.name)
}

/// Get the path to the ONNX model file for a given spec.
pub fn model_path(spec: &ModelSpec) -> PathBuf {
    model_dir(spec).join("model.onnx")
}

/// Get the path to the tokenizer file for a given spec.
pub fn tokenizer_path(spec: &ModelSpec) -> PathBuf {
    model_dir(spec).join("tokenizer.json")
}

/// Check if the model files exist and look intact.
pub fn is_model_ready(spec: &ModelSpec) -> bool {
    let model = model_path(spec);
    let tokenizer = tokenizer_path(spec);

    if !model.exists() || !tokenizer.exists() {
        return false;
    }

    if let Ok(meta) = std::fs::metadata(&model) {
        if meta.len() < 1_000_000 {
            return false;
        }
    }

    true
}

/// Ensure the model is available, downloading it if necessary.
///
/// Returns the paths to `(model.onnx, tokenizer.json)`.
///
/// # Errors
///
/// Returns [`RailyardError::ConfigError`] if the download fails.
pub fn ensure_model(spec: &ModelSpec) -> RailyardResult<(PathBuf, PathBuf)> {
    let model = model_path(spec);
    let tokenizer = tokenizer_path(spec);

    if is_model_ready(spec) {
        tracing::debug!(model = spec.name, path = %model.display(), "embedding model already cached");
        return Ok((model, tokenizer));
    }

    let dir = model_dir(spec);
    std::fs::create_dir_all(&dir).map_err(|e| RailyardError::ConfigError {
        message: format!("failed to create model directory {}: {e}", dir.display()),
    })?;

    tracing::info!(model = spec.name, repo = spec.hf_repo, "downloading embedding model (first-time setup)");

    if !model.exists() || std::fs::metadata(&model).map(|m| m.len() < 1_000_000).unwrap_or(true) {
        download_file(
            spec.model_url,
            &model,
            &format!("Downloading {} model", spec.name),
            Some(spec.approx_size_bytes),
        )?;
    }

    if !tokenizer.exists() {
        download_file(
            spec.tokenizer_url,
            &tokenizer,
            &format!("Downloading {} tokenizer", spec.name),
            None,
        )?;
    }

    tracing::info!(model = spec.name, path = %model.display(), "embedding model ready");

    Ok((model, tokenizer))
}

fn download_file(
    url: &str,
    dest: &Path,
    message: &str,
    expected_size: Option<u64>,
) -> RailyardResult<()> {
    let temp_path = dest.with_extension("downloading");

    let response = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(600))
        .build()
        .map_err(|e| RailyardError::ConfigError {
            message: format!("HTTP client error: {e}"),
        })?
        .get(url)
        .send()
        .map_err(|e| RailyardError::ConfigError {
            message: format!(
                "failed to download model from {url}: {e}. \
                 Set RAILYARD_SKIP_MODEL_DOWNLOAD=1 to run in degraded mode instead."
            ),
        })?;

    if !response.status().is_success() {
        return Err(RailyardError::ConfigError {
            message: format!("model download failed: HTTP {} from {url}", response.status()),
        });
    }

    let total_size = response.content_length().or(expected_size).unwrap_or(0);

    let pb = if total_size > 0 {
        let pb = indicatif::ProgressBar::new(total_size);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{msg}\n  [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message(message.to_string());
        pb
    } else {
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        pb
    };

    let mut file = std::fs::File::create(&temp_path).map_err(|e| RailyardError::ConfigError {
        message: format!("failed to create {}: {e}", temp_path.display()),
    })?;
    let mut downloaded: u64 = 0;

    let bytes = response.bytes().map_err(|e| RailyardError::ConfigError {
        message: format!("download stream error: {e}"),
    })?;

    for chunk in bytes.chunks(8192) {
        file.write_all(chunk).map_err(|e| RailyardError::ConfigError {
            message: format!("failed writing downloaded model: {e}"),
        })?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush().ok();
    drop(file);

    pb.finish_with_message(format!("{message} -- done"));

    std::fs::rename(&temp_path, dest).map_err(|e| RailyardError::ConfigError {
        message: format!("failed to finalize download of {}: {e}", dest.display()),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_dir_structure() {
        let dir = model_dir(&EMBEDDER_MODEL);
        assert!(dir.ends_with("all-MiniLM-L6-v2"));
        assert!(model_path(&EMBEDDER_MODEL).ends_with("model.onnx"));
        assert!(tokenizer_path(&EMBEDDER_MODEL).ends_with("tokenizer.json"));
    }

    #[test]
    fn embedder_model_matches_vector_dim() {
        assert_eq!(EMBEDDER_MODEL.dimensions, crate::types::VECTOR_DIM);
    }

    #[test]
    fn model_not_ready_when_missing() {
        let dummy = ModelSpec {
            name: "non-existent-model-xyz-123",
            hf_repo: "fake/repo",
            model_url: "http://fake.invalid",
            tokenizer_url: "http://fake.invalid",
            dimensions: 10,
            max_seq_length: 10,
            approx_size_bytes: 10,
        };
        assert!(!is_model_ready(&dummy));
    }
}
