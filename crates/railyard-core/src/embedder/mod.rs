//! ONNX-based local embedding engine with automatic model management.
//!
//! Implements the pure function `embed(text) -> vector(d)` of `SPEC_FULL.md`
//! §4.2. Runs inference locally via ONNX Runtime; no network calls at query
//! time. The model file is downloaded on first use and cached permanently.
//!
//! ## Vector-space consistency
//!
//! [`model_manager::EMBEDDER_MODEL`] is the single process-wide embedder
//! identity every [`Embedder`] is constructed from. There is no per-call
//! model selection: changing it would silently invalidate every existing
//! vector table, which is exactly the failure mode §9 calls out.
//!
//! ## Degraded mode
//!
//! If the model or tokenizer cannot be loaded (no network, corrupted cache,
//! missing ONNX Runtime), the embedder starts in degraded mode: every call
//! returns `None` for that chunk rather than panicking. Callers check
//! [`Embedder::is_available`] and treat unembedded chunks as chunks the
//! indexer could not vectorize this run.

pub mod model_manager;

use ort::session::Session;

use crate::error::{RailyardError, RailyardResult};
use crate::types::VECTOR_DIM;

pub use model_manager::{ModelSpec, EMBEDDER_MODEL};

/// Configuration for constructing an [`Embedder`].
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Path to a user-supplied ONNX model file. If it exists, it is used
    /// directly instead of the cached/auto-downloaded [`EMBEDDER_MODEL`].
    pub model_path: std::path::PathBuf,
    /// Output embedding dimensions. Must equal [`VECTOR_DIM`].
    pub dimensions: usize,
    /// Number of chunks embedded per ONNX Runtime call.
    pub batch_size: usize,
    /// Maximum token sequence length; longer inputs are truncated.
    pub max_seq_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: model_manager::model_path(&EMBEDDER_MODEL),
            dimensions: VECTOR_DIM,
            batch_size: 32,
            max_seq_length: EMBEDDER_MODEL.max_seq_length,
        }
    }
}

/// Embedding engine that uses ONNX Runtime for local inference.
pub struct Embedder {
    config: EmbeddingConfig,
    /// `None` if the model could not be loaded (degraded mode).
    session: Option<std::sync::Mutex<Session>>,
    /// `None` if the tokenizer could not be loaded (degraded mode).
    tokenizer: Option<tokenizers::Tokenizer>,
}

impl Embedder {
    /// Construct an embedder bound to [`EMBEDDER_MODEL`], auto-downloading
    /// it if not already cached. On any failure to load the model or
    /// tokenizer, returns an embedder in degraded mode rather than an error
    /// — indexing continues, the affected chunks are simply skipped.
    ///
    /// # Errors
    ///
    /// This function does not itself fail on model unavailability; it only
    /// returns `Err` if constructing the configuration is impossible (never,
    /// today — reserved for future validation).
    pub fn new(config: &EmbeddingConfig) -> RailyardResult<Self> {
        let (model_path, tokenizer_path) = Self::resolve_model_files(config);

        let session = if model_path.exists() {
            match Session::builder() {
                Ok(builder) => match builder.commit_from_file(&model_path) {
                    Ok(session) => {
                        tracing::info!(model = %model_path.display(), "loaded ONNX embedding model");
                        Some(std::sync::Mutex::new(session))
                    }
                    Err(e) => {
                        tracing::warn!(model = %model_path.display(), error = %e, "failed to load embedding model, running in degraded mode");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create ONNX session builder, running in degraded mode");
                    None
                }
            }
        } else {
            tracing::warn!(model = %model_path.display(), "embedding model not found, running in degraded mode");
            None
        };

        let tokenizer = if tokenizer_path.exists() {
            match tokenizers::Tokenizer::from_file(&tokenizer_path) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!(tokenizer = %tokenizer_path.display(), error = %e, "failed to load tokenizer");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config: config.clone(),
            session,
            tokenizer,
        })
    }

    /// Resolve model file paths, auto-downloading if needed.
    fn resolve_model_files(config: &EmbeddingConfig) -> (std::path::PathBuf, std::path::PathBuf) {
        if config.model_path.exists() {
            let tokenizer_path = config.model_path.with_file_name("tokenizer.json");
            tracing::debug!(model = %config.model_path.display(), "using user-specified model path");
            return (config.model_path.clone(), tokenizer_path);
        }

        let spec = &EMBEDDER_MODEL;

        if model_manager::is_model_ready(spec) {
            return (model_manager::model_path(spec), model_manager::tokenizer_path(spec));
        }

        if std::env::var("RAILYARD_SKIP_MODEL_DOWNLOAD").is_ok() {
            tracing::info!("RAILYARD_SKIP_MODEL_DOWNLOAD set, running in degraded mode");
            return (model_manager::model_path(spec), model_manager::tokenizer_path(spec));
        }

        #[cfg(test)]
        {
            tracing::debug!("skipping model download in test environment");
            (model_manager::model_path(spec), model_manager::tokenizer_path(spec))
        }

        #[cfg(not(test))]
        {
            match model_manager::ensure_model(spec) {
                Ok((model, tokenizer)) => (model, tokenizer),
                Err(e) => {
                    tracing::warn!(error = %e, "model auto-download failed, running in degraded mode");
                    (model_manager::model_path(spec), model_manager::tokenizer_path(spec))
                }
            }
        }
    }

    /// Construct an embedder in degraded mode (for tests, and for
    /// `RAILYARD_SKIP_MODEL_DOWNLOAD`-bound offline runs).
    pub fn degraded(config: &EmbeddingConfig) -> Self {
        Self {
            config: config.clone(),
            session: None,
            tokenizer: None,
        }
    }

    /// Whether the embedding model is loaded and operational.
    pub fn is_available(&self) -> bool {
        self.session.is_some()
    }

    /// Embed a batch of text chunks.
    ///
    /// Each output element corresponds positionally to an input chunk.
    /// `None` means that chunk could not be embedded this call.
    pub fn embed_batch(&self, chunks: &[&str]) -> Vec<Option<Vec<f32>>> {
        let session_mutex = match self.session.as_ref() {
            Some(s) => s,
            None => return vec![None; chunks.len()],
        };

        let mut session = match session_mutex.lock() {
            Ok(s) => s,
            Err(_) => return vec![None; chunks.len()],
        };

        let mut all_embeddings = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.config.batch_size) {
            match self.run_inference(&mut session, batch) {
                Ok(batch_embeddings) => {
                    for emb in batch_embeddings {
                        all_embeddings.push(Some(emb));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "batch inference failed; falling back to individual chunks");
                    for text in batch {
                        match self.run_inference(&mut session, &[*text]) {
                            Ok(mut single_emb) => all_embeddings.push(Some(single_emb.remove(0))),
                            Err(chunk_err) => {
                                tracing::warn!(error = %chunk_err, "chunk inference failed; skipping this chunk");
                                all_embeddings.push(None);
                            }
                        }
                    }
                }
            }
        }

        all_embeddings
    }

    /// Embed a single text string.
    ///
    /// # Errors
    ///
    /// Returns [`RailyardError::StoreError`]-free, model-specific errors:
    /// an empty message signals the embedder is unavailable or inference
    /// failed for this single chunk.
    pub fn embed_single(&self, text: &str) -> RailyardResult<Vec<f32>> {
        if !self.is_available() {
            return Err(RailyardError::ConfigError {
                message: format!("embedding model not loaded: {}", self.config.model_path.display()),
            });
        }
        let mut results = self.embed_batch(&[text]);
        match results.pop().flatten() {
            Some(emb) => Ok(emb),
            None => Err(RailyardError::ConfigError {
                message: "embed_batch returned no embedding for this chunk".to_string(),
            }),
        }
    }

    /// The embedding dimensionality this embedder is configured for.
    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn run_inference(&self, session: &mut Session, texts: &[&str]) -> RailyardResult<Vec<Vec<f32>>> {
        let batch_size = texts.len();
        let max_len = self.config.max_seq_length;

        let (input_ids, attention_mask, token_type_ids) = self.tokenize_batch(texts, max_len)?;

        let shape = vec![batch_size as i64, max_len as i64];

        let ids_value = ort::value::Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| RailyardError::ConfigError { message: format!("ONNX tensor error: {e}") })?;

        let mask_value = ort::value::Tensor::from_array((shape.clone(), attention_mask.clone()))
            .map_err(|e| RailyardError::ConfigError { message: format!("ONNX tensor error: {e}") })?;

        use std::borrow::Cow;
        let mut inputs: Vec<(Cow<'_, str>, ort::session::SessionInputValue<'_>)> = vec![
            (Cow::Borrowed("input_ids"), ort::session::SessionInputValue::from(ids_value)),
            (Cow::Borrowed("attention_mask"), ort::session::SessionInputValue::from(mask_value)),
        ];

        let expects_token_type = session.inputs().iter().any(|i| i.name() == "token_type_ids");
        if expects_token_type {
            let type_value = ort::value::Tensor::from_array((shape.clone(), token_type_ids))
                .map_err(|e| RailyardError::ConfigError { message: format!("ONNX tensor error (token_type_ids): {e}") })?;
            inputs.push((Cow::Borrowed("token_type_ids"), ort::session::SessionInputValue::from(type_value)));
        }

        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| RailyardError::ConfigError { message: "model has no outputs".to_string() })?;

        let outputs = session
            .run(inputs)
            .map_err(|e| RailyardError::ConfigError { message: format!("ONNX inference error: {e}") })?;

        let output_value = outputs
            .get(&output_name)
            .ok_or_else(|| RailyardError::ConfigError { message: "no output tensor found".to_string() })?;

        let (output_shape, output_data) = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| RailyardError::ConfigError { message: format!("output extraction error: {e}") })?;

        let dims: Vec<usize> = output_shape.iter().map(|&d| d as usize).collect();
        let mut embeddings = Vec::with_capacity(batch_size);

        if dims.len() == 3 {
            let seq_len = dims[1];
            let hidden_dim = dims[2];

            for b in 0..batch_size {
                let mut pooled = vec![0.0f32; hidden_dim];
                let mut mask_sum = 0.0f32;

                for s in 0..seq_len {
                    let mask_val = attention_mask[b * max_len + s] as f32;
                    mask_sum += mask_val;
                    let offset = b * seq_len * hidden_dim + s * hidden_dim;
                    for d in 0..hidden_dim {
                        pooled[d] += output_data[offset + d] * mask_val;
                    }
                }

                if mask_sum > 0.0 {
                    for d in &mut pooled {
                        *d /= mask_sum;
                    }
                }

                l2_normalize(&mut pooled);
                embeddings.push(pooled);
            }
        } else if dims.len() == 2 {
            let hidden_dim = dims[1];
            for b in 0..batch_size {
                let offset = b * hidden_dim;
                let mut vec = output_data[offset..offset + hidden_dim].to_vec();
                l2_normalize(&mut vec);
                embeddings.push(vec);
            }
        } else {
            return Err(RailyardError::ConfigError {
                message: format!("unexpected output tensor shape: {dims:?}"),
            });
        }

        Ok(embeddings)
    }

    fn tokenize_batch(&self, texts: &[&str], max_len: usize) -> RailyardResult<(Vec<i64>, Vec<i64>, Vec<i64>)> {
        let tokenizer = self
            .tokenizer
            .as_ref()
            .ok_or_else(|| RailyardError::ConfigError { message: "tokenizer not loaded".to_string() })?;

        let mut all_input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut all_attention_mask = Vec::with_capacity(texts.len() * max_len);
        let mut all_token_type_ids = Vec::with_capacity(texts.len() * max_len);

        for text in texts {
            let encoding = tokenizer
                .encode(*text, true)
                .map_err(|e| RailyardError::ConfigError { message: format!("tokenization error: {e}") })?;

            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let type_ids = encoding.get_type_ids();

            let actual_len = ids.len().min(max_len);

            for i in 0..actual_len {
                all_input_ids.push(ids[i] as i64);
                all_attention_mask.push(mask[i] as i64);
                all_token_type_ids.push(type_ids[i] as i64);
            }

            for _ in actual_len..max_len {
                all_input_ids.push(0);
                all_attention_mask.push(0);
                all_token_type_ids.push(0);
            }
        }

        Ok((all_input_ids, all_attention_mask, all_token_type_ids))
    }
}

/// Normalize `v` to unit L2 norm in place. A zero vector is left unchanged.
fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degraded_config() -> EmbeddingConfig {
        EmbeddingConfig {
            model_path: "/nonexistent/model.onnx".into(),
            dimensions: 384,
            batch_size: 32,
            max_seq_length: 256,
        }
    }

    #[test]
    fn degraded_embedder_is_unavailable() {
        let embedder = Embedder::degraded(&degraded_config());
        assert!(!embedder.is_available());
    }

    #[test]
    fn degraded_embedder_embed_single_errors() {
        let embedder = Embedder::degraded(&degraded_config());
        assert!(embedder.embed_single("test text").is_err());
    }

    #[test]
    fn degraded_embedder_embed_batch_returns_all_none() {
        let embedder = Embedder::degraded(&degraded_config());
        let results = embedder.embed_batch(&["a", "b", "c"]);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(Option::is_none));
    }

    #[test]
    fn dimensions_reflects_config() {
        let embedder = Embedder::degraded(&degraded_config());
        assert_eq!(embedder.dimensions(), 384);
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let mut v = vec![3.0f32, 4.0f32];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_unchanged() {
        let mut v = vec![0.0f32, 0.0f32];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
