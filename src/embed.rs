//! Sentence embedding stage.
//!
//! [`Embedder`] maps text to a fixed-length dense vector. The dimensionality
//! is constant for the lifetime of a loaded model; empty text is a valid input
//! and gets the model's embedding of empty input.
//!
//! The built-in [`HashedEmbedder`] is a signed feature-hashing encoder:
//!
//! ```text
//! v[h(f) mod d] += sign(f) * w(f)     for each feature f of the text
//! v = v / ||v||
//! ```
//!
//! Features are word unigrams (w = 1.0), word bigrams (w = 0.5) and
//! boundary-marked character trigrams (w = 0.25). The hash is xxh64 with a
//! fixed seed, so embeddings are stable across processes and machines.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};
use crate::preprocess::tokenize;
use crate::record::{EntityId, FeatureMatrix};

/// Text to dense vector.
pub trait Embedder: Send + Sync + fmt::Debug {
    /// Model identifier.
    fn name(&self) -> &str;

    /// Output dimensionality.
    fn dim(&self) -> usize;

    /// Embed one text.
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Embed many texts, preserving input order.
    fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Embedding model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name. `"hashed"` selects [`HashedEmbedder`].
    pub model: String,
    /// Output dimensionality.
    pub dim: usize,
    /// Hash seed.
    pub seed: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: HashedEmbedder::NAME.to_string(),
            dim: 384,
            seed: 0x5EED,
        }
    }
}

/// Load the configured embedding model once at startup.
pub fn load_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.model.as_str() {
        HashedEmbedder::NAME => {
            let embedder = HashedEmbedder::new(config.dim, config.seed)?;
            tracing::info!(model = HashedEmbedder::NAME, dim = config.dim, "embedding model loaded");
            Ok(Arc::new(embedder))
        }
        other => Err(Error::EmbeddingUnavailable {
            reason: format!("unknown embedding model '{other}'"),
        }),
    }
}

/// Deterministic feature-hashing sentence encoder.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    dim: usize,
    seed: u64,
}

impl HashedEmbedder {
    /// Registered model name.
    pub const NAME: &'static str = "hashed";

    /// Create an encoder with `dim` outputs.
    pub fn new(dim: usize, seed: u64) -> Result<Self> {
        if dim == 0 {
            return Err(Error::EmbeddingUnavailable {
                reason: "embedding dimension must be positive".to_string(),
            });
        }
        Ok(Self { dim, seed })
    }

    #[inline]
    fn accumulate(&self, v: &mut [f32], feature: &str, weight: f32) {
        let h = xxh64(feature.as_bytes(), self.seed);
        let idx = (h % self.dim as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

impl Embedder for HashedEmbedder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        let tokens = tokenize(text);

        for token in &tokens {
            self.accumulate(&mut v, &format!("w:{token}"), 1.0);

            let chars: Vec<char> = format!("<{token}>").chars().collect();
            for tri in chars.windows(3) {
                let tri: String = tri.iter().collect();
                self.accumulate(&mut v, &format!("c:{tri}"), 0.25);
            }
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut v, &format!("b:{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

/// Column names of an embedding matrix.
pub fn embedding_columns(dim: usize) -> Vec<String> {
    (0..dim).map(|i| format!("emb_{i}")).collect()
}

/// Embed texts into a matrix with columns `emb_0..emb_{dim-1}`.
pub fn embed_matrix(
    embedder: &dyn Embedder,
    ids: &[EntityId],
    texts: &[String],
) -> Result<FeatureMatrix> {
    if ids.len() != texts.len() {
        return Err(Error::DimensionMismatch {
            expected: ids.len(),
            found: texts.len(),
        });
    }
    let columns = embedding_columns(embedder.dim());
    let rows: Vec<Vec<f64>> = embedder
        .embed_batch(texts)
        .into_iter()
        .map(|v| v.into_iter().map(f64::from).collect())
        .collect();
    FeatureMatrix::from_rows(columns, ids.to_vec(), &rows)
}
