//! Text embedding capability consumed by the aggregator.
//!
//! The engine never produces vectors itself; callers inject an [`Embedder`].
//! Two concrete providers live here: [`VectorTable`], which serves vectors
//! precomputed by an external model, and [`HashEmbedder`], a deterministic
//! stand-in for tests and dry runs. Plain closures also implement the trait.

use std::collections::HashMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider failed: {0}")]
    Provider(String),
    #[error("no vector available for text: {text:?}")]
    MissingText { text: String },
    #[error("vector table has inconsistent dimensions: expected {expected}, got {got} for {text:?}")]
    InconsistentTable {
        expected: usize,
        got: usize,
        text: String,
    },
    #[error("failed to read vector table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse vector table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("embedding cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Batch text-to-vector capability.
///
/// Implementations return exactly one vector per input text, in input order,
/// all of the same length. Failures are surfaced as-is; callers own retries.
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model; used for cache keys and reports.
    fn model_id(&self) -> &str {
        "unknown"
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

impl<F> Embedder for F
where
    F: Fn(&[String]) -> Result<Vec<Vec<f32>>, EmbedError> + Send + Sync,
{
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self(texts)
    }
}

/// Scale `v` to unit L2 norm. Zero and non-finite-norm vectors are left alone.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ---------------------------------------------------------------------
//  Precomputed vectors
// ---------------------------------------------------------------------

/// Lookup table of vectors produced ahead of time by an external model.
///
/// JSON form: `{"model": "...", "vectors": {"text": [f32, ...], ...}}` or a
/// bare `{"text": [f32, ...]}` object.
#[derive(Debug, Clone, Default)]
pub struct VectorTable {
    model: String,
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum VectorTableFile {
    Wrapped {
        #[serde(default)]
        model: Option<String>,
        vectors: HashMap<String, Vec<f32>>,
    },
    Bare(HashMap<String, Vec<f32>>),
}

impl VectorTable {
    pub fn new(
        model: impl Into<String>,
        vectors: HashMap<String, Vec<f32>>,
    ) -> Result<Self, EmbedError> {
        let mut dimension = None;
        for (text, v) in &vectors {
            match dimension {
                None => dimension = Some(v.len()),
                Some(d) if d != v.len() => {
                    return Err(EmbedError::InconsistentTable {
                        expected: d,
                        got: v.len(),
                        text: text.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(Self {
            model: model.into(),
            dimension: dimension.unwrap_or(0),
            vectors,
        })
    }

    /// Tables without an explicit `model` are identified by a hash of the
    /// file contents, so distinct tables never share cache entries.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EmbedError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let content_id = || {
            let digest = blake3::hash(raw.as_bytes()).to_hex();
            format!("vector-table:{}", &digest.as_str()[..16])
        };
        match serde_json::from_str::<VectorTableFile>(&raw)? {
            VectorTableFile::Wrapped { model, vectors } => {
                Self::new(model.unwrap_or_else(content_id), vectors)
            }
            VectorTableFile::Bare(vectors) => Self::new(content_id(), vectors),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl Embedder for VectorTable {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .ok_or_else(|| EmbedError::MissingText { text: text.clone() })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------
//  Deterministic hash embedder
// ---------------------------------------------------------------------

/// Deterministic unit vectors seeded from a blake3 hash of the text.
///
/// Identical texts always map to identical vectors; distinct texts map to
/// near-orthogonal ones in high dimensions. Useful wherever a real model is
/// unavailable, never as a semantic signal.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model: format!("hash-embedder-{dimension}"),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = blake3::hash(text.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest.as_bytes()[..8]);
        let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(seed));
        let mut v: Vec<f32> = (0..self.dimension)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        l2_normalize(&mut v);
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
