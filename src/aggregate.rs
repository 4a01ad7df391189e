//! Base affinity: weighted-average cosine between attribute tags and category labels.
//!
//! Category labels and attribute tags are each embedded in a single batch.
//! Each attribute's tags are combined into one weighted-sum vector `a` (weights
//! normalised to sum to 1, vector not renormalised), so with unit category
//! vectors `g`, `dot(a, g)` is exactly the weighted mean of the per-tag
//! cosines. Scores are then mapped from [-1, 1] to [0, 1].

use std::collections::HashMap;

use nalgebra::DMatrix;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::AttributeCatalog;
use crate::config::MappingConfig;
use crate::embedding::{l2_normalize, EmbedError, Embedder};
use crate::matrix::{unit_clamp, AffinityMatrix, MatrixError};
use crate::taxonomy::{TaxonomyError, TaxonomyTree};

/// Optional per-tag weights; tags not present weigh 1.0.
pub type TagWeights = HashMap<String, f32>;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no attribute has any tags; nothing to compare against the taxonomy")]
    EmptyTagSet,
    #[error("taxonomy has no categories")]
    EmptyTaxonomy,
    #[error(transparent)]
    Embedding(#[from] EmbedError),
    #[error("embedder returned {got} vectors for {expected} texts ({batch})")]
    VectorCountMismatch {
        batch: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("embedder returned a {got}-dimensional vector, expected {expected} ({batch})")]
    DimensionMismatch {
        batch: &'static str,
        expected: usize,
        got: usize,
    },
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorOptions {
    pub use_full_path_labels: bool,
    pub path_separator: String,
    pub normalize_vectors: bool,
    pub per_tag_similarity_path: bool,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self::from(&MappingConfig::default())
    }
}

impl From<&MappingConfig> for AggregatorOptions {
    fn from(cfg: &MappingConfig) -> Self {
        Self {
            use_full_path_labels: cfg.use_full_path_labels,
            path_separator: cfg.path_separator.clone(),
            normalize_vectors: cfg.normalize_vectors,
            per_tag_similarity_path: cfg.per_tag_similarity_path,
        }
    }
}

/// Output of [`AffinityAggregator::compute`].
#[derive(Debug, Clone)]
pub struct BaseAffinity {
    /// Attributes × categories, values in [0, 1].
    pub matrix: AffinityMatrix,
    /// Full root-to-node path per column, joined by the configured separator.
    pub category_paths: Vec<String>,
}

/// Flattened tag occurrences and the per-attribute index ranges into them.
struct TagLayout {
    texts: Vec<String>,
    per_attribute: Vec<Vec<usize>>,
}

pub struct AffinityAggregator<'a> {
    tree: &'a TaxonomyTree,
    catalog: &'a AttributeCatalog,
    options: AggregatorOptions,
}

impl<'a> AffinityAggregator<'a> {
    pub fn new(
        tree: &'a TaxonomyTree,
        catalog: &'a AttributeCatalog,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            tree,
            catalog,
            options,
        }
    }

    /// Texts embedded for each category, in column order.
    pub fn category_texts(&self) -> Result<Vec<String>, TaxonomyError> {
        self.tree
            .ids()
            .map(|id| {
                if self.options.use_full_path_labels {
                    self.tree.path_string(id, &self.options.path_separator)
                } else {
                    Ok(self.tree.node(id)?.name.clone())
                }
            })
            .collect()
    }

    fn category_paths(&self) -> Result<Vec<String>, TaxonomyError> {
        self.tree
            .ids()
            .map(|id| self.tree.path_string(id, &self.options.path_separator))
            .collect()
    }

    fn tag_layout(&self) -> TagLayout {
        let mut texts = Vec::with_capacity(self.catalog.tag_count());
        let mut per_attribute = Vec::with_capacity(self.catalog.len());
        for attr in self.catalog.iter() {
            let mut idxs = Vec::with_capacity(attr.tags.len());
            for tag in &attr.tags {
                idxs.push(texts.len());
                texts.push(tag.clone());
            }
            per_attribute.push(idxs);
        }
        TagLayout {
            texts,
            per_attribute,
        }
    }

    /// Embed one batch and pack it into a row-per-text matrix.
    fn embed_batch<E>(
        &self,
        embedder: &E,
        texts: &[String],
        batch: &'static str,
        expected_dim: Option<usize>,
    ) -> Result<DMatrix<f32>, AggregateError>
    where
        E: Embedder + ?Sized,
    {
        let mut vectors = embedder.embed(texts)?;
        if vectors.len() != texts.len() {
            return Err(AggregateError::VectorCountMismatch {
                batch,
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        let dim = expected_dim.unwrap_or_else(|| vectors.first().map_or(0, Vec::len));
        for v in vectors.iter_mut() {
            if v.len() != dim {
                return Err(AggregateError::DimensionMismatch {
                    batch,
                    expected: dim,
                    got: v.len(),
                });
            }
            if self.options.normalize_vectors {
                l2_normalize(v);
            }
        }
        debug!(batch, texts = texts.len(), dim, "embedded batch");
        Ok(DMatrix::from_fn(vectors.len(), dim, |r, c| vectors[r][c]))
    }

    /// Per-attribute weights, normalised to sum to 1 (uniform if they sum to 0).
    fn attribute_weights(
        &self,
        layout: &TagLayout,
        idxs: &[usize],
        weights: Option<&TagWeights>,
    ) -> Vec<f32> {
        let mut w: Vec<f32> = idxs
            .iter()
            .map(|&i| {
                let tag = &layout.texts[i];
                match weights.and_then(|m| m.get(tag)) {
                    Some(&v) if v.is_finite() && v >= 0.0 => v,
                    Some(&v) => {
                        warn!(tag = %tag, weight = v, "ignoring invalid tag weight");
                        0.0
                    }
                    None => 1.0,
                }
            })
            .collect();
        // f64 so that very large weights cannot overflow the total.
        let sum: f64 = w.iter().map(|&x| f64::from(x)).sum();
        if sum > 0.0 {
            w.iter_mut().for_each(|x| *x = (f64::from(*x) / sum) as f32);
        } else {
            let uniform = 1.0 / w.len() as f32;
            w.iter_mut().for_each(|x| *x = uniform);
        }
        w
    }

    pub fn compute<E>(
        &self,
        embedder: &E,
        weights: Option<&TagWeights>,
    ) -> Result<BaseAffinity, AggregateError>
    where
        E: Embedder + ?Sized,
    {
        if self.tree.is_empty() {
            return Err(AggregateError::EmptyTaxonomy);
        }
        let layout = self.tag_layout();
        if layout.texts.is_empty() {
            return Err(AggregateError::EmptyTagSet);
        }

        let category_texts = self.category_texts()?;
        let category_paths = self.category_paths()?;

        let g = self.embed_batch(embedder, &category_texts, "categories", None)?;
        let t = self.embed_batch(embedder, &layout.texts, "tags", Some(g.ncols()))?;

        let cosine = if self.options.per_tag_similarity_path {
            self.per_tag_cosine(&layout, &g, &t, weights)
        } else {
            self.aggregate_cosine(&layout, &g, &t, weights)
        };

        let affinity = cosine.map(|c| unit_clamp((c + 1.0) / 2.0));
        let row_ids = self.catalog.ids().map(str::to_string).collect();
        let col_ids = self.tree.ids().map(str::to_string).collect();
        let matrix = AffinityMatrix::new(row_ids, col_ids, affinity)?;

        info!(
            attributes = matrix.nrows(),
            categories = matrix.ncols(),
            tag_occurrences = layout.texts.len(),
            per_tag = self.options.per_tag_similarity_path,
            "base affinity computed"
        );
        Ok(BaseAffinity {
            matrix,
            category_paths,
        })
    }

    /// Row-per-attribute weight matrix `W` over tag occurrences.
    fn weight_matrix(&self, layout: &TagLayout, weights: Option<&TagWeights>) -> DMatrix<f32> {
        let mut w = DMatrix::<f32>::zeros(layout.per_attribute.len(), layout.texts.len());
        for (a, idxs) in layout.per_attribute.iter().enumerate() {
            if idxs.is_empty() {
                continue;
            }
            let row = self.attribute_weights(layout, idxs, weights);
            for (&ti, &wi) in idxs.iter().zip(row.iter()) {
                w[(a, ti)] = wi;
            }
        }
        w
    }

    /// `C = (W · T) · Gᵀ`: one aggregate vector per attribute, then a dot product.
    fn aggregate_cosine(
        &self,
        layout: &TagLayout,
        g: &DMatrix<f32>,
        t: &DMatrix<f32>,
        weights: Option<&TagWeights>,
    ) -> DMatrix<f32> {
        let aggregate = self.weight_matrix(layout, weights) * t;
        aggregate * g.transpose()
    }

    /// `C = W · (T · Gᵀ)`: every tag against every category, then weighted rows.
    fn per_tag_cosine(
        &self,
        layout: &TagLayout,
        g: &DMatrix<f32>,
        t: &DMatrix<f32>,
        weights: Option<&TagWeights>,
    ) -> DMatrix<f32> {
        let sims = t * g.transpose();
        self.weight_matrix(layout, weights) * sims
    }
}
