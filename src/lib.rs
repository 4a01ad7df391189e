#![forbid(unsafe_code)]

//! # hwam
//!
//! Hierarchical weighted affinity mapping: scores every (attribute, category)
//! pair of an attribute catalog against a labelled taxonomy.
//!
//! Attribute tags and category labels are embedded by an injected
//! [`Embedder`]; each attribute's weighted-mean cosine to each category gives
//! a base matrix in [0, 1]. That matrix is then calibrated along the tree
//! (parents lifted toward their strongest child, children gated by their
//! parent) and ranked into top-k categories per attribute. Calibrated matrices
//! persist to disk for downstream profile matching.

pub mod aggregate;
pub mod cache;
pub mod calibrate;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod mapper;
pub mod matrix;
pub mod profile;
pub mod rank;
pub mod store;
pub mod taxonomy;

pub use aggregate::{AffinityAggregator, AggregateError, AggregatorOptions, BaseAffinity, TagWeights};
pub use cache::{CachedEmbedder, EmbeddingCache, EmbeddingCacheKey, SqliteEmbeddingCache};
pub use calibrate::{CalibrateError, CalibrationMode, Calibrator, HierarchyIndex};
pub use catalog::{Attribute, AttributeCatalog, CatalogError};
pub use config::{ConfigError, MappingConfig};
pub use embedding::{EmbedError, Embedder, HashEmbedder, VectorTable};
pub use mapper::{AffinityMapper, MappingError, MappingOutcome, MappingReport};
pub use matrix::{AffinityMatrix, MatrixError};
pub use profile::Profile;
pub use rank::{top_k, RankedCategory};
pub use store::StoreError;
pub use taxonomy::{CategoryRecord, DepthDirection, TaxonomyError, TaxonomyTree};
