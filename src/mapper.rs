//! End-to-end mapping run: aggregate, calibrate, rank.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::info;

use crate::aggregate::{AffinityAggregator, AggregateError, AggregatorOptions, BaseAffinity, TagWeights};
use crate::calibrate::{CalibrateError, Calibrator};
use crate::catalog::{AttributeCatalog, CatalogError};
use crate::config::{ConfigError, MappingConfig};
use crate::embedding::Embedder;
use crate::matrix::{AffinityMatrix, MatrixError};
use crate::rank::{round_score, top_k, RankedCategory};
use crate::store::StoreError;
use crate::taxonomy::{TaxonomyError, TaxonomyTree};

#[derive(Debug, Error)]
pub enum MappingError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Calibrate(#[from] CalibrateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportParams {
    pub model: String,
    #[serde(flatten)]
    pub config: MappingConfig,
}

/// Serialisable run summary: parameters plus rankings keyed by attribute id,
/// in catalog order.
#[derive(Debug, Clone, Serialize)]
pub struct MappingReport {
    pub params: ReportParams,
    #[serde(serialize_with = "ordered_results")]
    pub results: Vec<(String, Vec<RankedCategory>)>,
}

fn ordered_results<S: Serializer>(
    results: &[(String, Vec<RankedCategory>)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(results.len()))?;
    for (id, ranked) in results {
        map.serialize_entry(id, ranked)?;
    }
    map.end()
}

impl MappingReport {
    pub fn rankings_for(&self, attribute_id: &str) -> Option<&[RankedCategory]> {
        self.results
            .iter()
            .find(|(id, _)| id == attribute_id)
            .map(|(_, r)| r.as_slice())
    }
}

#[derive(Debug, Clone)]
pub struct MappingOutcome {
    pub base: BaseAffinity,
    pub calibrated: AffinityMatrix,
    /// Unrounded, one list per attribute row.
    pub rankings: Vec<Vec<RankedCategory>>,
    pub report: MappingReport,
}

pub struct AffinityMapper<'a, E: ?Sized> {
    catalog: &'a AttributeCatalog,
    tree: &'a TaxonomyTree,
    embedder: &'a E,
}

impl<'a, E> AffinityMapper<'a, E>
where
    E: Embedder + ?Sized,
{
    pub fn new(catalog: &'a AttributeCatalog, tree: &'a TaxonomyTree, embedder: &'a E) -> Self {
        Self {
            catalog,
            tree,
            embedder,
        }
    }

    pub fn run(
        &self,
        cfg: &MappingConfig,
        weights: Option<&TagWeights>,
    ) -> Result<MappingOutcome, MappingError> {
        cfg.validate()?;
        if cfg.reject_dangling_parents {
            self.tree.ensure_no_dangling()?;
        }

        let aggregator =
            AffinityAggregator::new(self.tree, self.catalog, AggregatorOptions::from(cfg));
        let base = aggregator.compute(self.embedder, weights)?;

        let calibrator = Calibrator::new(cfg.calibration_mode())?
            .with_evidence_driven_parents(cfg.evidence_driven_parents);
        let calibrated = calibrator.calibrate(&base.matrix, self.tree)?;

        let rankings = top_k(
            &calibrated,
            self.tree,
            cfg.top_k,
            cfg.leaf_only_output,
            &cfg.path_separator,
        )?;

        let results = calibrated
            .row_ids()
            .iter()
            .zip(rankings.iter())
            .map(|(id, ranked)| {
                let rounded = ranked
                    .iter()
                    .map(|r| RankedCategory {
                        score: round_score(r.score as f32, cfg.score_precision),
                        ..r.clone()
                    })
                    .collect();
                (id.clone(), rounded)
            })
            .collect();

        info!(
            attributes = calibrated.nrows(),
            categories = calibrated.ncols(),
            top_k = cfg.top_k,
            leaf_only = cfg.leaf_only_output,
            "mapping complete"
        );

        Ok(MappingOutcome {
            base,
            calibrated,
            rankings,
            report: MappingReport {
                params: ReportParams {
                    model: self.embedder.model_id().to_string(),
                    config: cfg.clone(),
                },
                results,
            },
        })
    }
}
