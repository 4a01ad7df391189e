//! Hierarchical calibration of base affinities over the taxonomy.
//!
//! Every attribute row is calibrated on its own: [`calibrate_row`] is a pure
//! function of (base row, hierarchy), so rows are fanned out with rayon and
//! collected back in row order.
//!
//! Two modes:
//! - bottom-up then top-down (α, β): parents blend toward their strongest
//!   child, then children are gated by their parent's final score;
//! - parent boost (γ): each child gains γ × its parent's *base* score.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{check_unit, ConfigError};
use crate::matrix::{unit_clamp, AffinityMatrix, MatrixError};
use crate::taxonomy::{TaxonomyError, TaxonomyTree};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CalibrationMode {
    /// `s[p] ← (1-α)s[p] + α·max(s[children])` leaves→root, then
    /// `s[c] ← s[c]·(β·s[parent] + 1-β)` root→leaves.
    BottomUpTopDown { alpha: f32, beta: f32 },
    /// `s[c] ← s[c] + γ·base[parent]`.
    ParentBoost { gamma: f32 },
}

impl CalibrationMode {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            CalibrationMode::BottomUpTopDown { alpha, beta } => {
                check_unit("alpha", alpha)?;
                check_unit("beta", beta)
            }
            CalibrationMode::ParentBoost { gamma } => check_unit("gamma", gamma),
        }
    }
}

#[derive(Debug, Error)]
pub enum CalibrateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// Taxonomy structure re-expressed in matrix column indices.
///
/// Columns may be any subset/permutation of the tree's nodes; a column whose
/// parent has no column of its own is treated as a root.
#[derive(Debug, Clone)]
pub struct HierarchyIndex {
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    /// Columns by ascending depth.
    root_to_leaves: Vec<usize>,
}

impl HierarchyIndex {
    pub fn new(tree: &TaxonomyTree, col_ids: &[String]) -> Result<Self, TaxonomyError> {
        let node_of: Vec<usize> = col_ids
            .iter()
            .map(|id| tree.index_of(id))
            .collect::<Result<_, _>>()?;
        let mut col_of_node = vec![None; tree.len()];
        for (col, &node) in node_of.iter().enumerate() {
            if col_of_node[node].replace(col).is_some() {
                return Err(TaxonomyError::DuplicateColumn {
                    id: col_ids[col].clone(),
                });
            }
        }

        let parent: Vec<Option<usize>> = node_of
            .iter()
            .map(|&node| tree.parent_index(node).and_then(|p| col_of_node[p]))
            .collect();
        let children: Vec<Vec<usize>> = node_of
            .iter()
            .map(|&node| {
                tree.child_indices(node)
                    .iter()
                    .filter_map(|&c| col_of_node[c])
                    .collect()
            })
            .collect();

        let mut root_to_leaves: Vec<usize> = (0..col_ids.len()).collect();
        root_to_leaves.sort_by_key(|&col| {
            tree.node_at(node_of[col])
                .map(|n| n.depth())
                .unwrap_or_default()
        });

        Ok(Self {
            parent,
            children,
            root_to_leaves,
        })
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn parent(&self, col: usize) -> Option<usize> {
        self.parent[col]
    }

    pub fn children(&self, col: usize) -> &[usize] {
        &self.children[col]
    }

    pub fn is_leaf(&self, col: usize) -> bool {
        self.children[col].is_empty()
    }

    pub fn non_leaf_columns(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(|&c| !self.is_leaf(c))
    }

    pub fn leaf_columns(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(|&c| self.is_leaf(c))
    }

    fn root_to_leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.root_to_leaves.iter().copied()
    }

    fn leaves_to_root(&self) -> impl Iterator<Item = usize> + '_ {
        self.root_to_leaves.iter().rev().copied()
    }
}

/// Bottom-up enhancement followed by top-down gating for one attribute row.
pub fn bottom_up_top_down_row(
    base: &[f32],
    index: &HierarchyIndex,
    alpha: f32,
    beta: f32,
) -> Vec<f32> {
    let mut s = base.to_vec();

    for j in index.leaves_to_root() {
        let children = index.children(j);
        if children.is_empty() {
            continue;
        }
        let max_child = children
            .iter()
            .map(|&c| s[c])
            .fold(f32::NEG_INFINITY, f32::max);
        s[j] = (1.0 - alpha) * s[j] + alpha * max_child;
    }

    // Parents are visited before their children, so s[p] is already final.
    for j in index.root_to_leaves() {
        if let Some(p) = index.parent(j) {
            let gate = beta * s[p] + (1.0 - beta);
            s[j] *= gate;
        }
    }

    s.iter_mut().for_each(|x| *x = unit_clamp(*x));
    s
}

/// Additive boost from each parent's base score to its direct children.
pub fn parent_boost_row(base: &[f32], index: &HierarchyIndex, gamma: f32) -> Vec<f32> {
    let mut boosted = base.to_vec();
    for j in index.root_to_leaves() {
        for &c in index.children(j) {
            boosted[c] += gamma * base[j];
        }
    }
    boosted.iter_mut().for_each(|x| *x = unit_clamp(*x));
    boosted
}

pub fn calibrate_row(base: &[f32], index: &HierarchyIndex, mode: CalibrationMode) -> Vec<f32> {
    match mode {
        CalibrationMode::BottomUpTopDown { alpha, beta } => {
            bottom_up_top_down_row(base, index, alpha, beta)
        }
        CalibrationMode::ParentBoost { gamma } => parent_boost_row(base, index, gamma),
    }
}

/// Applies one calibration mode to whole matrices.
#[derive(Debug, Clone)]
pub struct Calibrator {
    mode: CalibrationMode,
    evidence_driven_parents: bool,
}

impl Calibrator {
    pub fn new(mode: CalibrationMode) -> Result<Self, ConfigError> {
        mode.validate()?;
        Ok(Self {
            mode,
            evidence_driven_parents: false,
        })
    }

    /// Zero non-leaf base scores before calibrating. Has no effect in
    /// parent-boost mode, which needs the parents' base scores.
    pub fn with_evidence_driven_parents(mut self, enabled: bool) -> Self {
        self.evidence_driven_parents = enabled;
        self
    }

    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    fn zeroes_parents(&self) -> bool {
        self.evidence_driven_parents && !matches!(self.mode, CalibrationMode::ParentBoost { .. })
    }

    /// Base matrix as it enters calibration (parents zeroed if configured).
    pub fn prepare_base(&self, base: &AffinityMatrix, index: &HierarchyIndex) -> AffinityMatrix {
        let mut prepared = base.clone();
        if self.zeroes_parents() {
            for col in index.non_leaf_columns() {
                prepared.set_column(col, 0.0);
            }
        }
        prepared
    }

    /// Calibrate every row of `base`. The input is never modified.
    pub fn calibrate(
        &self,
        base: &AffinityMatrix,
        tree: &TaxonomyTree,
    ) -> Result<AffinityMatrix, CalibrateError> {
        let index = HierarchyIndex::new(tree, base.col_ids())?;
        let prepared = self.prepare_base(base, &index);

        let rows: Vec<Vec<f32>> = (0..prepared.nrows())
            .into_par_iter()
            .map(|r| calibrate_row(&prepared.row(r), &index, self.mode))
            .collect();

        info!(
            mode = ?self.mode,
            evidence_driven_parents = self.zeroes_parents(),
            rows = rows.len(),
            "calibration complete"
        );
        Ok(AffinityMatrix::from_rows(
            base.row_ids().to_vec(),
            base.col_ids().to_vec(),
            &rows,
        )?)
    }
}
