//! Per-attribute top-k category selection.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::matrix::AffinityMatrix;
use crate::taxonomy::{TaxonomyError, TaxonomyTree};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCategory {
    #[serde(rename = "tag_id")]
    pub category_id: String,
    pub path: String,
    pub score: f64,
}

/// Round half away from zero to `precision` decimal places.
pub fn round_score(x: f32, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(15) as i32);
    (f64::from(x) * factor).round() / factor
}

/// Descending by score; equal scores keep column order.
fn by_score_desc(row: &[f32]) -> impl Fn(&usize, &usize) -> Ordering + '_ {
    move |&a, &b| row[b].total_cmp(&row[a]).then(a.cmp(&b))
}

/// Column indices of the `k` best scores in `row`, best first.
///
/// Uses partial selection so the cost is O(n + k log k) rather than a full sort.
pub fn top_k_indices(row: &[f32], candidates: Vec<usize>, k: usize) -> Vec<usize> {
    let mut candidates = candidates;
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }
    let cmp = by_score_desc(row);
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k - 1, &cmp);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(&cmp);
    candidates
}

/// Top `k` categories per attribute row, rows in matrix order.
///
/// With `leaf_only`, non-leaf categories are never returned; an attribute
/// gets an empty list if the columns hold no leaf at all.
pub fn top_k(
    matrix: &AffinityMatrix,
    tree: &TaxonomyTree,
    k: usize,
    leaf_only: bool,
    separator: &str,
) -> Result<Vec<Vec<RankedCategory>>, TaxonomyError> {
    let candidates: Vec<usize> = if leaf_only {
        let mut leaves = Vec::with_capacity(matrix.ncols());
        for (c, id) in matrix.col_ids().iter().enumerate() {
            if tree.is_leaf(id)? {
                leaves.push(c);
            }
        }
        leaves
    } else {
        (0..matrix.ncols()).collect()
    };
    let paths: Vec<String> = matrix
        .col_ids()
        .iter()
        .map(|id| tree.path_string(id, separator))
        .collect::<Result<_, _>>()?;

    Ok((0..matrix.nrows())
        .map(|r| {
            let row = matrix.row(r);
            top_k_indices(&row, candidates.clone(), k)
                .into_iter()
                .map(|c| RankedCategory {
                    category_id: matrix.col_ids()[c].clone(),
                    path: paths[c].clone(),
                    score: f64::from(row[c]),
                })
                .collect()
        })
        .collect())
}
