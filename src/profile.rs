//! Matching a weighted attribute profile against a calibrated matrix.
//!
//! A profile assigns each attribute a value on the 0–255 scale used by the
//! upstream scorers. Projecting it through the matrix yields one score per
//! category: `t = (p · M) / Σp` with `p = value / 255`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::matrix::AffinityMatrix;

pub const DEFAULT_PROFILE_VALUE: u8 = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    values: HashMap<String, u8>,
}

impl Profile {
    pub fn new(values: HashMap<String, u8>) -> Self {
        Self { values }
    }

    pub fn set(&mut self, attribute_id: impl Into<String>, value: u8) {
        self.values.insert(attribute_id.into(), value);
    }

    /// Value for an attribute; unset attributes sit at the midpoint.
    pub fn value(&self, attribute_id: &str) -> u8 {
        self.values
            .get(attribute_id)
            .copied()
            .unwrap_or(DEFAULT_PROFILE_VALUE)
    }

    /// Profile as a weight vector over `matrix` rows.
    pub fn weights_for(&self, matrix: &AffinityMatrix) -> Vec<f32> {
        matrix
            .row_ids()
            .iter()
            .map(|id| f32::from(self.value(id)) / 255.0)
            .collect()
    }
}

/// Weighted mean of the matrix rows, one score per column.
pub fn project(matrix: &AffinityMatrix, profile: &Profile) -> Vec<f32> {
    let p = profile.weights_for(matrix);
    let total: f32 = p.iter().sum();
    let denom = if total > 0.0 { total } else { 1.0 };
    (0..matrix.ncols())
        .map(|c| {
            let col = matrix.values().column(c);
            p.iter().zip(col.iter()).map(|(w, v)| w * v).sum::<f32>() / denom
        })
        .collect()
}

/// Mean projected score over the given categories. Unknown ids are ignored;
/// returns 0 when none of them is a column.
pub fn fit(matrix: &AffinityMatrix, profile: &Profile, category_ids: &[String]) -> f32 {
    let cols = matrix.col_index_map();
    let selected: Vec<usize> = category_ids
        .iter()
        .filter_map(|id| cols.get(id.as_str()).copied())
        .collect();
    if selected.is_empty() {
        return 0.0;
    }
    let t = project(matrix, profile);
    selected.iter().map(|&c| t[c]).sum::<f32>() / selected.len() as f32
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedCategory {
    pub category_id: String,
    pub score: f32,
}

/// Projection sorted descending, with `exclude` columns masked out.
pub fn ranked_projection(
    matrix: &AffinityMatrix,
    profile: &Profile,
    exclude: &[String],
    k: Option<usize>,
) -> Vec<ProjectedCategory> {
    let masked: HashSet<&str> = exclude.iter().map(String::as_str).collect();
    let t = project(matrix, profile);
    let mut ranked: Vec<ProjectedCategory> = matrix
        .col_ids()
        .iter()
        .zip(t)
        .filter(|(id, _)| !masked.contains(id.as_str()))
        .map(|(id, score)| ProjectedCategory {
            category_id: id.clone(),
            score,
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    if let Some(k) = k {
        ranked.truncate(k);
    }
    ranked
}
