//! Dense attribute × category affinity matrix with its id orders.

use std::collections::HashMap;

use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("matrix shape {rows}x{cols} does not match {row_ids} row ids and {col_ids} column ids")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        row_ids: usize,
        col_ids: usize,
    },
    #[error("expected {expected} values for a {rows}x{cols} matrix, got {got}")]
    ValueCount {
        rows: usize,
        cols: usize,
        expected: usize,
        got: usize,
    },
}

/// Map a score into [0, 1]; NaN becomes 0.
#[inline]
pub fn unit_clamp(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Rows follow attribute order, columns follow category order. The id
/// sequences are part of the value: two matrices are equal only if their
/// values and both orders are equal.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityMatrix {
    row_ids: Vec<String>,
    col_ids: Vec<String>,
    values: DMatrix<f32>,
}

impl AffinityMatrix {
    pub fn new(
        row_ids: Vec<String>,
        col_ids: Vec<String>,
        values: DMatrix<f32>,
    ) -> Result<Self, MatrixError> {
        if values.nrows() != row_ids.len() || values.ncols() != col_ids.len() {
            return Err(MatrixError::ShapeMismatch {
                rows: values.nrows(),
                cols: values.ncols(),
                row_ids: row_ids.len(),
                col_ids: col_ids.len(),
            });
        }
        Ok(Self {
            row_ids,
            col_ids,
            values,
        })
    }

    /// Build from row-major values.
    pub fn from_row_major(
        row_ids: Vec<String>,
        col_ids: Vec<String>,
        values: &[f32],
    ) -> Result<Self, MatrixError> {
        let (rows, cols) = (row_ids.len(), col_ids.len());
        if values.len() != rows * cols {
            return Err(MatrixError::ValueCount {
                rows,
                cols,
                expected: rows * cols,
                got: values.len(),
            });
        }
        let values = DMatrix::from_row_slice(rows, cols, values);
        Self::new(row_ids, col_ids, values)
    }

    pub fn from_rows(
        row_ids: Vec<String>,
        col_ids: Vec<String>,
        rows: &[Vec<f32>],
    ) -> Result<Self, MatrixError> {
        let cols = col_ids.len();
        if rows.len() != row_ids.len() {
            return Err(MatrixError::ShapeMismatch {
                rows: rows.len(),
                cols,
                row_ids: row_ids.len(),
                col_ids: cols,
            });
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(MatrixError::ValueCount {
                rows: rows.len(),
                cols,
                expected: cols,
                got: bad.len(),
            });
        }
        let values = DMatrix::from_fn(rows.len(), cols, |r, c| rows[r][c]);
        Self::new(row_ids, col_ids, values)
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    pub fn col_ids(&self) -> &[String] {
        &self.col_ids
    }

    pub fn values(&self) -> &DMatrix<f32> {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        (row < self.nrows() && col < self.ncols()).then(|| self.values[(row, col)])
    }

    pub fn row(&self, row: usize) -> Vec<f32> {
        self.values.row(row).iter().copied().collect()
    }

    pub fn row_index(&self, id: &str) -> Option<usize> {
        self.row_ids.iter().position(|r| r == id)
    }

    pub fn col_index(&self, id: &str) -> Option<usize> {
        self.col_ids.iter().position(|c| c == id)
    }

    pub fn col_index_map(&self) -> HashMap<&str, usize> {
        self.col_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }

    /// Score for an (attribute id, category id) pair.
    pub fn score(&self, row_id: &str, col_id: &str) -> Option<f32> {
        let r = self.row_index(row_id)?;
        let c = self.col_index(col_id)?;
        self.get(r, c)
    }

    pub fn set_column(&mut self, col: usize, value: f32) {
        self.values.column_mut(col).fill(value);
    }

    pub fn clamp_unit(&mut self) {
        self.values.apply(|x| *x = unit_clamp(*x));
    }

    pub fn is_unit_bounded(&self) -> bool {
        self.values.iter().all(|x| (0.0..=1.0).contains(x))
    }

    pub fn to_row_major(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.nrows() * self.ncols());
        for r in 0..self.nrows() {
            out.extend(self.values.row(r).iter().copied());
        }
        out
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<String>, DMatrix<f32>) {
        (self.row_ids, self.col_ids, self.values)
    }
}
