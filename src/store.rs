//! Persistence of affinity matrices as zstd-compressed bincode artifacts.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::matrix::AffinityMatrix;

pub const ARTIFACT_VERSION: u32 = 1;
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("corrupt affinity artifact: {reason}")]
    CorruptArtifact { reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::CorruptArtifact {
        reason: reason.into(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Artifact {
    version: u32,
    rows: u64,
    cols: u64,
    row_ids: Vec<String>,
    col_ids: Vec<String>,
    /// Row-major.
    values: Vec<f32>,
}

pub fn write_to<W: Write>(writer: W, matrix: &AffinityMatrix) -> Result<(), StoreError> {
    let artifact = Artifact {
        version: ARTIFACT_VERSION,
        rows: matrix.nrows() as u64,
        cols: matrix.ncols() as u64,
        row_ids: matrix.row_ids().to_vec(),
        col_ids: matrix.col_ids().to_vec(),
        values: matrix.to_row_major(),
    };
    let mut encoder = zstd::stream::write::Encoder::new(writer, ZSTD_LEVEL)?;
    bincode::serialize_into(&mut encoder, &artifact)?;
    encoder.finish()?.flush()?;
    Ok(())
}

pub fn read_from<R: Read>(reader: R) -> Result<AffinityMatrix, StoreError> {
    let decoder = zstd::stream::read::Decoder::new(reader).map_err(|e| corrupt(e.to_string()))?;
    let artifact: Artifact =
        bincode::deserialize_from(decoder).map_err(|e| corrupt(e.to_string()))?;

    if artifact.version != ARTIFACT_VERSION {
        return Err(corrupt(format!(
            "unsupported version {} (expected {ARTIFACT_VERSION})",
            artifact.version
        )));
    }
    if artifact.rows != artifact.row_ids.len() as u64
        || artifact.cols != artifact.col_ids.len() as u64
    {
        return Err(corrupt(format!(
            "header says {}x{}, ids give {}x{}",
            artifact.rows,
            artifact.cols,
            artifact.row_ids.len(),
            artifact.col_ids.len()
        )));
    }
    AffinityMatrix::from_row_major(artifact.row_ids, artifact.col_ids, &artifact.values)
        .map_err(|e| corrupt(e.to_string()))
}

/// Write `matrix` to `path`, creating parent directories as needed.
pub fn save(path: impl AsRef<Path>, matrix: &AffinityMatrix) -> Result<(), StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_to(BufWriter::new(File::create(path)?), matrix)?;
    info!(
        path = %path.display(),
        rows = matrix.nrows(),
        cols = matrix.ncols(),
        "saved affinity matrix"
    );
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<AffinityMatrix, StoreError> {
    let path = path.as_ref();
    let matrix = read_from(BufReader::new(File::open(path)?))?;
    info!(
        path = %path.display(),
        rows = matrix.nrows(),
        cols = matrix.ncols(),
        "loaded affinity matrix"
    );
    Ok(matrix)
}
