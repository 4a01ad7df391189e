//! Run configuration for the mapping pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibrate::CalibrationMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must lie in [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f32 },
    #[error("top_k must be at least 1")]
    ZeroTopK,
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Options recognised by [`crate::mapper::AffinityMapper::run`].
///
/// Missing fields in a JSON config fall back to [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    // -- Aggregation ---------------------------------------------------------
    /// Embed categories by their full root-to-node path instead of bare name.
    pub use_full_path_labels: bool,
    /// Joins path segments, both for labels and ranked output.
    pub path_separator: String,
    /// L2-normalise every vector returned by the embedder.
    pub normalize_vectors: bool,
    /// Compute per-tag similarities first, then aggregate per attribute.
    /// Numerically equivalent to the default aggregate-then-dot path.
    pub per_tag_similarity_path: bool,

    // -- Calibration ---------------------------------------------------------
    /// Bottom-up blend toward the strongest child.
    pub alpha: f32,
    /// Top-down gating strength from the parent's calibrated score.
    pub beta: f32,
    /// Parent-to-child additive boost (only with `boost_from_parents`).
    pub gamma: f32,
    /// Zero every non-leaf base score so parents rely on child evidence.
    /// Ignored when `boost_from_parents` is set.
    pub evidence_driven_parents: bool,
    /// Use the top-down boost pass instead of bottom-up/top-down calibration.
    pub boost_from_parents: bool,

    // -- Output --------------------------------------------------------------
    pub top_k: usize,
    pub leaf_only_output: bool,
    /// Decimal places kept for scores in ranked output.
    pub score_precision: u32,

    // -- Taxonomy ------------------------------------------------------------
    /// Fail instead of tolerating parent ids missing from the taxonomy.
    pub reject_dangling_parents: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            use_full_path_labels: false,
            path_separator: " > ".to_string(),
            normalize_vectors: true,
            per_tag_similarity_path: false,
            alpha: 0.5,
            beta: 0.7,
            gamma: 0.2,
            evidence_driven_parents: false,
            boost_from_parents: false,
            top_k: 10,
            leaf_only_output: false,
            score_precision: 6,
            reject_dangling_parents: false,
        }
    }
}

impl MappingConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta), ("gamma", self.gamma)] {
            check_unit(name, value)?;
        }
        if self.top_k == 0 {
            return Err(ConfigError::ZeroTopK);
        }
        Ok(())
    }

    pub fn calibration_mode(&self) -> CalibrationMode {
        if self.boost_from_parents {
            CalibrationMode::ParentBoost { gamma: self.gamma }
        } else {
            CalibrationMode::BottomUpTopDown {
                alpha: self.alpha,
                beta: self.beta,
            }
        }
    }

    /// Whether non-leaf base scores are zeroed before calibration.
    pub fn zero_parent_base(&self) -> bool {
        self.evidence_driven_parents && !self.boost_from_parents
    }
}

pub(crate) fn check_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: MappingConfig = serde_json::from_str(r#"{"alpha": 0.25, "top_k": 3}"#).unwrap();
        assert_eq!(cfg.alpha, 0.25);
        assert_eq!(cfg.top_k, 3);
        assert_eq!(cfg.beta, 0.7);
        assert_eq!(cfg.path_separator, " > ");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let cfg = MappingConfig {
            beta: 1.5,
            ..MappingConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { name: "beta", .. })
        ));

        let cfg = MappingConfig {
            top_k: 0,
            ..MappingConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroTopK)));

        let cfg = MappingConfig {
            gamma: f32::NAN,
            ..MappingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn boost_disables_parent_zeroing() {
        let cfg = MappingConfig {
            evidence_driven_parents: true,
            boost_from_parents: true,
            ..MappingConfig::default()
        };
        assert!(!cfg.zero_parent_base());
        assert!(matches!(
            cfg.calibration_mode(),
            CalibrationMode::ParentBoost { .. }
        ));
    }
}
