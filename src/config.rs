//! Merge configuration
//!
//! A [`MergeConfig`] is built once by the caller, validated, and handed by
//! reference to the scheduler and every engine it creates.

use anyhow::{bail, ensure, Result};

use crate::variant::Norm;

/// Global distance threshold when nothing more specific applies
pub const DEFAULT_MAX_DISTANCE: f64 = 1000.0;

/// K-mer size for Jaccard similarity of inserted sequences
pub const DEFAULT_KMER_SIZE: usize = 9;

/// Largest k-mer that fits the 2-bit packed encoding
pub const MAX_KMER_SIZE: usize = 31;

/// Extra group-consistency requirement applied before committing a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Commit every valid edge
    #[default]
    Default,
    /// Every pair inside a group must be within threshold
    Clique,
    /// Every member must be within its own threshold of the group centroid
    Centroid,
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeMode::Default => write!(f, "default"),
            MergeMode::Clique => write!(f, "clique"),
            MergeMode::Centroid => write!(f, "centroid"),
        }
    }
}

/// How inserted sequences are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityAlgorithm {
    /// `1 - edit_distance / max_len`
    EditDistance,
    /// Jaccard similarity of k-mer multisets
    KmerJaccard { k: usize },
}

impl Default for SimilarityAlgorithm {
    fn default() -> Self {
        SimilarityAlgorithm::KmerJaccard {
            k: DEFAULT_KMER_SIZE,
        }
    }
}

/// Per-record distance threshold model, applied at ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdModel {
    /// Constant threshold
    pub max_distance: f64,
    /// Threshold as a proportion of variant length (0 disables)
    pub linear_factor: f64,
    /// Lower bound for linear thresholds
    pub min_distance: Option<f64>,
    /// Upper bound for linear thresholds
    pub ceiling: Option<f64>,
    /// Threshold per sample index, taking precedence over the linear model
    pub per_sample: Vec<f64>,
}

impl Default for ThresholdModel {
    fn default() -> Self {
        ThresholdModel {
            max_distance: DEFAULT_MAX_DISTANCE,
            linear_factor: 0.0,
            min_distance: None,
            ceiling: None,
            per_sample: Vec::new(),
        }
    }
}

impl ThresholdModel {
    pub fn constant(max_distance: f64) -> Self {
        ThresholdModel {
            max_distance,
            ..Default::default()
        }
    }

    /// Distance threshold for one record
    ///
    /// Precedence: explicit record value, per-sample value, linear model,
    /// constant.
    pub fn resolve(&self, record_override: Option<f64>, sample: usize, length: f64) -> f64 {
        if let Some(value) = record_override {
            return value;
        }
        if let Some(&value) = self.per_sample.get(sample) {
            return value;
        }
        if self.linear_factor > 0.0 {
            let mut value = (self.linear_factor * length.abs()).round();
            if let Some(ceiling) = self.ceiling {
                value = value.min(ceiling);
            }
            if let Some(floor) = self.min_distance {
                value = value.max(floor);
            }
            return value;
        }
        self.max_distance
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_distance.is_finite() && self.max_distance >= 0.0,
            "max distance must be a non-negative number, got {}",
            self.max_distance
        );
        ensure!(
            self.linear_factor.is_finite() && self.linear_factor >= 0.0,
            "linear distance factor must be non-negative, got {}",
            self.linear_factor
        );
        for (name, bound) in [("min distance", self.min_distance), ("ceiling", self.ceiling)] {
            if let Some(value) = bound {
                ensure!(
                    value.is_finite() && value >= 0.0,
                    "{name} must be non-negative, got {value}"
                );
            }
        }
        if let (Some(floor), Some(ceiling)) = (self.min_distance, self.ceiling) {
            ensure!(
                floor <= ceiling,
                "min distance {floor} exceeds the distance ceiling {ceiling}"
            );
        }
        for (sample, &value) in self.per_sample.iter().enumerate() {
            ensure!(
                value.is_finite() && value >= 0.0,
                "distance for sample {sample} must be non-negative, got {value}"
            );
        }
        Ok(())
    }
}

/// Everything the merging core can be configured with
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    pub thresholds: ThresholdModel,
    /// Identity required between inserted sequences (0 disables the check)
    pub min_sequence_identity: f64,
    /// Minkowski exponent of the distance norm
    pub norm: f64,
    pub similarity: SimilarityAlgorithm,
    /// Allow two calls from the same sample in one group
    pub allow_intrasample: bool,
    pub mode: MergeMode,
    /// Required reciprocal overlap for interval records (0 disables the check)
    pub overlap_fraction: f64,
    /// Worker threads used by the scheduler
    pub threads: usize,
    /// Distinct samples a group needs before it is written out
    pub min_support: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            thresholds: ThresholdModel::default(),
            min_sequence_identity: 0.0,
            norm: 2.0,
            similarity: SimilarityAlgorithm::default(),
            allow_intrasample: false,
            mode: MergeMode::Default,
            overlap_fraction: 0.0,
            threads: 1,
            min_support: 1,
        }
    }
}

impl MergeConfig {
    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_min_support(mut self, min_support: usize) -> Self {
        self.min_support = min_support;
        self
    }

    pub fn with_overlap_fraction(mut self, fraction: f64) -> Self {
        self.overlap_fraction = fraction;
        self
    }

    pub fn with_allow_intrasample(mut self, allow: bool) -> Self {
        self.allow_intrasample = allow;
        self
    }

    pub fn distance_norm(&self) -> Norm {
        Norm::new(self.norm)
    }

    /// Build the mode from the two command-line switches
    pub fn mode_from_flags(clique: bool, centroid: bool) -> Result<MergeMode> {
        match (clique, centroid) {
            (true, true) => bail!("clique and centroid merging are mutually exclusive"),
            (true, false) => Ok(MergeMode::Clique),
            (false, true) => Ok(MergeMode::Centroid),
            (false, false) => Ok(MergeMode::Default),
        }
    }

    /// Range checks, run once before any merging starts
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        ensure!(
            self.norm.is_finite() && self.norm >= 1.0,
            "distance norm exponent must be at least 1, got {}",
            self.norm
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_sequence_identity),
            "minimum sequence identity must be between 0 and 1, got {}",
            self.min_sequence_identity
        );
        ensure!(
            (0.0..=1.0).contains(&self.overlap_fraction),
            "overlap fraction must be between 0 and 1, got {}",
            self.overlap_fraction
        );
        if let SimilarityAlgorithm::KmerJaccard { k } = self.similarity {
            ensure!(
                (1..=MAX_KMER_SIZE).contains(&k),
                "k-mer size must be between 1 and {MAX_KMER_SIZE}, got {k}"
            );
        }
        ensure!(self.threads > 0, "thread count must be at least 1");
        ensure!(self.min_support > 0, "minimum support must be at least 1");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MergeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, MergeMode::Default);
        assert_eq!(config.similarity, SimilarityAlgorithm::KmerJaccard { k: 9 });
        assert_eq!(config.threads, 1);
        assert_eq!(config.min_support, 1);
    }

    #[test]
    fn test_mode_flags_are_exclusive() {
        assert!(MergeConfig::mode_from_flags(true, true).is_err());
        assert_eq!(MergeConfig::mode_from_flags(true, false).unwrap(), MergeMode::Clique);
        assert_eq!(MergeConfig::mode_from_flags(false, true).unwrap(), MergeMode::Centroid);
        assert_eq!(MergeConfig::mode_from_flags(false, false).unwrap(), MergeMode::Default);
    }

    #[test]
    fn test_validation_ranges() {
        let bad_norm = MergeConfig {
            norm: 0.5,
            ..Default::default()
        };
        assert!(bad_norm.validate().is_err());

        let bad_kmer = MergeConfig {
            similarity: SimilarityAlgorithm::KmerJaccard { k: 40 },
            ..Default::default()
        };
        assert!(bad_kmer.validate().is_err());

        assert!(MergeConfig::default().with_threads(0).validate().is_err());
        assert!(MergeConfig::default().with_min_support(0).validate().is_err());
        assert!(MergeConfig::default().with_overlap_fraction(1.5).validate().is_err());

        let inverted = MergeConfig {
            thresholds: ThresholdModel {
                min_distance: Some(500.0),
                ceiling: Some(100.0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_threshold_precedence() {
        let model = ThresholdModel {
            max_distance: 1000.0,
            linear_factor: 0.5,
            min_distance: Some(50.0),
            ceiling: Some(400.0),
            per_sample: vec![10.0],
        };
        assert_eq!(model.resolve(Some(7.0), 0, 100.0), 7.0);
        assert_eq!(model.resolve(None, 0, 100.0), 10.0);
        // Linear: 0.5 * 300 = 150
        assert_eq!(model.resolve(None, 1, -300.0), 150.0);
        // Capped at the ceiling
        assert_eq!(model.resolve(None, 1, 5000.0), 400.0);
        // Raised to the floor
        assert_eq!(model.resolve(None, 1, 20.0), 50.0);
    }

    #[test]
    fn test_constant_threshold() {
        let model = ThresholdModel::constant(250.0);
        assert_eq!(model.resolve(None, 3, 1_000_000.0), 250.0);
    }
}
