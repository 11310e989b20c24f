//! Minimal per-call information needed for merging
//!
//! A [`VariantRecord`] is a 2-D point (`start`, `end`) plus the metadata that
//! decides whether two points may join the same group: the sample it came
//! from, its distance and identity thresholds, an optional inserted sequence
//! and an optional interval for reciprocal-overlap checks.

use anyhow::{ensure, Result};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;

/// Tolerance applied to every distance and overlap comparison
pub const EPSILON: f64 = 1e-9;

/// Modulus of the polynomial content hash
const HASH_MODULUS: u64 = 1_000_000_007;

/// Multiplier of the polynomial content hash
const HASH_BASE: u64 = 17;

/// Hash the auxiliary metadata of a record for deterministic tie-breaking
///
/// The value carries no meaning beyond ordering: equal metadata gives equal
/// hashes, and ties are then resolved by record id.
pub fn content_hash(info: &str) -> u32 {
    info.bytes()
        .fold(0u64, |hash, byte| (hash * HASH_BASE + byte as u64) % HASH_MODULUS) as u32
}

/// A single structural variant call, reduced to what merging needs
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    /// Index of the sample (callset) the call came from
    pub sample: usize,
    /// Unique id across the whole run
    pub id: String,
    /// First merge coordinate
    pub start: f64,
    /// Second merge coordinate (length, or end, depending on variant kind)
    pub end: f64,
    /// Only records sharing this key are ever compared
    pub partition_key: String,
    /// Inserted sequence, for sequence-bearing insertions only
    pub sequence: Option<String>,
    /// Distance threshold for pairs involving this record
    pub max_distance: f64,
    /// Sequence identity another record needs to merge with this one
    pub min_sequence_identity: f64,
    /// `[lo, hi]` interval used by reciprocal-overlap checks
    pub interval: Option<(f64, f64)>,
    /// Tie-break key derived from the record's metadata
    pub content_hash: u32,
}

impl VariantRecord {
    pub fn new(
        sample: usize,
        id: impl Into<String>,
        start: f64,
        end: f64,
        partition_key: impl Into<String>,
    ) -> Self {
        VariantRecord {
            sample,
            id: id.into(),
            start,
            end,
            partition_key: partition_key.into(),
            sequence: None,
            max_distance: crate::config::DEFAULT_MAX_DISTANCE,
            min_sequence_identity: 0.0,
            interval: None,
            content_hash: 0,
        }
    }

    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>, min_identity: f64) -> Self {
        self.sequence = Some(sequence.into());
        self.min_sequence_identity = min_identity;
        self
    }

    pub fn with_interval(mut self, lo: f64, hi: f64) -> Self {
        self.interval = Some((lo, hi));
        self
    }

    pub fn with_content_hash(mut self, hash: u32) -> Self {
        self.content_hash = hash;
        self
    }

    /// Check the invariants the merging core relies on
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.start.is_finite() && self.end.is_finite(),
            "variant '{}' has non-finite coordinates ({}, {})",
            self.id,
            self.start,
            self.end
        );
        ensure!(
            self.max_distance.is_finite() && self.max_distance >= 0.0,
            "variant '{}' has invalid distance threshold {}",
            self.id,
            self.max_distance
        );
        if let Some((lo, hi)) = self.interval {
            ensure!(
                lo.is_finite() && hi.is_finite() && lo <= hi,
                "variant '{}' has invalid interval [{}, {}]",
                self.id,
                lo,
                hi
            );
        }
        Ok(())
    }

    /// Whether `distance` is close enough for this record and `other` to merge
    pub fn within_threshold(&self, other: &VariantRecord, distance: f64) -> bool {
        distance <= self.max_distance.max(other.max_distance) + EPSILON
    }

    /// Whether two interval records overlap by at least `fraction` of the larger interval
    ///
    /// Records without an interval, or a zero fraction, always pass.
    pub fn passes_overlap(&self, other: &VariantRecord, fraction: f64) -> bool {
        if fraction <= 0.0 {
            return true;
        }
        let (Some((lo_a, hi_a)), Some((lo_b, hi_b))) = (self.interval, other.interval) else {
            return true;
        };

        let overlap_start = lo_a.max(lo_b);
        let overlap_end = hi_a.min(hi_b);
        if overlap_end <= overlap_start + EPSILON {
            return false;
        }

        let larger = (hi_a - lo_a).max(hi_b - lo_b);
        overlap_end - overlap_start + EPSILON >= larger * fraction
    }
}

/// Order in which a partition's records are handed to the merger
///
/// Content hash first, then start, then id, so that tree construction depends
/// only on record contents and never on input order.
pub fn merge_order(a: &VariantRecord, b: &VariantRecord) -> Ordering {
    a.content_hash
        .cmp(&b.content_hash)
        .then_with(|| OrderedFloat(a.start).cmp(&OrderedFloat(b.start)))
        .then_with(|| a.id.cmp(&b.id))
}

/// Compare two distances at [`EPSILON`] resolution
///
/// Both sides are snapped to a grid of spacing [`EPSILON`] first, so values
/// closer than the tolerance compare equal and the order stays transitive.
pub fn compare_distances(a: f64, b: f64) -> Ordering {
    snap(a).cmp(&snap(b))
}

fn snap(distance: f64) -> OrderedFloat<f64> {
    OrderedFloat((distance / EPSILON).round())
}

/// Tie-break between two equidistant records: smaller hash, then smaller id
pub fn break_tie(hash_a: u32, id_a: &str, hash_b: u32, id_b: &str) -> Ordering {
    hash_a.cmp(&hash_b).then_with(|| id_a.cmp(id_b))
}

/// Generalized Minkowski distance over the two merge coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Norm {
    p: f64,
}

impl Norm {
    pub fn new(p: f64) -> Self {
        Norm { p }
    }

    pub fn euclidean() -> Self {
        Norm { p: 2.0 }
    }

    pub fn exponent(&self) -> f64 {
        self.p
    }

    /// Length of the offset `(dx, dy)` under this norm
    pub fn length(&self, dx: f64, dy: f64) -> f64 {
        if self.p == 2.0 {
            (dx * dx + dy * dy).sqrt()
        } else if self.p == 1.0 {
            dx.abs() + dy.abs()
        } else {
            (dx.abs().powf(self.p) + dy.abs().powf(self.p)).powf(1.0 / self.p)
        }
    }

    /// Distance between two records
    pub fn between(&self, a: &VariantRecord, b: &VariantRecord) -> f64 {
        self.length(a.start - b.start, a.end - b.end)
    }

    /// Distance from a record to an arbitrary point
    pub fn to_point(&self, record: &VariantRecord, x: f64, y: f64) -> f64 {
        self.length(record.start - x, record.end - y)
    }
}

impl Default for Norm {
    fn default() -> Self {
        Norm::euclidean()
    }
}
