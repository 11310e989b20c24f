//! Sequence similarity between inserted sequences
//!
//! Two scores are available: normalized edit-distance similarity and Jaccard
//! similarity of k-mer multisets. K-mers are packed 2 bits per base with a
//! rolling window; windows containing non-ACGT characters are skipped.

use crate::config::SimilarityAlgorithm;
use crate::variant::{VariantRecord, EPSILON};

/// Encode a DNA base in 2 bits, or `None` for anything that is not ACGT
fn encode_base(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Levenshtein distance between two byte strings
pub fn edit_distance(s: &[u8], t: &[u8]) -> usize {
    if s.is_empty() {
        return t.len();
    }
    if t.is_empty() {
        return s.len();
    }

    let mut previous: Vec<usize> = (0..=t.len()).collect();
    let mut current = vec![0usize; t.len() + 1];
    for (i, &a) in s.iter().enumerate() {
        current[0] = i + 1;
        for (j, &b) in t.iter().enumerate() {
            let substitution = previous[j] + usize::from(!a.eq_ignore_ascii_case(&b));
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[t.len()]
}

/// `1 - edit_distance / max(len)`; two empty sequences are identical
pub fn edit_distance_similarity(s: &[u8], t: &[u8]) -> f64 {
    let longest = s.len().max(t.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(s, t) as f64 / longest as f64
}

/// Whether the shorter sequence is long enough to possibly reach `required` identity
pub fn passes_length_ratio(len_a: usize, len_b: usize, required: f64) -> bool {
    let shorter = len_a.min(len_b) as f64;
    let longer = len_a.max(len_b) as f64;
    shorter >= longer * required - EPSILON
}

/// Multiset of packed k-mers, sorted by k-mer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerProfile {
    k: usize,
    counts: Vec<(u64, u32)>,
}

impl KmerProfile {
    pub fn from_sequence(sequence: &[u8], k: usize) -> Self {
        let mut kmers = Vec::with_capacity(sequence.len().saturating_sub(k) + 1);
        if k > 0 && sequence.len() >= k {
            let mask = if k >= 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
            let mut packed = 0u64;
            let mut valid = 0usize;
            for &base in sequence {
                match encode_base(base) {
                    Some(code) => {
                        packed = ((packed << 2) | code) & mask;
                        valid += 1;
                        if valid >= k {
                            kmers.push(packed);
                        }
                    }
                    None => {
                        packed = 0;
                        valid = 0;
                    }
                }
            }
        }
        kmers.sort_unstable();

        let mut counts: Vec<(u64, u32)> = Vec::new();
        for kmer in kmers {
            match counts.last_mut() {
                Some((last, count)) if *last == kmer => *count += 1,
                _ => counts.push((kmer, 1)),
            }
        }
        KmerProfile { k, counts }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of distinct k-mers
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Total number of k-mer occurrences
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&(_, count)| count as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Weighted Jaccard: sum of minimum counts over sum of maximum counts
    ///
    /// Returns `None` when neither profile has a k-mer.
    pub fn jaccard(&self, other: &KmerProfile) -> Option<f64> {
        let (mut i, mut j) = (0, 0);
        let (mut intersection, mut union) = (0u64, 0u64);
        while i < self.counts.len() && j < other.counts.len() {
            let (kmer_a, count_a) = self.counts[i];
            let (kmer_b, count_b) = other.counts[j];
            if kmer_a == kmer_b {
                intersection += count_a.min(count_b) as u64;
                union += count_a.max(count_b) as u64;
                i += 1;
                j += 1;
            } else if kmer_a < kmer_b {
                union += count_a as u64;
                i += 1;
            } else {
                union += count_b as u64;
                j += 1;
            }
        }
        union += self.counts[i..].iter().map(|&(_, c)| c as u64).sum::<u64>();
        union += other.counts[j..].iter().map(|&(_, c)| c as u64).sum::<u64>();

        if union == 0 {
            None
        } else {
            Some(intersection as f64 / union as f64)
        }
    }
}

/// Per-partition sequence comparison, with k-mer profiles built once per record
pub struct SequenceMatcher {
    algorithm: SimilarityAlgorithm,
    profiles: Vec<Option<KmerProfile>>,
}

impl SequenceMatcher {
    pub fn new(records: &[VariantRecord], algorithm: SimilarityAlgorithm) -> Self {
        let profiles = match algorithm {
            SimilarityAlgorithm::EditDistance => Vec::new(),
            SimilarityAlgorithm::KmerJaccard { k } => records
                .iter()
                .map(|record| {
                    record
                        .sequence
                        .as_deref()
                        .filter(|_| record.min_sequence_identity > 0.0)
                        .map(|sequence| KmerProfile::from_sequence(sequence.as_bytes(), k))
                })
                .collect(),
        };
        SequenceMatcher {
            algorithm,
            profiles,
        }
    }

    /// Similarity score of records a and b, which must both carry a sequence
    pub fn similarity(&self, records: &[VariantRecord], a: usize, b: usize) -> f64 {
        let (Some(s), Some(t)) = (records[a].sequence.as_deref(), records[b].sequence.as_deref())
        else {
            return 1.0;
        };
        match self.algorithm {
            SimilarityAlgorithm::EditDistance => edit_distance_similarity(s.as_bytes(), t.as_bytes()),
            SimilarityAlgorithm::KmerJaccard { k } => {
                let jaccard = match (self.profile(a), self.profile(b)) {
                    (Some(pa), Some(pb)) => pa.jaccard(pb),
                    _ => KmerProfile::from_sequence(s.as_bytes(), k)
                        .jaccard(&KmerProfile::from_sequence(t.as_bytes(), k)),
                };
                // Sequences too short for a single k-mer fall back to edit distance
                jaccard.unwrap_or_else(|| edit_distance_similarity(s.as_bytes(), t.as_bytes()))
            }
        }
    }

    /// Whether records a and b are similar enough to merge
    ///
    /// Vacuously true unless both carry a sequence. The required identity is
    /// the smaller of the two thresholds, so a zero on either side disables it.
    pub fn passes(&self, records: &[VariantRecord], a: usize, b: usize) -> bool {
        let (ra, rb) = (&records[a], &records[b]);
        let (Some(s), Some(t)) = (ra.sequence.as_deref(), rb.sequence.as_deref()) else {
            return true;
        };
        let required = ra.min_sequence_identity.min(rb.min_sequence_identity);
        if required <= 0.0 {
            return true;
        }
        if !passes_length_ratio(s.len(), t.len(), required) {
            return false;
        }
        self.similarity(records, a, b) >= required - EPSILON
    }

    fn profile(&self, ordinal: usize) -> Option<&KmerProfile> {
        self.profiles.get(ordinal).and_then(|profile| profile.as_ref())
    }
}
