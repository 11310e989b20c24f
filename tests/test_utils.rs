//! Utility functions for testing
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use svmerge::merger::MergeGroup;
use svmerge::variant::VariantRecord;

/// Record in the default test partition
pub fn record(sample: usize, id: &str, start: f64, end: f64) -> VariantRecord {
    VariantRecord::new(sample, id, start, end, "chr1_DEL")
}

/// Member ids of every group
pub fn group_ids(records: &[VariantRecord], groups: &[MergeGroup]) -> Vec<Vec<String>> {
    groups
        .iter()
        .map(|group| group.members.iter().map(|&i| records[i].id.clone()).collect())
        .collect()
}

/// Groups as sorted id lists, sorted, for comparisons that ignore group order
pub fn canonical_groups(groups: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = groups
        .into_iter()
        .map(|mut group| {
            group.sort();
            group
        })
        .collect();
    groups.sort();
    groups
}

/// Generate a random DNA sequence of given length
pub fn generate_dna_sequence(rng: &mut StdRng, length: usize) -> String {
    let bases = ['A', 'C', 'G', 'T'];
    (0..length).map(|_| bases[rng.gen_range(0..4)]).collect()
}

/// Seeded batch of clustered calls spread over a few partitions
///
/// Calls gather around a handful of loci per partition so that thresholds,
/// sample exclusivity and tie-breaks all come into play.
pub fn synthetic_batch(seed: u64, records_per_partition: usize) -> Vec<VariantRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let keys = ["chr1_DEL", "chr1_INS", "chr2_DEL", "chrX_INV"];
    let mut records = Vec::new();
    for key in keys {
        let loci: Vec<(f64, f64)> = (0..5)
            .map(|_| (rng.gen_range(0..10_000) as f64, rng.gen_range(50..2_000) as f64))
            .collect();
        for i in 0..records_per_partition {
            let (start, length) = loci[rng.gen_range(0..loci.len())];
            let start = start + rng.gen_range(-40..=40) as f64;
            let end = length + rng.gen_range(-40..=40) as f64;
            let mut record = VariantRecord::new(rng.gen_range(0..6), format!("{key}_{i}"), start, end, key)
                .with_max_distance(rng.gen_range(10..80) as f64)
                .with_content_hash(rng.gen_range(0..4));
            if key == "chr1_INS" {
                let sequence = generate_dna_sequence(&mut rng, 20);
                record = record.with_sequence(sequence, 0.5);
            }
            records.push(record);
        }
    }
    records
}
