//! Constraint-aware agglomerative merging of one partition
//!
//! Candidate edges are never enumerated up front. Every record keeps a cache of
//! its nearest neighbors and a pointer to the next one it has not proposed yet;
//! a single global heap holds at most one live edge per record. Popping an edge
//! tries the merge and then materializes the next valid edge from the same
//! record, so edges are seen in non-decreasing distance order while the
//! neighbor caches only grow as far as the distance thresholds require.
//!
//! Processing order is fixed by the edge ordering (distance, then content
//! hashes, then ids), which makes the resulting groups independent of input
//! order and thread scheduling.

use anyhow::{Context, Result};
use log::debug;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::config::{MergeConfig, MergeMode};
use crate::kd_tree::{KdTree, Neighbor};
use crate::similarity::SequenceMatcher;
use crate::union_find::DisjointSetForest;
use crate::variant::{compare_distances, Norm, VariantRecord, EPSILON};

/// Neighbors fetched by the first query of every record
pub const INITIAL_NEIGHBORS: usize = 4;

/// One output group: ordinals into the partition's record slice, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup {
    pub members: Vec<usize>,
}

impl MergeGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the group joined more than one call
    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }
}

/// Counters describing the work done for one or more partitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub knn_queries: usize,
    pub edges_pushed: usize,
    pub edges_popped: usize,
    pub unions: usize,
    /// Valid edges refused by the clique or centroid requirement
    pub rejected_by_mode: usize,
}

impl MergeStats {
    pub fn absorb(&mut self, other: &MergeStats) {
        self.knn_queries += other.knn_queries;
        self.edges_pushed += other.edges_pushed;
        self.edges_popped += other.edges_popped;
        self.unions += other.unions;
        self.rejected_by_mode += other.rejected_by_mode;
    }
}

/// Candidate merge between two records
struct Edge<'a> {
    distance: f64,
    from: usize,
    to: usize,
    from_hash: u32,
    to_hash: u32,
    from_id: &'a str,
    to_id: &'a str,
}

impl Ord for Edge<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_distances(self.distance, other.distance)
            .then_with(|| self.from_hash.cmp(&other.from_hash))
            .then_with(|| self.to_hash.cmp(&other.to_hash))
            .then_with(|| self.from_id.cmp(other.from_id))
            .then_with(|| self.to_id.cmp(other.to_id))
    }
}

impl PartialOrd for Edge<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Edge<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Edge<'_> {}

/// Lazily grown neighbor list of one record
#[derive(Default)]
struct Frontier {
    neighbors: Vec<Neighbor>,
    /// Cached neighbors already proposed or skipped
    consumed: usize,
    /// Size of the last query, 0 before the first one
    queried: usize,
    exhausted: bool,
}

/// Merges the records of one partition
pub struct ClusterEngine<'a> {
    records: &'a [VariantRecord],
    config: &'a MergeConfig,
    norm: Norm,
    index: KdTree<'a>,
    forest: DisjointSetForest,
    matcher: SequenceMatcher,
    /// Full membership per root, kept only for clique and centroid modes
    members: Option<Vec<Vec<usize>>>,
    stats: MergeStats,
}

impl<'a> ClusterEngine<'a> {
    /// Build the index and forest for `records`; ordinals are slice positions
    pub fn new(records: &'a [VariantRecord], config: &'a MergeConfig) -> Result<Self> {
        for record in records {
            record.validate()?;
        }

        let norm = config.distance_norm();
        let members = match config.mode {
            MergeMode::Default => None,
            MergeMode::Clique | MergeMode::Centroid => {
                Some((0..records.len()).map(|i| vec![i]).collect())
            }
        };

        Ok(ClusterEngine {
            records,
            config,
            norm,
            index: KdTree::build(records, norm),
            forest: DisjointSetForest::from_records(records, config.allow_intrasample),
            matcher: SequenceMatcher::new(records, config.similarity),
            members,
            stats: MergeStats::default(),
        })
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Run the merge loop until no candidate edge remains
    pub fn run_merging(&mut self) {
        let n = self.records.len();
        if n <= 1 {
            return;
        }

        let mut frontiers: Vec<Frontier> = (0..n).map(|_| Frontier::default()).collect();
        let mut queue: BinaryHeap<Reverse<Edge<'a>>> = BinaryHeap::with_capacity(n);

        for (from, frontier) in frontiers.iter_mut().enumerate() {
            if let Some(edge) = self.next_edge(from, frontier) {
                queue.push(Reverse(edge));
                self.stats.edges_pushed += 1;
            }
        }

        while let Some(Reverse(edge)) = queue.pop() {
            self.stats.edges_popped += 1;
            self.try_merge(edge.from, edge.to);

            if let Some(next) = self.next_edge(edge.from, &mut frontiers[edge.from]) {
                queue.push(Reverse(next));
                self.stats.edges_pushed += 1;
            }
        }

        debug!(
            "Merged {} records with {} unions ({} edges, {} neighbor queries)",
            n, self.stats.unions, self.stats.edges_popped, self.stats.knn_queries
        );
    }

    /// Current groups, one per forest root, including singletons
    pub fn groups(&mut self) -> Vec<MergeGroup> {
        self.forest
            .get_sets()
            .into_iter()
            .map(|members| MergeGroup { members })
            .collect()
    }

    /// Advance the frontier of `from` to its next valid candidate edge
    ///
    /// `consumed` carries over a re-query, which relies on the `2k` answer
    /// starting with the `k` answer; the distance order being total makes it so.
    fn next_edge(&mut self, from: usize, frontier: &mut Frontier) -> Option<Edge<'a>> {
        let records = self.records;
        let source = &records[from];

        while !frontier.exhausted {
            if frontier.consumed >= frontier.neighbors.len() {
                // A short answer means every record has been seen already
                if frontier.queried > 0 && frontier.neighbors.len() < frontier.queried {
                    frontier.exhausted = true;
                    break;
                }
                let k = if frontier.queried == 0 {
                    INITIAL_NEIGHBORS
                } else {
                    frontier.queried * 2
                };
                frontier.neighbors = self.index.k_nearest_to(from, k);
                frontier.queried = k;
                self.stats.knn_queries += 1;
                if frontier.consumed >= frontier.neighbors.len() {
                    frontier.exhausted = true;
                    break;
                }
            }

            let candidate = frontier.neighbors[frontier.consumed];
            if candidate.ordinal == from {
                frontier.consumed += 1;
                continue;
            }

            let target = &records[candidate.ordinal];
            // Neighbors come nearest first, so nothing further on can be in range
            if !source.within_threshold(target, candidate.distance) {
                frontier.exhausted = true;
                break;
            }

            frontier.consumed += 1;
            if !self.pair_allowed(from, candidate.ordinal) {
                continue;
            }

            return Some(Edge {
                distance: candidate.distance,
                from,
                to: candidate.ordinal,
                from_hash: source.content_hash,
                to_hash: target.content_hash,
                from_id: &source.id,
                to_id: &target.id,
            });
        }
        frontier.neighbors = Vec::new();
        None
    }

    /// Per-pair checks other than distance
    fn pair_allowed(&self, a: usize, b: usize) -> bool {
        let (ra, rb) = (&self.records[a], &self.records[b]);
        if ra.sample == rb.sample && !self.config.allow_intrasample {
            return false;
        }
        if !ra.passes_overlap(rb, self.config.overlap_fraction) {
            return false;
        }
        self.matcher.passes(self.records, a, b)
    }

    fn try_merge(&mut self, from: usize, to: usize) {
        if !self.forest.can_union(from, to) {
            return;
        }
        let root_from = self.forest.find(from);
        let root_to = self.forest.find(to);

        let accepted = match self.config.mode {
            MergeMode::Default => true,
            MergeMode::Clique => self.clique_holds(root_from, root_to),
            MergeMode::Centroid => self.centroid_holds(root_from, root_to),
        };
        if !accepted {
            self.stats.rejected_by_mode += 1;
            return;
        }

        let root = self.forest.union(root_from, root_to);
        self.stats.unions += 1;
        if let Some(members) = self.members.as_mut() {
            let absorbed = if root == root_from { root_to } else { root_from };
            let moved = std::mem::take(&mut members[absorbed]);
            members[root].extend(moved);
        }
    }

    fn component(&self, root: usize) -> &[usize] {
        self.members
            .as_ref()
            .map(|members| members[root].as_slice())
            .unwrap_or_default()
    }

    /// Every cross pair of the two components is within its threshold
    fn clique_holds(&self, root_a: usize, root_b: usize) -> bool {
        let records = self.records;
        self.component(root_a).iter().all(|&i| {
            self.component(root_b).iter().all(|&j| {
                let (a, b) = (&records[i], &records[j]);
                a.within_threshold(b, self.norm.between(a, b))
            })
        })
    }

    /// Every member of the union is within its own threshold of the union's centroid
    fn centroid_holds(&self, root_a: usize, root_b: usize) -> bool {
        let records = self.records;
        let combined = || self.component(root_a).iter().chain(self.component(root_b));

        let count = (self.component(root_a).len() + self.component(root_b).len()) as f64;
        let (sum_start, sum_end) = combined().fold((0.0, 0.0), |(s, e), &i| {
            (s + records[i].start, e + records[i].end)
        });
        let (center_start, center_end) = (sum_start / count, sum_end / count);

        combined().all(|&i| {
            let record = &records[i];
            self.norm.to_point(record, center_start, center_end) <= record.max_distance + EPSILON
        })
    }
}

/// Groups and statistics for one partition
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMerge {
    pub groups: Vec<MergeGroup>,
    pub stats: MergeStats,
}

impl PartitionMerge {
    pub fn merged_groups(&self) -> usize {
        self.groups.iter().filter(|group| group.is_merged()).count()
    }
}

/// Build an engine for `records`, run it, and collect its groups
pub fn merge_partition(records: &[VariantRecord], config: &MergeConfig) -> Result<PartitionMerge> {
    let mut engine = ClusterEngine::new(records, config).context("invalid partition input")?;
    engine.run_merging();
    Ok(PartitionMerge {
        groups: engine.groups(),
        stats: engine.stats(),
    })
}
