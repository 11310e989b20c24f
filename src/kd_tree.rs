//! Exact k-nearest-neighbor index over variant coordinates
//!
//! A 2-d tree whose splitting dimension alternates between `start` and `end`
//! by depth. The pivot of every subtree is simply the first remaining record
//! in list order, so no balancing is done; deep trees are fine because both
//! construction and search use explicit stacks instead of recursion.
//!
//! Results are exact. Equidistant candidates (within [`EPSILON`]) are ordered
//! by content hash and then by id, the same rule the merger uses for edges.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::variant::{break_tie, compare_distances, Norm, VariantRecord, EPSILON};

const DIMENSIONS: usize = 2;

/// One search result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the record in the indexed slice
    pub ordinal: usize,
    pub distance: f64,
}

#[derive(Debug, Clone)]
struct Node {
    ordinal: usize,
    children: [Option<usize>; 2],
}

/// Subtree waiting to be built
struct PendingSubtree {
    members: Vec<usize>,
    parent: Option<(usize, usize)>, // (node slot, side)
    depth: usize,
}

/// Search work item; `Resume` runs once the near subtree has been searched
enum Frame {
    Descend(usize, usize),
    Resume(usize, usize),
}

/// Candidate in the bounded max-heap; the greatest element is the worst one kept
struct Candidate<'a> {
    distance: f64,
    hash: u32,
    id: &'a str,
    ordinal: usize,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_distances(self.distance, other.distance)
            .then_with(|| break_tie(self.hash, self.id, other.hash, other.id))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

fn plane(record: &VariantRecord, dimension: usize) -> f64 {
    if dimension == 0 {
        record.start
    } else {
        record.end
    }
}

/// k-d tree over a borrowed slice of records
pub struct KdTree<'a> {
    records: &'a [VariantRecord],
    nodes: Vec<Node>,
    norm: Norm,
}

impl<'a> KdTree<'a> {
    /// Build the tree; node slot 0 is the root
    pub fn build(records: &'a [VariantRecord], norm: Norm) -> Self {
        let mut nodes: Vec<Node> = Vec::with_capacity(records.len());
        let mut work = Vec::new();
        if !records.is_empty() {
            work.push(PendingSubtree {
                members: (0..records.len()).collect(),
                parent: None,
                depth: 0,
            });
        }

        while let Some(PendingSubtree {
            members,
            parent,
            depth,
        }) = work.pop()
        {
            let dimension = depth % DIMENSIONS;
            let Some((&pivot, rest)) = members.split_first() else {
                continue;
            };
            let split = plane(&records[pivot], dimension);
            let (left, right): (Vec<usize>, Vec<usize>) = rest
                .iter()
                .partition(|&&ordinal| plane(&records[ordinal], dimension) < split);

            let slot = nodes.len();
            nodes.push(Node {
                ordinal: pivot,
                children: [None, None],
            });
            if let Some((parent_slot, side)) = parent {
                nodes[parent_slot].children[side] = Some(slot);
            }

            // Right is pushed first so the left subtree is built next
            for (side, members) in [(1, right), (0, left)] {
                if !members.is_empty() {
                    work.push(PendingSubtree {
                        members,
                        parent: Some((slot, side)),
                        depth: depth + 1,
                    });
                }
            }
        }

        KdTree {
            records,
            nodes,
            norm,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn norm(&self) -> Norm {
        self.norm
    }

    /// Depth of the deepest node, counting the root as 1
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut stack = Vec::new();
        if !self.nodes.is_empty() {
            stack.push((0usize, 1usize));
        }
        while let Some((slot, depth)) = stack.pop() {
            height = height.max(depth);
            for child in self.nodes[slot].children.iter().flatten() {
                stack.push((*child, depth + 1));
            }
        }
        height
    }

    /// The `k` records nearest to `(x, y)`, nearest first
    ///
    /// Returns every record when `k` exceeds the tree size.
    pub fn k_nearest(&self, x: f64, y: f64, k: usize) -> Vec<Neighbor> {
        if k == 0 || self.nodes.is_empty() {
            return Vec::new();
        }

        let records = self.records;
        let query = [x, y];
        let mut best: BinaryHeap<Candidate<'a>> = BinaryHeap::with_capacity(k.min(self.len()) + 1);
        let mut stack = vec![Frame::Descend(0, 0)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Descend(slot, depth) => {
                    let node = &self.nodes[slot];
                    let dimension = depth % DIMENSIONS;
                    let split = plane(&records[node.ordinal], dimension);
                    let near = usize::from(query[dimension] >= split);
                    stack.push(Frame::Resume(slot, depth));
                    if let Some(child) = node.children[near] {
                        stack.push(Frame::Descend(child, depth + 1));
                    }
                }
                Frame::Resume(slot, depth) => {
                    let node = &self.nodes[slot];
                    let record = &records[node.ordinal];
                    self.offer(
                        &mut best,
                        k,
                        Candidate {
                            distance: self.norm.to_point(record, x, y),
                            hash: record.content_hash,
                            id: &record.id,
                            ordinal: node.ordinal,
                        },
                    );

                    let dimension = depth % DIMENSIONS;
                    let split = plane(record, dimension);
                    let far = usize::from(query[dimension] < split);
                    if let Some(child) = node.children[far] {
                        // Ties at the hyperplane still need visiting to honor the tie-break
                        let gap = (query[dimension] - split).abs();
                        let keep_looking = match best.peek() {
                            Some(worst) if best.len() >= k => gap <= worst.distance + EPSILON,
                            _ => true,
                        };
                        if keep_looking {
                            stack.push(Frame::Descend(child, depth + 1));
                        }
                    }
                }
            }
        }

        best.into_sorted_vec()
            .into_iter()
            .map(|candidate| Neighbor {
                ordinal: candidate.ordinal,
                distance: candidate.distance,
            })
            .collect()
    }

    /// The `k` records nearest to the indexed record `ordinal`, which is itself included
    pub fn k_nearest_to(&self, ordinal: usize, k: usize) -> Vec<Neighbor> {
        let record = &self.records[ordinal];
        self.k_nearest(record.start, record.end, k)
    }

    fn offer(&self, best: &mut BinaryHeap<Candidate<'a>>, k: usize, candidate: Candidate<'a>) {
        if best.len() < k {
            best.push(candidate);
        } else if best.peek().is_some_and(|worst| candidate < *worst) {
            best.pop();
            best.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, start: f64, end: f64) -> VariantRecord {
        VariantRecord::new(0, id, start, end, "chr1")
    }

    #[test]
    fn test_empty_tree() {
        let records: Vec<VariantRecord> = Vec::new();
        let tree = KdTree::build(&records, Norm::euclidean());
        assert!(tree.is_empty());
        assert!(tree.k_nearest(0.0, 0.0, 3).is_empty());
    }

    #[test]
    fn test_first_record_is_root_and_split_alternates() {
        let records = vec![
            record("root", 10.0, 10.0),
            record("left", 5.0, 20.0),
            record("right", 15.0, 0.0),
            record("left_low", 4.0, 1.0),
        ];
        let tree = KdTree::build(&records, Norm::euclidean());
        assert_eq!(tree.nodes[0].ordinal, 0);
        let left = tree.nodes[0].children[0].expect("left child");
        let right = tree.nodes[0].children[1].expect("right child");
        assert_eq!(tree.nodes[left].ordinal, 1);
        assert_eq!(tree.nodes[right].ordinal, 2);
        // Depth 1 splits on `end`: 1.0 < 20.0 goes left of "left"
        let left_low = tree.nodes[left].children[0].expect("grandchild");
        assert_eq!(tree.nodes[left_low].ordinal, 3);
    }

    #[test]
    fn test_sorted_input_builds_without_recursion() {
        let records: Vec<VariantRecord> = (0..50_000)
            .map(|i| record(&format!("v{i}"), i as f64, i as f64))
            .collect();
        let tree = KdTree::build(&records, Norm::euclidean());
        assert_eq!(tree.len(), records.len());
        assert_eq!(tree.height(), records.len());

        let nearest = tree.k_nearest(25_000.2, 25_000.2, 3);
        let ordinals: Vec<usize> = nearest.iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![25_000, 25_001, 24_999]);
    }

    #[test]
    fn test_k_larger_than_tree_returns_everything() {
        let records = vec![record("a", 0.0, 0.0), record("b", 3.0, 4.0), record("c", 1.0, 0.0)];
        let tree = KdTree::build(&records, Norm::euclidean());
        let nearest = tree.k_nearest(0.0, 0.0, 10);
        let ordinals: Vec<usize> = nearest.iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![0, 2, 1]);
        assert!((nearest[2].distance - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_equidistant_prefers_hash_then_id() {
        let records = vec![
            record("b", 1.0, 0.0).with_content_hash(5),
            record("a", -1.0, 0.0).with_content_hash(5),
            record("c", 0.0, 1.0).with_content_hash(2),
        ];
        let tree = KdTree::build(&records, Norm::euclidean());
        let ordinals: Vec<usize> = tree.k_nearest(0.0, 0.0, 3).iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![2, 1, 0]);

        let ordinals: Vec<usize> = tree.k_nearest(0.0, 0.0, 2).iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![2, 1]);
    }

    #[test]
    fn test_manhattan_norm() {
        let records = vec![record("diag", 2.0, 2.0), record("axis", 3.5, 0.0)];
        let euclid = KdTree::build(&records, Norm::euclidean());
        assert_eq!(euclid.k_nearest(0.0, 0.0, 1)[0].ordinal, 0);
        let manhattan = KdTree::build(&records, Norm::new(1.0));
        assert_eq!(manhattan.k_nearest(0.0, 0.0, 1)[0].ordinal, 1);
    }
}
