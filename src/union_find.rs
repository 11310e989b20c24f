use indexmap::IndexMap;

use crate::variant::VariantRecord;

/// Sample bits stored per mask chunk
pub const SAMPLES_PER_MASK: usize = 63;

/// Union-Find (Disjoint Sets) forest whose components track which samples they contain
///
/// Every root owns a bitset of the samples it contains, stored as chunks of 63 bits
/// so any number of samples is supported. Bits are indexed by the rank of a sample
/// among the distinct samples of the forest, so mask width follows how many samples
/// there are, not how large their indices get. `can_union` is a pure check and
/// `union` commits without re-checking, so callers can run their own tests in between.
pub struct DisjointSetForest {
    parent: Vec<usize>,
    size: Vec<usize>,
    /// `chunks` consecutive masks per element; only meaningful at roots
    masks: Vec<u64>,
    chunks: usize,
    /// Distinct sample indices, ascending; a sample's bit is its position here
    sample_ids: Vec<usize>,
    allow_intrasample: bool,
}

impl DisjointSetForest {
    /// Create a forest of singletons, one per entry of `samples`
    pub fn new(samples: &[usize], allow_intrasample: bool) -> Self {
        let n = samples.len();
        let mut sample_ids = samples.to_vec();
        sample_ids.sort_unstable();
        sample_ids.dedup();
        let chunks = sample_ids.len() / SAMPLES_PER_MASK + 1;

        let mut masks = vec![0u64; n * chunks];
        for (i, &sample) in samples.iter().enumerate() {
            let Ok(rank) = sample_ids.binary_search(&sample) else {
                unreachable!("sample {sample} missing from its own rank table");
            };
            masks[i * chunks + rank / SAMPLES_PER_MASK] |= 1u64 << (rank % SAMPLES_PER_MASK);
        }

        DisjointSetForest {
            parent: (0..n).collect(),
            size: vec![1; n],
            masks,
            chunks,
            sample_ids,
            allow_intrasample,
        }
    }

    pub fn from_records(records: &[VariantRecord], allow_intrasample: bool) -> Self {
        let samples: Vec<usize> = records.iter().map(|record| record.sample).collect();
        Self::new(&samples, allow_intrasample)
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Find the root of element x with path compression
    pub fn find(&mut self, x: usize) -> usize {
        let root = self.root(x);
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Find the root of element x without touching the forest
    pub fn root(&self, x: usize) -> usize {
        let mut current = x;
        while self.parent[current] != current {
            current = self.parent[current];
        }
        current
    }

    /// Check if two elements are in the same set
    pub fn connected(&self, x: usize, y: usize) -> bool {
        self.root(x) == self.root(y)
    }

    /// Whether joining the sets of a and b is allowed
    ///
    /// False when they already share a root, or when both sets contain a call
    /// from the same sample and intrasample merging is off.
    pub fn can_union(&self, a: usize, b: usize) -> bool {
        let root_a = self.root(a);
        let root_b = self.root(b);
        if root_a == root_b {
            return false;
        }
        self.allow_intrasample || !self.shares_sample(root_a, root_b)
    }

    /// Join the sets containing a and b, returning the new root
    ///
    /// The caller must have checked `can_union`. The larger set absorbs the
    /// smaller; on equal sizes the set of `a` absorbs the set of `b`.
    pub fn union(&mut self, a: usize, b: usize) -> usize {
        let root_a = self.find(a);
        let root_b = self.find(b);
        assert_ne!(
            root_a, root_b,
            "union of elements {a} and {b} which already share root {root_a}"
        );

        let (root, absorbed) = if self.size[root_a] >= self.size[root_b] {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[absorbed] = root;
        self.size[root] += self.size[absorbed];
        for chunk in 0..self.chunks {
            self.masks[root * self.chunks + chunk] |= self.masks[absorbed * self.chunks + chunk];
        }
        root
    }

    /// Number of elements in the set containing x
    pub fn size(&self, x: usize) -> usize {
        self.size[self.root(x)]
    }

    /// Whether the set containing x has a member from `sample`
    pub fn contains_sample(&self, x: usize, sample: usize) -> bool {
        let Ok(rank) = self.sample_ids.binary_search(&sample) else {
            return false;
        };
        let root = self.root(x);
        self.masks[root * self.chunks + rank / SAMPLES_PER_MASK] & (1u64 << (rank % SAMPLES_PER_MASK))
            != 0
    }

    /// Sample indices present in the set containing x, ascending
    pub fn samples(&self, x: usize) -> Vec<usize> {
        let root = self.root(x);
        let mut samples = Vec::new();
        for chunk in 0..self.chunks {
            let mut mask = self.masks[root * self.chunks + chunk];
            while mask != 0 {
                let bit = mask.trailing_zeros() as usize;
                samples.push(self.sample_ids[chunk * SAMPLES_PER_MASK + bit]);
                mask &= mask - 1;
            }
        }
        samples
    }

    /// Get all sets as groups of indices
    ///
    /// Groups appear in order of their smallest member, members ascending.
    pub fn get_sets(&mut self) -> Vec<Vec<usize>> {
        let mut root_to_group: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for i in 0..self.len() {
            let root = self.find(i);
            root_to_group.entry(root).or_default().push(i);
        }
        root_to_group.into_values().collect()
    }

    fn shares_sample(&self, root_a: usize, root_b: usize) -> bool {
        let a = &self.masks[root_a * self.chunks..(root_a + 1) * self.chunks];
        let b = &self.masks[root_b * self.chunks..(root_b + 1) * self.chunks];
        a.iter().zip(b).any(|(x, y)| x & y != 0)
    }
}
