// Disjoint-set forest behavior under random union sequences
use proptest::prelude::*;
use svmerge::union_find::DisjointSetForest;

/// Property: union never joins two sets that share a sample, and sizes add up
#[test]
fn prop_exclusive_unions_keep_samples_disjoint() {
    proptest!(|(
        samples in prop::collection::vec(0usize..150, 2..60),
        pairs in prop::collection::vec((0usize..60, 0usize..60), 0..120),
    )| {
        let n = samples.len();
        let mut forest = DisjointSetForest::new(&samples, false);
        for (a, b) in pairs {
            let (a, b) = (a % n, b % n);
            if forest.can_union(a, b) {
                let size = forest.size(a) + forest.size(b);
                let root = forest.union(a, b);
                prop_assert_eq!(forest.size(root), size);
            }
        }

        let sets = forest.get_sets();
        prop_assert_eq!(sets.iter().map(Vec::len).sum::<usize>(), n);
        for set in &sets {
            let mut seen: Vec<usize> = set.iter().map(|&i| samples[i]).collect();
            seen.sort_unstable();
            let before = seen.len();
            seen.dedup();
            prop_assert_eq!(seen.len(), before, "sample repeated in {:?}", set);
            prop_assert_eq!(forest.samples(set[0]), seen);
        }
    });
}

/// Property: with intrasample merging allowed, any two distinct sets can join
#[test]
fn prop_intrasample_unions_always_allowed() {
    proptest!(|(
        samples in prop::collection::vec(0usize..3, 2..40),
        pairs in prop::collection::vec((0usize..40, 0usize..40), 1..80),
    )| {
        let n = samples.len();
        let mut forest = DisjointSetForest::new(&samples, true);
        for (a, b) in pairs {
            let (a, b) = (a % n, b % n);
            prop_assert_eq!(forest.can_union(a, b), !forest.connected(a, b));
            if forest.can_union(a, b) {
                forest.union(a, b);
            }
        }
    });
}

#[test]
fn test_sets_in_first_member_order() {
    let mut forest = DisjointSetForest::new(&[0, 1, 2, 3, 4], false);
    forest.union(4, 1);
    forest.union(3, 0);
    assert_eq!(forest.get_sets(), vec![vec![0, 3], vec![1, 4], vec![2]]);
}

#[test]
fn test_samples_beyond_one_mask_word() {
    let samples: Vec<usize> = (0..200).collect();
    let mut forest = DisjointSetForest::new(&samples, false);
    for i in 1..200 {
        assert!(forest.can_union(0, i));
        forest.union(0, i);
    }
    assert_eq!(forest.size(199), 200);
    assert_eq!(forest.samples(17), samples);

    let mut with_repeat = samples.clone();
    with_repeat.push(126);
    let mut forest = DisjointSetForest::new(&with_repeat, false);
    for i in 1..200 {
        forest.union(0, i);
    }
    assert!(!forest.can_union(0, 200));
}
