//! Property tests for the statistical invariants.
//!
//! Uses proptest to verify:
//! 1. Consistency index symmetry
//! 2. k-way index = mean of all pairwise indices
//! 3. Trivial all/none selections never score as stable
//! 4. Partition determinism, disjointness and coverage

use std::collections::BTreeSet;

use featstab_core::{consistency_index, consistency_index_k, partition, FeatureSet};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_selection(num_features: usize) -> impl Strategy<Value = FeatureSet> {
    proptest::collection::btree_set(0..num_features, 0..=num_features)
}

fn arb_selections(num_features: usize) -> impl Strategy<Value = Vec<FeatureSet>> {
    proptest::collection::vec(arb_selection(num_features), 2..6)
}

// ── 1–3. Consistency index ───────────────────────────────────────────

proptest! {
    #[test]
    fn pairwise_is_symmetric(a in arb_selection(30), b in arb_selection(30)) {
        prop_assert_eq!(consistency_index(&a, &b, 30), consistency_index(&b, &a, 30));
    }

    #[test]
    fn identical_nontrivial_selection_scores_one(a in arb_selection(25)) {
        prop_assume!(!a.is_empty() && a.len() < 25);
        let ci = consistency_index(&a, &a, 25);
        prop_assert!((ci - 1.0).abs() < 1e-9);
    }

    #[test]
    fn kway_is_mean_of_pairs(selections in arb_selections(20)) {
        let k = selections.len();
        let mut sum = 0.0;
        for i in 0..k {
            for j in (i + 1)..k {
                sum += consistency_index(&selections[i], &selections[j], 20);
            }
        }
        let mean = sum / (k * (k - 1) / 2) as f64;
        let kway = consistency_index_k(&selections, 20).unwrap();
        prop_assert!((kway - mean).abs() < 1e-9);
    }

    #[test]
    fn trivial_selections_score_zero(n in 1usize..200) {
        let all: FeatureSet = (0..n).collect();
        let none = FeatureSet::new();
        prop_assert_eq!(consistency_index(&all, &all, n), 0.0);
        prop_assert_eq!(consistency_index(&none, &none, n), 0.0);
    }
}

// ── 4. Partitions ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn partition_is_deterministic(
        num_samples in 10usize..80,
        num_folds in 2usize..6,
        seed in any::<u64>(),
    ) {
        let first = partition(num_samples, num_folds, 2, seed).unwrap();
        let second = partition(num_samples, num_folds, 2, seed).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn partition_covers_samples_once(
        num_samples in 10usize..80,
        num_folds in 2usize..6,
        num_subsamples in 2usize..5,
        seed in any::<u64>(),
    ) {
        let folds = partition(num_samples, num_folds, num_subsamples, seed).unwrap();
        prop_assert_eq!(folds.len(), num_folds);

        let mut seen = BTreeSet::new();
        for fold in &folds {
            let train: BTreeSet<usize> = fold.train.iter().copied().collect();
            let test: BTreeSet<usize> = fold.test.iter().copied().collect();
            prop_assert!(train.is_disjoint(&test));
            prop_assert_eq!(train.len() + test.len(), num_samples);
            for idx in &test {
                prop_assert!(seen.insert(*idx), "sample {} tested twice", idx);
            }
            for ss in &fold.subsamples {
                prop_assert!(ss.iter().all(|i| train.contains(i)));
            }
        }
        prop_assert_eq!(seen.len(), num_samples);
    }
}
