//! Cross-validation folds and nested subsamples.
//!
//! Samples are shuffled once and cut into `num_folds` contiguous chunks; fold
//! `i` tests on chunk `i` and trains on the rest. Each fold's training indices
//! are then k-folded again into `num_subsamples` chunks, and subsample `s` is
//! the training set minus chunk `s`. Running the same hyperparameters on these
//! slightly different training subsets is what the consistency index measures.
//!
//! Chunk sizes follow the usual k-fold rule: the first `n % k` chunks hold one
//! extra element.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rng::{SeedHierarchy, FOLD_STREAM, SUBSAMPLE_STREAM};

// ─── Types ───────────────────────────────────────────────────────────

/// Partition parameters for one experiment repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub num_samples: usize,
    pub num_folds: usize,
    pub num_subsamples: usize,
    pub seed: u64,
}

/// Train/test indices of one fold, plus the subsamples drawn from its train set.
///
/// `train`, `test` and every subsample are sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldIndices {
    pub fold_index: usize,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub subsamples: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl PartitionError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

// ─── Partitioning ────────────────────────────────────────────────────

impl PartitionConfig {
    pub fn partition(&self) -> Result<Vec<FoldIndices>, PartitionError> {
        partition(
            self.num_samples,
            self.num_folds,
            self.num_subsamples,
            self.seed,
        )
    }
}

/// Build `num_folds` folds over `0..num_samples`, each with `num_subsamples`
/// subsamples of its training indices.
///
/// Identical arguments always produce identical output.
pub fn partition(
    num_samples: usize,
    num_folds: usize,
    num_subsamples: usize,
    seed: u64,
) -> Result<Vec<FoldIndices>, PartitionError> {
    if num_folds < 2 {
        return Err(PartitionError::invalid(format!(
            "num_folds must be at least 2, got {num_folds}"
        )));
    }
    if num_folds > num_samples {
        return Err(PartitionError::invalid(format!(
            "num_folds ({num_folds}) exceeds num_samples ({num_samples})"
        )));
    }
    if num_subsamples < 2 {
        return Err(PartitionError::invalid(format!(
            "num_subsamples must be at least 2, got {num_subsamples}"
        )));
    }

    let seeds = SeedHierarchy::new(seed);
    let all: Vec<usize> = (0..num_samples).collect();
    let chunks = shuffled_chunks(&all, num_folds, &mut seeds.rng_for(FOLD_STREAM, 0));

    let mut folds = Vec::with_capacity(num_folds);
    for (fold_index, test_chunk) in chunks.iter().enumerate() {
        let test = sorted(test_chunk);
        let train = complement(&all, test_chunk);

        if num_subsamples > train.len() {
            return Err(PartitionError::invalid(format!(
                "num_subsamples ({num_subsamples}) exceeds the {} training samples of fold {fold_index}",
                train.len()
            )));
        }

        let mut rng = seeds.rng_for(SUBSAMPLE_STREAM, fold_index as u64);
        let subsamples = shuffled_chunks(&train, num_subsamples, &mut rng)
            .iter()
            .map(|held_out| complement(&train, held_out))
            .collect();

        folds.push(FoldIndices {
            fold_index,
            train,
            test,
            subsamples,
        });
    }

    Ok(folds)
}

/// Shuffle a copy of `items` and cut it into `k` chunks.
fn shuffled_chunks(items: &[usize], k: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut shuffled = items.to_vec();
    shuffled.shuffle(rng);

    let base = shuffled.len() / k;
    let extra = shuffled.len() % k;

    let mut chunks = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let size = base + usize::from(i < extra);
        chunks.push(shuffled[start..start + size].to_vec());
        start += size;
    }
    chunks
}

/// Elements of `universe` not in `removed`, ascending.
fn complement(universe: &[usize], removed: &[usize]) -> Vec<usize> {
    let removed: BTreeSet<usize> = removed.iter().copied().collect();
    let mut kept: Vec<usize> = universe
        .iter()
        .copied()
        .filter(|i| !removed.contains(i))
        .collect();
    kept.sort_unstable();
    kept
}

fn sorted(items: &[usize]) -> Vec<usize> {
    let mut out = items.to_vec();
    out.sort_unstable();
    out
}
