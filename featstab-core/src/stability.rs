//! Consistency index for feature selections (Kuncheva, 2007).
//!
//! For two selections `A` and `B` over `n` features:
//!
//! ```text
//! observed = |A ∩ B|
//! expected = |A| * |B| / n          (chance overlap of random picks)
//! maxposbl = min(|A|, |B|)
//! index    = (observed - expected) / (maxposbl - expected)
//! ```
//!
//! When `maxposbl == expected` the index is 0. That happens when both
//! selections take every feature or none at all; a trivial "perfect" overlap
//! must not be rewarded as maximal stability.
//!
//! The k-way index averages the pairwise index over all `k(k-1)/2` unordered
//! pairs.
//!
//! Reference: Kuncheva, L.I. (2007). A Stability Index for Feature Selection.
//! AIAC, pp. 390--395.

use thiserror::Error;

use crate::domain::FeatureSet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StabilityError {
    #[error("insufficient data: the k-way index needs at least 2 selections, got {got}")]
    InsufficientData { got: usize },
}

/// Pairwise consistency index between two selections over `num_features`.
///
/// The raw formula is returned unclamped. `num_features == 0` is treated as
/// the degenerate nothing-to-select case and yields 0.
pub fn consistency_index(sel1: &FeatureSet, sel2: &FeatureSet, num_features: usize) -> f64 {
    if num_features == 0 {
        return 0.0;
    }

    let observed = sel1.intersection(sel2).count() as f64;
    let expected = (sel1.len() * sel2.len()) as f64 / num_features as f64;
    let maxposbl = sel1.len().min(sel2.len()) as f64;

    if maxposbl == expected {
        return 0.0;
    }
    (observed - expected) / (maxposbl - expected)
}

/// Mean pairwise consistency index over all unordered pairs of `selections`.
pub fn consistency_index_k(
    selections: &[FeatureSet],
    num_features: usize,
) -> Result<f64, StabilityError> {
    let k = selections.len();
    if k < 2 {
        return Err(StabilityError::InsufficientData { got: k });
    }

    let mut total = 0.0;
    for (i, sel1) in selections.iter().enumerate() {
        for sel2 in &selections[i + 1..] {
            total += consistency_index(sel1, sel2, num_features);
        }
    }

    Ok(2.0 * total / (k * (k - 1)) as f64)
}
