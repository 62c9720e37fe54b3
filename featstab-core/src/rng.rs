//! Deterministic seed hierarchy.
//!
//! A master seed expands into one sub-seed per `(stream, index)` pair, e.g. the
//! outer cross-validation shuffle or the subsample shuffle of fold 3. Sub-seeds
//! are derived via BLAKE3 hashing, independently of evaluation order, so
//! partitions are identical regardless of which fold is built first or how many
//! threads are involved.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Stream name for the outer k-fold shuffle.
pub const FOLD_STREAM: &str = "folds";
/// Stream name for the per-fold subsample shuffle.
pub const SUBSAMPLE_STREAM: &str = "subsamples";
/// Stream name for per-repeat partition seeds.
pub const REPEAT_STREAM: &str = "repeats";

/// Deterministic seed hierarchy rooted at one experiment seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHierarchy {
    master_seed: u64,
}

impl SeedHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive the sub-seed for `(stream, index)`.
    ///
    /// The result depends only on the master seed and the arguments, never on
    /// how many other sub-seeds were derived before.
    pub fn sub_seed(&self, stream: &str, index: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(stream.as_bytes());
        hasher.update(&index.to_le_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    /// Seeded `StdRng` for `(stream, index)`.
    pub fn rng_for(&self, stream: &str, index: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stream, index))
    }
}
