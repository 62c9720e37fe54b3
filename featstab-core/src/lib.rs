//! FeatStab Core: the statistical layer for evaluating feature-selection stability.
//!
//! This crate holds everything that is pure computation:
//! - Deterministic cross-validation folds and nested subsamples
//! - Kuncheva consistency index, pairwise and k-way
//! - Hyperparameter selection by stability
//! - PPV / TPR scoring against ground-truth causal features
//! - The append-only result table merged at join points
//! - The whitespace-separated index file codec
//!
//! Solver invocation and experiment orchestration live in `featstab-runner`.

pub mod domain;
pub mod index_io;
pub mod partition;
pub mod performance;
pub mod rng;
pub mod selection;
pub mod stability;
pub mod table;

pub use domain::{FeatureSet, HyperparameterGrid, HyperparameterSetting, SelectionResult};
pub use index_io::IndexFileError;
pub use partition::{partition, FoldIndices, PartitionConfig, PartitionError};
pub use performance::{score, summarize, MetricsSummary, PerformanceError, PerformanceMetrics};
pub use selection::{
    select_from_scores, select_optimal, stability_table, Selection, SelectionError,
    SelectionPolicy, SelectionsBySetting, StabilityTable,
};
pub use stability::{consistency_index, consistency_index_k, StabilityError};
pub use table::{Reduction, ResultKey, ResultTable, ResultTableError};
