use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Selected feature indices for one task, 0-based and deduplicated.
pub type FeatureSet = BTreeSet<usize>;

/// Output of one solver invocation: one feature set per task.
///
/// Tasks are indexed `0..num_tasks()` with no gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    tasks: Vec<FeatureSet>,
}

impl SelectionResult {
    pub fn new(tasks: Vec<FeatureSet>) -> Self {
        Self { tasks }
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks(&self) -> &[FeatureSet] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<FeatureSet> {
        self.tasks
    }
}
