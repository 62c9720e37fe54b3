//! Append-only table of solver selections.
//!
//! Each unit of work (one setting on one subsample) yields its own
//! single-unit table. Workers never share a mutable collection: their tables
//! are merged into one `ResultTable` after the join, and only then reshaped into
//! the `setting → task → [selection per subsample]` map the selector consumes.
//! Reshaping checks completeness, so a missing unit can never shrink a
//! stability estimate unnoticed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{FeatureSet, HyperparameterSetting, SelectionResult};
use crate::selection::SelectionsBySetting;

/// Row key: which setting, which task, which subsample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub setting: HyperparameterSetting,
    pub task: usize,
    pub subsample: usize,
}

/// A setting scored on fewer subsamples than planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reduction {
    pub setting: HyperparameterSetting,
    pub task: usize,
    pub available: usize,
    pub expected: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultTableError {
    #[error("duplicate selection for setting [{}] task {} subsample {}", .key.setting, .key.task, .key.subsample)]
    Duplicate { key: ResultKey },
    #[error("incomplete results for setting [{setting}]: {} (task, subsample) selections missing", .missing.len())]
    Incomplete {
        setting: HyperparameterSetting,
        missing: Vec<(usize, usize)>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    rows: BTreeMap<ResultKey, FeatureSet>,
}

impl ResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Table holding one unit's result, one row per task.
    pub fn from_unit(
        setting: HyperparameterSetting,
        subsample: usize,
        result: SelectionResult,
    ) -> Self {
        let rows = result
            .into_tasks()
            .into_iter()
            .enumerate()
            .map(|(task, features)| {
                let key = ResultKey {
                    setting,
                    task,
                    subsample,
                };
                (key, features)
            })
            .collect();
        Self { rows }
    }

    fn insert(&mut self, key: ResultKey, features: FeatureSet) -> Result<(), ResultTableError> {
        if self.rows.contains_key(&key) {
            return Err(ResultTableError::Duplicate { key });
        }
        self.rows.insert(key, features);
        Ok(())
    }

    /// Merge another table built independently. Rows are never overwritten.
    pub fn merge(&mut self, other: ResultTable) -> Result<(), ResultTableError> {
        for (key, features) in other.rows {
            self.insert(key, features)?;
        }
        Ok(())
    }

    /// Reshape for selection, requiring every `(task, subsample)` of every
    /// setting to be present.
    pub fn complete(
        &self,
        settings: &[HyperparameterSetting],
        num_tasks: usize,
        num_subsamples: usize,
    ) -> Result<SelectionsBySetting, ResultTableError> {
        let mut out = SelectionsBySetting::new();
        for &setting in settings {
            let mut missing = Vec::new();
            let mut by_task = BTreeMap::new();
            for task in 0..num_tasks {
                let mut selections = Vec::with_capacity(num_subsamples);
                for subsample in 0..num_subsamples {
                    let key = ResultKey {
                        setting,
                        task,
                        subsample,
                    };
                    match self.rows.get(&key) {
                        Some(features) => selections.push(features.clone()),
                        None => missing.push((task, subsample)),
                    }
                }
                by_task.insert(task, selections);
            }
            if !missing.is_empty() {
                return Err(ResultTableError::Incomplete { setting, missing });
            }
            out.insert(setting, by_task);
        }
        Ok(out)
    }

    /// Reshape with whatever subsamples survived, reporting every shortfall.
    ///
    /// Tasks left with fewer than two selections still fail later in the
    /// stability computation.
    pub fn reduced(
        &self,
        settings: &[HyperparameterSetting],
        num_tasks: usize,
        num_subsamples: usize,
    ) -> (SelectionsBySetting, Vec<Reduction>) {
        let mut out = SelectionsBySetting::new();
        let mut reductions = Vec::new();
        for &setting in settings {
            let mut by_task = BTreeMap::new();
            for task in 0..num_tasks {
                let selections: Vec<FeatureSet> = (0..num_subsamples)
                    .filter_map(|subsample| {
                        self.rows.get(&ResultKey {
                            setting,
                            task,
                            subsample,
                        })
                    })
                    .cloned()
                    .collect();
                if selections.len() < num_subsamples {
                    reductions.push(Reduction {
                        setting,
                        task,
                        available: selections.len(),
                        expected: num_subsamples,
                    });
                }
                by_task.insert(task, selections);
            }
            out.insert(setting, by_task);
        }
        (out, reductions)
    }
}
