//! Hyperparameter selection by stability.
//!
//! Every `(setting, task)` pair gets the k-way consistency index of that task's
//! selections across subsamples. The default policy then keeps one running
//! optimum over the whole `setting × task` table: it starts at 0, moves only on
//! a strictly higher score, and returns the setting that owns the single
//! highest per-task value. A setting can therefore win because it is very
//! stable for one task while being unstable for the others.
//!
//! That behavior is kept as the default on purpose. Aggregate policies exist
//! (`MeanOverTasks`, `WorstTask`) but must be requested explicitly.
//!
//! Settings are visited in ascending order (`BTreeMap`), so ties resolve to the
//! smallest setting.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{FeatureSet, HyperparameterSetting};
use crate::stability::{consistency_index_k, StabilityError};

/// `setting → task → one selection per subsample`.
pub type SelectionsBySetting = BTreeMap<HyperparameterSetting, BTreeMap<usize, Vec<FeatureSet>>>;

/// `setting → task → k-way consistency index`.
pub type StabilityTable = BTreeMap<HyperparameterSetting, BTreeMap<usize, f64>>;

/// How per-task stability is turned into one score per setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Highest single `(setting, task)` value wins.
    #[default]
    BestSingleTask,
    /// Highest mean over tasks wins.
    MeanOverTasks,
    /// Highest minimum over tasks wins.
    WorstTask,
}

/// The chosen setting and the table it was chosen from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub setting: HyperparameterSetting,
    pub score: f64,
    /// Task whose stability drove the choice (`BestSingleTask` only).
    pub driving_task: Option<usize>,
    pub stability: StabilityTable,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error("no valid setting: all {evaluated} evaluated settings have stability <= 0")]
    NoValidSetting { evaluated: usize },
    #[error("stability of task {task} at setting [{setting}] could not be computed: {source}")]
    Stability {
        setting: HyperparameterSetting,
        task: usize,
        #[source]
        source: StabilityError,
    },
}

/// k-way consistency index for every `(setting, task)` pair.
pub fn stability_table(
    results: &SelectionsBySetting,
    num_features: usize,
) -> Result<StabilityTable, SelectionError> {
    let mut table = StabilityTable::new();
    for (setting, by_task) in results {
        let mut scores = BTreeMap::new();
        for (&task, selections) in by_task {
            let score = consistency_index_k(selections, num_features).map_err(|source| {
                SelectionError::Stability {
                    setting: *setting,
                    task,
                    source,
                }
            })?;
            scores.insert(task, score);
        }
        table.insert(*setting, scores);
    }
    Ok(table)
}

/// Score every setting and return the most stable one under `policy`.
pub fn select_optimal(
    results: &SelectionsBySetting,
    num_features: usize,
    policy: SelectionPolicy,
) -> Result<Selection, SelectionError> {
    let table = stability_table(results, num_features)?;
    select_from_scores(table, policy)
}

/// Pick the optimum from precomputed per-task scores.
pub fn select_from_scores(
    stability: StabilityTable,
    policy: SelectionPolicy,
) -> Result<Selection, SelectionError> {
    let mut best: Option<(HyperparameterSetting, f64, Option<usize>)> = None;
    let mut best_score = 0.0;

    for (setting, by_task) in &stability {
        match policy {
            SelectionPolicy::BestSingleTask => {
                for (&task, &score) in by_task {
                    if score > best_score {
                        best_score = score;
                        best = Some((*setting, score, Some(task)));
                    }
                }
            }
            SelectionPolicy::MeanOverTasks | SelectionPolicy::WorstTask => {
                let Some(score) = aggregate(by_task, policy) else {
                    continue;
                };
                if score > best_score {
                    best_score = score;
                    best = Some((*setting, score, None));
                }
            }
        }
    }

    match best {
        Some((setting, score, driving_task)) => Ok(Selection {
            setting,
            score,
            driving_task,
            stability,
        }),
        None => Err(SelectionError::NoValidSetting {
            evaluated: stability.len(),
        }),
    }
}

fn aggregate(by_task: &BTreeMap<usize, f64>, policy: SelectionPolicy) -> Option<f64> {
    if by_task.is_empty() {
        return None;
    }
    let values = by_task.values().copied();
    match policy {
        SelectionPolicy::MeanOverTasks => Some(values.sum::<f64>() / by_task.len() as f64),
        SelectionPolicy::WorstTask => values.reduce(f64::min),
        SelectionPolicy::BestSingleTask => values.reduce(f64::max),
    }
}
