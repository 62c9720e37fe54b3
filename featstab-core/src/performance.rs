//! Precision (PPV) and recall (TPR) of final selections against ground truth.
//!
//! Pure set arithmetic: no randomness, no I/O.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::domain::FeatureSet;

/// Per-task comparison of a selection with the causal features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub task: usize,
    /// `|selected ∩ causal| / |selected|`; NaN when nothing was selected.
    pub ppv: f64,
    /// `|selected ∩ causal| / |causal|`.
    pub tpr: f64,
    pub true_positives: usize,
    pub num_selected: usize,
    pub num_causal: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PerformanceError {
    #[error("invalid ground truth: task {task} has no causal features")]
    InvalidGroundTruth { task: usize },
    #[error("task count mismatch: {causal} causal sets vs {selected} selected sets")]
    TaskCountMismatch { causal: usize, selected: usize },
}

/// Score each task's selection against its causal set.
pub fn score(
    causal_by_task: &[FeatureSet],
    selected_by_task: &[FeatureSet],
) -> Result<Vec<PerformanceMetrics>, PerformanceError> {
    if causal_by_task.len() != selected_by_task.len() {
        return Err(PerformanceError::TaskCountMismatch {
            causal: causal_by_task.len(),
            selected: selected_by_task.len(),
        });
    }

    causal_by_task
        .iter()
        .zip(selected_by_task)
        .enumerate()
        .map(|(task, (causal, selected))| score_task(task, causal, selected))
        .collect()
}

fn score_task(
    task: usize,
    causal: &FeatureSet,
    selected: &FeatureSet,
) -> Result<PerformanceMetrics, PerformanceError> {
    if causal.is_empty() {
        return Err(PerformanceError::InvalidGroundTruth { task });
    }

    let true_positives = selected.intersection(causal).count();
    let ppv = if selected.is_empty() {
        f64::NAN
    } else {
        true_positives as f64 / selected.len() as f64
    };
    let tpr = true_positives as f64 / causal.len() as f64;

    Ok(PerformanceMetrics {
        task,
        ppv,
        tpr,
        true_positives,
        num_selected: selected.len(),
        num_causal: causal.len(),
    })
}

// ─── Aggregation across folds ────────────────────────────────────────

/// Mean and sample standard deviation of PPV/TPR for one task across folds
/// (and repeats).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub task: usize,
    pub runs: usize,
    pub ppv_mean: f64,
    pub ppv_std: f64,
    /// Runs whose PPV was undefined (empty selection); excluded from the PPV stats.
    pub ppv_undefined: usize,
    pub tpr_mean: f64,
    pub tpr_std: f64,
}

/// Summarize per-run metric vectors task by task.
pub fn summarize<'a, I>(runs: I) -> Vec<MetricsSummary>
where
    I: IntoIterator<Item = &'a [PerformanceMetrics]>,
{
    let mut by_task: BTreeMap<usize, Vec<&PerformanceMetrics>> = BTreeMap::new();
    for run in runs {
        for metrics in run {
            by_task.entry(metrics.task).or_default().push(metrics);
        }
    }

    by_task
        .into_iter()
        .map(|(task, metrics)| {
            let ppvs: Vec<f64> = metrics.iter().map(|m| m.ppv).filter(|v| !v.is_nan()).collect();
            let tprs: Vec<f64> = metrics.iter().map(|m| m.tpr).collect();
            let (ppv_mean, ppv_std) = mean_std(&ppvs);
            let (tpr_mean, tpr_std) = mean_std(&tprs);
            MetricsSummary {
                task,
                runs: metrics.len(),
                ppv_mean,
                ppv_std,
                ppv_undefined: metrics.len() - ppvs.len(),
                tpr_mean,
                tpr_std,
            }
        })
        .collect()
}

/// Mean and sample standard deviation; NaN mean for no values, 0 spread for one.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}
