//! Experiment report and its exports.
//!
//! - **JSON** (`report.json`): the full report, schema-versioned
//! - **CSV** (`performance.csv`): one row per repeat/fold/algorithm/task
//! - **CSV** (`stability.csv`): one row per repeat/fold/algorithm/setting/task
//!
//! Undefined PPVs (empty final selections) are `null` in JSON and empty cells
//! in CSV.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use featstab_core::{
    summarize, FeatureSet, HyperparameterSetting, MetricsSummary, PerformanceMetrics, Reduction,
    SelectionPolicy,
};
use serde::Serialize;

use crate::config::{ExperimentConfig, FailurePolicy};
use crate::experiment::UnitFailure;
use crate::layout::ExperimentLayout;
use crate::solver::SolverMode;

/// Current report schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub schema_version: u32,
    /// RFC 3339 creation time.
    pub created_at: String,
    pub simu_id: String,
    pub num_samples: usize,
    pub num_features: usize,
    pub num_tasks: usize,
    pub num_folds: usize,
    pub num_subsamples: usize,
    pub num_repeats: usize,
    pub seed: u64,
    pub selection_policy: SelectionPolicy,
    pub failure_policy: FailurePolicy,
    pub folds: Vec<FoldReport>,
    /// PPV/TPR across folds and repeats, per algorithm.
    pub summaries: Vec<AlgorithmSummary>,
}

/// Outcome of one (repeat, fold, algorithm).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldReport {
    pub repeat: usize,
    pub fold: usize,
    pub mode: SolverMode,
    pub setting: HyperparameterSetting,
    pub stability_score: f64,
    pub driving_task: Option<usize>,
    pub stability: Vec<StabilityRow>,
    /// Final selection at the optimum, 0-based.
    pub selected: Vec<FeatureSet>,
    pub metrics: Vec<PerformanceMetrics>,
    pub failures: Vec<UnitFailure>,
    pub reductions: Vec<Reduction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilityRow {
    pub setting: HyperparameterSetting,
    pub task: usize,
    pub index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmSummary {
    pub mode: SolverMode,
    pub tasks: Vec<MetricsSummary>,
}

impl ExperimentReport {
    pub fn new(config: &ExperimentConfig, folds: Vec<FoldReport>) -> Self {
        let e = &config.experiment;
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            simu_id: e.simu_id.clone(),
            num_samples: e.num_samples,
            num_features: e.num_features,
            num_tasks: e.num_tasks,
            num_folds: e.num_folds,
            num_subsamples: e.num_subsamples,
            num_repeats: e.num_repeats,
            seed: e.seed,
            selection_policy: config.evaluation.selection_policy,
            failure_policy: config.evaluation.failure_policy,
            summaries: summarize_by_mode(&folds),
            folds,
        }
    }

    /// Whether any fold was scored over fewer subsamples than planned.
    pub fn has_reductions(&self) -> bool {
        self.folds.iter().any(|f| !f.reductions.is_empty())
    }
}

fn summarize_by_mode(folds: &[FoldReport]) -> Vec<AlgorithmSummary> {
    let mut by_mode: BTreeMap<SolverMode, Vec<&[PerformanceMetrics]>> = BTreeMap::new();
    for fold in folds {
        by_mode
            .entry(fold.mode)
            .or_default()
            .push(fold.metrics.as_slice());
    }
    by_mode
        .into_iter()
        .map(|(mode, runs)| AlgorithmSummary {
            mode,
            tasks: summarize(runs),
        })
        .collect()
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(report: &ExperimentReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize ExperimentReport to JSON")
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: repeat, fold, algorithm, lambda, eta, mu, task, ppv, tpr,
/// true_positives, num_selected, num_causal
pub fn export_performance_csv(report: &ExperimentReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "repeat",
        "fold",
        "algorithm",
        "lambda",
        "eta",
        "mu",
        "task",
        "ppv",
        "tpr",
        "true_positives",
        "num_selected",
        "num_causal",
    ])?;

    for fold in &report.folds {
        for m in &fold.metrics {
            wtr.write_record([
                fold.repeat.to_string(),
                fold.fold.to_string(),
                fold.mode.algorithm_tag().to_string(),
                fold.setting.lambda.to_string(),
                fold.setting.eta.to_string(),
                fold.setting.mu.to_string(),
                m.task.to_string(),
                format_ratio(m.ppv),
                format_ratio(m.tpr),
                m.true_positives.to_string(),
                m.num_selected.to_string(),
                m.num_causal.to_string(),
            ])?;
        }
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: repeat, fold, algorithm, lambda, eta, mu, task,
/// consistency_index, selected
pub fn export_stability_csv(report: &ExperimentReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "repeat",
        "fold",
        "algorithm",
        "lambda",
        "eta",
        "mu",
        "task",
        "consistency_index",
        "selected",
    ])?;

    for fold in &report.folds {
        for row in &fold.stability {
            wtr.write_record([
                fold.repeat.to_string(),
                fold.fold.to_string(),
                fold.mode.algorithm_tag().to_string(),
                row.setting.lambda.to_string(),
                row.setting.eta.to_string(),
                row.setting.mu.to_string(),
                row.task.to_string(),
                format_ratio(row.index),
                (row.setting == fold.setting).to_string(),
            ])?;
        }
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn format_ratio(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{value:.6}")
    }
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `report.json`, `performance.csv` and `stability.csv` into the
/// experiment's result directory. Returns the written paths.
pub fn save_report(report: &ExperimentReport, layout: &ExperimentLayout) -> Result<Vec<PathBuf>> {
    let dir = layout.resu_dir();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create result dir: {}", dir.display()))?;

    let artifacts = [
        (layout.report_json(), export_json(report)?),
        (layout.performance_csv(), export_performance_csv(report)?),
        (layout.stability_csv(), export_stability_csv(report)?),
    ];

    let mut written = Vec::with_capacity(artifacts.len());
    for (path, content) in artifacts {
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

// ─── Text summary ───────────────────────────────────────────────────

/// Plain-text table of per-algorithm, per-task PPV/TPR.
pub fn format_summary(report: &ExperimentReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} | {} repeat(s) x {} folds | {} subsamples | policy {:?}\n",
        report.simu_id,
        report.num_repeats,
        report.num_folds,
        report.num_subsamples,
        report.selection_policy
    ));
    out.push_str(&format!(
        "{:<10} {:>5} {:>6} {:>8} {:>8} {:>8} {:>8}\n",
        "algorithm", "task", "runs", "ppv", "ppv_sd", "tpr", "tpr_sd"
    ));
    for summary in &report.summaries {
        for t in &summary.tasks {
            out.push_str(&format!(
                "{:<10} {:>5} {:>6} {:>8.3} {:>8.3} {:>8.3} {:>8.3}\n",
                summary.mode.algorithm_tag(),
                t.task,
                t.runs,
                t.ppv_mean,
                t.ppv_std,
                t.tpr_mean,
                t.tpr_std
            ));
        }
    }
    if report.has_reductions() {
        out.push_str("warning: some settings were scored over reduced subsamples\n");
    }
    out
}
