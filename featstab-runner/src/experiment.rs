//! Experiment orchestration.
//!
//! For every repeat: partition once and persist the index files, then for every
//! fold (in order) and every solver mode:
//!
//! 1. fan the grid × subsamples units out over the rayon pool;
//! 2. join, and merge the per-unit tables into one `ResultTable`;
//! 3. apply the failure policy and select the most stable setting;
//! 4. re-run the solver at the optimum on the full training fold;
//! 5. persist the final selection and score it against the causal features.
//!
//! Units never share mutable state. The table exists only after the join.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use featstab_core::index_io::{read_feature_sets, write_feature_sets};
use featstab_core::{
    score, select_optimal, FeatureSet, FoldIndices, HyperparameterGrid, HyperparameterSetting,
    IndexFileError, PartitionError, PerformanceError, ResultTable, ResultTableError,
    SelectionError, SelectionResult,
};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::config::{ConfigError, ExperimentConfig, FailurePolicy};
use crate::layout::RepeatLayout;
use crate::report::{ExperimentReport, FoldReport, StabilityRow};
use crate::solver::{Solver, SolverError, SolverMode, SolverRequest, TaskData};

// ─── Errors ──────────────────────────────────────────────────────────

/// One failed (setting, subsample) solver call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub setting: HyperparameterSetting,
    pub subsample: usize,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("repeat {repeat}: {source}")]
    Partition {
        repeat: usize,
        #[source]
        source: PartitionError,
    },
    #[error(transparent)]
    Files(#[from] IndexFileError),
    #[error("repeat {repeat}: causal feature file lists {got} tasks, expected {expected}")]
    CausalTaskCount {
        repeat: usize,
        expected: usize,
        got: usize,
    },
    #[error(
        "repeat {repeat} fold {fold} ({mode}): {} solver unit(s) failed; {}",
        .failures.len(),
        describe_failures(.failures)
    )]
    UnitsFailed {
        repeat: usize,
        fold: usize,
        mode: SolverMode,
        failures: Vec<UnitFailure>,
    },
    #[error("repeat {repeat} fold {fold} ({mode}): {source}")]
    Table {
        repeat: usize,
        fold: usize,
        mode: SolverMode,
        #[source]
        source: ResultTableError,
    },
    #[error("repeat {repeat} fold {fold} ({mode}): {source}")]
    Selection {
        repeat: usize,
        fold: usize,
        mode: SolverMode,
        #[source]
        source: SelectionError,
    },
    #[error("repeat {repeat} fold {fold} ({mode}): re-run at optimum [{setting}] failed: {source}")]
    OptimumRerun {
        repeat: usize,
        fold: usize,
        mode: SolverMode,
        setting: HyperparameterSetting,
        #[source]
        source: SolverError,
    },
    #[error("repeat {repeat} fold {fold} ({mode}): {source}")]
    Performance {
        repeat: usize,
        fold: usize,
        mode: SolverMode,
        #[source]
        source: PerformanceError,
    },
    #[error("experiment cancelled")]
    Cancelled,
}

fn describe_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] subsample {}: {}", f.setting, f.subsample, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

// ─── Orchestrator ────────────────────────────────────────────────────

/// Runs a configured experiment against any `Solver`.
pub struct Experiment<'a> {
    config: &'a ExperimentConfig,
    solver: &'a dyn Solver,
    pool: rayon::ThreadPool,
    cancel: Option<Arc<AtomicBool>>,
}

/// Per-repeat inputs shared read-only by every fold.
struct RepeatContext {
    repeat: usize,
    layout: RepeatLayout,
    data: TaskData,
    causal: Vec<FeatureSet>,
}

impl<'a> Experiment<'a> {
    /// Validate `config` and size the worker pool from `experiment.threads`.
    pub fn new(config: &'a ExperimentConfig, solver: &'a dyn Solver) -> Result<Self, ExperimentError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.experiment.threads)
            .build()?;
        Ok(Self {
            config,
            solver,
            pool,
            cancel: None,
        })
    }

    /// Units not yet started report `Cancelled` once the flag is raised.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run(&self) -> Result<ExperimentReport, ExperimentError> {
        let e = &self.config.experiment;
        info!(
            simu_id = %e.simu_id,
            repeats = e.num_repeats,
            folds = e.num_folds,
            subsamples = e.num_subsamples,
            settings = self.config.grid.size(),
            threads = self.pool.current_num_threads(),
            "starting experiment"
        );

        let mut folds = Vec::new();
        for repeat in 0..e.num_repeats {
            folds.extend(self.run_repeat(repeat)?);
        }

        Ok(ExperimentReport::new(self.config, folds))
    }

    /// Partition, persist, and evaluate every fold of one repeat.
    pub fn run_repeat(&self, repeat: usize) -> Result<Vec<FoldReport>, ExperimentError> {
        let _span = info_span!("repeat", repeat).entered();
        let e = &self.config.experiment;

        let layout = self.config.layout().for_repeat(repeat);
        let folds = self
            .config
            .partition_config(repeat)
            .partition()
            .map_err(|source| ExperimentError::Partition { repeat, source })?;
        layout.save_partition(&folds)?;
        debug!(dir = %layout.data_dir().display(), "partition written");

        let causal = read_feature_sets(&layout.causal_features())?;
        if causal.len() != e.num_tasks {
            return Err(ExperimentError::CausalTaskCount {
                repeat,
                expected: e.num_tasks,
                got: causal.len(),
            });
        }

        let ctx = RepeatContext {
            repeat,
            data: layout.task_data(e.num_tasks),
            layout,
            causal,
        };

        let mut reports = Vec::with_capacity(folds.len() * self.config.evaluation.modes.len());
        for fold in &folds {
            for &mode in &self.config.evaluation.modes {
                reports.push(self.evaluate_fold(&ctx, fold, mode)?);
            }
        }
        Ok(reports)
    }

    fn evaluate_fold(
        &self,
        ctx: &RepeatContext,
        fold: &FoldIndices,
        mode: SolverMode,
    ) -> Result<FoldReport, ExperimentError> {
        let repeat = ctx.repeat;
        let k = fold.fold_index;
        let _span = info_span!("fold", fold = k, %mode).entered();
        let e = &self.config.experiment;

        let settings = settings_for(&self.config.grid, mode);
        let units: Vec<(HyperparameterSetting, usize)> = settings
            .iter()
            .flat_map(|&setting| (0..e.num_subsamples).map(move |s| (setting, s)))
            .collect();
        info!(units = units.len(), "evaluating grid");

        // Join point: every unit has finished once `collect` returns.
        let outcomes: Vec<(HyperparameterSetting, usize, Result<ResultTable, SolverError>)> =
            self.pool.install(|| {
                units
                    .par_iter()
                    .map(|&(setting, s)| {
                        let outcome = self
                            .run_unit(ctx, k, mode, setting, s)
                            .map(|result| ResultTable::from_unit(setting, s, result));
                        (setting, s, outcome)
                    })
                    .collect()
            });

        if self.is_cancelled() {
            return Err(ExperimentError::Cancelled);
        }

        let mut table = ResultTable::new();
        let mut failures = Vec::new();
        for (setting, subsample, outcome) in outcomes {
            match outcome {
                Ok(unit) => table
                    .merge(unit)
                    .map_err(|source| ExperimentError::Table {
                        repeat,
                        fold: k,
                        mode,
                        source,
                    })?,
                Err(err) => failures.push(UnitFailure {
                    setting,
                    subsample,
                    error: err.to_string(),
                }),
            }
        }
        debug!(rows = table.len(), failed = failures.len(), "unit tables merged");

        let (selections, reductions) = match self.config.evaluation.failure_policy {
            FailurePolicy::Abort => {
                if !failures.is_empty() {
                    return Err(ExperimentError::UnitsFailed {
                        repeat,
                        fold: k,
                        mode,
                        failures,
                    });
                }
                let complete = table
                    .complete(&settings, e.num_tasks, e.num_subsamples)
                    .map_err(|source| ExperimentError::Table {
                        repeat,
                        fold: k,
                        mode,
                        source,
                    })?;
                (complete, Vec::new())
            }
            FailurePolicy::ProceedReduced => {
                for f in &failures {
                    warn!(setting = %f.setting, subsample = f.subsample, error = %f.error, "solver unit failed");
                }
                let (reduced, reductions) = table.reduced(&settings, e.num_tasks, e.num_subsamples);
                for r in &reductions {
                    warn!(
                        setting = %r.setting,
                        task = r.task,
                        available = r.available,
                        expected = r.expected,
                        "scoring setting over reduced subsamples"
                    );
                }
                (reduced, reductions)
            }
        };

        let selection = select_optimal(
            &selections,
            e.num_features,
            self.config.evaluation.selection_policy,
        )
        .map_err(|source| ExperimentError::Selection {
            repeat,
            fold: k,
            mode,
            source,
        })?;
        info!(
            setting = %selection.setting,
            score = selection.score,
            driving_task = ?selection.driving_task,
            "selected optimum"
        );

        let train_path = ctx.layout.train_indices(k);
        let request = SolverRequest {
            data: &ctx.data,
            setting: selection.setting,
            sample_indices: Some(&train_path),
        };
        let rerun_error = |source: SolverError| ExperimentError::OptimumRerun {
            repeat,
            fold: k,
            mode,
            setting: selection.setting,
            source,
        };
        let final_selection = self
            .solver
            .select(&request, mode)
            .and_then(|r| check_task_count(r, e.num_tasks))
            .map_err(rerun_error)?;

        write_feature_sets(
            &ctx.layout.selected_features(mode, k),
            final_selection.tasks(),
        )?;

        let metrics = score(&ctx.causal, final_selection.tasks()).map_err(|source| {
            ExperimentError::Performance {
                repeat,
                fold: k,
                mode,
                source,
            }
        })?;

        let stability = selection
            .stability
            .iter()
            .flat_map(|(setting, by_task)| {
                by_task.iter().map(move |(&task, &index)| StabilityRow {
                    setting: *setting,
                    task,
                    index,
                })
            })
            .collect();

        Ok(FoldReport {
            repeat,
            fold: k,
            mode,
            setting: selection.setting,
            stability_score: selection.score,
            driving_task: selection.driving_task,
            stability,
            selected: final_selection.into_tasks(),
            metrics,
            failures,
            reductions,
        })
    }

    /// One solver call on one subsample.
    fn run_unit(
        &self,
        ctx: &RepeatContext,
        fold: usize,
        mode: SolverMode,
        setting: HyperparameterSetting,
        subsample: usize,
    ) -> Result<SelectionResult, SolverError> {
        if self.is_cancelled() {
            return Err(SolverError::Cancelled);
        }
        let indices = ctx.layout.subsample_indices(fold, subsample);
        let request = SolverRequest {
            data: &ctx.data,
            setting,
            sample_indices: Some(&indices),
        };
        debug!(%setting, subsample, "solver unit");
        let result = self.solver.select(&request, mode)?;
        check_task_count(result, ctx.data.num_tasks)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Grid settings evaluated in `mode`. Single-task runs ignore `mu`, so
/// settings differing only in `mu` collapse to one.
pub fn settings_for(grid: &HyperparameterGrid, mode: SolverMode) -> Vec<HyperparameterSetting> {
    match mode {
        SolverMode::SingleTask => {
            let mut settings: Vec<HyperparameterSetting> = Vec::new();
            for setting in grid.settings() {
                let setting = setting.with_mu(0.0);
                if !settings.contains(&setting) {
                    settings.push(setting);
                }
            }
            settings
        }
        SolverMode::MultitaskIndependent | SolverMode::MultitaskCorrelated => grid.settings(),
    }
}

fn check_task_count(
    result: SelectionResult,
    num_tasks: usize,
) -> Result<SelectionResult, SolverError> {
    if result.num_tasks() != num_tasks {
        return Err(SolverError::TaskCountMismatch {
            expected: num_tasks,
            got: result.num_tasks(),
        });
    }
    Ok(result)
}
