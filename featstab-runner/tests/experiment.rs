use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use featstab_core::index_io::{read_feature_sets, read_index_file, write_feature_sets};
use featstab_core::{FeatureSet, HyperparameterGrid, HyperparameterSetting, SelectionResult};
use featstab_runner::{
    save_report, EvaluationSection, Experiment, ExperimentConfig, ExperimentError,
    ExperimentSection, FailurePolicy, Solver, SolverError, SolverMode, SolverRequest,
    SolverSection,
};

const NUM_FEATURES: usize = 20;
const NUM_TASKS: usize = 2;
const STABLE_LAMBDA: f64 = 0.1;
const NOISY_LAMBDA: f64 = 0.5;

/// Deterministic in-process solver.
///
/// The stable lambda always selects each task's causal features; the noisy
/// lambda derives its selection from the sample indices it is handed, so it
/// changes from subsample to subsample.
#[derive(Default)]
struct ScriptedSolver {
    fail_noisy_subsample: Option<usize>,
    fail_rerun: bool,
    calls: AtomicUsize,
}

fn causal(task: usize) -> FeatureSet {
    (task..task + 3).collect()
}

impl ScriptedSolver {
    fn run(&self, request: &SolverRequest<'_>) -> Result<SelectionResult, SolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = request
            .sample_indices
            .ok_or_else(|| SolverError::MissingInput("sample indices".into()))?;
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        if self.fail_rerun && name.ends_with(".trIndices") {
            return Err(SolverError::MissingInput("rerun refused".into()));
        }
        if let Some(s) = self.fail_noisy_subsample {
            if request.setting.lambda == NOISY_LAMBDA && name.contains(&format!(".ss{s}.")) {
                return Err(SolverError::Timeout(std::time::Duration::from_secs(1)));
            }
        }

        let indices = read_index_file(path).map_err(|e| SolverError::MissingInput(e.to_string()))?;
        let tasks = (0..request.data.num_tasks)
            .map(|task| {
                if request.setting.lambda == STABLE_LAMBDA {
                    causal(task)
                } else {
                    let sum: usize = indices.iter().sum::<usize>() + task;
                    [sum % NUM_FEATURES, (sum / 3) % NUM_FEATURES, (sum / 7) % NUM_FEATURES]
                        .into_iter()
                        .collect()
                }
            })
            .collect();
        Ok(SelectionResult::new(tasks))
    }
}

impl Solver for ScriptedSolver {
    fn single_task(&self, request: &SolverRequest<'_>) -> Result<SelectionResult, SolverError> {
        assert_eq!(request.setting.mu, 0.0, "single-task settings carry mu = 0");
        self.run(request)
    }

    fn multitask_independent(
        &self,
        request: &SolverRequest<'_>,
    ) -> Result<SelectionResult, SolverError> {
        self.run(request)
    }

    fn multitask_correlated(
        &self,
        request: &SolverRequest<'_>,
    ) -> Result<SelectionResult, SolverError> {
        assert!(request.data.precision_matrix.is_some());
        self.run(request)
    }
}

fn config(root: &Path, threads: usize, num_repeats: usize) -> ExperimentConfig {
    ExperimentConfig {
        experiment: ExperimentSection {
            simu_id: "sim".into(),
            data_dir: root.join("data"),
            resu_dir: root.join("results"),
            num_samples: 24,
            num_features: NUM_FEATURES,
            num_tasks: NUM_TASKS,
            num_folds: 3,
            num_subsamples: 3,
            num_repeats,
            seed: 7,
            threads,
        },
        solver: SolverSection {
            program: "unused".into(),
            args: Vec::new(),
            timeout_secs: None,
            indices_flag: Some("--samples".into()),
        },
        grid: HyperparameterGrid {
            lambdas: vec![STABLE_LAMBDA, NOISY_LAMBDA],
            etas: vec![1.0],
            mus: vec![0.0, 0.2],
        },
        evaluation: EvaluationSection::default(),
    }
}

fn write_causal(config: &ExperimentConfig) {
    let layout = config.layout();
    let sets: Vec<FeatureSet> = (0..NUM_TASKS).map(causal).collect();
    for repeat in 0..config.experiment.num_repeats {
        write_feature_sets(&layout.for_repeat(repeat).causal_features(), &sets).unwrap();
    }
}

fn stable_setting() -> HyperparameterSetting {
    HyperparameterSetting::new(STABLE_LAMBDA, 1.0, 0.0)
}

#[test]
fn full_run_selects_stable_setting_and_scores_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 2, 1);
    write_causal(&config);
    let solver = ScriptedSolver::default();

    let report = Experiment::new(&config, &solver).unwrap().run().unwrap();

    // 3 folds x 3 modes
    assert_eq!(report.folds.len(), 9);
    for fold in &report.folds {
        assert_eq!(fold.setting, stable_setting(), "{:?} fold {}", fold.mode, fold.fold);
        assert_eq!(fold.stability_score, 1.0);
        assert_eq!(fold.selected, vec![causal(0), causal(1)]);
        for m in &fold.metrics {
            assert_eq!(m.ppv, 1.0);
            assert_eq!(m.tpr, 1.0);
        }
        let settings = if fold.mode == SolverMode::SingleTask { 2 } else { 4 };
        assert_eq!(fold.stability.len(), settings * NUM_TASKS);
        assert!(fold.failures.is_empty());
        assert!(fold.reductions.is_empty());
    }

    // per fold: single-task 2 settings, multitask 4 settings each, 3 subsamples,
    // plus one re-run per mode
    let per_fold = (2 + 4 + 4) * 3 + 3;
    assert_eq!(solver.calls.load(Ordering::SeqCst), 3 * per_fold);

    assert_eq!(report.summaries.len(), 3);
    for summary in &report.summaries {
        assert_eq!(summary.tasks.len(), NUM_TASKS);
        assert_eq!(summary.tasks[0].runs, 3);
        assert_eq!(summary.tasks[0].ppv_mean, 1.0);
        assert_eq!(summary.tasks[0].ppv_std, 0.0);
    }
}

#[test]
fn partition_and_selections_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1, 1);
    write_causal(&config);
    let solver = ScriptedSolver::default();

    let report = Experiment::new(&config, &solver).unwrap().run().unwrap();

    let repeat = config.layout().for_repeat(0);
    let mut tested = Vec::new();
    for k in 0..3 {
        let train = read_index_file(&repeat.train_indices(k)).unwrap();
        let test = read_index_file(&repeat.test_indices(k)).unwrap();
        assert_eq!(train.len() + test.len(), 24);
        tested.extend(test);
        for s in 0..3 {
            let sub = read_index_file(&repeat.subsample_indices(k, s)).unwrap();
            assert!(sub.iter().all(|i| train.contains(i)));
        }
        for mode in SolverMode::ALL {
            let selected = read_feature_sets(&repeat.selected_features(mode, k)).unwrap();
            assert_eq!(selected, vec![causal(0), causal(1)]);
        }
    }
    tested.sort_unstable();
    assert_eq!(tested, (0..24).collect::<Vec<_>>());

    let written = save_report(&report, &config.layout()).unwrap();
    assert_eq!(written.len(), 3);
    let csv = std::fs::read_to_string(config.layout().performance_csv()).unwrap();
    // header + 3 folds x 3 modes x 2 tasks
    assert_eq!(csv.lines().count(), 1 + 18);
}

#[test]
fn serial_and_parallel_runs_match() {
    let serial_dir = tempfile::tempdir().unwrap();
    let parallel_dir = tempfile::tempdir().unwrap();
    let serial_config = config(serial_dir.path(), 1, 2);
    let parallel_config = config(parallel_dir.path(), 4, 2);
    write_causal(&serial_config);
    write_causal(&parallel_config);

    let solver = ScriptedSolver::default();
    let serial = Experiment::new(&serial_config, &solver).unwrap().run().unwrap();
    let mut parallel = Experiment::new(&parallel_config, &solver).unwrap().run().unwrap();
    parallel.created_at = serial.created_at.clone();

    assert_eq!(serial, parallel);
    assert_eq!(serial.folds.len(), 2 * 3 * 3);

    for repeat in 0..2 {
        for k in 0..3 {
            let a = serial_config.layout().for_repeat(repeat).subsample_indices(k, 2);
            let b = parallel_config.layout().for_repeat(repeat).subsample_indices(k, 2);
            assert_eq!(read_index_file(&a).unwrap(), read_index_file(&b).unwrap());
        }
    }
}

#[test]
fn failing_unit_aborts_with_its_identity() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2, 1);
    config.evaluation.modes = vec![SolverMode::MultitaskCorrelated];
    write_causal(&config);
    let solver = ScriptedSolver {
        fail_noisy_subsample: Some(1),
        ..Default::default()
    };

    let err = Experiment::new(&config, &solver).unwrap().run().unwrap_err();

    match err {
        ExperimentError::UnitsFailed {
            repeat,
            fold,
            mode,
            failures,
        } => {
            assert_eq!(repeat, 0);
            assert_eq!(fold, 0);
            assert_eq!(mode, SolverMode::MultitaskCorrelated);
            // one noisy setting per mu value
            assert_eq!(failures.len(), 2);
            for f in &failures {
                assert_eq!(f.subsample, 1);
                assert_eq!(f.setting.lambda, NOISY_LAMBDA);
                assert!(f.error.contains("timed out"));
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reduced_policy_records_the_reduction() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2, 1);
    config.evaluation.modes = vec![SolverMode::MultitaskIndependent];
    config.evaluation.failure_policy = FailurePolicy::ProceedReduced;
    write_causal(&config);
    let solver = ScriptedSolver {
        fail_noisy_subsample: Some(1),
        ..Default::default()
    };

    let report = Experiment::new(&config, &solver).unwrap().run().unwrap();

    assert!(report.has_reductions());
    for fold in &report.folds {
        assert_eq!(fold.setting, stable_setting());
        assert_eq!(fold.failures.len(), 2);
        // two noisy settings x two tasks
        assert_eq!(fold.reductions.len(), 4);
        for r in &fold.reductions {
            assert_eq!(r.setting.lambda, NOISY_LAMBDA);
            assert_eq!(r.available, 2);
            assert_eq!(r.expected, 3);
        }
    }
}

#[test]
fn failed_rerun_reports_the_optimum() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 1, 1);
    config.evaluation.modes = vec![SolverMode::SingleTask];
    write_causal(&config);
    let solver = ScriptedSolver {
        fail_rerun: true,
        ..Default::default()
    };

    let err = Experiment::new(&config, &solver).unwrap().run().unwrap_err();

    match err {
        ExperimentError::OptimumRerun {
            fold,
            mode,
            setting,
            ..
        } => {
            assert_eq!(fold, 0);
            assert_eq!(mode, SolverMode::SingleTask);
            assert_eq!(setting, stable_setting());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn raised_cancel_flag_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 2, 1);
    write_causal(&config);
    let solver = ScriptedSolver::default();
    let cancel = Arc::new(AtomicBool::new(true));

    let err = Experiment::new(&config, &solver)
        .unwrap()
        .with_cancel_flag(cancel)
        .run()
        .unwrap_err();

    assert!(matches!(err, ExperimentError::Cancelled));
    assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_causal_file_fails_before_solving() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1, 1);
    let solver = ScriptedSolver::default();

    let err = Experiment::new(&config, &solver).unwrap().run().unwrap_err();

    assert!(matches!(err, ExperimentError::Files(_)));
    assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn causal_task_count_must_match() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 1, 1);
    write_feature_sets(
        &config.layout().for_repeat(0).causal_features(),
        &[causal(0)],
    )
    .unwrap();
    let solver = ScriptedSolver::default();

    let err = Experiment::new(&config, &solver).unwrap().run().unwrap_err();

    assert!(matches!(
        err,
        ExperimentError::CausalTaskCount {
            expected: 2,
            got: 1,
            ..
        }
    ));
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 1, 1);
    config.experiment.num_subsamples = 1;
    let solver = ScriptedSolver::default();

    assert!(matches!(
        Experiment::new(&config, &solver),
        Err(ExperimentError::Config(_))
    ));
}

#[cfg(unix)]
#[test]
fn external_solver_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2, 1);
    config.evaluation.modes = vec![SolverMode::MultitaskIndependent];
    config.solver = SolverSection {
        program: "sh".into(),
        args: vec![
            "-c".into(),
            "printf 'lambda\\neta\\nmu\\n1 2 3\\n2 3 4\\n'".into(),
            "solver".into(),
        ],
        timeout_secs: Some(30),
        indices_flag: Some("--samples".into()),
    };
    write_causal(&config);
    let solver = config.solver.build(Arc::new(AtomicBool::new(false)));

    let report = Experiment::new(&config, &solver).unwrap().run().unwrap();

    assert_eq!(report.folds.len(), 3);
    for fold in &report.folds {
        // every setting is perfectly stable; the smallest wins the tie
        assert_eq!(fold.setting, stable_setting());
        assert_eq!(fold.selected, vec![causal(0), causal(1)]);
    }
}

/// Selections read from whichever index file follows `--samples`, so every
/// subsample gets its own answer.
#[cfg(unix)]
const INDEX_DRIVEN_SOLVER: &str = r#"
eval "last=\${$#}"
s=$(cksum < "$last" | cut -d' ' -f1)
printf 'h\nh\nh\n%s %s\n%s\n' $((s % 20 + 1)) $((s / 20 % 20 + 1)) $((s / 400 % 20 + 1))
"#;

#[cfg(unix)]
#[test]
fn external_solver_sees_each_subsample() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 2, 1);
    config.evaluation.modes = vec![SolverMode::MultitaskIndependent];
    config.solver = SolverSection {
        program: "sh".into(),
        args: vec!["-c".into(), INDEX_DRIVEN_SOLVER.into(), "solver".into()],
        timeout_secs: Some(30),
        indices_flag: Some("--samples".into()),
    };
    write_causal(&config);
    let solver = config.solver.build(Arc::new(AtomicBool::new(false)));

    let report = Experiment::new(&config, &solver).unwrap().run().unwrap();

    assert_eq!(report.folds.len(), 3);
    for fold in &report.folds {
        assert!(
            fold.stability.iter().any(|row| row.index < 1.0),
            "fold {} scored every setting as perfectly stable",
            fold.fold
        );
        assert_eq!(fold.selected.len(), NUM_TASKS);
    }
}

#[test]
fn config_without_indices_flag_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 1, 1);
    config.solver.indices_flag = None;
    let solver = ScriptedSolver::default();

    assert!(matches!(
        Experiment::new(&config, &solver),
        Err(ExperimentError::Config(_))
    ));
}
