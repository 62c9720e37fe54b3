//! FeatStab CLI: partition, run, stability and score commands.
//!
//! Commands:
//! - `partition`: write fold and subsample index files for one data directory
//! - `run`: full stability-driven evaluation from a TOML config
//! - `stability`: per-task consistency index across selected-feature files
//! - `score`: per-task PPV/TPR of a selection against causal features

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use featstab_core::index_io::read_feature_sets;
use featstab_core::{consistency_index_k, partition, score, FeatureSet, PerformanceMetrics};
use featstab_runner::{format_summary, save_report, Experiment, ExperimentConfig, RepeatLayout};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "featstab",
    version,
    about = "FeatStab: stability-driven evaluation of multi-task feature selection"
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute cross-validation folds and subsamples and write the index files.
    Partition {
        /// Simulation identifier used as the file name prefix.
        #[arg(long)]
        simu_id: String,

        /// Directory receiving the index files.
        #[arg(long)]
        dir: PathBuf,

        #[arg(long)]
        num_samples: usize,

        #[arg(long, default_value_t = 10)]
        num_folds: usize,

        #[arg(long, default_value_t = 10)]
        num_subsamples: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Run a full experiment from a TOML config file.
    Run {
        /// Path to the experiment config.
        #[arg(long)]
        config: PathBuf,

        /// Override `experiment.threads` (0 = one per core).
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Per-task consistency index across two or more selected-feature files.
    Stability {
        /// Total number of features.
        #[arg(long)]
        num_features: usize,

        /// Selected-feature files (one line of 0-based indices per task).
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,
    },
    /// PPV and TPR of a selection against the causal features.
    Score {
        /// Causal features, one line per task.
        #[arg(long)]
        causal: PathBuf,

        /// Selected features, one line per task.
        #[arg(long)]
        selected: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Partition {
            simu_id,
            dir,
            num_samples,
            num_folds,
            num_subsamples,
            seed,
        } => run_partition(&simu_id, &dir, num_samples, num_folds, num_subsamples, seed),
        Commands::Run { config, threads } => run_experiment(&config, threads),
        Commands::Stability {
            num_features,
            files,
        } => run_stability(num_features, &files),
        Commands::Score { causal, selected } => run_score(&causal, &selected),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_partition(
    simu_id: &str,
    dir: &Path,
    num_samples: usize,
    num_folds: usize,
    num_subsamples: usize,
    seed: u64,
) -> Result<()> {
    let folds = partition(num_samples, num_folds, num_subsamples, seed)?;
    let layout = RepeatLayout::new(simu_id, dir, dir);
    layout
        .save_partition(&folds)
        .with_context(|| format!("failed to write partition to {}", dir.display()))?;

    for fold in &folds {
        debug!(
            fold = fold.fold_index,
            train = fold.train.len(),
            test = fold.test.len(),
            "fold written"
        );
    }
    println!(
        "Wrote {} folds x {} subsamples to {}",
        folds.len(),
        num_subsamples,
        dir.display()
    );
    Ok(())
}

fn run_experiment(config_path: &Path, threads: Option<usize>) -> Result<()> {
    let mut config = ExperimentConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if let Some(threads) = threads {
        config.experiment.threads = threads;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let solver = config.solver.build(Arc::clone(&cancel));
    let report = Experiment::new(&config, &solver)?
        .with_cancel_flag(cancel)
        .run()?;

    print!("{}", format_summary(&report));

    let written = save_report(&report, &config.layout())?;
    for path in &written {
        info!(path = %path.display(), "report written");
    }
    println!("Results saved to: {}", config.layout().resu_dir().display());
    Ok(())
}

fn run_stability(num_features: usize, files: &[PathBuf]) -> Result<()> {
    let runs = files
        .iter()
        .map(|path| {
            read_feature_sets(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    for (task, index) in stability_per_task(&runs, num_features)?.iter().enumerate() {
        println!("task {task}: {index:.4}");
    }
    Ok(())
}

/// k-way index per task, one selection per run.
fn stability_per_task(runs: &[Vec<FeatureSet>], num_features: usize) -> Result<Vec<f64>> {
    let Some(first) = runs.first() else {
        bail!("no selections given");
    };
    let num_tasks = first.len();
    if let Some((i, run)) = runs.iter().enumerate().find(|(_, r)| r.len() != num_tasks) {
        bail!(
            "selection file #{} lists {} tasks, expected {num_tasks}",
            i + 1,
            run.len()
        );
    }

    (0..num_tasks)
        .map(|task| {
            let sets: Vec<FeatureSet> = runs.iter().map(|r| r[task].clone()).collect();
            consistency_index_k(&sets, num_features)
                .with_context(|| format!("stability of task {task}"))
        })
        .collect()
}

fn run_score(causal_path: &Path, selected_path: &Path) -> Result<()> {
    let causal = read_feature_sets(causal_path)
        .with_context(|| format!("failed to read {}", causal_path.display()))?;
    let selected = read_feature_sets(selected_path)
        .with_context(|| format!("failed to read {}", selected_path.display()))?;

    let metrics = score(&causal, &selected)?;
    print_metrics(&metrics);
    Ok(())
}

fn print_metrics(metrics: &[PerformanceMetrics]) {
    println!(
        "{:>5} {:>8} {:>8} {:>4} {:>9} {:>7}",
        "task", "ppv", "tpr", "tp", "selected", "causal"
    );
    for m in metrics {
        let ppv = if m.ppv.is_nan() {
            "n/a".to_string()
        } else {
            format!("{:.3}", m.ppv)
        };
        println!(
            "{:>5} {:>8} {:>8.3} {:>4} {:>9} {:>7}",
            m.task, ppv, m.tpr, m.true_positives, m.num_selected, m.num_causal
        );
    }
}
