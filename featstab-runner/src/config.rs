//! Experiment configuration, loaded from TOML.
//!
//! ```toml
//! [experiment]
//! simu_id = "sim_200_1000"
//! data_dir = "data/sim_200_1000"
//! resu_dir = "results/sim_200_1000"
//! num_samples = 200
//! num_features = 1000
//! num_tasks = 3
//! num_folds = 10
//! num_subsamples = 10
//!
//! [solver]
//! program = "python"
//! args = ["multitask_sfan.py"]
//! timeout_secs = 600
//! indices_flag = "--samples"
//!
//! [grid]
//! lambdas = [0.001, 0.01, 0.1]
//! etas = [0.001, 0.01, 0.1]
//! mus = [0.001, 0.01]
//!
//! [evaluation]
//! modes = ["single_task", "multitask_independent", "multitask_correlated"]
//! selection_policy = "best_single_task"
//! failure_policy = "abort"
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use featstab_core::rng::{SeedHierarchy, REPEAT_STREAM};
use featstab_core::{HyperparameterGrid, PartitionConfig, SelectionPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::ExperimentLayout;
use crate::solver::{ExternalSolver, SolverMode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when some solver units of a fold fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail the fold, listing every failed unit.
    #[default]
    Abort,
    /// Score affected settings over their surviving subsamples and record
    /// the reduction in the report.
    ProceedReduced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub experiment: ExperimentSection,
    pub solver: SolverSection,
    pub grid: HyperparameterGrid,
    #[serde(default)]
    pub evaluation: EvaluationSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSection {
    pub simu_id: String,
    pub data_dir: PathBuf,
    pub resu_dir: PathBuf,
    pub num_samples: usize,
    pub num_features: usize,
    #[serde(default = "default_num_tasks")]
    pub num_tasks: usize,
    #[serde(default = "default_num_folds")]
    pub num_folds: usize,
    #[serde(default = "default_num_subsamples")]
    pub num_subsamples: usize,
    #[serde(default = "default_num_repeats")]
    pub num_repeats: usize,
    #[serde(default)]
    pub seed: u64,
    /// Worker threads; 0 lets rayon decide.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSection {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Flag that hands the resampled index file to the solver, e.g. `--samples`.
    /// Required: without it every subsample would get the same call.
    #[serde(default)]
    pub indices_flag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSection {
    #[serde(default = "default_modes")]
    pub modes: Vec<SolverMode>,
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            modes: default_modes(),
            selection_policy: SelectionPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_num_tasks() -> usize {
    3
}

fn default_num_folds() -> usize {
    10
}

fn default_num_subsamples() -> usize {
    10
}

fn default_num_repeats() -> usize {
    1
}

fn default_modes() -> Vec<SolverMode> {
    SolverMode::ALL.to_vec()
}

impl ExperimentConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ExperimentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.experiment;
        if e.simu_id.trim().is_empty() {
            return Err(invalid("experiment.simu_id must not be empty"));
        }
        if e.num_tasks == 0 {
            return Err(invalid("experiment.num_tasks must be at least 1"));
        }
        if e.num_features == 0 {
            return Err(invalid("experiment.num_features must be at least 1"));
        }
        if e.num_repeats == 0 {
            return Err(invalid("experiment.num_repeats must be at least 1"));
        }
        if e.num_folds < 2 || e.num_folds > e.num_samples {
            return Err(invalid(format!(
                "experiment.num_folds must be in 2..={}, got {}",
                e.num_samples, e.num_folds
            )));
        }
        if e.num_subsamples < 2 {
            return Err(invalid(format!(
                "experiment.num_subsamples must be at least 2, got {}",
                e.num_subsamples
            )));
        }
        if self
            .solver
            .indices_flag
            .as_deref()
            .map_or(true, |flag| flag.trim().is_empty())
        {
            return Err(invalid(
                "solver.indices_flag must name the flag that passes the sample-index file",
            ));
        }
        if self.solver.timeout_secs == Some(0) {
            return Err(invalid("solver.timeout_secs must be positive"));
        }
        if self.grid.size() == 0 {
            return Err(invalid("grid must contain at least one lambda and one eta"));
        }
        let all_values = self
            .grid
            .lambdas
            .iter()
            .chain(&self.grid.etas)
            .chain(&self.grid.mus);
        if let Some(bad) = all_values.copied().find(|v| !v.is_finite()) {
            return Err(invalid(format!("grid values must be finite, got {bad}")));
        }
        if self.evaluation.modes.is_empty() {
            return Err(invalid("evaluation.modes must name at least one mode"));
        }
        Ok(())
    }

    /// Partition parameters for one repeat. Repeats draw independent seeds
    /// from the master seed.
    pub fn partition_config(&self, repeat: usize) -> PartitionConfig {
        let e = &self.experiment;
        PartitionConfig {
            num_samples: e.num_samples,
            num_folds: e.num_folds,
            num_subsamples: e.num_subsamples,
            seed: SeedHierarchy::new(e.seed).sub_seed(REPEAT_STREAM, repeat as u64),
        }
    }

    pub fn layout(&self) -> ExperimentLayout {
        let e = &self.experiment;
        ExperimentLayout::new(&e.simu_id, &e.data_dir, &e.resu_dir)
    }
}

impl SolverSection {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// External solver described by this section, sharing `cancel`.
    pub fn build(&self, cancel: Arc<AtomicBool>) -> ExternalSolver {
        ExternalSolver::new(&self.program)
            .with_args(self.args.clone())
            .with_indices_flag(self.indices_flag.clone())
            .with_timeout(self.timeout())
            .with_cancel_flag(cancel)
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(reason.into())
}
