//! On-disk naming of experiment inputs and outputs.
//!
//! Every repeat `r` owns `<data_dir>/repeat_<r>/` (partitions, causal features,
//! solver inputs) and `<resu_dir>/repeat_<r>/` (final selections). Experiment
//! reports go straight into `<resu_dir>`.

use std::path::{Path, PathBuf};

use featstab_core::index_io::write_index_file;
use featstab_core::{FoldIndices, IndexFileError};

use crate::solver::{SolverMode, TaskData};

/// Root directories of a whole experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    simu_id: String,
    data_dir: PathBuf,
    resu_dir: PathBuf,
}

impl ExperimentLayout {
    pub fn new(simu_id: &str, data_dir: &Path, resu_dir: &Path) -> Self {
        Self {
            simu_id: simu_id.to_string(),
            data_dir: data_dir.to_path_buf(),
            resu_dir: resu_dir.to_path_buf(),
        }
    }

    pub fn resu_dir(&self) -> &Path {
        &self.resu_dir
    }

    pub fn for_repeat(&self, repeat: usize) -> RepeatLayout {
        let sub = format!("repeat_{repeat}");
        RepeatLayout::new(
            &self.simu_id,
            &self.data_dir.join(&sub),
            &self.resu_dir.join(&sub),
        )
    }

    pub fn report_json(&self) -> PathBuf {
        self.resu_dir.join("report.json")
    }

    pub fn performance_csv(&self) -> PathBuf {
        self.resu_dir.join("performance.csv")
    }

    pub fn stability_csv(&self) -> PathBuf {
        self.resu_dir.join("stability.csv")
    }
}

/// File names inside one repeat's data and result directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatLayout {
    simu_id: String,
    data_dir: PathBuf,
    resu_dir: PathBuf,
}

impl RepeatLayout {
    pub fn new(simu_id: &str, data_dir: &Path, resu_dir: &Path) -> Self {
        Self {
            simu_id: simu_id.to_string(),
            data_dir: data_dir.to_path_buf(),
            resu_dir: resu_dir.to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn data_file(&self, suffix: &str) -> PathBuf {
        self.data_dir.join(format!("{}.{suffix}", self.simu_id))
    }

    pub fn train_indices(&self, fold: usize) -> PathBuf {
        self.data_file(&format!("fold{fold}.trIndices"))
    }

    pub fn test_indices(&self, fold: usize) -> PathBuf {
        self.data_file(&format!("fold{fold}.teIndices"))
    }

    pub fn subsample_indices(&self, fold: usize, subsample: usize) -> PathBuf {
        self.data_file(&format!("fold{fold}.ss{subsample}.ssIndices"))
    }

    pub fn causal_features(&self) -> PathBuf {
        self.data_file("causal_features.txt")
    }

    pub fn network(&self) -> PathBuf {
        self.data_file("network.dimacs")
    }

    pub fn node_weights(&self, task: usize) -> PathBuf {
        self.data_file(&format!("scores_{task}.txt"))
    }

    pub fn task_similarities(&self) -> PathBuf {
        self.data_file("task_similarities.txt")
    }

    pub fn selected_features(&self, mode: SolverMode, fold: usize) -> PathBuf {
        self.resu_dir.join(format!(
            "{}.{}.fold_{fold}.selected_features",
            self.simu_id,
            mode.algorithm_tag()
        ))
    }

    /// Solver input paths for `num_tasks` tasks.
    pub fn task_data(&self, num_tasks: usize) -> TaskData {
        TaskData {
            num_tasks,
            network: self.network(),
            node_weights: (0..num_tasks).map(|t| self.node_weights(t)).collect(),
            precision_matrix: Some(self.task_similarities()),
        }
    }

    /// Write train, test and subsample index files for every fold.
    pub fn save_partition(&self, folds: &[FoldIndices]) -> Result<(), IndexFileError> {
        for fold in folds {
            let k = fold.fold_index;
            write_index_file(&self.train_indices(k), &fold.train)?;
            write_index_file(&self.test_indices(k), &fold.test)?;
            for (s, subsample) in fold.subsamples.iter().enumerate() {
                write_index_file(&self.subsample_indices(k, s), subsample)?;
            }
        }
        Ok(())
    }
}
