//! FeatStab Runner: solver invocation and experiment orchestration.
//!
//! This crate builds on `featstab-core` to provide:
//! - The `Solver` capability and its external-process implementation
//! - TOML experiment configuration
//! - The on-disk layout of partitions, solver inputs and selections
//! - The parallel grid × subsample experiment loop
//! - JSON and CSV report export

pub mod config;
pub mod experiment;
pub mod layout;
pub mod report;
pub mod solver;

pub use config::{
    ConfigError, EvaluationSection, ExperimentConfig, ExperimentSection, FailurePolicy,
    SolverSection,
};
pub use experiment::{settings_for, Experiment, ExperimentError, UnitFailure};
pub use layout::{ExperimentLayout, RepeatLayout};
pub use report::{
    export_json, export_performance_csv, export_stability_csv, format_summary, save_report,
    AlgorithmSummary, ExperimentReport, FoldReport, StabilityRow, SCHEMA_VERSION,
};
pub use solver::{
    parse_solver_output, EmptySelection, ExternalSolver, InvocationFailure, Solver, SolverError,
    SolverMode, SolverRequest, TaskData,
};
