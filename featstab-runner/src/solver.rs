//! Solver adapter: the process boundary to the feature-selection solver.
//!
//! The solver is a black box with three modes that share one output contract:
//!
//! | mode                    | tag        | header lines | precision matrix |
//! |-------------------------|------------|--------------|------------------|
//! | `SingleTask`            | `sfan`     | 2            | no (`-m 0`)      |
//! | `MultitaskIndependent`  | `msfan_np` | 3            | no               |
//! | `MultitaskCorrelated`   | `msfan`    | 3            | yes              |
//!
//! After the header the solver prints exactly one line per task of **1-based**
//! feature indices. `parse_solver_output` is the only place in the workspace
//! where those are shifted to 0-based.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use featstab_core::{FeatureSet, HyperparameterSetting, SelectionResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ─── Modes & requests ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMode {
    SingleTask,
    MultitaskIndependent,
    MultitaskCorrelated,
}

impl SolverMode {
    pub const ALL: [SolverMode; 3] = [
        SolverMode::SingleTask,
        SolverMode::MultitaskIndependent,
        SolverMode::MultitaskCorrelated,
    ];

    /// Fixed-format lines the solver prints before the per-task lines.
    pub fn header_lines(self) -> usize {
        match self {
            SolverMode::SingleTask => 2,
            SolverMode::MultitaskIndependent | SolverMode::MultitaskCorrelated => 3,
        }
    }

    /// Short name used in result file names.
    pub fn algorithm_tag(self) -> &'static str {
        match self {
            SolverMode::SingleTask => "sfan",
            SolverMode::MultitaskIndependent => "msfan_np",
            SolverMode::MultitaskCorrelated => "msfan",
        }
    }
}

impl fmt::Display for SolverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.algorithm_tag())
    }
}

/// Input files shared by every solver call of one experiment repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskData {
    pub num_tasks: usize,
    pub network: PathBuf,
    /// One node-weight file per task.
    pub node_weights: Vec<PathBuf>,
    /// Task-similarity matrix; only passed in correlated mode.
    pub precision_matrix: Option<PathBuf>,
}

/// One solver call: shared inputs, a setting, and the resampled indices.
#[derive(Debug, Clone, Copy)]
pub struct SolverRequest<'a> {
    pub data: &'a TaskData,
    pub setting: HyperparameterSetting,
    pub sample_indices: Option<&'a Path>,
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver '{program}' {reason}")]
    Invocation {
        program: String,
        #[source]
        reason: InvocationFailure,
    },
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),
    #[error("solver call cancelled")]
    Cancelled,
    #[error("empty selection: {0}")]
    EmptySelection(#[from] EmptySelection),
    #[error("unparseable solver output for task {task}: '{token}' is not a 1-based feature index")]
    Parse { task: usize, token: String },
    #[error("missing solver input: {0}")]
    MissingInput(String),
    #[error("solver returned {got} tasks, expected {expected}")]
    TaskCountMismatch { expected: usize, got: usize },
}

#[derive(Debug, Error)]
pub enum InvocationFailure {
    #[error("could not be started: {0}")]
    Spawn(#[source] io::Error),
    #[error("could not be polled: {0}")]
    Wait(#[source] io::Error),
    #[error("output could not be read: {0}")]
    Output(#[source] io::Error),
    #[error("exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmptySelection {
    #[error("solver printed {got} of {expected} task lines")]
    MissingTaskLines { expected: usize, got: usize },
    #[error("task {task} selected no features")]
    EmptyTask { task: usize },
}

impl SolverError {
    /// The process could not be started or did not finish normally.
    pub fn is_invocation_failure(&self) -> bool {
        matches!(self, SolverError::Invocation { .. } | SolverError::Timeout(_))
    }

    pub fn is_empty_selection(&self) -> bool {
        matches!(self, SolverError::EmptySelection(_))
    }
}

// ─── Capability ──────────────────────────────────────────────────────

/// A feature-selection solver, one method per mode.
///
/// Implementations may shell out (`ExternalSolver`) or run in-process; the
/// orchestration only sees this trait.
pub trait Solver: Send + Sync {
    fn single_task(&self, request: &SolverRequest<'_>) -> Result<SelectionResult, SolverError>;

    fn multitask_independent(
        &self,
        request: &SolverRequest<'_>,
    ) -> Result<SelectionResult, SolverError>;

    fn multitask_correlated(
        &self,
        request: &SolverRequest<'_>,
    ) -> Result<SelectionResult, SolverError>;

    fn select(
        &self,
        request: &SolverRequest<'_>,
        mode: SolverMode,
    ) -> Result<SelectionResult, SolverError> {
        match mode {
            SolverMode::SingleTask => self.single_task(request),
            SolverMode::MultitaskIndependent => self.multitask_independent(request),
            SolverMode::MultitaskCorrelated => self.multitask_correlated(request),
        }
    }
}

// ─── Output parsing ──────────────────────────────────────────────────

/// Parse solver stdout into 0-based per-task selections.
///
/// Skips the mode's header lines, then reads exactly `num_tasks` lines of
/// 1-based indices. Fewer lines, or an empty line, is an empty selection.
pub fn parse_solver_output(
    stdout: &str,
    num_tasks: usize,
    mode: SolverMode,
) -> Result<SelectionResult, SolverError> {
    let lines: Vec<&str> = stdout
        .lines()
        .skip(mode.header_lines())
        .take(num_tasks)
        .collect();

    if lines.len() < num_tasks {
        return Err(EmptySelection::MissingTaskLines {
            expected: num_tasks,
            got: lines.len(),
        }
        .into());
    }

    let mut tasks = Vec::with_capacity(num_tasks);
    for (task, line) in lines.iter().enumerate() {
        let mut features = FeatureSet::new();
        for token in line.split_whitespace() {
            let one_based: usize = token.parse().map_err(|_| SolverError::Parse {
                task,
                token: token.to_string(),
            })?;
            let zero_based = one_based.checked_sub(1).ok_or_else(|| SolverError::Parse {
                task,
                token: token.to_string(),
            })?;
            features.insert(zero_based);
        }
        if features.is_empty() {
            return Err(EmptySelection::EmptyTask { task }.into());
        }
        tasks.push(features);
    }

    Ok(SelectionResult::new(tasks))
}

// ─── External process ────────────────────────────────────────────────

/// Runs the solver as a child process and parses its stdout.
///
/// Arguments, in order:
/// `<args…> --num_tasks N --networks <net> --node_weights <w1> … <wN>
///  [--precision_matrix <p>] -l <lambda> -e <eta> -m <mu> [<indices_flag> <file>]`
#[derive(Debug, Clone)]
pub struct ExternalSolver {
    program: PathBuf,
    args: Vec<String>,
    indices_flag: Option<String>,
    timeout: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
    poll_interval: Duration,
}

impl ExternalSolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            indices_flag: None,
            timeout: None,
            cancel: None,
            poll_interval: Duration::from_millis(20),
        }
    }

    /// Leading arguments, e.g. the script path when `program` is an interpreter.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Flag used to hand the sample-index file to the solver. Requests that
    /// carry an index file fail with `MissingInput` when no flag is set.
    pub fn with_indices_flag(mut self, flag: Option<String>) -> Self {
        self.indices_flag = flag;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Raising the flag kills running children and fails their calls.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn invocation(&self, reason: InvocationFailure) -> SolverError {
        SolverError::Invocation {
            program: self.program.display().to_string(),
            reason,
        }
    }

    /// Full argument list for one call.
    pub fn build_args(
        &self,
        request: &SolverRequest<'_>,
        mode: SolverMode,
    ) -> Result<Vec<OsString>, SolverError> {
        let data = request.data;
        if data.node_weights.len() != data.num_tasks {
            return Err(SolverError::MissingInput(format!(
                "{} node-weight files for {} tasks",
                data.node_weights.len(),
                data.num_tasks
            )));
        }

        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        args.push("--num_tasks".into());
        args.push(data.num_tasks.to_string().into());
        args.push("--networks".into());
        args.push(data.network.clone().into_os_string());
        args.push("--node_weights".into());
        args.extend(data.node_weights.iter().map(|p| p.clone().into_os_string()));

        let setting = match mode {
            SolverMode::SingleTask => request.setting.with_mu(0.0),
            SolverMode::MultitaskIndependent => request.setting,
            SolverMode::MultitaskCorrelated => {
                let precision = data.precision_matrix.as_ref().ok_or_else(|| {
                    SolverError::MissingInput("precision matrix for correlated mode".into())
                })?;
                args.push("--precision_matrix".into());
                args.push(precision.clone().into_os_string());
                request.setting
            }
        };
        args.extend(setting.to_flags().into_iter().map(OsString::from));

        if let Some(indices) = request.sample_indices {
            let flag = self.indices_flag.as_ref().ok_or_else(|| {
                SolverError::MissingInput(format!(
                    "no indices flag to pass {}",
                    indices.display()
                ))
            })?;
            args.push(flag.into());
            args.push(indices.as_os_str().to_os_string());
        }

        Ok(args)
    }

    fn run(
        &self,
        request: &SolverRequest<'_>,
        mode: SolverMode,
    ) -> Result<SelectionResult, SolverError> {
        if self.is_cancelled() {
            return Err(SolverError::Cancelled);
        }

        let args = self.build_args(request, mode)?;
        debug!(program = %self.program.display(), ?args, %mode, "invoking solver");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.invocation(InvocationFailure::Spawn(e)))?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait(&mut child)?;
        let stdout = collect(stdout).map_err(|e| self.invocation(e))?;
        let stderr = collect(stderr).map_err(|e| self.invocation(e))?;

        if !status.success() {
            return Err(self.invocation(InvocationFailure::Exit {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            }));
        }

        parse_solver_output(&stdout, request.data.num_tasks, mode)
    }

    /// Poll the child until it exits, the timeout elapses, or the call is
    /// cancelled. The child is killed in the latter two cases.
    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus, SolverError> {
        let started = Instant::now();
        loop {
            let polled = child
                .try_wait()
                .map_err(|e| self.invocation(InvocationFailure::Wait(e)))?;
            if let Some(status) = polled {
                return Ok(status);
            }

            if self.is_cancelled() {
                kill(child);
                return Err(SolverError::Cancelled);
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    kill(child);
                    return Err(SolverError::Timeout(timeout));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Solver for ExternalSolver {
    fn single_task(&self, request: &SolverRequest<'_>) -> Result<SelectionResult, SolverError> {
        self.run(request, SolverMode::SingleTask)
    }

    fn multitask_independent(
        &self,
        request: &SolverRequest<'_>,
    ) -> Result<SelectionResult, SolverError> {
        self.run(request, SolverMode::MultitaskIndependent)
    }

    fn multitask_correlated(
        &self,
        request: &SolverRequest<'_>,
    ) -> Result<SelectionResult, SolverError> {
        self.run(request, SolverMode::MultitaskCorrelated)
    }
}

/// Read a pipe to the end on a helper thread so the child never blocks on a
/// full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<io::Result<String>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        })
    })
}

fn collect(handle: Option<JoinHandle<io::Result<String>>>) -> Result<String, InvocationFailure> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    handle
        .join()
        .map_err(|_| io::Error::other("pipe reader thread panicked"))
        .and_then(|read| read)
        .map_err(InvocationFailure::Output)
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
