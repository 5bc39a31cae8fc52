//! Executes a [`TaskGraph`] one dependency level at a time.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Instant, SystemTime};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::graph::TaskGraph;
use super::report::{RunReport, StepStatus};
use super::step::{Action, CommandSpec, Step};
use super::PipelineError;
use crate::utils::parallel::{ParallelConfig, ParallelExecutor};

/// Lines of a failed tool's log repeated in the error message.
const LOG_TAIL_LINES: usize = 20;

/// What to do with outputs left behind by an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExistingOutputs {
    /// Remove them and run every step again.
    #[default]
    Overwrite,
    /// Skip steps whose outputs all exist and are not older than their inputs.
    Resume,
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Maximum number of steps running at the same time.
    pub jobs: usize,
    pub existing: ExistingOutputs,
    /// Directory receiving one log file per external command.
    pub log_dir: PathBuf,
}

impl RunnerOptions {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        RunnerOptions {
            jobs: 1,
            existing: ExistingOutputs::default(),
            log_dir: log_dir.as_ref().to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StepOutcome {
    status: StepStatus,
    seconds: f64,
}

pub struct Runner {
    options: RunnerOptions,
}

impl Runner {
    pub fn new(options: RunnerOptions) -> Self {
        Runner { options }
    }

    /// Runs every step of `graph`, recording progress in `report`.
    ///
    /// Stops at the first failure: steps of later levels are never started and
    /// keep the `Pending` status in the report.
    pub fn run(&self, graph: &TaskGraph, report: &mut RunReport) -> Result<(), PipelineError> {
        let started = Instant::now();
        fs::create_dir_all(&self.options.log_dir)?;
        report.reset(graph);

        let executor = if self.options.jobs > 1 {
            Some(
                ParallelExecutor::new(Some(ParallelConfig {
                    threads: self.options.jobs,
                    continue_on_error: false,
                }))
                .map_err(|e| PipelineError::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };

        let total = graph.len();
        let mut done = 0;
        let mut result = Ok(());
        'levels: for level in graph.levels() {
            let outcomes: Vec<Option<Result<StepOutcome, PipelineError>>> = match &executor {
                Some(executor) => executor.execute(level, |&idx| self.run_step(graph.step(idx))),
                None => {
                    let mut outcomes = Vec::with_capacity(level.len());
                    let mut failed = false;
                    for &idx in level {
                        if failed {
                            outcomes.push(None);
                            continue;
                        }
                        let outcome = self.run_step(graph.step(idx));
                        failed = outcome.is_err();
                        outcomes.push(Some(outcome));
                    }
                    outcomes
                }
            };

            for (&idx, outcome) in level.iter().zip(outcomes) {
                match outcome {
                    Some(Ok(outcome)) => {
                        done += 1;
                        report.set(idx, outcome.status, outcome.seconds);
                        debug!("{}/{} steps finished", done, total);
                    }
                    Some(Err(e)) => {
                        report.set(idx, StepStatus::Failed, 0.0);
                        let blocked = graph.downstream(idx).len();
                        if blocked > 0 {
                            warn!(
                                "{} steps depending on '{}' will not run",
                                blocked,
                                graph.step(idx).name
                            );
                        }
                        if result.is_ok() {
                            result = Err(e);
                        } else {
                            error!("Additional failure: {}", e);
                        }
                    }
                    None => {}
                }
            }
            if result.is_err() {
                break 'levels;
            }
        }

        report.total_seconds = started.elapsed().as_secs_f64();
        if let Err(e) = &result {
            report.error = Some(e.to_string());
            error!("Pipeline stopped: {}", e);
        } else {
            info!(
                "Pipeline finished {} steps in {:.1} seconds",
                total, report.total_seconds
            );
        }
        result
    }

    fn run_step(&self, step: &Step) -> Result<StepOutcome, PipelineError> {
        for input in &step.inputs {
            if !input.exists() {
                return Err(PipelineError::MissingInput {
                    step: step.name.clone(),
                    path: input.clone(),
                });
            }
        }

        if self.options.existing == ExistingOutputs::Resume && outputs_up_to_date(step) {
            info!("[{}] outputs up to date, skipping", step.name);
            return Ok(StepOutcome {
                status: StepStatus::Skipped,
                seconds: 0.0,
            });
        }

        for path in step.outputs.iter().chain(&step.scratch) {
            remove_path(path)?;
        }
        // Tools that own a scratch directory expect to create it themselves.
        for path in step.outputs.iter().chain(&step.scratch) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !step.scratch.iter().any(|s| parent.starts_with(s)) {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        info!("[{}] {}", step.name, step.action);
        let start = Instant::now();
        let result = match &step.action {
            Action::Command(cmd) => self.run_command(&step.name, cmd),
            Action::Internal { run, .. } => run().map_err(|e| PipelineError::StepFailed {
                step: step.name.clone(),
                message: format!("{:#}", e),
            }),
        };
        let result = result.and_then(|_| {
            match step.outputs.iter().find(|p| !p.exists()) {
                Some(missing) => Err(PipelineError::MissingOutput {
                    step: step.name.clone(),
                    path: missing.clone(),
                }),
                None => Ok(()),
            }
        });

        if let Err(e) = result {
            // Whatever the step left behind is incomplete.
            for output in &step.outputs {
                if let Err(remove_err) = remove_path(output) {
                    warn!(
                        "[{}] could not remove partial output {}: {}",
                        step.name,
                        output.display(),
                        remove_err
                    );
                }
            }
            return Err(e);
        }

        let seconds = start.elapsed().as_secs_f64();
        info!("[{}] done in {:.2} seconds", step.name, seconds);
        Ok(StepOutcome {
            status: StepStatus::Completed,
            seconds,
        })
    }

    fn run_command(&self, name: &str, cmd: &CommandSpec) -> Result<(), PipelineError> {
        let log_path = self.options.log_dir.join(format!("{}.log", name));
        let log = File::create(&log_path)?;

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stderr(Stdio::from(log.try_clone()?));
        match &cmd.stdout {
            Some(path) => command.stdout(Stdio::from(File::create(path)?)),
            None => command.stdout(Stdio::from(log)),
        };
        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }

        let status = command.status().map_err(|source| PipelineError::Spawn {
            step: name.to_string(),
            program: cmd.program.clone(),
            source,
        })?;

        if status.success() {
            return Ok(());
        }
        let status = match status.code() {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        Err(PipelineError::ProcessFailed {
            step: name.to_string(),
            status,
            tail: log_tail(&log_path, LOG_TAIL_LINES),
            log: log_path,
        })
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when every output exists and none is older than the newest input.
fn outputs_up_to_date(step: &Step) -> bool {
    if step.outputs.is_empty() {
        return false;
    }
    let newest_input = step.inputs.iter().filter_map(|p| modified(p)).max();
    step.outputs.iter().all(|output| match modified(output) {
        Some(out_time) => newest_input.map_or(true, |in_time| out_time >= in_time),
        None => false,
    })
}

fn log_tail(path: &Path, lines: usize) -> String {
    let content = fs::read_to_string(path).unwrap_or_default();
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
