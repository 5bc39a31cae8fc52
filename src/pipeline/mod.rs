pub mod graph;
pub mod report;
pub mod runner;
pub mod stages;
pub mod step;
pub mod tools;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use graph::TaskGraph;
pub use report::{generate_report, RunReport, StepStatus};
pub use runner::{ExistingOutputs, Runner, RunnerOptions};
pub use stages::{build_plan, Layout};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Step '{step}' is missing input {}", path.display())]
    MissingInput { step: String, path: PathBuf },

    #[error("Step '{step}' needs {} but no step produces it and it does not exist", path.display())]
    MissingSource { step: String, path: PathBuf },

    #[error("Step '{step}' finished without producing {}", path.display())]
    MissingOutput { step: String, path: PathBuf },

    #[error("Step '{step}' could not start '{program}': {source}")]
    Spawn {
        step: String,
        program: String,
        source: io::Error,
    },

    #[error("Step '{step}' failed ({status}), see {}:\n{tail}", log.display())]
    ProcessFailed {
        step: String,
        status: String,
        log: PathBuf,
        tail: String,
    },

    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("{} is produced by both '{first}' and '{second}'", path.display())]
    DuplicateProducer {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("Dependency cycle between steps: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl PipelineError {
    /// Name of the step the error is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            PipelineError::MissingInput { step, .. }
            | PipelineError::MissingSource { step, .. }
            | PipelineError::MissingOutput { step, .. }
            | PipelineError::Spawn { step, .. }
            | PipelineError::ProcessFailed { step, .. }
            | PipelineError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
