//! Pipeline steps: what to run, what it reads and what it writes.

use std::fmt;
use std::path::{Path, PathBuf};

/// An external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// File that receives the process' standard output, if it is a result.
    pub stdout: Option<PathBuf>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            stdout: None,
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn stdout_to(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        if let Some(stdout) = &self.stdout {
            write!(f, " > {}", quote(&stdout.display().to_string()))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// In-process work, for the small utilities that sit between tools.
pub type StepFn = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

pub enum Action {
    Command(CommandSpec),
    Internal { description: String, run: StepFn },
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            Action::Internal { description, .. } => {
                f.debug_tuple("Internal").field(description).finish()
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Command(cmd) => write!(f, "{}", cmd),
            Action::Internal { description, .. } => write!(f, "[internal] {}", description),
        }
    }
}

/// One node of the task graph.
#[derive(Debug)]
pub struct Step {
    pub name: String,
    pub action: Action,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    /// Paths removed before the step runs (tools that refuse existing output directories).
    pub scratch: Vec<PathBuf>,
}

impl Step {
    pub fn command(name: impl Into<String>, command: CommandSpec) -> Self {
        let mut step = Step::new(name, Action::Command(command.clone()));
        if let Some(stdout) = command.stdout {
            step.outputs.push(stdout);
        }
        step
    }

    pub fn internal<F>(name: impl Into<String>, description: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Step::new(
            name,
            Action::Internal {
                description: description.into(),
                run: Box::new(run),
            },
        )
    }

    fn new(name: impl Into<String>, action: Action) -> Self {
        Step {
            name: name.into(),
            action,
            inputs: Vec::new(),
            outputs: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.inputs
            .extend(paths.into_iter().map(|p| p.as_ref().to_path_buf()));
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        if !self.outputs.contains(&path) {
            self.outputs.push(path);
        }
        self
    }

    pub fn outputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self = self.output(path);
        }
        self
    }

    pub fn scratch(mut self, path: impl AsRef<Path>) -> Self {
        self.scratch.push(path.as_ref().to_path_buf());
        self
    }
}
