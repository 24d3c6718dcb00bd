pub mod config;
pub mod registry;

pub use config::load_tasks;
pub use registry::TaskSet;

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

/// One external command of a task, as a structured argv rather than a shell
/// string. Declared in TOML as an array: `["pandoc", "-o", "out.pdf"]`.
#[derive(Debug, Deserialize, Clone)]
#[serde(try_from = "Vec<String>")]
pub struct Action {
    pub program: String,
    pub args: Vec<String>,
}

impl Action {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for Action {
    type Error = String;

    fn try_from(mut argv: Vec<String>) -> Result<Self, Self::Error> {
        if argv.is_empty() {
            return Err("action must have at least a program name".to_string());
        }
        let args = argv.split_off(1);
        let program = argv.pop().unwrap_or_default();
        if program.is_empty() {
            return Err("action program name must not be empty".to_string());
        }
        Ok(Action { program, args })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Declarative description of one task: what it produces, what it reads,
/// and the actions that regenerate it. Immutable once registered.
#[derive(Debug, Deserialize, Clone)]
pub struct Task {
    #[serde(default)]
    pub name: String,
    /// Group namespace, set for sub-tasks expanded from a group.
    #[serde(skip)]
    pub group: Option<String>,
    /// Output files. Empty for phony tasks, which always run.
    #[serde(default)]
    pub targets: Vec<PathBuf>,
    /// Input files; entries may be glob patterns.
    #[serde(default)]
    pub file_deps: Vec<PathBuf>,
    /// Executed in order; the first failure aborts the task.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Whether the `clean` command may delete this task's targets.
    #[serde(default)]
    pub clean: bool,
    /// Per-task timeout, e.g. "30s" or "5m".
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Task {
    /// True when the task declares no targets and therefore has no
    /// up-to-date state of its own.
    pub fn is_phony(&self) -> bool {
        self.targets.is_empty()
    }
}
