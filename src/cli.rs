use clap::{Parser, Subcommand};

use crate::output::OutputMode;
use crate::state::Strategy;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Build definition file to use
    #[arg(short = 'f', long = "file", default_value = "remake.toml")]
    pub file: String,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Number of worker tasks for parallel execution
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Override default action timeout (e.g., "5m", "30s", "1h30m")
    #[arg(short = 't', long = "timeout")]
    pub timeout: Option<String>,

    /// Staleness strategy: modification time or content hash
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// How to display action output in the terminal
    #[arg(long = "output", value_enum)]
    pub output: Option<OutputMode>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build the requested targets, rerunning only stale tasks (default)
    Run {
        /// Task names, group names, or target paths; falls back to the
        /// configured defaults, then to every task
        targets: Vec<String>,
    },
    /// Delete the outputs of clean-enabled tasks
    Clean {
        targets: Vec<String>,
    },
    /// List the declared tasks
    List,
    /// Show the execution plan without running any action
    Plan {
        targets: Vec<String>,
    },
}
