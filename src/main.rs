use clap::Parser;
use std::process;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

mod cli;
mod error;
mod execution;
mod graph;
mod output;
mod state;
mod task;
mod util;

use cli::{Cli, Command};
use error::Result;
use execution::TaskRunner;
use graph::TaskGraph;
use output::OutputMode;
use state::{StateTracker, Strategy};
use task::load_tasks;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    match run_remake(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

async fn run_remake(args: Cli) -> Result<bool> {
    let config = load_tasks(&args.file)?;
    let default_targets = config.default_targets.clone();

    // Validates the whole task set: duplicate targets, unresolved file
    // dependencies and cycles are all rejected here, before anything runs.
    let graph = TaskGraph::build(config.tasks)?;

    let strategy = args
        .strategy
        .or(config.strategy)
        .unwrap_or(Strategy::Timestamp);
    let store_path = state::store_path(config.cache_dir.as_deref(), &args.file);
    let jobs = args.jobs.or(config.jobs);
    let default_timeout = args.timeout.or(config.default_timeout);
    let output_mode = args.output.or(config.output).unwrap_or(OutputMode::Group);

    let command = args
        .command
        .unwrap_or(Command::Run {
            targets: Vec::new(),
        });

    match command {
        Command::List => {
            for task in graph.tasks() {
                let targets: Vec<String> = task
                    .targets
                    .iter()
                    .map(|t| t.display().to_string())
                    .collect();
                println!("  {:<40} {}", task.name, targets.join(" "));
            }
            Ok(true)
        }
        Command::Plan { targets } => {
            let selection = graph.required(&effective_targets(targets, &default_targets))?;
            let mut tracker = StateTracker::load(store_path, strategy);
            let runner = TaskRunner::new(
                &graph,
                &mut tracker,
                args.verbose,
                default_timeout,
                jobs,
                output_mode,
                Arc::new(AtomicBool::new(false)),
            );

            for (name, will_run) in runner.plan(&selection) {
                let annotation = if will_run { "will run" } else { "up-to-date" };
                println!("  {:<40} {}", name, annotation);
            }
            Ok(true)
        }
        Command::Clean { targets } => {
            let selection = graph.required(&effective_targets(targets, &default_targets))?;
            let mut tracker = StateTracker::load(store_path, strategy);
            let mut runner = TaskRunner::new(
                &graph,
                &mut tracker,
                args.verbose,
                default_timeout,
                jobs,
                output_mode,
                Arc::new(AtomicBool::new(false)),
            );

            runner.clean(&selection);

            if tracker.is_dirty() {
                tracker.save();
            }
            Ok(true)
        }
        Command::Run { targets } => {
            let selection = graph.required(&effective_targets(targets, &default_targets))?;
            let mut tracker = StateTracker::load(store_path, strategy);

            let cancel = Arc::new(AtomicBool::new(false));
            let cancel_flag = Arc::clone(&cancel);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancellation requested, finishing running tasks...");
                    cancel_flag.store(true, Ordering::SeqCst);
                }
            });

            let mut runner = TaskRunner::new(
                &graph,
                &mut tracker,
                args.verbose,
                default_timeout,
                jobs,
                output_mode,
                cancel,
            );
            let report = runner.run(&selection).await;

            if tracker.is_dirty() {
                tracker.save();
            } else if args.verbose {
                println!("No changes detected, state not saved.");
            }

            report.print_summary();
            Ok(report.success())
        }
    }
}

/// Requested targets, falling back to the configured defaults. An empty
/// result selects every task.
fn effective_targets(requested: Vec<String>, defaults: &[String]) -> Vec<String> {
    if requested.is_empty() {
        defaults.to_vec()
    } else {
        requested
    }
}
