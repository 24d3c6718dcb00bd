use std::{
    collections::HashMap,
    fmt, io,
    io::Write as _,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::SystemTime,
};
use tokio::sync::Semaphore;

use crate::{
    graph::TaskGraph,
    output::OutputMode,
    state::StateTracker,
    task::Task,
    util::{CommandError, expand_globs, output_print_lock, parse_timeout, remove_target, run_action},
};

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Outcome of one task within a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    UpToDate,
    Ran,
    Failed,
    /// Not attempted because a dependency failed or was cancelled.
    Skipped,
    /// Not started before cancellation was requested.
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::UpToDate => write!(f, "up-to-date"),
            TaskStatus::Ran => write!(f, "ran"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped (dependency failed)"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-task statuses in execution order, plus the aggregate verdict that
/// drives the process exit code.
#[derive(Debug)]
pub struct ExecutionReport {
    entries: Vec<(String, TaskStatus)>,
}

impl ExecutionReport {
    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    pub fn success(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|(_, s)| matches!(s, TaskStatus::Failed | TaskStatus::Cancelled))
    }

    pub fn print_summary(&self) {
        let mut ran = 0;
        let mut up_to_date = 0;
        let mut failed = 0;
        let mut other = 0;

        for (name, status) in &self.entries {
            println!("  {:<40} {}", name, status);
            match status {
                TaskStatus::Ran => ran += 1,
                TaskStatus::UpToDate => up_to_date += 1,
                TaskStatus::Failed => failed += 1,
                _ => other += 1,
            }
        }

        println!(
            "{} ran, {} up-to-date, {} failed, {} skipped or cancelled",
            ran, up_to_date, failed, other
        );
    }
}

#[derive(Debug)]
struct ExecutionLevel {
    task_indices: Vec<usize>,
}

/// Group the selected tasks by dependency depth. Every task lands one
/// level below its deepest selected dependency, so a level only ever
/// contains tasks with no ordering constraint between them.
fn calculate_dependency_levels(graph: &TaskGraph, selection: &[usize]) -> Vec<ExecutionLevel> {
    let mut levels: HashMap<usize, usize> = HashMap::new();

    for &i in selection {
        calculate_task_level(graph, i, selection, &mut levels);
    }

    let mut level_groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (task, level) in levels {
        level_groups.entry(level).or_default().push(task);
    }

    let mut sorted: Vec<(usize, Vec<usize>)> = level_groups.into_iter().collect();
    sorted.sort_by_key(|(level, _)| *level);

    sorted
        .into_iter()
        .map(|(_, mut task_indices)| {
            // declaration order within a level
            task_indices.sort_unstable();
            ExecutionLevel { task_indices }
        })
        .collect()
}

fn calculate_task_level(
    graph: &TaskGraph,
    task: usize,
    selection: &[usize],
    levels: &mut HashMap<usize, usize>,
) -> usize {
    if let Some(&level) = levels.get(&task) {
        return level;
    }

    let level = graph
        .deps(task)
        .iter()
        .filter(|d| selection.contains(d))
        .map(|&d| calculate_task_level(graph, d, selection, levels) + 1)
        .max()
        .unwrap_or(0);

    levels.insert(task, level);
    level
}

pub struct TaskRunner<'a> {
    graph: &'a TaskGraph,
    tracker: &'a mut StateTracker,
    verbose: bool,
    default_timeout: Option<String>,
    workers: usize,
    output_mode: OutputMode,
    cancel: Arc<AtomicBool>,
}

impl<'a> TaskRunner<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        tracker: &'a mut StateTracker,
        verbose: bool,
        default_timeout: Option<String>,
        workers: Option<usize>,
        output_mode: OutputMode,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let workers = workers.unwrap_or_else(default_workers);
        Self {
            graph,
            tracker,
            verbose,
            default_timeout,
            workers,
            output_mode,
            cancel,
        }
    }

    /// Dry run: the execution plan in order, with a will-run annotation.
    /// A task reads as will-run when it is stale itself or when any of its
    /// selected dependencies will run (its inputs are about to change).
    /// Consults the tracker only; never invokes an action.
    pub fn plan(&self, selection: &[usize]) -> Vec<(String, bool)> {
        let order = self.graph.topo_order(selection);
        let mut will_run: HashMap<usize, bool> = HashMap::new();

        order
            .iter()
            .map(|&i| {
                let dep_runs = self
                    .graph
                    .deps(i)
                    .iter()
                    .any(|d| will_run.get(d).copied().unwrap_or(false));
                let runs = dep_runs || self.needs_run(self.graph.task(i));
                will_run.insert(i, runs);
                (self.graph.task(i).name.clone(), runs)
            })
            .collect()
    }

    /// Execute the selected tasks level by level. Tasks within a level run
    /// concurrently under the worker semaphore. A failure marks the task
    /// failed and its transitive dependents skipped; branches that do not
    /// depend on the failure keep running.
    pub async fn run(&mut self, selection: &[usize]) -> ExecutionReport {
        let levels = calculate_dependency_levels(self.graph, selection);

        if self.verbose {
            println!(
                "Executing {} levels with up to {} workers",
                levels.len(),
                self.workers
            );
        }

        let mut statuses: HashMap<usize, TaskStatus> = HashMap::new();

        'levels: for level in levels {
            let mut to_run: Vec<usize> = Vec::new();

            for &i in &level.task_indices {
                if self.cancel.load(Ordering::SeqCst) {
                    break 'levels;
                }

                let task = self.graph.task(i);

                let dep_blocked = self.graph.deps(i).iter().any(|d| {
                    matches!(
                        statuses.get(d),
                        Some(TaskStatus::Failed)
                            | Some(TaskStatus::Skipped)
                            | Some(TaskStatus::Cancelled)
                    )
                });
                if dep_blocked {
                    statuses.insert(i, TaskStatus::Skipped);
                    continue;
                }

                if !self.needs_run(task) {
                    if self.verbose {
                        println!("Task '{}': targets up-to-date, skipping", task.name);
                    }
                    statuses.insert(i, TaskStatus::UpToDate);
                    continue;
                }

                to_run.push(i);
            }

            self.execute_level(&to_run, &mut statuses).await;
        }

        // Anything without a status was never dispatched: either
        // cancellation hit first, or a panic aborted the level early.
        for &i in selection {
            statuses.entry(i).or_insert(TaskStatus::Cancelled);
        }

        let entries = self
            .graph
            .topo_order(selection)
            .into_iter()
            .map(|i| (self.graph.task(i).name.clone(), statuses[&i]))
            .collect();
        ExecutionReport { entries }
    }

    async fn execute_level(&mut self, to_run: &[usize], statuses: &mut HashMap<usize, TaskStatus>) {
        if to_run.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::new();

        for &i in to_run {
            if self.cancel.load(Ordering::SeqCst) {
                statuses.insert(i, TaskStatus::Cancelled);
                continue;
            }

            let task = self.graph.task(i).clone();
            let semaphore_clone = Arc::clone(&semaphore);
            let default_timeout = self.default_timeout.clone();
            let output_mode = self.output_mode;
            let verbose = self.verbose;

            let handle = tokio::spawn(async move {
                let _permit = semaphore_clone.acquire().await.unwrap();

                if verbose {
                    println!("Running task: {}", task.name);
                }

                execute_single_task(&task, default_timeout, output_mode).await
            });

            handles.push((i, handle));
        }

        for (i, handle) in handles {
            let name = &self.graph.task(i).name;
            match handle.await {
                Ok(Ok(())) => {
                    statuses.insert(i, TaskStatus::Ran);
                    self.record_task(i);
                }
                Ok(Err(())) => {
                    eprintln!("Task '{}' failed", name);
                    statuses.insert(i, TaskStatus::Failed);
                    for dependent in self.graph.transitive_dependents(i) {
                        statuses.entry(dependent).or_insert(TaskStatus::Skipped);
                    }
                }
                Err(e) => {
                    eprintln!("Task '{}' panicked: {}", name, e);
                    statuses.insert(i, TaskStatus::Failed);
                    for dependent in self.graph.transitive_dependents(i) {
                        statuses.entry(dependent).or_insert(TaskStatus::Skipped);
                    }
                }
            }
        }
    }

    /// Capture fresh signatures for everything the task produced or read.
    /// Store problems only cost incrementality, never the build.
    fn record_task(&mut self, i: usize) {
        let task = self.graph.task(i);

        for target in &task.targets {
            self.tracker.record(target);
        }

        match expand_globs(&task.file_deps) {
            Ok(deps) => {
                for dep in &deps {
                    self.tracker.record(dep);
                }
                self.tracker.record_inputs(&task.name, &deps);
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not record inputs for task '{}': {}",
                    task.name, e
                );
            }
        }
    }

    /// Remove the targets of clean-flagged tasks in reverse topological
    /// order and purge their records, so a later run regenerates them.
    /// Missing targets are not an error.
    pub fn clean(&mut self, selection: &[usize]) {
        let order = self.graph.topo_order(selection);

        for &i in order.iter().rev() {
            let task = self.graph.task(i);
            if !task.clean {
                continue;
            }

            for target in &task.targets {
                remove_target(target, self.verbose);
                self.tracker.forget(target);
            }
        }
    }

    /// A task may be skipped only when it has targets, they all exist,
    /// nothing it reads or produces has changed signature, and no input is
    /// newer than its oldest target.
    fn needs_run(&self, task: &Task) -> bool {
        if task.is_phony() {
            if self.verbose {
                println!("Task '{}': no targets, always runs", task.name);
            }
            return true;
        }

        if !task.targets.iter().all(|t| t.exists()) {
            if self.verbose {
                println!("Task '{}': targets missing, must run", task.name);
            }
            return true;
        }

        let inputs = match expand_globs(&task.file_deps) {
            Ok(inputs) => inputs,
            Err(e) => {
                eprintln!(
                    "Error: Could not process inputs for task '{}': {}",
                    task.name, e
                );
                return true;
            }
        };

        // Per-file checks miss a matched file being deleted; the recorded
        // input set catches it.
        if self.tracker.inputs_changed(&task.name, &inputs) {
            if self.verbose {
                println!("Task '{}': input set changed, must run", task.name);
            }
            return true;
        }

        if inputs.iter().any(|dep| self.tracker.is_stale(dep)) {
            if self.verbose {
                println!("Task '{}': inputs changed, must run", task.name);
            }
            return true;
        }

        if task.targets.iter().any(|t| self.tracker.is_stale(t)) {
            if self.verbose {
                println!("Task '{}': targets changed, must run", task.name);
            }
            return true;
        }

        // Catches inputs regenerated earlier in this same invocation,
        // whose store records are already fresh.
        if targets_outdated(&inputs, &task.targets) {
            if self.verbose {
                println!("Task '{}': targets older than inputs, must run", task.name);
            }
            return true;
        }

        false
    }
}

/// Run the task's actions in order; the first failure aborts the task.
/// In group mode the collected output is printed as one block under the
/// print lock once the task finishes.
async fn execute_single_task(
    task: &Task,
    default_timeout: Option<String>,
    output_mode: OutputMode,
) -> Result<(), ()> {
    let timeout = parse_timeout(task.timeout.as_deref(), default_timeout.as_deref());
    let stream = output_mode == OutputMode::Stream;
    let mut collected: Vec<u8> = Vec::new();

    for action in &task.actions {
        match run_action(action, timeout, stream).await {
            Ok(output) if output.status.success() => {
                if !stream {
                    collected.extend_from_slice(&output.stdout);
                    collected.extend_from_slice(&output.stderr);
                }
            }
            Ok(output) => {
                flush_grouped_output(task, &collected).await;
                eprintln!(
                    "Error: Task '{}' action '{}' failed with status: {}",
                    task.name, action, output.status
                );
                io::stderr().write_all(&output.stderr).ok();
                return Err(());
            }
            Err(CommandError::Timeout) => {
                flush_grouped_output(task, &collected).await;
                eprintln!("Error: Task '{}' action '{}' timed out", task.name, action);
                return Err(());
            }
            Err(CommandError::Io(e)) => {
                flush_grouped_output(task, &collected).await;
                eprintln!(
                    "Error: Task '{}' action '{}' failed to execute: {}",
                    task.name, action, e
                );
                return Err(());
            }
        }
    }

    flush_grouped_output(task, &collected).await;
    Ok(())
}

async fn flush_grouped_output(task: &Task, collected: &[u8]) {
    if collected.is_empty() {
        return;
    }

    let _lock = output_print_lock().lock().await;
    println!("[{}]", task.name);
    io::stdout().write_all(collected).ok();
    io::stdout().flush().ok();
}

fn targets_outdated(inputs: &[PathBuf], targets: &[PathBuf]) -> bool {
    if inputs.is_empty() || targets.is_empty() {
        return false;
    }

    let newest_input = match newest_timestamp(inputs) {
        Some(time) => time,
        None => return true,
    };

    let oldest_target = match oldest_timestamp(targets) {
        Some(time) => time,
        None => return true,
    };

    newest_input > oldest_target
}

fn newest_timestamp(paths: &[PathBuf]) -> Option<SystemTime> {
    paths
        .iter()
        .filter_map(|path| {
            path.metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
        })
        .max()
}

fn oldest_timestamp(paths: &[PathBuf]) -> Option<SystemTime> {
    paths
        .iter()
        .filter_map(|path| {
            path.metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
        })
        .min()
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::state::Strategy;
    use crate::task::Action;
    use std::fs;
    use std::path::Path;

    fn sh(cmd: &str) -> Action {
        Action::new("sh", &["-c", cmd])
    }

    fn file_task(name: &str, targets: &[&Path], deps: &[&Path], cmd: &str) -> Task {
        Task {
            name: name.to_string(),
            group: None,
            targets: targets.iter().map(|p| p.to_path_buf()).collect(),
            file_deps: deps.iter().map(|p| p.to_path_buf()).collect(),
            actions: vec![sh(cmd)],
            clean: true,
            timeout: None,
        }
    }

    fn tracker_in(dir: &Path) -> StateTracker {
        StateTracker::load(dir.join("remake_state.json"), Strategy::Hash)
    }

    fn runner<'a>(graph: &'a TaskGraph, tracker: &'a mut StateTracker) -> TaskRunner<'a> {
        TaskRunner::new(
            graph,
            tracker,
            false,
            None,
            Some(2),
            OutputMode::Group,
            Arc::new(AtomicBool::new(false)),
        )
    }

    /// A -> B chain over real files: a.out from src.txt, b.out from a.out.
    fn chain(dir: &Path) -> TaskGraph {
        let src = dir.join("src.txt");
        let a_out = dir.join("a.out");
        let b_out = dir.join("b.out");

        TaskGraph::build(vec![
            file_task(
                "a",
                &[&a_out],
                &[&src],
                &format!("cp {} {}", src.display(), a_out.display()),
            ),
            file_task(
                "b",
                &[&b_out],
                &[&a_out],
                &format!("cp {} {}", a_out.display(), b_out.display()),
            ),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn chain_runs_then_settles_then_reruns_on_change() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("src.txt"), "one").unwrap();

        let graph = chain(dir.path());
        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());

        // first run: everything executes, dependency first
        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("a"), Some(TaskStatus::Ran));
        assert_eq!(report.status_of("b"), Some(TaskStatus::Ran));
        assert!(report.success());
        assert!(dir.path().join("b.out").exists());

        // second run, nothing changed: zero actions
        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("a"), Some(TaskStatus::UpToDate));
        assert_eq!(report.status_of("b"), Some(TaskStatus::UpToDate));

        // change the leaf input: the whole chain reruns
        fs::write(dir.path().join("src.txt"), "two").unwrap();
        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("a"), Some(TaskStatus::Ran));
        assert_eq!(report.status_of("b"), Some(TaskStatus::Ran));
        assert_eq!(fs::read_to_string(dir.path().join("b.out")).unwrap(), "two");
    }

    #[tokio::test]
    async fn unrelated_tasks_stay_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("src.txt"), "one").unwrap();
        fs::write(dir.path().join("other.txt"), "x").unwrap();

        let src = dir.path().join("src.txt");
        let other = dir.path().join("other.txt");
        let a_out = dir.path().join("a.out");
        let c_out = dir.path().join("c.out");

        let graph = TaskGraph::build(vec![
            file_task(
                "a",
                &[&a_out],
                &[&src],
                &format!("cp {} {}", src.display(), a_out.display()),
            ),
            file_task(
                "c",
                &[&c_out],
                &[&other],
                &format!("cp {} {}", other.display(), c_out.display()),
            ),
        ])
        .unwrap();

        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());
        runner(&graph, &mut tracker).run(&selection).await;

        fs::write(&src, "two").unwrap();
        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("a"), Some(TaskStatus::Ran));
        assert_eq!(report.status_of("c"), Some(TaskStatus::UpToDate));
    }

    #[tokio::test]
    async fn removing_a_matched_input_makes_task_stale() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.md"), "a").unwrap();
        fs::write(src.join("b.md"), "b").unwrap();

        let pattern = src.join("*.md");
        let out = dir.path().join("book.out");
        let graph = TaskGraph::build(vec![file_task(
            "book",
            &[&out],
            &[&pattern],
            &format!("cat {}/*.md > {}", src.display(), out.display()),
        )])
        .unwrap();

        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());

        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("book"), Some(TaskStatus::Ran));
        assert_eq!(fs::read_to_string(&out).unwrap(), "ab");

        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("book"), Some(TaskStatus::UpToDate));

        // the deleted file drops out of the glob expansion; the target was
        // built from a file set that no longer exists, so it must rebuild
        fs::remove_file(src.join("b.md")).unwrap();
        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("book"), Some(TaskStatus::Ran));
        assert_eq!(fs::read_to_string(&out).unwrap(), "a");
    }

    #[tokio::test]
    async fn failure_skips_dependents_but_not_independents() {
        let dir = tempfile::tempdir().unwrap();
        let a_out = dir.path().join("a.out");
        let b_out = dir.path().join("b.out");
        let c_out = dir.path().join("c.out");

        let graph = TaskGraph::build(vec![
            file_task("a", &[&a_out], &[], "exit 1"),
            file_task(
                "b",
                &[&b_out],
                &[&a_out],
                &format!("touch {}", b_out.display()),
            ),
            file_task("c", &[&c_out], &[], &format!("touch {}", c_out.display())),
        ])
        .unwrap();

        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());
        let report = runner(&graph, &mut tracker).run(&selection).await;

        assert_eq!(report.status_of("a"), Some(TaskStatus::Failed));
        assert_eq!(report.status_of("b"), Some(TaskStatus::Skipped));
        assert_eq!(report.status_of("c"), Some(TaskStatus::Ran));
        assert!(!report.success());
        assert!(!b_out.exists());
        assert!(c_out.exists());
    }

    #[tokio::test]
    async fn phony_tasks_always_run() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");

        let graph = TaskGraph::build(vec![Task {
            name: "phony".to_string(),
            group: None,
            targets: Vec::new(),
            file_deps: Vec::new(),
            actions: vec![sh(&format!("echo x >> {}", marker.display()))],
            clean: false,
            timeout: None,
        }])
        .unwrap();

        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());

        for _ in 0..2 {
            let report = runner(&graph, &mut tracker).run(&selection).await;
            assert_eq!(report.status_of("phony"), Some(TaskStatus::Ran));
        }

        assert_eq!(fs::read_to_string(&marker).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn plan_annotates_without_executing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("src.txt"), "one").unwrap();

        let graph = chain(dir.path());
        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());

        let plan = runner(&graph, &mut tracker).plan(&selection);
        assert_eq!(
            plan,
            vec![("a".to_string(), true), ("b".to_string(), true)]
        );
        // a dry run must not create the targets
        assert!(!dir.path().join("a.out").exists());

        runner(&graph, &mut tracker).run(&selection).await;
        let plan = runner(&graph, &mut tracker).plan(&selection);
        assert_eq!(
            plan,
            vec![("a".to_string(), false), ("b".to_string(), false)]
        );

        // an up-to-date task still reruns when its dependency will
        fs::write(dir.path().join("src.txt"), "two").unwrap();
        let plan = runner(&graph, &mut tracker).plan(&selection);
        assert_eq!(plan[1], ("b".to_string(), true));
    }

    #[tokio::test]
    async fn clean_removes_targets_and_records() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("src.txt"), "one").unwrap();

        let graph = chain(dir.path());
        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());

        runner(&graph, &mut tracker).run(&selection).await;
        assert!(dir.path().join("b.out").exists());

        runner(&graph, &mut tracker).clean(&selection);
        assert!(!dir.path().join("a.out").exists());
        assert!(!dir.path().join("b.out").exists());

        // cleaning twice is fine: missing targets are not an error
        runner(&graph, &mut tracker).clean(&selection);

        let report = runner(&graph, &mut tracker).run(&selection).await;
        assert_eq!(report.status_of("a"), Some(TaskStatus::Ran));
        assert_eq!(report.status_of("b"), Some(TaskStatus::Ran));
    }

    #[tokio::test]
    async fn cancellation_marks_pending_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let a_out = dir.path().join("a.out");

        let graph = TaskGraph::build(vec![file_task(
            "a",
            &[&a_out],
            &[],
            &format!("touch {}", a_out.display()),
        )])
        .unwrap();

        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());
        let cancel = Arc::new(AtomicBool::new(true));

        let mut runner = TaskRunner::new(
            &graph,
            &mut tracker,
            false,
            None,
            Some(1),
            OutputMode::Group,
            cancel,
        );
        let report = runner.run(&selection).await;

        assert_eq!(report.status_of("a"), Some(TaskStatus::Cancelled));
        assert!(!report.success());
        assert!(!a_out.exists());
    }

    #[tokio::test]
    async fn action_sequence_aborts_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");

        let graph = TaskGraph::build(vec![Task {
            name: "multi".to_string(),
            group: None,
            targets: vec![dir.path().join("multi.out")],
            file_deps: Vec::new(),
            actions: vec![
                sh(&format!("touch {}", first.display())),
                sh("exit 3"),
                sh(&format!("touch {}", second.display())),
            ],
            clean: false,
            timeout: None,
        }])
        .unwrap();

        let selection = graph.required(&[]).unwrap();
        let mut tracker = tracker_in(dir.path());
        let report = runner(&graph, &mut tracker).run(&selection).await;

        assert_eq!(report.status_of("multi"), Some(TaskStatus::Failed));
        assert!(first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn levels_separate_dependents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("src.txt"), "one").unwrap();

        let graph = chain(dir.path());
        let levels = calculate_dependency_levels(&graph, &[0, 1]);

        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].task_indices, vec![0]);
        assert_eq!(levels[1].task_indices, vec![1]);
    }
}
