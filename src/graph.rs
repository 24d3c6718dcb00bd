use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
};

use glob::Pattern;

use crate::error::{RemakeError, Result};
use crate::task::Task;
use crate::util::{FileError, is_glob_pattern};

/// Dependency graph over a flat task list. Nodes are task indices in
/// declaration order; an edge exists from a task to the producer of each
/// file dependency that is some other task's target. File dependencies
/// that no task produces are graph leaves and must exist on disk.
#[derive(Debug)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    producers: HashMap<PathBuf, usize>,
    /// deps[i] = indices of tasks that task i depends on
    deps: Vec<Vec<usize>>,
    /// dependents[i] = indices of tasks that depend on task i
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Build and validate the graph. Duplicate targets, unresolved file
    /// dependencies and cycles are configuration errors; none of them can
    /// survive past this point, so execution never starts on a bad graph.
    pub fn build(tasks: Vec<Task>) -> Result<Self> {
        {
            let mut names: HashMap<&str, usize> = HashMap::new();
            for (i, task) in tasks.iter().enumerate() {
                if names.insert(&task.name, i).is_some() {
                    return Err(RemakeError::Config(format!(
                        "duplicate task name '{}'",
                        task.name
                    )));
                }
            }
        }

        let mut producers: HashMap<PathBuf, usize> = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            for target in &task.targets {
                if let Some(&other) = producers.get(target) {
                    return Err(RemakeError::Config(format!(
                        "target '{}' is claimed by both '{}' and '{}'",
                        target.display(),
                        tasks[other].name,
                        task.name
                    )));
                }
                producers.insert(target.clone(), i);
            }
        }

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            let mut seen: HashSet<usize> = HashSet::new();
            for dep in &task.file_deps {
                if let Some(&producer) = producers.get(dep) {
                    if producer != i && seen.insert(producer) {
                        deps[i].push(producer);
                    }
                    continue;
                }

                if is_glob_pattern(&dep.to_string_lossy()) {
                    // A glob may cover targets another task generates, which
                    // do not exist yet on a clean tree. Matching the pattern
                    // against declared targets keeps the edges independent of
                    // build state; whatever else the glob picks up on disk is
                    // a leaf.
                    let pattern =
                        Pattern::new(&dep.to_string_lossy()).map_err(FileError::from)?;
                    let mut matched: Vec<usize> = producers
                        .iter()
                        .filter(|&(target, &p)| p != i && pattern.matches_path(target))
                        .map(|(_, &p)| p)
                        .collect();
                    matched.sort_unstable();
                    for producer in matched {
                        if seen.insert(producer) {
                            deps[i].push(producer);
                        }
                    }
                    continue;
                }

                if !dep.exists() {
                    return Err(RemakeError::Config(format!(
                        "task '{}' depends on '{}' which is neither a target of another task nor an existing file",
                        task.name,
                        dep.display()
                    )));
                }
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        for (i, task_deps) in deps.iter().enumerate() {
            for &d in task_deps {
                dependents[d].push(i);
            }
        }

        let graph = Self {
            tasks,
            producers,
            deps,
            dependents,
        };
        graph.check_cycles()?;
        Ok(graph)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, index: usize) -> &Task {
        &self.tasks[index]
    }

    pub fn deps(&self, index: usize) -> &[usize] {
        &self.deps[index]
    }

    /// Topologically order a subset of tasks, breaking ties by declaration
    /// order so plans are deterministic.
    pub fn topo_order(&self, subset: &[usize]) -> Vec<usize> {
        let members: HashSet<usize> = subset.iter().copied().collect();
        let mut in_degree: HashMap<usize, usize> = HashMap::new();

        for &i in &members {
            let degree = self.deps[i].iter().filter(|d| members.contains(d)).count();
            in_degree.insert(i, degree);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(members.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &dependent in &self.dependents[i] {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(dependent));
                    }
                }
            }
        }

        order
    }

    /// Resolve requested targets and return the transitive dependency
    /// closure in topological order. A request may be a task name, a group
    /// name (selecting every member), or a target path. With no requests,
    /// every task is selected.
    pub fn required(&self, requests: &[String]) -> Result<Vec<usize>> {
        let mut roots: Vec<usize> = Vec::new();

        if requests.is_empty() {
            roots.extend(0..self.tasks.len());
        } else {
            for request in requests {
                roots.extend(self.resolve(request)?);
            }
        }

        let mut needed: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = roots.into_iter().collect();

        while let Some(i) = queue.pop_front() {
            if !needed.insert(i) {
                continue;
            }
            for &dep in &self.deps[i] {
                if !needed.contains(&dep) {
                    queue.push_back(dep);
                }
            }
        }

        let needed: Vec<usize> = needed.into_iter().collect();
        Ok(self.topo_order(&needed))
    }

    fn resolve(&self, request: &str) -> Result<Vec<usize>> {
        if let Some(i) = self.tasks.iter().position(|t| t.name == request) {
            return Ok(vec![i]);
        }

        let members: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.group.as_deref() == Some(request))
            .map(|(i, _)| i)
            .collect();
        if !members.is_empty() {
            return Ok(members);
        }

        if let Some(&producer) = self.producers.get(Path::new(request)) {
            return Ok(vec![producer]);
        }

        Err(RemakeError::Task(format!(
            "'{}' matches no task, group, or target",
            request
        )))
    }

    /// Every task that depends, directly or transitively, on any of the
    /// given tasks. Used to skip dependents after a failure.
    pub fn transitive_dependents(&self, start: usize) -> HashSet<usize> {
        let mut found: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = self.dependents[start].iter().copied().collect();

        while let Some(i) = queue.pop_front() {
            if !found.insert(i) {
                continue;
            }
            for &dependent in &self.dependents[i] {
                if !found.contains(&dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        found
    }

    /// Three-color depth-first search. A back edge to an in-progress node
    /// means the target mapping is cyclic; the error names the task
    /// sequence around the cycle.
    fn check_cycles(&self) -> Result<()> {
        let mut colors = vec![Color::White; self.tasks.len()];
        let mut stack: Vec<usize> = Vec::new();

        for start in 0..self.tasks.len() {
            if colors[start] != Color::White {
                continue;
            }

            if let Some(offender) = self.visit(start, &mut colors, &mut stack) {
                let cycle_start = stack.iter().position(|&i| i == offender).unwrap_or(0);
                let mut sequence: Vec<String> = stack[cycle_start..]
                    .iter()
                    .map(|&i| self.tasks[i].name.clone())
                    .collect();
                sequence.push(self.tasks[offender].name.clone());
                return Err(RemakeError::Cycle(sequence));
            }
        }

        Ok(())
    }

    fn visit(&self, node: usize, colors: &mut [Color], stack: &mut Vec<usize>) -> Option<usize> {
        colors[node] = Color::Grey;
        stack.push(node);

        for &dep in &self.deps[node] {
            match colors[dep] {
                Color::Grey => return Some(dep),
                Color::White => {
                    if let Some(offender) = self.visit(dep, colors, stack) {
                        return Some(offender);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node] = Color::Black;
        None
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}
