use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use super::Task;
use crate::error::{RemakeError, Result};

/// Registration surface for task declarations. Enforces the two set-wide
/// invariants before graph construction: unique task names and a unique
/// producer per target path.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    names: HashSet<String>,
    /// target path -> name of the task that claims it
    targets: HashMap<PathBuf, String>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single task. Declaration order is preserved and later
    /// used as the deterministic tie-break for scheduling.
    pub fn declare_task(&mut self, task: Task) -> Result<()> {
        if task.name.is_empty() {
            return Err(RemakeError::Config(
                "task name must not be empty".to_string(),
            ));
        }

        if !self.names.insert(task.name.clone()) {
            return Err(RemakeError::Config(format!(
                "duplicate task name '{}'",
                task.name
            )));
        }

        for target in &task.targets {
            if let Some(other) = self.targets.get(target) {
                return Err(RemakeError::Config(format!(
                    "target '{}' is claimed by both '{}' and '{}'",
                    target.display(),
                    other,
                    task.name
                )));
            }
            self.targets.insert(target.clone(), task.name.clone());
        }

        self.tasks.push(task);
        Ok(())
    }

    /// Register a family of sub-tasks under a shared namespace. The
    /// iterator is drained eagerly so that scheduling only ever sees a
    /// flat task list; each sub-task's name is prefixed with `"group:"`.
    pub fn declare_task_group<I>(&mut self, group: &str, items: I) -> Result<()>
    where
        I: IntoIterator<Item = Task>,
    {
        for mut task in items {
            task.name = format!("{}:{}", group, task.name);
            task.group = Some(group.to_string());
            self.declare_task(task)?;
        }
        Ok(())
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Action;

    fn task(name: &str, targets: &[&str]) -> Task {
        Task {
            name: name.to_string(),
            group: None,
            targets: targets.iter().map(PathBuf::from).collect(),
            file_deps: Vec::new(),
            actions: vec![Action::new("true", &[])],
            clean: false,
            timeout: None,
        }
    }

    #[test]
    fn declaration_order_is_preserved() {
        let mut set = TaskSet::new();
        set.declare_task(task("b", &["b.out"])).unwrap();
        set.declare_task(task("a", &["a.out"])).unwrap();

        let names: Vec<_> = set.into_tasks().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut set = TaskSet::new();
        set.declare_task(task("a", &["a.out"])).unwrap();
        let err = set.declare_task(task("a", &["other.out"])).unwrap_err();
        assert!(matches!(err, RemakeError::Config(_)));
    }

    #[test]
    fn duplicate_target_rejected() {
        let mut set = TaskSet::new();
        set.declare_task(task("a", &["x.out"])).unwrap();
        let err = set.declare_task(task("b", &["x.out"])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("x.out"), "unexpected message: {}", msg);
        assert!(msg.contains("'a'") && msg.contains("'b'"));
    }

    #[test]
    fn group_members_are_namespaced() {
        let mut set = TaskSet::new();
        set.declare_task_group(
            "images",
            vec![task("fig1.tikz", &["fig1.svg"]), task("fig2.tikz", &["fig2.svg"])],
        )
        .unwrap();

        let tasks = set.into_tasks();
        assert_eq!(tasks[0].name, "images:fig1.tikz");
        assert_eq!(tasks[1].name, "images:fig2.tikz");
        assert_eq!(tasks[0].group.as_deref(), Some("images"));
    }

    #[test]
    fn group_member_colliding_with_task_rejected() {
        let mut set = TaskSet::new();
        set.declare_task(task("images:fig.tikz", &["a.out"])).unwrap();
        let err = set
            .declare_task_group("images", vec![task("fig.tikz", &["fig.svg"])])
            .unwrap_err();
        assert!(matches!(err, RemakeError::Config(_)));
    }
}
