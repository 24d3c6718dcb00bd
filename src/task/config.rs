use std::{collections::HashMap, env, fs, path::PathBuf};

use regex::Regex;
use serde::Deserialize;

use super::{Action, Task, TaskSet};
use crate::error::Result;
use crate::output::OutputMode;
use crate::state::Strategy;
use crate::util::expand_globs;

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "task", default)]
    tasks: HashMap<String, Task>,
    #[serde(rename = "group", default)]
    groups: HashMap<String, Group>,
    config: Option<ConfigSection>,
    #[serde(default)]
    variables: HashMap<String, String>,
}

/// A task family: one sub-task per file matched by `foreach`. Targets,
/// file_deps and action argv may use the `{path}`, `{stem}`, `{name}` and
/// `{dir}` placeholders, filled in per matched file.
#[derive(Debug, Deserialize)]
struct Group {
    foreach: String,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    file_deps: Vec<String>,
    #[serde(default)]
    actions: Vec<Action>,
    #[serde(default)]
    clean: bool,
    #[serde(default)]
    timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigSection {
    #[serde(default)]
    default: Vec<String>,
    strategy: Option<Strategy>,
    cache_dir: Option<String>,
    jobs: Option<usize>,
    default_timeout: Option<String>,
    output: Option<OutputMode>,
}

#[derive(Debug)]
pub struct TaskConfiguration {
    pub tasks: Vec<Task>,
    pub default_targets: Vec<String>,
    pub strategy: Option<Strategy>,
    pub cache_dir: Option<String>,
    pub jobs: Option<usize>,
    pub default_timeout: Option<String>,
    pub output: Option<OutputMode>,
}

pub fn load_tasks(config_path: &str) -> Result<TaskConfiguration> {
    let contents = fs::read_to_string(config_path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    process_config(config)
}

fn process_config(config: ConfigFile) -> Result<TaskConfiguration> {
    let section = config.config;
    let default_targets = section
        .as_ref()
        .map(|c| c.default.clone())
        .unwrap_or_default();
    let strategy = section.as_ref().and_then(|c| c.strategy);
    let cache_dir = section.as_ref().and_then(|c| c.cache_dir.clone());
    let jobs = section.as_ref().and_then(|c| c.jobs);
    let default_timeout = section.as_ref().and_then(|c| c.default_timeout.clone());
    let output = section.as_ref().and_then(|c| c.output);

    let mut variables = config.variables;
    add_builtin_variables(&mut variables);

    let mut set = TaskSet::new();

    // TOML tables are unordered through serde; sorting by table name makes
    // "declaration order" deterministic across invocations.
    let mut tasks: Vec<(String, Task)> = config.tasks.into_iter().collect();
    tasks.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (name, mut task) in tasks {
        if task.name.is_empty() {
            task.name = name;
        }
        substitute_variables_in_task(&mut task, &variables);
        set.declare_task(task)?;
    }

    let mut groups: Vec<(String, Group)> = config.groups.into_iter().collect();
    groups.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (name, group) in groups {
        let members = expand_group(&group, &variables)?;
        set.declare_task_group(&name, members)?;
    }

    Ok(TaskConfiguration {
        tasks: set.into_tasks(),
        default_targets,
        strategy,
        cache_dir,
        jobs,
        default_timeout,
        output,
    })
}

/// Expand a group into one concrete sub-task per file matched by its
/// `foreach` glob. Matches are sorted, so expansion order is stable.
fn expand_group(group: &Group, variables: &HashMap<String, String>) -> Result<Vec<Task>> {
    let pattern = substitute_variables(&group.foreach, variables);
    let matches = expand_globs(&[PathBuf::from(&pattern)])?;

    let mut members = Vec::with_capacity(matches.len());
    for matched in matches {
        let path = matched.to_string_lossy().to_string();
        let stem = matched
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_name = matched
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = matched
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();

        let fill = |text: &str| -> String {
            substitute_variables(text, variables)
                .replace("{path}", &path)
                .replace("{stem}", &stem)
                .replace("{name}", &file_name)
                .replace("{dir}", &dir)
        };

        members.push(Task {
            name: path.clone(),
            group: None,
            targets: group.targets.iter().map(|t| PathBuf::from(fill(t))).collect(),
            file_deps: group
                .file_deps
                .iter()
                .map(|d| PathBuf::from(fill(d)))
                .collect(),
            actions: group
                .actions
                .iter()
                .map(|a| Action {
                    program: fill(&a.program),
                    args: a.args.iter().map(|arg| fill(arg)).collect(),
                })
                .collect(),
            clean: group.clean,
            timeout: group.timeout.clone(),
        });
    }

    Ok(members)
}

fn add_builtin_variables(variables: &mut HashMap<String, String>) {
    for (key, value) in env::vars() {
        variables.insert(format!("ENV_{}", key), value);
    }

    if let Ok(pwd) = env::current_dir() {
        variables.insert("PWD".to_string(), pwd.to_string_lossy().to_string());
    }
}

fn substitute_variables_in_task(task: &mut Task, variables: &HashMap<String, String>) {
    task.targets = task
        .targets
        .iter()
        .map(|path| PathBuf::from(substitute_variables(&path.to_string_lossy(), variables)))
        .collect();

    task.file_deps = task
        .file_deps
        .iter()
        .map(|path| PathBuf::from(substitute_variables(&path.to_string_lossy(), variables)))
        .collect();

    for action in &mut task.actions {
        action.program = substitute_variables(&action.program, variables);
        action.args = action
            .args
            .iter()
            .map(|arg| substitute_variables(arg, variables))
            .collect();
    }
}

fn substitute_variables(text: &str, variables: &HashMap<String, String>) -> String {
    let braced_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let simple_regex = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").unwrap();

    let result = braced_regex
        .replace_all(text, |caps: &regex::Captures| {
            let var_name = &caps[1];
            variables
                .get(var_name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string();

    simple_regex
        .replace_all(&result, |caps: &regex::Captures| {
            let var_name = &caps[1];
            variables
                .get(var_name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}
