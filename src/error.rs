use std::fmt;

use crate::util::{CommandError, FileError};

#[derive(Debug)]
pub enum RemakeError {
    /// Invalid task set: duplicate names or targets, unresolved file
    /// dependencies. Reported before any action runs.
    Config(String),
    /// Circular dependency among task targets; holds the task sequence.
    Cycle(Vec<String>),
    /// A requested target that matches no task, group, or target path.
    Task(String),
    Io(std::io::Error),
    File(FileError),
    Command(CommandError),
    Parse(String),
}

impl fmt::Display for RemakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemakeError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RemakeError::Cycle(path) => {
                write!(f, "Circular dependency: {}", path.join(" -> "))
            }
            RemakeError::Task(msg) => write!(f, "Task error: {}", msg),
            RemakeError::Io(err) => write!(f, "IO error: {}", err),
            RemakeError::File(err) => write!(f, "File error: {}", err),
            RemakeError::Command(err) => write!(f, "Command error: {}", err),
            RemakeError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for RemakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemakeError::Io(err) => Some(err),
            RemakeError::File(err) => Some(err),
            RemakeError::Command(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RemakeError {
    fn from(err: std::io::Error) -> Self {
        RemakeError::Io(err)
    }
}

impl From<FileError> for RemakeError {
    fn from(err: FileError) -> Self {
        RemakeError::File(err)
    }
}

impl From<CommandError> for RemakeError {
    fn from(err: CommandError) -> Self {
        RemakeError::Command(err)
    }
}

impl From<toml::de::Error> for RemakeError {
    fn from(err: toml::de::Error) -> Self {
        RemakeError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RemakeError>;
