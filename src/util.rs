use glob::{GlobError, PatternError, glob};
use std::process::{Output, Stdio};
use std::{
    collections::HashSet,
    fmt, fs,
    io::Error as IoError,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tokio::sync::Mutex;

use crate::task::Action;

#[derive(Debug)]
pub enum FileError {
    GlobPattern(PatternError),
    GlobExpansion(GlobError),
    Io(IoError),
}

#[derive(Debug)]
pub enum CommandError {
    Io(IoError),
    Timeout,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::GlobPattern(e) => write!(f, "Invalid glob pattern: {}", e),
            FileError::GlobExpansion(e) => write!(f, "Failed to expand glob: {}", e),
            FileError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::GlobPattern(e) => Some(e),
            FileError::GlobExpansion(e) => Some(e),
            FileError::Io(e) => Some(e),
        }
    }
}

impl From<PatternError> for FileError {
    fn from(err: PatternError) -> Self {
        FileError::GlobPattern(err)
    }
}

impl From<GlobError> for FileError {
    fn from(err: GlobError) -> Self {
        FileError::GlobExpansion(err)
    }
}

impl From<IoError> for FileError {
    fn from(err: IoError) -> Self {
        FileError::Io(err)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Io(e) => write!(f, "Command execution error: {}", e),
            CommandError::Timeout => write!(f, "Command timed out"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Io(e) => Some(e),
            CommandError::Timeout => None,
        }
    }
}

pub fn parse_timeout(timeout_str: Option<&str>, default_timeout: Option<&str>) -> Option<Duration> {
    let timeout_to_parse = timeout_str.or(default_timeout)?;

    if timeout_to_parse == "0" || timeout_to_parse.is_empty() {
        return None;
    }

    match timeout_to_parse.parse::<humantime::Duration>() {
        Ok(duration) => Some(duration.into()),
        Err(e) => {
            eprintln!(
                "Warning: Invalid timeout format '{}': {}",
                timeout_to_parse, e
            );
            eprintln!("Use duration format like '5m', '30s', '1h30m'");
            None
        }
    }
}

/// Expand glob patterns among `paths` into the concrete files they match.
/// Literal paths are kept as-is when they exist; a literal path that does
/// not exist is silently dropped (callers validate existence separately).
pub fn expand_globs(paths: &[PathBuf]) -> Result<Vec<PathBuf>, FileError> {
    let mut result = Vec::new();
    let mut seen = HashSet::new();

    for path in paths {
        let path_str = path.to_string_lossy();

        if is_glob_pattern(&path_str) {
            let expanded_paths = expand_single_glob(&path_str)?;
            for expanded_path in expanded_paths {
                if expanded_path.is_file() && seen.insert(expanded_path.clone()) {
                    result.push(expanded_path);
                }
            }
        } else if path.exists() && seen.insert(path.to_path_buf()) {
            result.push(path.to_path_buf());
        }
    }

    Ok(result)
}

pub fn is_glob_pattern(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[')
}

fn expand_single_glob(pattern: &str) -> Result<Vec<PathBuf>, FileError> {
    let mut paths = glob(pattern)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(FileError::from)?;
    paths.sort();
    Ok(paths)
}

/// Spawn a single structured action and wait for it, optionally bounded by a
/// timeout. The program is executed directly, never through a shell, so the
/// argument list needs no quoting. Stdout and stderr are collected; when
/// `stream_output` is set they are also forwarded live.
pub async fn run_action(
    action: &Action,
    timeout: Option<Duration>,
    stream_output: bool,
) -> Result<Output, CommandError> {
    let mut cmd = TokioCommand::new(&action.program);
    cmd.args(&action.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());

    let mut child = cmd.spawn().map_err(CommandError::Io)?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_handle = tokio::spawn(async move {
        let mut collected: Vec<u8> = Vec::new();
        if let Some(mut pipe) = stdout_pipe.take() {
            let mut out = tokio::io::stdout();
            let mut buf = [0u8; 8192];
            loop {
                let n = pipe.read(&mut buf).await.map_err(CommandError::Io)?;
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&buf[..n]);
                if stream_output {
                    out.write_all(&buf[..n]).await.map_err(CommandError::Io)?;
                }
            }
            if stream_output {
                out.flush().await.map_err(CommandError::Io)?;
            }
        }
        Ok::<Vec<u8>, CommandError>(collected)
    });

    let stderr_handle = tokio::spawn(async move {
        let mut collected: Vec<u8> = Vec::new();
        if let Some(mut pipe) = stderr_pipe.take() {
            let mut err = tokio::io::stderr();
            let mut buf = [0u8; 8192];
            loop {
                let n = pipe.read(&mut buf).await.map_err(CommandError::Io)?;
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&buf[..n]);
                if stream_output {
                    err.write_all(&buf[..n]).await.map_err(CommandError::Io)?;
                }
            }
            if stream_output {
                err.flush().await.map_err(CommandError::Io)?;
            }
        }
        Ok::<Vec<u8>, CommandError>(collected)
    });

    let status = match timeout {
        Some(duration) => {
            tokio::select! {
                result = child.wait() => result.map_err(CommandError::Io)?,
                _ = tokio::time::sleep(duration) => {
                    if let Err(kill_err) = child.kill().await {
                        eprintln!("Warning: Failed to kill timed-out process: {}", kill_err);
                    }
                    let _ = child.wait().await;
                    return Err(CommandError::Timeout);
                }
            }
        }
        None => child.wait().await.map_err(CommandError::Io)?,
    };

    let stdout = match stdout_handle.await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return Err(e),
        Err(e) => return Err(CommandError::Io(IoError::other(e))),
    };

    let stderr = match stderr_handle.await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => return Err(e),
        Err(e) => return Err(CommandError::Io(IoError::other(e))),
    };

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

static OUTPUT_PRINT_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn output_print_lock() -> &'static Mutex<()> {
    OUTPUT_PRINT_LOCK.get_or_init(|| Mutex::new(()))
}

/// Remove a target path if it exists. Missing paths are not an error.
pub fn remove_target(path: &Path, verbose: bool) {
    if !path.exists() {
        return;
    }

    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => {
            if verbose {
                println!("Removed: {}", path.display());
            }
        }
        Err(e) => {
            eprintln!("Warning: Failed to remove '{}': {}", path.display(), e);
        }
    }
}
