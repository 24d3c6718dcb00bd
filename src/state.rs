use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Read},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

const DEFAULT_STORE_DIR: &str = ".";
const STORE_FILENAME: &str = "remake_state.json";

/// How file signatures are computed, selected process-wide.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Modification time in nanoseconds. Fast; a touch without a content
    /// change still counts as a change.
    Timestamp,
    /// Blake3 hash of the file contents. Slower, exact.
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub signature: String,
    pub last_run: u64,
}

/// Persisted map from absolute file path to its last-known signature.
/// Signatures are prefixed with the strategy that produced them, so
/// switching strategies invalidates every record instead of comparing
/// mtimes against hashes.
#[derive(Debug)]
pub struct StateTracker {
    store_path: PathBuf,
    strategy: Strategy,
    records: HashMap<String, FileRecord>,
    dirty: bool,
}

impl StateTracker {
    /// Load the store from disk. A missing or unreadable store yields an
    /// empty tracker, which degrades to "everything is stale".
    pub fn load(store_path: PathBuf, strategy: Strategy) -> Self {
        let records = match File::open(&store_path) {
            Ok(file) => {
                let reader = BufReader::new(file);
                serde_json::from_reader(reader).unwrap_or_default()
            }
            Err(_) => HashMap::default(),
        };

        Self {
            store_path,
            strategy,
            records,
            dirty: false,
        }
    }

    /// True when the file is missing, has no record, or its current
    /// signature differs from the recorded one.
    pub fn is_stale(&self, path: &Path) -> bool {
        let current = match signature(path, self.strategy) {
            Some(sig) => sig,
            None => return true,
        };

        match self.records.get(&store_key(path)) {
            Some(record) => record.signature != current,
            None => true,
        }
    }

    /// Capture the file's current signature. Called for every target and
    /// file dependency of a task after its actions succeed.
    pub fn record(&mut self, path: &Path) {
        let Some(current) = signature(path, self.strategy) else {
            return;
        };

        let last_run = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.records.insert(
            store_key(path),
            FileRecord {
                signature: current,
                last_run,
            },
        );
        self.dirty = true;
    }

    /// Capture the set of files a task's dependency globs expanded to.
    /// Per-file signatures cannot see a matched file disappearing, since
    /// the deleted path simply drops out of the next expansion; comparing
    /// the whole set catches both shrinkage and growth.
    pub fn record_inputs(&mut self, task: &str, inputs: &[PathBuf]) {
        let last_run = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.records.insert(
            inputs_key(task),
            FileRecord {
                signature: inputs_signature(inputs),
                last_run,
            },
        );
        self.dirty = true;
    }

    /// True when the expanded input set differs from the one recorded for
    /// this task, or no set was recorded yet.
    pub fn inputs_changed(&self, task: &str, inputs: &[PathBuf]) -> bool {
        match self.records.get(&inputs_key(task)) {
            Some(record) => record.signature != inputs_signature(inputs),
            None => true,
        }
    }

    /// Drop the record for a path, used by cleanup so a later run treats
    /// the regenerated file as stale.
    pub fn forget(&mut self, path: &Path) {
        if self.records.remove(&store_key(path)).is_some() {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Atomic whole-file rewrite: serialize next to the store and rename
    /// over it. Failures are warnings; the build result is unaffected and
    /// the affected files simply read as stale on the next run.
    pub fn save(&self) {
        if let Some(parent) = self.store_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Warning: Failed to create state directory: {}", e);
                return;
            }
        }

        let tmp_path = self.store_path.with_extension("json.tmp");

        match File::create(&tmp_path) {
            Ok(file) => {
                let writer = BufWriter::new(file);
                if let Err(e) = serde_json::to_writer_pretty(writer, &self.records) {
                    eprintln!("Warning: Failed to write state file: {}", e);
                    return;
                }
            }
            Err(e) => {
                eprintln!("Warning: Failed to open state file for writing: {}", e);
                return;
            }
        }

        if let Err(e) = fs::rename(&tmp_path, &self.store_path) {
            eprintln!("Warning: Failed to replace state file: {}", e);
        }
    }
}

/// Store key for a task's recorded input set. File keys are absolute
/// paths, so the prefix cannot collide with them.
fn inputs_key(task: &str) -> String {
    format!("task-inputs:{}", task)
}

fn inputs_signature(inputs: &[PathBuf]) -> String {
    let mut keys: Vec<String> = inputs.iter().map(|p| store_key(p)).collect();
    keys.sort();

    let mut hasher = blake3::Hasher::new();
    for key in &keys {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
    }
    format!("inputs:{}", hasher.finalize().to_hex())
}

fn store_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn signature(path: &Path, strategy: Strategy) -> Option<String> {
    match strategy {
        Strategy::Timestamp => {
            let modified = path.metadata().ok()?.modified().ok()?;
            let nanos = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Some(format!("mtime:{}", nanos))
        }
        Strategy::Hash => {
            let mut file = File::open(path).ok()?;
            let mut hasher = blake3::Hasher::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = file.read(&mut buf).ok()?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Some(format!("blake3:{}", hasher.finalize().to_hex()))
        }
    }
}

/// Resolve the store location: `cache_dir` relative to the config file's
/// directory, absolute paths taken as-is.
pub fn store_path(cache_dir: Option<&str>, config_path: &str) -> PathBuf {
    let config_parent = Path::new(config_path)
        .parent()
        .unwrap_or_else(|| Path::new("."));

    let cache_dir = cache_dir.unwrap_or(DEFAULT_STORE_DIR);

    let cache_dir_path = if Path::new(cache_dir).is_absolute() {
        PathBuf::from(cache_dir)
    } else {
        config_parent.join(cache_dir)
    };

    cache_dir_path.join(STORE_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn tracker_in(dir: &Path, strategy: Strategy) -> StateTracker {
        StateTracker::load(dir.join(STORE_FILENAME), strategy)
    }

    #[test]
    fn unrecorded_file_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let tracker = tracker_in(dir.path(), Strategy::Hash);
        assert!(tracker.is_stale(&file));
    }

    #[test]
    fn missing_file_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let mut tracker = tracker_in(dir.path(), Strategy::Hash);
        tracker.record(&file);
        fs::remove_file(&file).unwrap();

        assert!(tracker.is_stale(&file));
    }

    #[test]
    fn content_change_flips_staleness_under_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let mut tracker = tracker_in(dir.path(), Strategy::Hash);
        tracker.record(&file);
        assert!(!tracker.is_stale(&file));

        fs::write(&file, "two").unwrap();
        assert!(tracker.is_stale(&file));
    }

    #[test]
    fn touch_flips_staleness_under_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let mut tracker = tracker_in(dir.path(), Strategy::Timestamp);
        tracker.record(&file);
        assert!(!tracker.is_stale(&file));

        // mtime resolution is in nanoseconds; a short pause keeps the
        // rewrite from landing on the same tick.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut f = File::create(&file).unwrap();
        writeln!(f, "one").unwrap();
        assert!(tracker.is_stale(&file));
    }

    #[test]
    fn records_survive_a_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let mut tracker = tracker_in(dir.path(), Strategy::Hash);
        tracker.record(&file);
        assert!(tracker.is_dirty());
        tracker.save();

        // temp file must not linger after the rename
        assert!(!dir.path().join("remake_state.json.tmp").exists());

        let reloaded = tracker_in(dir.path(), Strategy::Hash);
        assert!(!reloaded.is_stale(&file));
    }

    #[test]
    fn switching_strategy_invalidates_records() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let mut tracker = tracker_in(dir.path(), Strategy::Timestamp);
        tracker.record(&file);
        tracker.save();

        let reloaded = tracker_in(dir.path(), Strategy::Hash);
        assert!(reloaded.is_stale(&file));
    }

    #[test]
    fn forget_removes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let mut tracker = tracker_in(dir.path(), Strategy::Hash);
        tracker.record(&file);
        tracker.forget(&file);
        assert!(tracker.is_stale(&file));
    }

    #[test]
    fn input_set_changes_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");

        let mut tracker = tracker_in(dir.path(), Strategy::Hash);
        assert!(tracker.inputs_changed("book", &[a.clone(), b.clone()]));

        tracker.record_inputs("book", &[a.clone(), b.clone()]);
        assert!(!tracker.inputs_changed("book", &[a.clone(), b.clone()]));
        // the set is what matters, not the expansion order
        assert!(!tracker.inputs_changed("book", &[b.clone(), a.clone()]));

        assert!(tracker.inputs_changed("book", &[a.clone()]));
        assert!(tracker.inputs_changed("other", &[a, b]));
    }

    #[test]
    fn corrupt_store_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STORE_FILENAME), "not json").unwrap();
        let file = dir.path().join("a.md");
        fs::write(&file, "one").unwrap();

        let tracker = tracker_in(dir.path(), Strategy::Hash);
        assert!(tracker.is_stale(&file));
    }
}
