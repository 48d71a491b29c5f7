//! Append-only persistence for gavel nodes.
//!
//! [`AppendLog`] is a key-value log: every [`AppendLog::put`] appends one JSON
//! line to `<dir>/<name>.jsonl`, and opening the log replays the file so the
//! latest record for each key wins. Nothing is ever rewritten in place.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while reading or appending to a log.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One line of the log file.
#[derive(Debug, Serialize, Deserialize)]
struct LogRecord<T> {
    key: String,
    value: T,
    recorded_at: DateTime<Utc>,
}

struct LogInner<T> {
    file: File,
    index: HashMap<String, T>,
}

/// Append-only log keyed by string, backed by a JSON-lines file.
///
/// Internally synchronized; share it behind an `Arc` or move it into its owner.
pub struct AppendLog<T> {
    path: PathBuf,
    inner: Mutex<LogInner<T>>,
}

impl<T> std::fmt::Debug for AppendLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendLog")
            .field("path", &self.path)
            .field("keys", &self.inner.lock().index.len())
            .finish_non_exhaustive()
    }
}

impl<T> AppendLog<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Opens (or creates) the log `<dir>/<name>.jsonl`, replaying existing records.
    pub fn open(dir: &Path, name: &str) -> Result<Self, PersistError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.jsonl"));
        let (index, torn_tail) = replay(&path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if torn_tail {
            file.write_all(b"\n")?;
        }
        debug!(path = %path.display(), keys = index.len(), "opened append log");

        Ok(Self {
            path,
            inner: Mutex::new(LogInner { file, index }),
        })
    }

    /// Appends a record for `key`. The new value supersedes any earlier one.
    pub fn put(&self, key: &str, value: &T) -> Result<(), PersistError> {
        let record = LogRecord {
            key: key.to_string(),
            value,
            recorded_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut inner = self.inner.lock();
        inner.file.write_all(line.as_bytes())?;
        inner.file.flush()?;
        inner.index.insert(key.to_string(), value.clone());
        Ok(())
    }

    /// Returns the latest value recorded for `key`.
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.lock().index.get(key).cloned()
    }

    /// Returns the latest value for every key, sorted by key.
    pub fn entries(&self) -> Vec<(String, T)> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .index
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// True if no key has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rebuilds the key index from the log file.
///
/// Also reports whether the file ends in a partial line, so the caller can
/// terminate it before appending.
fn replay<T: DeserializeOwned>(path: &Path) -> Result<(HashMap<String, T>, bool), PersistError> {
    let mut index = HashMap::new();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((index, false)),
        Err(e) => return Err(e.into()),
    };

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogRecord<T>>(line) {
            Ok(record) => {
                index.insert(record.key, record.value);
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping malformed log record"
                );
            }
        }
    }

    let torn_tail = !content.is_empty() && !content.ends_with('\n');
    Ok((index, torn_tail))
}
