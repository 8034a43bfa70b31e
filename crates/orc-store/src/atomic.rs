//! Atomic file mutation primitives.
//!
//! Every write to a postbox, task log, execution trace, or ledger file goes
//! through [`write_atomic`]: the new content lands in a sibling temp file
//! first, then an `fs::rename` swaps it into place. On any POSIX filesystem
//! a rename onto an existing path is atomic, so readers never observe a
//! partially-written file. Callers are expected to serialize writes to the
//! same path themselves (see `PathMutex`); this module does not lock.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

type LockTable = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

fn lock_table() -> &'static LockTable {
    static TABLE: OnceLock<LockTable> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A process-local mutex keyed by canonicalized-ish path, so every reader
/// and writer touching the same postbox or log file serializes through the
/// same lock. Does not protect against other processes; cross-process
/// locking is out of scope.
pub struct PathLock {
    inner: Arc<Mutex<()>>,
}

impl PathLock {
    pub fn for_path(path: &Path) -> Self {
        let mut table = lock_table().lock().expect("lock table poisoned");
        let inner = table
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PathLock { inner }
    }

    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().expect("path lock poisoned")
    }
}

/// Write `contents` to `path` atomically, creating parent directories as
/// needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let tmp_path = sibling_tmp_path(path);
    if let Err(e) = fs::write(&tmp_path, contents) {
        warn!(path = %tmp_path.display(), error = %e, "failed to write temp file");
        return Err(e).with_context(|| format!("failed to write temp file {}", tmp_path.display()));
    }
    if let Err(e) = fs::rename(&tmp_path, path) {
        warn!(
            tmp_path = %tmp_path.display(),
            path = %path.display(),
            error = %e,
            "failed to rename temp file into place"
        );
        return Err(e).with_context(|| {
            format!(
                "failed to rename {} into place at {}",
                tmp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    let pid = std::process::id();
    let tmp_name = format!(".{file_name}.{pid}.tmp");
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => std::path::PathBuf::from(tmp_name),
    }
}

/// Read a JSON document from `path`, returning `default` if the file does
/// not exist yet.
pub fn read_json_or_default<T>(path: &Path, default: T) -> Result<T>
where
    T: DeserializeOwned,
{
    if !path.exists() {
        return Ok(default);
    }
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse JSON from {}", path.display()))?;
    Ok(value)
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let rendered = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize JSON for {}", path.display()))?;
    write_atomic(path, &rendered)
}

/// Read the JSON array at `path` (or an empty vec if absent), append
/// `item`, and write the result back atomically. The read and write are
/// serialized against concurrent callers on the same path.
pub fn append_json_array<T>(path: &Path, item: T) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    modify_json_array(path, |items| items.push(item))
}

/// Read-modify-write a JSON array at `path` under the path's lock, so the
/// whole cycle is atomic with respect to other same-process callers.
pub fn modify_json_array<T>(path: &Path, f: impl FnOnce(&mut Vec<T>)) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let lock = PathLock::for_path(path);
    let _guard = lock.acquire();
    let mut items: Vec<T> = read_json_or_default(path, Vec::new())?;
    f(&mut items);
    write_json_atomic(path, &items)
}

/// Read the JSON array at `path`, or an empty vec if it does not exist.
pub fn read_json_array<T>(path: &Path) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    read_json_or_default(path, Vec::new())
}
