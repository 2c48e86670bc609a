//! Crash-safe JSON files shared between CLI invocations.
//!
//! Writers replace a file by renaming a fully written sibling over it, so a
//! concurrent reader sees either the old or the new contents. Readers treat
//! a missing or torn file as empty state.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{trace, warn};

use crate::error::{PersistenceError, Result};

fn write_error(path: &Path) -> impl FnOnce(io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// Replaces the contents of `path` with `data` in one step.
///
/// Missing parent directories are created.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| PersistenceError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    // The sibling must live on the same filesystem for rename to be atomic
    let mut staged = NamedTempFile::new_in(dir).map_err(write_error(path))?;
    staged.write_all(data).map_err(write_error(path))?;
    staged.as_file().sync_all().map_err(write_error(path))?;
    staged
        .persist(path)
        .map_err(|e| write_error(path)(e.error))?;

    trace!(path = %path.display(), bytes = data.len(), "file replaced");
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it with [`atomic_write`].
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value)?;
    json.push(b'\n');
    atomic_write(path, &json)
}

/// Reads a JSON file. Returns `None` when it does not exist.
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Reads a shared state file, treating a missing or unreadable file as the
/// default value.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json_optional(path) {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable state file");
            T::default()
        }
    }
}

/// Deletes a file. Returns whether it existed.
pub fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(write_error(path)(source)),
    }
}
