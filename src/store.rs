//! Snapshot persistence and artifact writes.
//!
//! Every write goes to a temporary file in the destination directory and is
//! then renamed over the target, so readers never see a partial artifact.

use serde::Serialize;

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::canonical::Snapshot;
use crate::config::{TargetConfig, resolve_path};
use crate::error::{Error, Result};

/// Directory holding baselines when a target does not configure one.
pub const DEFAULT_BASELINE_DIR: &str = "abi/baselines";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes `bytes` to `path` through a temporary file and an atomic rename.
/// Missing parent directories are created.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(io_error(path))?;

    let mut file = NamedTempFile::new_in(&parent).map_err(io_error(path))?;
    file.write_all(bytes).map_err(io_error(path))?;
    file.flush().map_err(io_error(path))?;
    file.persist(path).map_err(|err| Error::Io {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

/// Pretty-prints `value` as JSON with a trailing newline and writes it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

/// Reads a snapshot file, canonicalizes it and checks its invariants.
pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let invalid = |reason: String| Error::Snapshot {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
    let mut snapshot: Snapshot =
        serde_json::from_str(&content).map_err(|err| invalid(err.to_string()))?;
    snapshot.canonicalize();
    snapshot.check_invariants().map_err(invalid)?;
    Ok(snapshot)
}

pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    write_json(path, snapshot)
}

/// Where the baseline of `name` lives.
///
/// `baseline_root/<name>.json` wins when a root is given, then the target's
/// own `baseline_path`, then the default baseline directory.
pub fn resolve_baseline_path(
    repo_root: &Path,
    name: &str,
    target: &TargetConfig,
    baseline_root: Option<&Path>,
) -> PathBuf {
    if let Some(root) = baseline_root {
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            repo_root.join(root)
        };
        return root.join(format!("{name}.json"));
    }
    match target.baseline_path.as_deref() {
        Some(path) if !path.trim().is_empty() => resolve_path(repo_root, path),
        _ => repo_root.join(DEFAULT_BASELINE_DIR).join(format!("{name}.json")),
    }
}
