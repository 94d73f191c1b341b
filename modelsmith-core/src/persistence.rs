//! Crash-safe JSON documents for run reports.
//!
//! A report is either fully written or absent: the bytes go to a hidden
//! `.partial` sibling that is synced and renamed over the target.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    path.with_file_name(format!(".{name}.{}.partial", std::process::id()))
}

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
///
/// Parent directories are created as needed.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(path);
    let written = File::create(&partial).and_then(|mut file| {
        file.write_all(&json)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&partial, path)) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    tracing::debug!(path = %path.display(), bytes = json.len(), "report written");
    Ok(())
}

/// Read a JSON document written by [`atomic_write_json`].
///
/// A missing file is `ErrorKind::NotFound`; malformed content is
/// `ErrorKind::InvalidData` naming the file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {e}", path.display()),
        )
    })
}
