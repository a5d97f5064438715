//! Write-to-temp-then-rename helpers for persisted files.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use archivist_shared::{ArchivistError, Result};

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Replace `path` with `content` so readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp = temp_path(path);
    std::fs::write(&temp, content).map_err(|e| ArchivistError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        ArchivistError::io(path, e)
    })?;
    Ok(())
}

/// Pretty-print `data` as JSON and write it atomically.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(data).map_err(|e| {
        ArchivistError::validation(format!("JSON serialization failed: {e}"))
    })?;
    json.push('\n');
    write_atomic(path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}
