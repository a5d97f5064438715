//! Locating existing asset directories and serializing runs per asset.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use archivist_identity::slug_suffix;
use archivist_shared::{ArchivistError, Result, layout};

use crate::metadata::read_meta;

/// Locks older than this are assumed abandoned by a crashed run.
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(60 * 60);

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Find the directory already holding `asset_id` under `base_dir`.
///
/// Scans `<base>/<folder>/<slug>` directories whose name ends with the
/// short id suffix and returns the one whose `meta.json` names the same
/// asset id. The suffix is only 24 bits, so a match without a usable record
/// is never claimed here. Dot directories (staging, locks) are skipped.
pub fn find_asset_dir(base_dir: &Path, asset_id: &str) -> Result<Option<PathBuf>> {
    let suffix = slug_suffix(asset_id);

    for folder in subdirs(base_dir)? {
        for candidate in subdirs(&folder)? {
            let matches_suffix = candidate
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix));
            if !matches_suffix {
                continue;
            }

            match read_meta(&candidate.join(layout::META_FILE)) {
                Ok(Some(record)) if record.asset_id == asset_id => {
                    debug!(path = %candidate.display(), "found asset directory");
                    return Ok(Some(candidate));
                }
                Ok(Some(record)) => {
                    debug!(
                        path = %candidate.display(),
                        other = %record.asset_id,
                        "suffix collision with a different asset"
                    );
                }
                Ok(None) | Err(_) => {
                    debug!(path = %candidate.display(), "suffix match without a usable record");
                }
            }
        }
    }

    Ok(None)
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArchivistError::io(dir, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ArchivistError::io(dir, e))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

/// Exclusive per-asset lock file under `<base>/.locks/`.
///
/// Released when dropped.
#[derive(Debug)]
pub struct AssetLock {
    path: PathBuf,
}

impl AssetLock {
    /// Take the lock for `asset_id`, or fail with [`ArchivistError::Locked`].
    pub fn acquire(base_dir: &Path, asset_id: &str) -> Result<Self> {
        let dir = base_dir.join(layout::LOCKS_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ArchivistError::io(&dir, e))?;
        let path = dir.join(format!("{asset_id}.lock"));

        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();

                if is_stale(&path) {
                    warn!(path = %path.display(), holder = %holder, "taking over stale asset lock");
                    std::fs::remove_file(&path).map_err(|e| ArchivistError::io(&path, e))?;
                    return Self::create(&path).map_err(|e| ArchivistError::io(&path, e));
                }

                Err(ArchivistError::Locked {
                    asset_id: asset_id.to_string(),
                    holder: if holder.is_empty() {
                        "another run".into()
                    } else {
                        holder
                    },
                })
            }
            Err(e) => Err(ArchivistError::io(&path, e)),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(
            file,
            "pid {} since {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AssetLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to release asset lock: {e}");
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AFTER)
}
