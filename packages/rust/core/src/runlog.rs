//! Append-only `run.jsonl` audit trail.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use archivist_shared::{ArchivistError, Result, RunLogEntry, layout};

/// Append one entry to `<asset_dir>/run.jsonl`, creating it on first write.
///
/// Existing lines are never read, truncated or rewritten.
pub fn append_run_log(asset_dir: &Path, entry: &RunLogEntry) -> Result<()> {
    let path = asset_dir.join(layout::RUN_LOG);
    let mut line = serde_json::to_string(entry)
        .map_err(|e| ArchivistError::validation(format!("run log serialization failed: {e}")))?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| ArchivistError::io(&path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| ArchivistError::io(&path, e))?;

    debug!(
        asset_id = %entry.asset_id,
        status = entry.status.as_str(),
        reason = %entry.reason,
        "appended run log entry"
    );
    Ok(())
}

/// Read every entry of an asset's run log. Missing log means no entries.
pub fn read_run_log(asset_dir: &Path) -> Result<Vec<RunLogEntry>> {
    let path = asset_dir.join(layout::RUN_LOG);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArchivistError::io(&path, e)),
    };

    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                ArchivistError::parse(format!("{} line {}: {e}", path.display(), i + 1))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_shared::{ArtifactKind, RunAction, RunStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(status: RunStatus, reason: &str) -> RunLogEntry {
        RunLogEntry {
            timestamp: Utc::now(),
            run_id: Uuid::now_v7(),
            asset_id: "abc".into(),
            action: RunAction::Ingest,
            status,
            reason: reason.into(),
            content_hash: Some("ff".into()),
            artifact_plan: vec![ArtifactKind::Note],
            duration_ms: 12,
            error: None,
        }
    }

    #[test]
    fn appends_without_touching_prior_lines() {
        let dir = std::env::temp_dir().join(format!("archivist-runlog-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut snapshots = Vec::new();
        for i in 0..4 {
            let status = if i == 2 { RunStatus::Failed } else { RunStatus::Success };
            append_run_log(&dir, &entry(status, "first_run")).unwrap();
            let content = std::fs::read_to_string(dir.join("run.jsonl")).unwrap();
            snapshots.push(content.lines().map(str::to_string).collect::<Vec<_>>());
        }

        let last = snapshots.last().unwrap();
        assert_eq!(last.len(), 4);
        for (n, snap) in snapshots.iter().enumerate() {
            assert_eq!(&last[..=n], &snap[..], "line {n} changed after later appends");
        }

        let entries = read_run_log(&dir).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].status, RunStatus::Failed);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn error_field_serializes_as_null() {
        let line = serde_json::to_string(&entry(RunStatus::Success, "first_run")).unwrap();
        assert!(line.contains("\"error\":null"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = std::env::temp_dir()
            .join(format!("archivist-runlog-missing-{}", Uuid::now_v7()))
            .join("nope");
        let err = append_run_log(&dir, &entry(RunStatus::Success, "x")).unwrap_err();
        assert!(matches!(err, ArchivistError::Io { .. }));
    }
}
