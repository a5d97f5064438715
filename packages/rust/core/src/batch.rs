//! Resumable batch ingestion over a source file of locators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use archivist_fetcher::Fetcher;
use archivist_shared::{
    AppConfig, ArchivistError, BatchCheckpoint, CheckpointEntry, CheckpointStatus, Result,
    RunAction,
};

use crate::atomic::write_json_atomic;
use crate::generation::Generator;
use crate::inbox::{SourceEntry, mark_done, parse_source};
use crate::pipeline::{IngestOptions, IngestOutcome, IngestRequest, ProgressReporter, ingest};

/// Longest error text kept in a checkpoint entry.
const CHECKPOINT_ERROR_MAX: usize = 500;

/// Settings for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub source: PathBuf,
    /// List what would be processed and stop.
    pub dry_run: bool,
    /// Regenerate, and reprocess checkpointed successes.
    pub force: bool,
    /// Delete the checkpoint before starting.
    pub reset_checkpoint: bool,
    /// Also process entries already ticked or marked archived.
    pub include_done: bool,
    /// Tick or mark entries in the source after a success.
    pub mark_done: bool,
    pub delay: Duration,
    pub rate_limit_cooldown: Duration,
    pub allowed_domains: Vec<String>,
}

impl BatchOptions {
    pub fn from_config(source: PathBuf, config: &AppConfig) -> Self {
        Self {
            source,
            dry_run: false,
            force: false,
            reset_checkpoint: false,
            include_done: false,
            mark_done: config.batch.mark_done,
            delay: Duration::from_millis(config.batch.delay_ms),
            rate_limit_cooldown: Duration::from_secs(config.batch.rate_limit_cooldown_secs),
            allowed_domains: config.fetch.allowed_domains.clone(),
        }
    }
}

/// Outcome of one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Would be processed (dry run).
    Planned,
    Ingested,
    Updated,
    Unchanged,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Ingested => "ingested",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub locator: String,
    pub label: Option<String>,
    pub status: ItemStatus,
    pub asset_dir: Option<PathBuf>,
    /// Idempotency reason on success, taxonomy reason on failure.
    pub reason: Option<String>,
    pub error: Option<String>,
}

/// Overall result of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Complete,
    Partial,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    /// Process exit code for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Partial => 2,
            Self::Failed => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Locators found in the source.
    pub found: usize,
    /// Locators selected for processing.
    pub queued: usize,
    pub succeeded: usize,
    /// Successes whose content had not changed (subset of `succeeded`).
    pub unchanged: usize,
    /// Found but not queued: done in the source or checkpointed.
    pub skipped: usize,
    pub failed: usize,
    pub items: Vec<BatchItem>,
    pub dry_run: bool,
    pub checkpoint_path: PathBuf,
    pub warnings: Vec<String>,
}

impl BatchSummary {
    pub fn status(&self) -> BatchStatus {
        if self.failed == 0 {
            BatchStatus::Complete
        } else if self.succeeded > 0 {
            BatchStatus::Partial
        } else {
            BatchStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// `.batch_checkpoint_<stem>.json` beside the source file.
pub fn checkpoint_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".into());
    source.with_file_name(format!(".batch_checkpoint_{stem}.json"))
}

/// Load a checkpoint; a missing file is an empty checkpoint.
///
/// A corrupt file is moved aside to `<name>.bak` and replaced by an empty
/// checkpoint; the returned warning says so.
pub fn load_checkpoint(path: &Path) -> Result<(BatchCheckpoint, Option<String>)> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((BatchCheckpoint::default(), None));
        }
        Err(e) => return Err(ArchivistError::io(path, e)),
    };

    match serde_json::from_str(&content) {
        Ok(checkpoint) => Ok((checkpoint, None)),
        Err(e) => {
            let backup = path.with_file_name(format!(
                "{}.bak",
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ));
            std::fs::rename(path, &backup).map_err(|err| ArchivistError::io(path, err))?;
            warn!(path = %path.display(), backup = %backup.display(), error = %e, "checkpoint is corrupt, starting fresh");
            Ok((
                BatchCheckpoint::default(),
                Some(format!(
                    "corrupt checkpoint moved to {} ({e})",
                    backup.display()
                )),
            ))
        }
    }
}

/// Write the checkpoint atomically, stamping `last_run`.
pub fn save_checkpoint(path: &Path, checkpoint: &mut BatchCheckpoint) -> Result<()> {
    checkpoint.last_run = Some(Utc::now());
    write_json_atomic(path, checkpoint)
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Process every pending locator in `options.source`, in source order.
///
/// One failing locator never aborts the batch; only source and checkpoint
/// I/O errors are returned as `Err`.
#[instrument(skip_all, fields(source = %options.source.display(), dry_run = options.dry_run))]
pub async fn run_batch(
    options: &BatchOptions,
    ingest_options: &IngestOptions,
    fetcher: &dyn Fetcher,
    generator: &dyn Generator,
    progress: &dyn ProgressReporter,
) -> Result<BatchSummary> {
    let content = std::fs::read_to_string(&options.source)
        .map_err(|e| ArchivistError::io(&options.source, e))?;
    let parsed = parse_source(&content, &options.allowed_domains);

    let cp_path = checkpoint_path(&options.source);
    let mut summary = BatchSummary {
        found: parsed.entries.len(),
        dry_run: options.dry_run,
        checkpoint_path: cp_path.clone(),
        ..BatchSummary::default()
    };
    for (line, url, error) in &parsed.rejected {
        summary
            .warnings
            .push(format!("line {}: skipped {url}: {error}", line + 1));
    }

    if options.reset_checkpoint && !options.dry_run && cp_path.exists() {
        std::fs::remove_file(&cp_path).map_err(|e| ArchivistError::io(&cp_path, e))?;
        info!(path = %cp_path.display(), "checkpoint reset");
    }
    let mut checkpoint = if options.reset_checkpoint && options.dry_run {
        BatchCheckpoint::default()
    } else {
        let (checkpoint, warning) = load_checkpoint(&cp_path)?;
        summary.warnings.extend(warning);
        checkpoint
    };

    // --- Selection ---
    let queue: Vec<&SourceEntry> = parsed
        .entries
        .iter()
        .filter(|entry| options.include_done || !entry.is_done())
        .filter(|entry| options.force || !checkpoint.is_success(entry.normalized.as_str()))
        .collect();
    summary.queued = queue.len();
    summary.skipped = summary.found - summary.queued;

    info!(
        found = summary.found,
        queued = summary.queued,
        skipped = summary.skipped,
        "batch selection"
    );

    if options.dry_run {
        summary.items = queue
            .iter()
            .map(|entry| BatchItem {
                locator: entry.normalized.to_string(),
                label: entry.label.clone(),
                status: ItemStatus::Planned,
                asset_dir: None,
                reason: None,
                error: None,
            })
            .collect();
        return Ok(summary);
    }

    // --- Processing ---
    let total = queue.len();
    for (i, entry) in queue.into_iter().enumerate() {
        let key = entry.normalized.to_string();
        progress.item_started(&key, i + 1, total);

        let request = IngestRequest {
            locator: entry.raw.clone(),
            force: options.force,
        };
        let result = ingest_with_retry(options, ingest_options, &request, fetcher, generator, progress).await;

        let succeeded = result.is_ok();
        let item = match result {
            Ok(outcome) => {
                record_success(&mut summary, &mut checkpoint, &key, &outcome);
                if options.mark_done {
                    if let Err(e) = mark_done(&options.source, entry) {
                        warn!(error = %e, "failed to mark source entry done");
                        summary.warnings.push(format!("could not mark {key} done: {e}"));
                    }
                }
                BatchItem {
                    locator: key.clone(),
                    label: entry.label.clone(),
                    status: item_status(&outcome),
                    asset_dir: Some(outcome.asset_dir),
                    reason: Some(outcome.reason.as_str().to_string()),
                    error: None,
                }
            }
            Err(e) => {
                summary.failed += 1;
                warn!(locator = %key, reason = %e.reason(), error = %e, "batch item failed");
                let error: String = e.to_string().chars().take(CHECKPOINT_ERROR_MAX).collect();
                checkpoint.entries.insert(
                    key.clone(),
                    CheckpointEntry {
                        status: CheckpointStatus::Failed,
                        timestamp: Utc::now(),
                        asset_dir: None,
                        title: entry.label.clone(),
                        reason: Some(e.reason()),
                        error: Some(error.clone()),
                    },
                );
                BatchItem {
                    locator: key.clone(),
                    label: entry.label.clone(),
                    status: ItemStatus::Failed,
                    asset_dir: None,
                    reason: Some(e.reason()),
                    error: Some(error),
                }
            }
        };

        save_checkpoint(&cp_path, &mut checkpoint)?;
        progress.item_finished(&key, succeeded, item.status.as_str());
        summary.items.push(item);

        if succeeded && i + 1 < total && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
    }

    info!(
        succeeded = summary.succeeded,
        unchanged = summary.unchanged,
        failed = summary.failed,
        status = summary.status().as_str(),
        "batch complete"
    );
    Ok(summary)
}

/// Ingest once; on a rate-limit signal, cool down and try exactly once more.
async fn ingest_with_retry(
    options: &BatchOptions,
    ingest_options: &IngestOptions,
    request: &IngestRequest,
    fetcher: &dyn Fetcher,
    generator: &dyn Generator,
    progress: &dyn ProgressReporter,
) -> Result<IngestOutcome> {
    match ingest(ingest_options, request, fetcher, generator, progress).await {
        Err(e) if e.is_rate_limited() => {
            warn!(
                locator = %request.locator,
                cooldown_secs = options.rate_limit_cooldown.as_secs(),
                "rate limited, cooling down before one retry"
            );
            progress.phase("Rate limited, cooling down");
            tokio::time::sleep(options.rate_limit_cooldown).await;
            ingest(ingest_options, request, fetcher, generator, progress).await
        }
        other => other,
    }
}

fn record_success(
    summary: &mut BatchSummary,
    checkpoint: &mut BatchCheckpoint,
    key: &str,
    outcome: &IngestOutcome,
) {
    summary.succeeded += 1;
    if outcome.action == RunAction::Skip {
        summary.unchanged += 1;
    }
    checkpoint.entries.insert(
        key.to_string(),
        CheckpointEntry {
            status: CheckpointStatus::Success,
            timestamp: Utc::now(),
            asset_dir: Some(outcome.asset_dir.display().to_string()),
            title: Some(outcome.title.clone()),
            reason: Some(outcome.reason.as_str().to_string()),
            error: None,
        },
    );
}

fn item_status(outcome: &IngestOutcome) -> ItemStatus {
    match outcome.action {
        RunAction::Ingest => ItemStatus::Ingested,
        RunAction::Update => ItemStatus::Updated,
        RunAction::Skip => ItemStatus::Unchanged,
        RunAction::Fail => ItemStatus::Failed,
    }
}
