//! End-to-end single-asset pipeline: locator → fetch → consolidate → decide
//! → resolve plan → generate → metadata → run log.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use archivist_artifacts::{ClassifierRules, load_rules, resolve_plan};
use archivist_fetcher::Fetcher;
use archivist_identity::{AssetIdentity, ContentHash, asset_id, content_hash, normalize_locator};
use archivist_shared::{
    AppConfig, ArchivistError, ArtifactKind, ArtifactPlan, DecisionReason, FoldersConfig,
    MetaFragment, MetaRecord, MetadataConfig, PlanMode, Result, RunAction, RunLogEntry,
    RunStatus, expand_home, layout, validate_folder,
};

use crate::assets::{AssetLock, find_asset_dir};
use crate::consolidate::consolidate;
use crate::generation::{GenerationRequest, Generator};
use crate::idempotency::{decide, load_previous};
use crate::metadata::{MergeInput, merge, read_meta, write_meta};
use crate::runlog::append_run_log;

/// Settings shared by every ingestion against one knowledge base.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Knowledge-base root. Every path is resolved against it.
    pub base_dir: PathBuf,
    /// Folder for assets that do not exist yet.
    pub target_folder: String,
    pub canvas: PlanMode,
    pub base: PlanMode,
    pub metadata: MetadataConfig,
    pub folders: FoldersConfig,
    pub rules: ClassifierRules,
}

impl IngestOptions {
    /// Build options from the loaded configuration file.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let rules_path = config
            .classifier
            .rules_path
            .as_deref()
            .map(expand_home)
            .transpose()?;
        Ok(Self {
            base_dir: expand_home(&config.defaults.base_dir)?,
            target_folder: config.defaults.target_folder.clone(),
            canvas: config.defaults.canvas,
            base: config.defaults.base,
            metadata: config.metadata.clone(),
            folders: config.folders.clone(),
            rules: load_rules(rules_path.as_deref())?,
        })
    }
}

/// One ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Locator as supplied by the user.
    pub locator: String,
    /// Regenerate even when the content is unchanged.
    pub force: bool,
}

/// Result of a completed ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub asset_id: String,
    pub slug: String,
    pub title: String,
    pub asset_dir: PathBuf,
    pub action: RunAction,
    pub status: RunStatus,
    pub reason: DecisionReason,
    pub content_hash: String,
    /// Plan that was requested from the generator; `None` when skipped.
    pub plan: Option<ArtifactPlan>,
    pub run_count: u64,
    /// Whether the generation collaborator was called.
    pub generated: bool,
    /// Non-fatal conditions surfaced during the run.
    pub warnings: Vec<String>,
    /// Set when the run log could not be appended.
    pub log_error: Option<String>,
    pub duration: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a batch item starts.
    fn item_started(&self, locator: &str, current: usize, total: usize);
    /// Called when a batch item ends.
    fn item_finished(&self, locator: &str, ok: bool, detail: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_started(&self, _locator: &str, _current: usize, _total: usize) {}
    fn item_finished(&self, _locator: &str, _ok: bool, _detail: &str) {}
}

/// Run the full pipeline for one locator.
///
/// 1. Normalize the locator and lock the asset
/// 2. Fetch into `<base>/.staging/<asset_id>`
/// 3. Consolidate into the asset directory (existing one reused)
/// 4. Hash and decide; unchanged content stops here
/// 5. Resolve the plan and call the generator
/// 6. Merge and write `meta.json`, append `run.jsonl`
///
/// Fetch and consolidation errors leave no new asset directory behind.
/// Any error after consolidation keeps the directory and primary document,
/// records the failure in `meta.json` and the run log, and is then returned.
#[instrument(skip_all, fields(locator = %request.locator, force = request.force))]
pub async fn ingest(
    options: &IngestOptions,
    request: &IngestRequest,
    fetcher: &dyn Fetcher,
    generator: &dyn Generator,
    progress: &dyn ProgressReporter,
) -> Result<IngestOutcome> {
    let start = Instant::now();
    let run_id = Uuid::now_v7();

    // --- Phase 1: Identity and lock ---
    let locator = normalize_locator(&request.locator)?;
    validate_folder(&options.folders, &options.target_folder)?;
    let id = asset_id(&locator);
    let _lock = AssetLock::acquire(&options.base_dir, &id)?;
    let existing = find_asset_dir(&options.base_dir, &id)?;

    info!(asset_id = %id, %locator, existing = existing.is_some(), "starting ingestion");

    // --- Phase 2: Fetch ---
    progress.phase("Fetching");
    let staging_root = options.base_dir.join(layout::STAGING_DIR);
    let staging = staging_root.join(&id);
    if staging.exists() {
        debug!(path = %staging.display(), "clearing leftover staging directory");
        std::fs::remove_dir_all(&staging).map_err(|e| ArchivistError::io(&staging, e))?;
    }
    std::fs::create_dir_all(&staging).map_err(|e| ArchivistError::io(&staging, e))?;

    let fetched = match fetcher.fetch(&locator, &staging).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!(fetcher = fetcher.name(), error = %e, "fetch failed");
            clean_staging(&staging_root, &staging);
            if let Some(dir) = &existing {
                log_early_failure(dir, run_id, &id, &e, start);
            }
            return Err(e);
        }
    };

    // --- Phase 3: Consolidate ---
    progress.phase("Consolidating");
    let mut identity = AssetIdentity::derive(locator, &fetched.title, options.metadata.title_max_len);
    let asset_dir = match &existing {
        Some(dir) => {
            if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                identity.slug = name.to_string();
            }
            dir.clone()
        }
        None => options
            .base_dir
            .join(&options.target_folder)
            .join(&identity.slug),
    };
    let folder = asset_dir
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| options.target_folder.clone());

    if existing.is_none() && asset_dir.exists() {
        if let Err(e) = claim_slug_dir(&asset_dir, &identity.asset_id) {
            clean_staging(&staging_root, &staging);
            return Err(e);
        }
    }

    let consolidated = consolidate(
        &fetched.primary_document_path,
        fetched.asset_directory.as_deref(),
        &asset_dir,
    );
    clean_staging(&staging_root, &staging);
    let report = match consolidated {
        Ok(report) => report,
        Err(e) => {
            if let Some(dir) = &existing {
                log_early_failure(dir, run_id, &id, &e, start);
            }
            return Err(e);
        }
    };

    // --- Phase 4: Idempotency ---
    let text = match std::fs::read_to_string(&report.primary_document) {
        Ok(text) => text,
        Err(e) => {
            let e = ArchivistError::io(&report.primary_document, e);
            log_early_failure(&asset_dir, run_id, &id, &e, start);
            return Err(e);
        }
    };
    let hash = content_hash(&text);
    let meta_path = asset_dir.join(layout::META_FILE);
    let previous = load_previous(&meta_path);
    let decision = decide(previous.record.as_ref(), hash.as_str(), request.force);

    let mut run = Run {
        options,
        identity: &identity,
        source_url: &request.locator,
        folder: &folder,
        published_at: fetched.extracted_date.as_deref(),
        asset_dir: &asset_dir,
        hash: &hash,
        run_id,
        start,
        warnings: previous.warning.into_iter().collect(),
    };

    info!(
        asset_id = %identity.asset_id,
        reason = decision.reason.as_str(),
        "idempotency decision"
    );

    if !decision.should_generate {
        let record = match run.write_record(
            previous.record.clone(),
            decision.reason,
            RunStatus::Skipped,
            None,
            None,
            None,
        ) {
            Ok(record) => record,
            Err(e) => return Err(run.fail(previous.record, decision.reason, None, e)),
        };
        let log_error = run.log(RunAction::Skip, RunStatus::Skipped, decision.reason.as_str(), &[], None);
        return Ok(run.outcome(record, RunAction::Skip, decision.reason, None, false, log_error));
    }

    // --- Phase 5: Plan ---
    progress.phase("Resolving artifact plan");
    let plan = match resolve_plan(&text, options.canvas, options.base, &options.rules) {
        Ok(plan) => plan,
        Err(e) => return Err(run.fail(previous.record, decision.reason, None, e)),
    };
    let kinds: Vec<&str> = plan.kinds.iter().map(ArtifactKind::as_str).collect();
    info!(plan = ?kinds, "resolved artifact plan");

    let comparison_dir = asset_dir.join(layout::COMPARISONS_DIR);
    if !plan.comparison_items.is_empty() {
        if let Err(e) = std::fs::create_dir_all(&comparison_dir) {
            let e = ArchivistError::io(&comparison_dir, e);
            return Err(run.fail(previous.record, decision.reason, Some(&plan), e));
        }
    }

    // --- Phase 6: Generate ---
    progress.phase("Generating artifacts");
    let gen_request = GenerationRequest {
        asset_id: identity.asset_id.clone(),
        title: identity.title.clone(),
        primary_document_path: report.primary_document.clone(),
        target_directory: asset_dir.clone(),
        comparison_directory: comparison_dir,
        plan: plan.clone(),
    };
    let output = match generator.generate(&gen_request).await {
        Ok(output) if output.mandatory_failed() => {
            let detail: Vec<String> = output
                .failed_kinds
                .iter()
                .map(|f| format!("{}: {}", f.kind, f.error))
                .collect();
            let e = ArchivistError::Generation(format!(
                "mandatory artifact failed ({})",
                detail.join("; ")
            ));
            return Err(run.fail(previous.record, decision.reason, Some(&plan), e));
        }
        Ok(output) => output,
        Err(e) => return Err(run.fail(previous.record, decision.reason, Some(&plan), e)),
    };

    let produced = output.produced_plan(&plan);
    let status = if output.failed_kinds.is_empty() {
        RunStatus::Success
    } else {
        for failed in &output.failed_kinds {
            warn!(kind = %failed.kind, error = %failed.error, "optional artifact failed");
            run.warnings
                .push(format!("{} artifact failed: {}", failed.kind, failed.error));
        }
        RunStatus::Partial
    };

    // --- Phase 7: Record ---
    let record = match run.write_record(
        previous.record.clone(),
        decision.reason,
        status,
        None,
        Some(&produced),
        Some(&output.fragment),
    ) {
        Ok(record) => record,
        Err(e) => return Err(run.fail(previous.record, decision.reason, Some(&plan), e)),
    };
    let action = action_for(decision.reason);
    let log_error = run.log(action, status, decision.reason.as_str(), &plan.kinds, None);

    let outcome = run.outcome(record, action, decision.reason, Some(plan), true, log_error);
    info!(
        asset_id = %outcome.asset_id,
        status = outcome.status.as_str(),
        run_count = outcome.run_count,
        elapsed_ms = outcome.duration.as_millis(),
        "ingestion complete"
    );
    Ok(outcome)
}

/// Run-log action for a successful run with this decision.
pub fn action_for(reason: DecisionReason) -> RunAction {
    match reason {
        DecisionReason::FirstRun => RunAction::Ingest,
        DecisionReason::ContentChanged | DecisionReason::Forced => RunAction::Update,
        DecisionReason::ContentUnchanged => RunAction::Skip,
    }
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

struct Run<'a> {
    options: &'a IngestOptions,
    identity: &'a AssetIdentity,
    source_url: &'a str,
    folder: &'a str,
    published_at: Option<&'a str>,
    asset_dir: &'a Path,
    hash: &'a ContentHash,
    run_id: Uuid,
    start: Instant,
    warnings: Vec<String>,
}

impl Run<'_> {
    fn write_record(
        &self,
        previous: Option<MetaRecord>,
        reason: DecisionReason,
        status: RunStatus,
        failure: Option<&ArchivistError>,
        produced: Option<&ArtifactPlan>,
        fragment: Option<&MetaFragment>,
    ) -> Result<MetaRecord> {
        let input = MergeInput {
            identity: self.identity,
            source_url: self.source_url,
            folder: self.folder,
            published_at: self.published_at,
            content_hash: self.hash,
            reason,
            status,
            failure_reason: failure.map(ArchivistError::reason),
            produced,
            fragment,
            error: failure.map(ToString::to_string),
            now: Utc::now(),
        };
        let record = merge(previous, &input, &self.options.metadata);
        write_meta(&self.asset_dir.join(layout::META_FILE), &record)?;
        Ok(record)
    }

    /// Append to the run log; a failure is returned as text, never raised.
    fn log(
        &self,
        action: RunAction,
        status: RunStatus,
        reason: &str,
        kinds: &[ArtifactKind],
        error: Option<String>,
    ) -> Option<String> {
        let entry = RunLogEntry {
            timestamp: Utc::now(),
            run_id: self.run_id,
            asset_id: self.identity.asset_id.clone(),
            action,
            status,
            reason: reason.to_string(),
            content_hash: Some(self.hash.hex.clone()),
            artifact_plan: kinds.to_vec(),
            duration_ms: elapsed_ms(self.start),
            error,
        };
        match append_run_log(self.asset_dir, &entry) {
            Ok(()) => None,
            Err(e) => {
                warn!(asset_dir = %self.asset_dir.display(), error = %e, "failed to append run log");
                Some(e.to_string())
            }
        }
    }

    /// Record a post-consolidation failure and hand the error back.
    fn fail(
        &self,
        previous: Option<MetaRecord>,
        reason: DecisionReason,
        plan: Option<&ArtifactPlan>,
        err: ArchivistError,
    ) -> ArchivistError {
        warn!(asset_id = %self.identity.asset_id, error = %err, "ingestion failed after consolidation");
        if let Err(e) = self.write_record(previous, reason, RunStatus::Failed, Some(&err), None, None) {
            warn!(error = %e, "failed to record failure in metadata");
        }
        let kinds = plan.map(|p| p.kinds.as_slice()).unwrap_or_default();
        self.log(
            RunAction::Fail,
            RunStatus::Failed,
            &err.reason(),
            kinds,
            Some(err.to_string()),
        );
        err
    }

    fn outcome(
        self,
        record: MetaRecord,
        action: RunAction,
        reason: DecisionReason,
        plan: Option<ArtifactPlan>,
        generated: bool,
        log_error: Option<String>,
    ) -> IngestOutcome {
        IngestOutcome {
            asset_id: record.asset_id,
            slug: record.slug,
            title: record.title,
            asset_dir: self.asset_dir.to_path_buf(),
            action,
            status: record.last_run_status,
            reason,
            content_hash: self.hash.hex.clone(),
            plan,
            run_count: record.run_count,
            generated,
            warnings: self.warnings,
            log_error,
            duration: self.start.elapsed(),
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Log a failure that happened before this run had an identity of its own.
fn log_early_failure(dir: &Path, run_id: Uuid, asset_id: &str, err: &ArchivistError, start: Instant) {
    let entry = RunLogEntry {
        timestamp: Utc::now(),
        run_id,
        asset_id: asset_id.to_string(),
        action: RunAction::Fail,
        status: RunStatus::Failed,
        reason: err.reason(),
        content_hash: None,
        artifact_plan: Vec::new(),
        duration_ms: elapsed_ms(start),
        error: Some(err.to_string()),
    };
    if let Err(e) = append_run_log(dir, &entry) {
        warn!(dir = %dir.display(), error = %e, "failed to append run log");
    }
}

/// Check that a directory already sitting at this run's slug may be reused.
///
/// A record naming another asset means a short-suffix collision; the
/// directory is left untouched.
fn claim_slug_dir(dir: &Path, asset_id: &str) -> Result<()> {
    match read_meta(&dir.join(layout::META_FILE)) {
        Ok(Some(record)) if record.asset_id != asset_id => Err(ArchivistError::consolidation(format!(
            "{} already holds asset {}",
            dir.display(),
            record.asset_id
        ))),
        Ok(Some(_)) => Ok(()),
        Ok(None) | Err(_) => {
            warn!(path = %dir.display(), "reusing directory at this slug without a matching record");
            Ok(())
        }
    }
}

fn clean_staging(root: &Path, staging: &Path) {
    if staging.exists() {
        if let Err(e) = std::fs::remove_dir_all(staging) {
            warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
        }
    }
    let empty = std::fs::read_dir(root).is_ok_and(|mut entries| entries.next().is_none());
    if empty {
        if let Err(e) = std::fs::remove_dir(root) {
            warn!(path = %root.display(), error = %e, "failed to remove staging root");
        }
    }
}
