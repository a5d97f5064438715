//! `meta.json` persistence and the per-run merge.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use archivist_identity::{AssetIdentity, ContentHash};
use archivist_shared::{
    ArchivistError, ArtifactPlan, DecisionReason, META_VERSION, MetaFragment, MetaRecord,
    MetadataConfig, Result, RunStatus,
};

use crate::atomic::write_json_atomic;

/// Read a metadata record. A missing file is `Ok(None)`.
pub fn read_meta(path: &Path) -> Result<Option<MetaRecord>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ArchivistError::io(path, e)),
    };
    let record = serde_json::from_str(&content).map_err(|e| {
        ArchivistError::validation(format!("invalid {}: {e}", path.display()))
    })?;
    Ok(Some(record))
}

/// Write a metadata record atomically.
pub fn write_meta(path: &Path, record: &MetaRecord) -> Result<()> {
    write_json_atomic(path, record)
}

/// Everything this run contributes to the record.
#[derive(Debug, Clone)]
pub struct MergeInput<'a> {
    pub identity: &'a AssetIdentity,
    /// Locator as supplied by the caller.
    pub source_url: &'a str,
    pub folder: &'a str,
    pub published_at: Option<&'a str>,
    pub content_hash: &'a ContentHash,
    pub reason: DecisionReason,
    pub status: RunStatus,
    /// Taxonomy reason when the run failed; overrides `reason` in the record.
    pub failure_reason: Option<String>,
    /// What generation actually produced. `None` when nothing was generated.
    pub produced: Option<&'a ArtifactPlan>,
    pub fragment: Option<&'a MetaFragment>,
    pub error: Option<String>,
    pub now: DateTime<Utc>,
}

/// Merge this run into the previous record.
///
/// Identity is written on the first run only. Content and plan fields move
/// only when generation produced something; the outgoing hash is then kept
/// in a bounded history. Run fields always advance.
pub fn merge(previous: Option<MetaRecord>, input: &MergeInput<'_>, config: &MetadataConfig) -> MetaRecord {
    let mut record = previous.unwrap_or_else(|| first_run_template(input, config));
    record.meta_version = META_VERSION.to_string();

    // --- Content and plan ---
    if let Some(plan) = input.produced {
        let new_hash = input.content_hash.hex.clone();
        if let Some(old) = record.content_hash.take() {
            if old != new_hash {
                record.content_hash_history.push(old);
            }
        }
        let cap = config.hash_history_cap;
        if record.content_hash_history.len() > cap {
            let excess = record.content_hash_history.len() - cap;
            record.content_hash_history.drain(..excess);
        }
        record.content_hash = Some(new_hash);
        record.hash_algorithm = input.content_hash.algorithm.clone();

        record.artifact_plan = plan.kinds.clone();
        record.diagram_type = plan.diagram_type;
        record.base_mode = plan.base_mode;
        record.comparison_items = plan.comparison_items.clone();

        if let Some(published) = input.published_at {
            record.published_at = Some(published.to_string());
        }
    }

    // --- Run ---
    record.run_count += 1;
    record.last_run_at = input.now;
    record.last_run_status = input.status;
    record.last_run_reason = input
        .failure_reason
        .clone()
        .unwrap_or_else(|| input.reason.as_str().to_string());
    record.last_error = input.error.clone();

    // --- Collaborator fields ---
    if let Some(fragment) = input.fragment {
        apply_fragment(&mut record, fragment);
    }

    debug!(
        asset_id = %record.asset_id,
        run_count = record.run_count,
        status = record.last_run_status.as_str(),
        "merged metadata"
    );
    record
}

fn first_run_template(input: &MergeInput<'_>, config: &MetadataConfig) -> MetaRecord {
    MetaRecord {
        meta_version: META_VERSION.to_string(),
        asset_id: input.identity.asset_id.clone(),
        locator: input.identity.locator.as_str().to_string(),
        source_url: input.source_url.to_string(),
        slug: input.identity.slug.clone(),
        title: input.identity.title.clone(),
        folder: input.folder.to_string(),
        published_at: input.published_at.map(str::to_string),
        ingested_at: input.now,
        content_hash: None,
        hash_algorithm: String::new(),
        content_hash_history: Vec::new(),
        artifact_plan: Vec::new(),
        diagram_type: None,
        base_mode: None,
        comparison_items: Vec::new(),
        run_count: 0,
        last_run_at: input.now,
        last_run_status: input.status,
        last_run_reason: input.reason.as_str().to_string(),
        last_error: None,
        category: Some(config.default_category.clone()),
        tags: config.default_tags.clone(),
        properties: Default::default(),
        extra: Default::default(),
    }
}

/// Collaborator values win over what is there; nothing is removed.
fn apply_fragment(record: &mut MetaRecord, fragment: &MetaFragment) {
    if let Some(category) = &fragment.category {
        record.category = Some(category.clone());
    }
    if !fragment.tags.is_empty() {
        record.tags = fragment.tags.clone();
    }
    for (key, value) in &fragment.properties {
        record.properties.insert(key.clone(), value.clone());
    }
    for (key, value) in &fragment.extra {
        if MetaRecord::is_reserved_key(key) {
            warn!(key = %key, "ignoring collaborator field that shadows a record field");
            continue;
        }
        record.extra.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_identity::{content_hash, normalize_locator};
    use archivist_shared::ArtifactKind;
    use serde_json::json;

    fn identity(title: &str) -> AssetIdentity {
        let loc = normalize_locator("https://example.com/s/abc").unwrap();
        AssetIdentity::derive(loc, title, 50)
    }

    fn input<'a>(
        identity: &'a AssetIdentity,
        hash: &'a ContentHash,
        reason: DecisionReason,
        produced: Option<&'a ArtifactPlan>,
        fragment: Option<&'a MetaFragment>,
    ) -> MergeInput<'a> {
        MergeInput {
            identity,
            source_url: "https://example.com/s/abc?chksm=1",
            folder: "20-阅读笔记",
            published_at: Some("2024-05-01"),
            content_hash: hash,
            reason,
            status: if produced.is_some() {
                RunStatus::Success
            } else {
                RunStatus::Skipped
            },
            failure_reason: None,
            produced,
            fragment,
            error: None,
            now: Utc::now(),
        }
    }

    #[test]
    fn first_run_sets_identity_and_defaults() {
        let id = identity("长篇笔记");
        let hash = content_hash("body");
        let plan = ArtifactPlan::primary_only();
        let rec = merge(
            None,
            &input(&id, &hash, DecisionReason::FirstRun, Some(&plan), None),
            &MetadataConfig::default(),
        );

        assert_eq!(rec.asset_id, id.asset_id);
        assert_eq!(rec.slug, id.slug);
        assert_eq!(rec.run_count, 1);
        assert_eq!(rec.last_run_reason, "first_run");
        assert_eq!(rec.content_hash.as_deref(), Some(hash.hex.as_str()));
        assert_eq!(rec.hash_algorithm, "sha256");
        assert_eq!(rec.category.as_deref(), Some("article"));
        assert_eq!(rec.tags, vec!["wechat", "reading"]);
        assert!(rec.content_hash_history.is_empty());
    }

    #[test]
    fn identity_never_rewritten() {
        let first = identity("First title");
        let hash = content_hash("v1");
        let plan = ArtifactPlan::primary_only();
        let cfg = MetadataConfig::default();
        let rec = merge(None, &input(&first, &hash, DecisionReason::FirstRun, Some(&plan), None), &cfg);

        let renamed = identity("Renamed upstream");
        let hash2 = content_hash("v2");
        let rec = merge(
            Some(rec),
            &input(&renamed, &hash2, DecisionReason::ContentChanged, Some(&plan), None),
            &cfg,
        );

        assert_eq!(rec.title, "First title");
        assert_eq!(rec.slug, first.slug);
        assert_eq!(rec.run_count, 2);
        assert_eq!(rec.content_hash_history, vec![hash.hex.clone()]);
    }

    #[test]
    fn unchanged_run_only_advances_run_fields() {
        let id = identity("t");
        let hash = content_hash("same");
        let mut plan = ArtifactPlan::primary_only();
        plan.kinds.push(ArtifactKind::Canvas);
        let cfg = MetadataConfig::default();
        let rec = merge(None, &input(&id, &hash, DecisionReason::FirstRun, Some(&plan), None), &cfg);

        let rec = merge(Some(rec), &input(&id, &hash, DecisionReason::ContentUnchanged, None, None), &cfg);

        assert_eq!(rec.run_count, 2);
        assert_eq!(rec.last_run_reason, "content_unchanged");
        assert_eq!(rec.last_run_status, RunStatus::Skipped);
        assert_eq!(rec.artifact_plan, vec![ArtifactKind::Note, ArtifactKind::Canvas]);
        assert!(rec.content_hash_history.is_empty());
    }

    #[test]
    fn history_is_capped() {
        let id = identity("t");
        let plan = ArtifactPlan::primary_only();
        let cfg = MetadataConfig {
            hash_history_cap: 3,
            ..MetadataConfig::default()
        };

        let mut rec = None;
        for i in 0..6 {
            let hash = content_hash(&format!("version {i}"));
            let reason = if i == 0 {
                DecisionReason::FirstRun
            } else {
                DecisionReason::ContentChanged
            };
            rec = Some(merge(rec, &input(&id, &hash, reason, Some(&plan), None), &cfg));
        }
        let rec = rec.unwrap();

        assert_eq!(rec.run_count, 6);
        assert_eq!(rec.content_hash_history.len(), 3);
        assert_eq!(rec.content_hash_history[2], content_hash("version 4").hex);
        assert_eq!(rec.content_hash.unwrap(), content_hash("version 5").hex);
    }

    #[test]
    fn fragment_overrides_defaults_without_removing() {
        let id = identity("t");
        let hash = content_hash("x");
        let plan = ArtifactPlan::primary_only();
        let cfg = MetadataConfig::default();

        let mut first = MetaFragment::default();
        first.properties.insert("difficulty".into(), json!("medium"));
        first.extra.insert("summary".into(), json!("one line"));
        let rec = merge(
            None,
            &input(&id, &hash, DecisionReason::FirstRun, Some(&plan), Some(&first)),
            &cfg,
        );

        let mut second = MetaFragment {
            category: Some("tech".into()),
            tags: vec!["rust".into()],
            ..MetaFragment::default()
        };
        second.properties.insert("reading_time".into(), json!(7));
        second.extra.insert("asset_id".into(), json!("hijacked"));
        let rec = merge(
            Some(rec),
            &input(&id, &hash, DecisionReason::Forced, Some(&plan), Some(&second)),
            &cfg,
        );

        assert_eq!(rec.category.as_deref(), Some("tech"));
        assert_eq!(rec.tags, vec!["rust"]);
        assert_eq!(rec.properties["difficulty"], "medium");
        assert_eq!(rec.properties["reading_time"], 7);
        assert_eq!(rec.extra["summary"], "one line");
        assert_eq!(rec.asset_id, id.asset_id);
        assert!(!rec.extra.contains_key("asset_id"));
        assert!(rec.content_hash_history.is_empty(), "forced run with same hash adds no history");
    }

    #[test]
    fn failed_generation_keeps_last_good_content() {
        let id = identity("t");
        let cfg = MetadataConfig::default();
        let v1 = content_hash("v1");
        let plan = ArtifactPlan::primary_only();
        let rec = merge(None, &input(&id, &v1, DecisionReason::FirstRun, Some(&plan), None), &cfg);

        let v2 = content_hash("v2");
        let mut failed = input(&id, &v2, DecisionReason::ContentChanged, None, None);
        failed.status = RunStatus::Failed;
        failed.failure_reason = Some("generation".into());
        failed.error = Some("collaborator exited".into());
        let rec = merge(Some(rec), &failed, &cfg);

        assert_eq!(rec.content_hash.as_deref(), Some(v1.hex.as_str()));
        assert_eq!(rec.last_run_status, RunStatus::Failed);
        assert_eq!(rec.last_run_reason, "generation");
        assert_eq!(rec.last_error.as_deref(), Some("collaborator exited"));
        assert_eq!(rec.run_count, 2);
    }

    #[test]
    fn read_write_roundtrip() {
        let dir = std::env::temp_dir().join(format!("archivist-meta-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("meta.json");

        assert!(read_meta(&path).unwrap().is_none());

        let id = identity("t");
        let hash = content_hash("x");
        let plan = ArtifactPlan::primary_only();
        let rec = merge(
            None,
            &input(&id, &hash, DecisionReason::FirstRun, Some(&plan), None),
            &MetadataConfig::default(),
        );
        write_meta(&path, &rec).unwrap();
        assert_eq!(read_meta(&path).unwrap(), Some(rec));

        std::fs::write(&path, "[]").unwrap();
        assert!(matches!(
            read_meta(&path).unwrap_err(),
            ArchivistError::Validation { .. }
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
