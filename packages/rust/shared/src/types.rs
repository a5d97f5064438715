//! Core domain types for archived assets.
//!
//! Everything here is either persisted inside an asset directory
//! (`meta.json`, `run.jsonl`) or beside a batch source (the checkpoint),
//! so field names are part of the on-disk contract.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current version of the `meta.json` format.
pub const META_VERSION: &str = "2.0";

/// Current version of the batch checkpoint format.
pub const CHECKPOINT_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Persisted layout
// ---------------------------------------------------------------------------

/// Fixed names of everything that lives inside one asset directory.
pub mod layout {
    /// Primary document.
    pub const PRIMARY_DOCUMENT: &str = "article.md";
    /// Canonical subdirectory for binary assets. Always used as a literal prefix.
    pub const ASSETS_DIR: &str = "images";
    /// Persisted metadata record.
    pub const META_FILE: &str = "meta.json";
    /// Append-only run log, one JSON object per line.
    pub const RUN_LOG: &str = "run.jsonl";
    /// One file per comparison item.
    pub const COMPARISONS_DIR: &str = "comparisons";
    /// Transient fetch output, under the base directory.
    pub const STAGING_DIR: &str = ".staging";
    /// Per-asset advisory locks, under the base directory.
    pub const LOCKS_DIR: &str = ".locks";
}

// ---------------------------------------------------------------------------
// Artifact plan
// ---------------------------------------------------------------------------

/// Three-valued request mode for an optional artifact kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    On,
    Off,
    #[default]
    Auto,
}

impl std::str::FromStr for PlanMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "auto" => Ok(Self::Auto),
            other => Err(format!("invalid mode '{other}': expected on, off, or auto")),
        }
    }
}

/// Kinds of artifact an ingestion can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// The mandatory primary note.
    #[serde(rename = "md")]
    Note,
    /// Optional diagram artifact.
    #[serde(rename = "canvas")]
    Canvas,
    /// Optional tabular artifact.
    #[serde(rename = "base")]
    Base,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "md",
            Self::Canvas => "canvas",
            Self::Base => "base",
        }
    }

    pub fn is_mandatory(&self) -> bool {
        matches!(self, Self::Note)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural template family for the diagram artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagramType {
    Sequence,
    Flowchart,
    Architecture,
    Mindmap,
}

impl DiagramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Flowchart => "flowchart",
            Self::Architecture => "architecture",
            Self::Mindmap => "mindmap",
        }
    }
}

/// Structural template family for the tabular artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseMode {
    Comparison,
    Checklist,
    Glossary,
    Generic,
}

impl BaseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comparison => "comparison",
            Self::Checklist => "checklist",
            Self::Glossary => "glossary",
            Self::Generic => "generic",
        }
    }
}

/// Why a kind was (or was not) put into the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReason {
    pub kind: ArtifactKind,
    pub included: bool,
    pub detail: String,
}

/// Ordered set of artifact kinds to request for one ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPlan {
    /// Always starts with [`ArtifactKind::Note`].
    pub kinds: Vec<ArtifactKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_type: Option<DiagramType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_mode: Option<BaseMode>,
    /// Only populated for the comparison base mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comparison_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rationale: Vec<PlanReason>,
}

impl ArtifactPlan {
    /// A plan containing only the mandatory primary kind.
    pub fn primary_only() -> Self {
        Self {
            kinds: vec![ArtifactKind::Note],
            diagram_type: None,
            base_mode: None,
            comparison_items: Vec::new(),
            rationale: Vec::new(),
        }
    }

    pub fn includes(&self, kind: ArtifactKind) -> bool {
        self.kinds.contains(&kind)
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// Idempotency classification of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    FirstRun,
    ContentUnchanged,
    ContentChanged,
    Forced,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstRun => "first_run",
            Self::ContentUnchanged => "content_unchanged",
            Self::ContentChanged => "content_changed",
            Self::Forced => "forced",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Mandatory kind produced, at least one optional kind failed.
    Partial,
    Skipped,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// What a run did to its asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAction {
    Ingest,
    Update,
    Skip,
    Fail,
}

// ---------------------------------------------------------------------------
// MetaRecord
// ---------------------------------------------------------------------------

/// The `meta.json` record colocated with each asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRecord {
    #[serde(default = "default_meta_version")]
    pub meta_version: String,

    // Identity: set on the first run, never rewritten.
    pub asset_id: String,
    /// Normalized locator the `asset_id` was derived from.
    pub locator: String,
    /// Locator exactly as first supplied.
    #[serde(default, alias = "url")]
    pub source_url: String,
    pub slug: String,
    pub title: String,

    /// Vault folder the asset directory lives in.
    #[serde(default)]
    pub folder: String,
    /// Date extracted by the fetcher, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// First successful consolidation. Human-readable only, never part of the identifier.
    pub ingested_at: DateTime<Utc>,

    // Content: rewritten on each successful regeneration.
    #[serde(default, alias = "hash_content")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub hash_algorithm: String,
    /// Previous content hashes, oldest first, capped.
    #[serde(default)]
    pub content_hash_history: Vec<String>,

    // Plan: what the last generating run actually produced.
    #[serde(default)]
    pub artifact_plan: Vec<ArtifactKind>,
    #[serde(default)]
    pub diagram_type: Option<DiagramType>,
    #[serde(default)]
    pub base_mode: Option<BaseMode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comparison_items: Vec<String>,

    // Run bookkeeping.
    #[serde(default)]
    pub run_count: u64,
    pub last_run_at: DateTime<Utc>,
    pub last_run_status: RunStatus,
    pub last_run_reason: String,
    #[serde(default)]
    pub last_error: Option<String>,

    // Collaborator-contributed descriptive fields.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,

    /// Fields written by other tools; carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_meta_version() -> String {
    META_VERSION.to_string()
}

impl MetaRecord {
    /// Top-level keys owned by this struct; a flattened extra field may never shadow them.
    pub const RESERVED_KEYS: &'static [&'static str] = &[
        "meta_version",
        "asset_id",
        "locator",
        "source_url",
        "url",
        "slug",
        "title",
        "folder",
        "published_at",
        "ingested_at",
        "content_hash",
        "hash_content",
        "hash_algorithm",
        "content_hash_history",
        "artifact_plan",
        "diagram_type",
        "base_mode",
        "comparison_items",
        "run_count",
        "last_run_at",
        "last_run_status",
        "last_run_reason",
        "last_error",
        "category",
        "tags",
        "properties",
    ];

    pub fn is_reserved_key(key: &str) -> bool {
        Self::RESERVED_KEYS.contains(&key)
    }
}

/// Descriptive fields returned by a generation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    /// Any other top-level field the collaborator wants persisted.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MetaFragment {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.tags.is_empty()
            && self.properties.is_empty()
            && self.extra.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

/// One line of `run.jsonl`. Written once, never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub asset_id: String,
    pub action: RunAction,
    pub status: RunStatus,
    pub reason: String,
    pub content_hash: Option<String>,
    pub artifact_plan: Vec<ArtifactKind>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Batch checkpoint
// ---------------------------------------------------------------------------

/// Last recorded outcome for one locator in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Success,
    #[serde(alias = "error")]
    Failed,
}

/// Checkpoint entry keyed by normalized locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub status: CheckpointStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Idempotency reason on success, taxonomy reason on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted progress of a batch run, colocated with its source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    #[serde(default = "default_checkpoint_version")]
    pub version: String,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, alias = "processed_urls")]
    pub entries: BTreeMap<String, CheckpointEntry>,
}

fn default_checkpoint_version() -> String {
    CHECKPOINT_VERSION.to_string()
}

impl Default for BatchCheckpoint {
    fn default() -> Self {
        Self {
            version: default_checkpoint_version(),
            last_run: None,
            entries: BTreeMap::new(),
        }
    }
}

impl BatchCheckpoint {
    pub fn is_success(&self, normalized: &str) -> bool {
        self.entries
            .get(normalized)
            .is_some_and(|e| e.status == CheckpointStatus::Success)
    }

    pub fn count(&self, status: CheckpointStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }
}
