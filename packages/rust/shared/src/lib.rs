//! Shared types, error model, and configuration for archivist.
//!
//! This crate is the foundation depended on by all other archivist crates.
//! It provides:
//! - [`ArchivistError`]: the unified error type
//! - Persisted domain types ([`MetaRecord`], [`RunLogEntry`], [`BatchCheckpoint`])
//!   and the fixed asset directory [`layout`]
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, ClassifierConfig, DefaultsConfig, FetchConfig, FoldersConfig,
    GeneratorConfig, MetadataConfig, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, validate_folder,
};
pub use error::{ArchivistError, FetchFailure, Result};
pub use types::{
    ArtifactKind, ArtifactPlan, BaseMode, BatchCheckpoint, CHECKPOINT_VERSION, CheckpointEntry,
    CheckpointStatus, DecisionReason, DiagramType, META_VERSION, MetaFragment, MetaRecord,
    PlanMode, PlanReason, RunAction, RunLogEntry, RunStatus, layout,
};
