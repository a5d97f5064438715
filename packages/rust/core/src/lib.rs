//! Core pipeline orchestration and domain logic for archivist.
//!
//! This crate ties together fetching, consolidation, change detection,
//! artifact planning and generation into end-to-end workflows
//! ([`ingest`] for one locator, [`run_batch`] for a source file).

mod atomic;

pub mod assets;
pub mod batch;
pub mod consolidate;
pub mod generation;
pub mod idempotency;
pub mod inbox;
pub mod metadata;
pub mod pipeline;
pub mod runlog;

pub use assets::{AssetLock, find_asset_dir};
pub use batch::{BatchItem, BatchOptions, BatchStatus, BatchSummary, ItemStatus, run_batch};
pub use consolidate::{ConsolidationReport, consolidate};
pub use generation::{
    BridgeGenerator, GenerationOutput, GenerationRequest, Generator, NoopGenerator,
    generator_from_config,
};
pub use idempotency::{IdempotencyDecision, decide, load_previous};
pub use metadata::{merge, read_meta, write_meta};
pub use pipeline::{
    IngestOptions, IngestOutcome, IngestRequest, ProgressReporter, SilentProgress, ingest,
};
pub use runlog::{append_run_log, read_run_log};
