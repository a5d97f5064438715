//! First-run / unchanged / changed / forced decision.

use std::path::Path;

use tracing::warn;

use archivist_shared::{DecisionReason, MetaRecord};

use crate::metadata::read_meta;

/// The previous record of an asset, if one could be read.
#[derive(Debug, Clone, Default)]
pub struct PreviousRecord {
    pub record: Option<MetaRecord>,
    /// Set when a record existed but could not be used.
    pub warning: Option<String>,
}

/// Outcome of the idempotency check for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyDecision {
    pub should_generate: bool,
    pub reason: DecisionReason,
    /// Content hash recorded by the previous successful generation.
    pub previous_hash: Option<String>,
}

/// Load the previous record at `meta_path`.
///
/// A corrupt record counts as absent, with a warning attached and logged.
pub fn load_previous(meta_path: &Path) -> PreviousRecord {
    match read_meta(meta_path) {
        Ok(record) => PreviousRecord {
            record,
            warning: None,
        },
        Err(e) => {
            let message = format!(
                "ignoring unreadable metadata at {}: {e}",
                meta_path.display()
            );
            warn!(path = %meta_path.display(), error = %e, "existing metadata is corrupt, treating as first run");
            PreviousRecord {
                record: None,
                warning: Some(message),
            }
        }
    }
}

/// Decide whether this run regenerates artifacts.
///
/// Checked in order: no record, force, hash equality.
pub fn decide(previous: Option<&MetaRecord>, content_hash: &str, force: bool) -> IdempotencyDecision {
    let Some(record) = previous else {
        return IdempotencyDecision {
            should_generate: true,
            reason: DecisionReason::FirstRun,
            previous_hash: None,
        };
    };

    let previous_hash = record.content_hash.clone();
    let reason = if force {
        DecisionReason::Forced
    } else if previous_hash.as_deref() == Some(content_hash) {
        DecisionReason::ContentUnchanged
    } else {
        DecisionReason::ContentChanged
    };

    IdempotencyDecision {
        should_generate: reason != DecisionReason::ContentUnchanged,
        reason,
        previous_hash,
    }
}
