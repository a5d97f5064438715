//! Error types for the archivist workspace.
//!
//! Library crates use [`ArchivistError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Typed failure reported by a fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    /// The source document does not exist (or no longer exists).
    #[error("not found: {0}")]
    NotFound(String),

    /// The source demands a login or a human verification step.
    #[error("auth required: {0}")]
    AuthRequired(String),

    /// The source signalled that we are being throttled.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The page was fetched but its content could not be extracted.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Transport-level failure or timeout (no partial credit).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl FetchFailure {
    /// Stable short code used in run logs and checkpoints.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::AuthRequired(_) => "auth-required",
            Self::RateLimited(_) => "rate-limited",
            Self::ParseFailure(_) => "parse-failure",
            Self::Transport(_) => "transport",
        }
    }
}

/// Top-level error type for all archivist operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchivistError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed or unsupported source locator, rejected before any side effect.
    #[error("normalization error: {message}")]
    Normalization { message: String },

    /// The fetch collaborator failed.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchFailure),

    /// Consolidating fetched output into the asset directory failed.
    #[error("consolidation error: {message}")]
    Consolidation { message: String },

    /// The artifact plan could not be resolved without a known-bad fallback.
    #[error("classification error: {message}")]
    Classification { message: String },

    /// The generation collaborator failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// Network/HTTP error outside the fetch contract (client construction etc.).
    #[error("network error: {0}")]
    Network(String),

    /// Parsing a persisted or user-supplied document failed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Another run currently holds the asset.
    #[error("asset {asset_id} is locked by {holder}")]
    Locked { asset_id: String, holder: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ArchivistError>;

impl ArchivistError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a normalization error from any displayable message.
    pub fn normalization(msg: impl Into<String>) -> Self {
        Self::Normalization {
            message: msg.into(),
        }
    }

    /// Create a consolidation error from any displayable message.
    pub fn consolidation(msg: impl Into<String>) -> Self {
        Self::Consolidation {
            message: msg.into(),
        }
    }

    /// Create a classification error from any displayable message.
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable reason drawn from the error taxonomy.
    ///
    /// This is what run logs and batch checkpoints record; the `Display`
    /// output carries the human-readable detail.
    pub fn reason(&self) -> String {
        match self {
            Self::Config { .. } => "config".into(),
            Self::Normalization { .. } => "normalization".into(),
            Self::Fetch(failure) => format!("fetch:{}", failure.code()),
            Self::Consolidation { .. } => "consolidation".into(),
            Self::Classification { .. } => "classification".into(),
            Self::Generation(_) => "generation".into(),
            Self::Network(_) => "network".into(),
            Self::Parse { .. } => "parse".into(),
            Self::Locked { .. } => "locked".into(),
            Self::Io { .. } => "io".into(),
            Self::Validation { .. } => "validation".into(),
        }
    }

    /// Whether the fetch collaborator asked us to back off.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Fetch(FetchFailure::RateLimited(_)))
    }
}
