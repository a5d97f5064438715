//! Fetch collaborator contract and the bundled HTTP article fetcher.
//!
//! A [`Fetcher`] turns a normalized locator into a primary document (plus an
//! optional directory of binary assets) inside a caller-chosen staging
//! directory. Everything after that point (placement, identity, change
//! detection) belongs to `archivist-core`.

pub mod extract;
pub mod http;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use archivist_identity::NormalizedLocator;
use archivist_shared::Result;

pub use http::HttpFetcher;

/// Success payload of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// The primary document, somewhere under the staging directory.
    pub primary_document_path: PathBuf,
    /// Directory holding binary assets referenced by the document, if any.
    pub asset_directory: Option<PathBuf>,
    pub title: String,
    /// Publication date as printed by the source, if one was found.
    pub extracted_date: Option<String>,
    pub author: Option<String>,
}

/// A fetch collaborator.
///
/// Failures are reported as `ArchivistError::Fetch` carrying a typed
/// [`FetchFailure`](archivist_shared::FetchFailure). Retries and timeouts
/// are the implementor's business; the caller treats any error as final
/// for this attempt.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch `locator`, writing all output under `staging_dir`.
    async fn fetch(&self, locator: &NormalizedLocator, staging_dir: &Path)
    -> Result<FetchedDocument>;
}
