//! In-memory collaborators shared by the scenario tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use archivist_artifacts::ClassifierRules;
use archivist_core::generation::FailedKind;
use archivist_core::{GenerationOutput, GenerationRequest, Generator, IngestOptions};
use archivist_fetcher::{FetchedDocument, Fetcher};
use archivist_identity::{NormalizedLocator, normalize_locator};
use archivist_shared::{
    ArchivistError, ArtifactKind, FetchFailure, FoldersConfig, MetaFragment, MetadataConfig,
    PlanMode, Result,
};

pub const FOLDER: &str = "20-阅读笔记";

pub fn temp_base(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("archivist-{tag}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn options(base: &Path) -> IngestOptions {
    IngestOptions {
        base_dir: base.to_path_buf(),
        target_folder: FOLDER.into(),
        canvas: PlanMode::Auto,
        base: PlanMode::Auto,
        metadata: MetadataConfig::default(),
        folders: FoldersConfig::default(),
        rules: ClassifierRules::default(),
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Page {
    Article {
        title: String,
        body: String,
        /// Stage one image and reference it from the document.
        image: bool,
    },
    Fail(FetchFailure),
}

pub fn article(title: &str, body: &str) -> Page {
    Page::Article {
        title: title.into(),
        body: body.into(),
        image: false,
    }
}

/// Serves canned pages keyed by normalized locator.
///
/// Queued pages are served in order; the last one keeps being served.
#[derive(Default)]
pub struct FakeFetcher {
    pages: Mutex<HashMap<NormalizedLocator, VecDeque<Page>>>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever `locator` serves.
    pub fn set(&self, locator: &str, page: Page) {
        let key = normalize_locator(locator).unwrap();
        self.pages.lock().unwrap().insert(key, VecDeque::from([page]));
    }

    /// Queue `page` after the pages already set for `locator`.
    pub fn push(&self, locator: &str, page: Page) {
        let key = normalize_locator(locator).unwrap();
        self.pages
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(page);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_page(&self, locator: &NormalizedLocator) -> Option<Page> {
        let mut pages = self.pages.lock().unwrap();
        let queue = pages.get_mut(locator)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch(&self, locator: &NormalizedLocator, staging_dir: &Path) -> Result<FetchedDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let page = self
            .next_page(locator)
            .unwrap_or_else(|| Page::Fail(FetchFailure::NotFound(locator.to_string())));

        match page {
            Page::Fail(failure) => Err(ArchivistError::Fetch(failure)),
            Page::Article { title, body, image } => {
                let mut text = format!("# {title}\n\n{body}\n");
                let asset_directory = if image {
                    let images = staging_dir.join("images");
                    std::fs::create_dir_all(&images).unwrap();
                    std::fs::write(images.join("001.png"), b"\x89PNG").unwrap();
                    text.push_str("\n![](images/001.png)\n");
                    Some(images)
                } else {
                    None
                };
                let primary = staging_dir.join("article.md");
                std::fs::write(&primary, text).unwrap();
                Ok(FetchedDocument {
                    primary_document_path: primary,
                    asset_directory,
                    title,
                    extracted_date: Some("2024-05-01".into()),
                    author: None,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub enum GenMode {
    #[default]
    Succeed,
    /// Return an error for the whole call.
    Error(String),
    /// Report these optional kinds as failed.
    FailKinds(Vec<ArtifactKind>),
}

/// Records every request and writes one marker file per requested kind.
#[derive(Default)]
pub struct CountingGenerator {
    pub mode: Mutex<GenMode>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl CountingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: GenMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        self.requests.lock().unwrap().push(request.clone());
        let mode = self.mode.lock().unwrap().clone();

        if let GenMode::Error(message) = mode {
            return Err(ArchivistError::Generation(message));
        }
        let failing = match mode {
            GenMode::FailKinds(kinds) => kinds,
            _ => Vec::new(),
        };

        let mut failed_kinds = Vec::new();
        for kind in &request.plan.kinds {
            if failing.contains(kind) {
                failed_kinds.push(FailedKind {
                    kind: *kind,
                    error: "template error".into(),
                });
                continue;
            }
            if !kind.is_mandatory() {
                let file = request.target_directory.join(format!("artifact.{}", kind.as_str()));
                std::fs::write(file, "generated").unwrap();
            }
        }

        Ok(GenerationOutput {
            fragment: MetaFragment {
                category: Some("tech".into()),
                tags: vec!["rust".into()],
                ..MetaFragment::default()
            },
            failed_kinds,
        })
    }
}
