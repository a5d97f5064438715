//! Consolidation of staged fetch output into one asset directory.
//!
//! The fetcher leaves a primary document and an optional asset directory in
//! a staging location. Consolidation moves both under the asset directory
//! (`article.md` and `images/`), rewrites references that pointed into the
//! staged asset directory, and removes the staging leftovers.
//!
//! Rewritten references always use the literal [`layout::ASSETS_DIR`]
//! prefix plus the path relative to the staged asset directory. The staged
//! directory's own name is never consulted, so a staged directory that is
//! itself called `images` cannot produce `images/images/...`.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, info, instrument, warn};

use archivist_shared::{ArchivistError, Result, layout};

use crate::atomic::write_atomic;

/// Markdown link/image destination: `](dest)`, `](<dest>)`, `](dest "title")`.
static MD_DEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\]\(\s*)(<[^>\n]+>|[^)\s]+)"#).expect("markdown destination regex")
});

/// Inline HTML `src=` attribute.
static HTML_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\bsrc\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).expect("html src regex")
});

/// What a consolidation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub asset_dir: PathBuf,
    /// Final location of the primary document.
    pub primary_document: PathBuf,
    /// Binary assets moved into the canonical subdirectory.
    pub assets_moved: usize,
    pub references_rewritten: usize,
}

/// Consolidate staged output into `target_dir`.
///
/// Fails before touching `target_dir` when the staged primary document is
/// missing. Creating an existing `target_dir` is not an error.
#[instrument(skip_all, fields(target = %target_dir.display()))]
pub fn consolidate(
    staged_document: &Path,
    staged_assets: Option<&Path>,
    target_dir: &Path,
) -> Result<ConsolidationReport> {
    if !staged_document.is_file() {
        return Err(ArchivistError::consolidation(format!(
            "primary document missing: {}",
            staged_document.display()
        )));
    }
    let text = std::fs::read_to_string(staged_document)
        .map_err(|e| ArchivistError::io(staged_document, e))?;

    std::fs::create_dir_all(target_dir).map_err(|e| ArchivistError::io(target_dir, e))?;

    let primary = target_dir.join(layout::PRIMARY_DOCUMENT);
    let canonical_assets = target_dir.join(layout::ASSETS_DIR);

    // --- Binary assets ---
    let mut assets_moved = 0;
    let staged_assets = staged_assets.filter(|dir| dir.is_dir());
    if let Some(dir) = staged_assets {
        let files = list_files(dir)?;
        if files.is_empty() {
            debug!(dir = %dir.display(), "removing empty asset directory");
            remove_dir_quietly(dir);
        } else if !same_location(dir, &canonical_assets) {
            for rel in &files {
                move_file(&dir.join(rel), &canonical_assets.join(rel))?;
                assets_moved += 1;
            }
            remove_dir_quietly(dir);
        }
    }

    // --- References ---
    let doc_dir = staged_document.parent().unwrap_or_else(|| Path::new(""));
    let (rewritten, references_rewritten) = match staged_assets {
        Some(dir) => rewrite_references(&text, doc_dir, dir),
        None => (text, 0),
    };

    // --- Primary document ---
    write_atomic(&primary, rewritten.as_bytes())?;
    if !same_location(staged_document, &primary) {
        if let Err(e) = std::fs::remove_file(staged_document) {
            warn!(path = %staged_document.display(), error = %e, "failed to remove staged document");
        }
    }

    // --- Staging leftovers ---
    if !same_location(doc_dir, target_dir) {
        remove_if_empty(doc_dir);
    }
    if canonical_assets.is_dir() && list_files(&canonical_assets)?.is_empty() {
        remove_dir_quietly(&canonical_assets);
    }

    info!(
        assets = assets_moved,
        references = references_rewritten,
        "consolidated asset directory"
    );

    Ok(ConsolidationReport {
        asset_dir: target_dir.to_path_buf(),
        primary_document: primary,
        assets_moved,
        references_rewritten,
    })
}

/// Rewrite every reference that resolves inside `staged_assets` to
/// `images/<path relative to staged_assets>`.
///
/// Returns the new text and the number of references changed.
pub fn rewrite_references(text: &str, doc_dir: &Path, staged_assets: &Path) -> (String, usize) {
    let assets_root = lexical_normalize(staged_assets);
    let mut count = 0usize;

    let mut rewrite = |reference: &str| -> Option<String> {
        let new = canonical_reference(reference, doc_dir, &assets_root)?;
        (new != reference).then(|| {
            count += 1;
            new
        })
    };

    let text = MD_DEST_RE
        .replace_all(text, |caps: &Captures| {
            let raw = &caps[2];
            let (inner, bracketed) = match raw.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
                Some(inner) => (inner, true),
                None => (raw, false),
            };
            match rewrite(inner) {
                Some(new) if bracketed => format!("{}<{new}>", &caps[1]),
                Some(new) => format!("{}{new}", &caps[1]),
                None => caps[0].to_string(),
            }
        })
        .into_owned();

    let text = HTML_SRC_RE
        .replace_all(&text, |caps: &Captures| {
            let (value, quote) = match (caps.get(2), caps.get(3)) {
                (Some(m), _) => (m.as_str(), '"'),
                (None, Some(m)) => (m.as_str(), '\''),
                (None, None) => return caps[0].to_string(),
            };
            match rewrite(value) {
                Some(new) => format!("{}{quote}{new}{quote}", &caps[1]),
                None => caps[0].to_string(),
            }
        })
        .into_owned();

    (text, count)
}

fn canonical_reference(reference: &str, doc_dir: &Path, assets_root: &Path) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.contains("://") || reference.starts_with("data:") {
        return None;
    }
    let (path_part, suffix) = match reference.find(|c| c == '?' || c == '#') {
        Some(i) => reference.split_at(i),
        None => (reference, ""),
    };

    let candidate = Path::new(path_part);
    let resolved = if candidate.is_absolute() {
        lexical_normalize(candidate)
    } else {
        lexical_normalize(&doc_dir.join(candidate))
    };

    let rel = resolved.strip_prefix(assets_root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    let rel: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("{}/{}{suffix}", layout::ASSETS_DIR, rel.join("/")))
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => lexical_normalize(a) == lexical_normalize(b),
    }
}

/// Files under `dir`, as paths relative to it, sorted.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| ArchivistError::io(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ArchivistError::io(&current, e))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(dir) {
                out.push(rel.to_path_buf());
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ArchivistError::io(parent, e))?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| ArchivistError::io(to, e))?;
    std::fs::remove_file(from).map_err(|e| ArchivistError::io(from, e))?;
    Ok(())
}

fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "failed to remove transient directory");
    }
}

fn remove_if_empty(dir: &Path) {
    let empty = std::fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty {
        let _ = std::fs::remove_dir(dir);
    }
}
