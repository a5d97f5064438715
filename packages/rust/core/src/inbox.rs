//! Batch source parsing and in-place "done" marking.
//!
//! A source is a plain text or Markdown file listing locators as bare URLs,
//! `[label](url)` links, or checklist lines (`- [ ] url`, `- [x] url`).

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use archivist_identity::{NormalizedLocator, normalize_locator};
use archivist_shared::{ArchivistError, Result};

use crate::atomic::write_atomic;

/// Marker placed right after a URL once it is archived.
pub const ARCHIVED_MARKER: &str = "(已归档)";

const ARCHIVED_MARKERS: &[&str] = &[ARCHIVED_MARKER, "(archived)"];

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s)\]"'<>]+"#).expect("url regex"));

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]*)\]\((https?://[^)\s]+)\)").expect("markdown link regex")
});

static TASK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*[-*]\s*\[)([ xX])(\]\s*)(.*?)$").expect("checklist regex")
});

/// How an entry appears in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFormat {
    PlainUrl,
    MarkdownLink,
    TaskPending,
    TaskDone,
}

/// One locator found in a batch source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// The URL exactly as written.
    pub raw: String,
    pub normalized: NormalizedLocator,
    /// Zero-based line index.
    pub line: usize,
    pub format: EntryFormat,
    /// Link label, when written as `[label](url)`.
    pub label: Option<String>,
    /// An archived marker follows this entry's URL.
    pub archived: bool,
}

impl SourceEntry {
    /// Already ticked or marked archived in the source.
    pub fn is_done(&self) -> bool {
        self.format == EntryFormat::TaskDone || self.archived
    }
}

/// Every locator found in a source, in source order, first occurrence kept.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub entries: Vec<SourceEntry>,
    /// URLs on the allow-list that failed normalization: (line, url, error).
    pub rejected: Vec<(usize, String, String)>,
}

/// Extract locators from `content`.
///
/// Only hosts equal to, or subdomains of, an entry in `allowed_domains` are
/// kept; an empty allow-list accepts every host.
pub fn parse_source(content: &str, allowed_domains: &[String]) -> ParsedSource {
    let mut parsed = ParsedSource::default();
    let mut seen = std::collections::HashSet::new();

    for (line_idx, line) in content.split('\n').enumerate() {
        let task = TASK_RE.captures(line.trim_end_matches('\r'));
        let base_format = match &task {
            Some(caps) if caps[2].eq_ignore_ascii_case("x") => EntryFormat::TaskDone,
            Some(_) => EntryFormat::TaskPending,
            None => EntryFormat::PlainUrl,
        };

        for Occurrence { raw, label, end } in occurrences(line) {
            let archived = marked_at(line, end);
            if !host_allowed(&raw, allowed_domains) {
                continue;
            }
            let normalized = match normalize_locator(&raw) {
                Ok(n) => n,
                Err(e) => {
                    warn!(line = line_idx + 1, url = %raw, error = %e, "skipping malformed locator");
                    parsed.rejected.push((line_idx, raw, e.to_string()));
                    continue;
                }
            };
            if !seen.insert(normalized.clone()) {
                debug!(line = line_idx + 1, %normalized, "duplicate locator");
                continue;
            }
            let format = match (base_format, &label) {
                (EntryFormat::PlainUrl, Some(_)) => EntryFormat::MarkdownLink,
                (format, _) => format,
            };
            parsed.entries.push(SourceEntry {
                raw,
                normalized,
                line: line_idx,
                format,
                label: label.filter(|l| !l.is_empty()),
                archived,
            });
        }
    }

    parsed
}

/// A URL on one line and the byte offset just past it (past the closing
/// paren for links).
struct Occurrence {
    raw: String,
    label: Option<String>,
    end: usize,
}

fn occurrences(line: &str) -> Vec<Occurrence> {
    // Links first so the label is kept; bare URLs cover the rest.
    let mut found: Vec<Occurrence> = LINK_RE
        .captures_iter(line)
        .filter_map(|c| {
            let whole = c.get(0)?;
            Some(Occurrence {
                raw: c[2].to_string(),
                label: Some(c[1].trim().to_string()),
                end: whole.end(),
            })
        })
        .collect();
    for m in URL_RE.find_iter(line) {
        let url = trim_trailing_punctuation(m.as_str());
        if !found.iter().any(|o| o.raw == url) {
            found.push(Occurrence {
                raw: url.to_string(),
                label: None,
                end: m.start() + url.len(),
            });
        }
    }
    found
}

/// Whether an archived marker directly follows byte offset `end`.
fn marked_at(line: &str, end: usize) -> bool {
    let rest = line.get(end..).unwrap_or_default().trim_start();
    ARCHIVED_MARKERS.iter().any(|m| rest.starts_with(m))
}

fn trim_trailing_punctuation(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', ':', '!', '?', '。', '，', '；', '！', '？'])
}

fn host_allowed(raw: &str, allowed_domains: &[String]) -> bool {
    if allowed_domains.is_empty() {
        return true;
    }
    let Some(host) = url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };
    allowed_domains.iter().any(|d| {
        let d = d.trim().to_ascii_lowercase();
        host == d || host.ends_with(&format!(".{d}"))
    })
}

/// Return `content` with `entry`'s line marked as done.
///
/// [`ARCHIVED_MARKER`] is inserted right after the entry's own URL, so other
/// URLs sharing the line stay pending. A pending checklist line is ticked
/// instead once every other URL on it is already marked. Lines that no longer
/// contain the entry's URL are left alone.
pub fn mark_entry(content: &str, entry: &SourceEntry) -> Option<String> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let line = lines.get(entry.line)?;
    if entry.is_done() {
        return None;
    }

    let (body, cr) = match line.strip_suffix('\r') {
        Some(body) => (body, "\r"),
        None => (line.as_str(), ""),
    };
    let found = occurrences(body);
    let own = found.iter().find(|o| o.raw == entry.raw)?;
    if marked_at(body, own.end) {
        return None;
    }
    let others_done = found
        .iter()
        .filter(|o| o.raw != entry.raw)
        .all(|o| marked_at(body, o.end));

    let updated = match entry.format {
        EntryFormat::TaskPending if others_done => {
            let caps = TASK_RE.captures(body)?;
            format!("{}x{}{}{cr}", &caps[1], &caps[3], &caps[4])
        }
        EntryFormat::TaskPending | EntryFormat::PlainUrl | EntryFormat::MarkdownLink => {
            let (head, tail) = body.split_at(own.end);
            format!("{head} {ARCHIVED_MARKER}{tail}{cr}")
        }
        EntryFormat::TaskDone => return None,
    };

    lines[entry.line] = updated;
    Some(lines.join("\n"))
}

/// Mark `entry` done in the source file, rewriting it atomically.
///
/// Returns whether the file changed.
pub fn mark_done(path: &Path, entry: &SourceEntry) -> Result<bool> {
    let content = std::fs::read_to_string(path).map_err(|e| ArchivistError::io(path, e))?;
    match mark_entry(&content, entry) {
        Some(updated) => {
            write_atomic(path, updated.as_bytes())?;
            debug!(path = %path.display(), line = entry.line + 1, "marked source entry done");
            Ok(true)
        }
        None => Ok(false),
    }
}
