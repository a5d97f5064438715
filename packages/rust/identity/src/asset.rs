//! Asset identifier and slug derivation.
//!
//! `asset_id` depends on the normalized locator alone. The slug is only a
//! readable directory name; uniqueness comes from its `asset_id` suffix.
//! No date ever goes into either.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::locator::NormalizedLocator;

/// Hex characters in an `asset_id` (160 bits).
pub const ASSET_ID_HEX_LEN: usize = 40;

/// Characters of `asset_id` appended to the slug.
pub const SLUG_ID_LEN: usize = 6;

/// Default maximum title length (code points) inside a slug.
pub const DEFAULT_TITLE_MAX_LEN: usize = 50;

/// Slug title used when sanitization leaves nothing.
pub const UNTITLED: &str = "untitled";

/// Algorithm tag recorded for `asset_id`, distinct from the content hash tag.
pub const ASSET_ID_ALGORITHM: &str = "sha256-160/locator-v1";

/// Domain separator so locator digests and content digests never share a space.
const ASSET_ID_DOMAIN: &[u8] = b"archivist:asset-id:v1\n";

static ILLEGAL_FS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]+"#).expect("illegal fs chars regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Anything that is not a word character (Unicode, so CJK included), space or dash.
static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("symbol regex"));

/// Identity of one asset: what the directory and `meta.json` are keyed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIdentity {
    pub asset_id: String,
    pub locator: NormalizedLocator,
    pub slug: String,
    pub title: String,
}

impl AssetIdentity {
    /// Derive the full identity once the title is known.
    pub fn derive(locator: NormalizedLocator, title: &str, title_max_len: usize) -> Self {
        let asset_id = asset_id(&locator);
        let slug = build_slug(title, &asset_id, title_max_len);
        Self {
            asset_id,
            locator,
            slug,
            title: title.trim().to_string(),
        }
    }
}

/// `asset_id = hex(hash(normalized_locator))`, fixed width.
pub fn asset_id(locator: &NormalizedLocator) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ASSET_ID_DOMAIN);
    hasher.update(locator.as_str().as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(ASSET_ID_HEX_LEN);
    hex
}

/// Clean a raw title into something safe to use as a directory name.
pub fn sanitize_title(title: &str, max_len: usize) -> String {
    let t = ILLEGAL_FS_RE.replace_all(title, "-");
    let t = WHITESPACE_RE.replace_all(&t, " ");
    let t = SYMBOL_RE.replace_all(t.trim(), "");
    let t = WHITESPACE_RE.replace_all(t.trim(), " ");
    let t = t.trim_matches(is_edge_char);

    let truncated: String = t.chars().take(max_len).collect();
    let truncated = truncated.trim_end_matches(is_edge_char);

    if truncated.is_empty() {
        UNTITLED.to_string()
    } else {
        truncated.to_string()
    }
}

fn is_edge_char(c: char) -> bool {
    c == '-' || c.is_whitespace()
}

/// `"<sanitized_title>-<asset_id[0:6]>"`.
pub fn build_slug(title: &str, asset_id: &str, title_max_len: usize) -> String {
    let short: String = asset_id.chars().take(SLUG_ID_LEN).collect();
    format!("{}-{short}", sanitize_title(title, title_max_len))
}

/// The identity suffix a slug for `asset_id` ends with (including the dash).
pub fn slug_suffix(asset_id: &str) -> String {
    let short: String = asset_id.chars().take(SLUG_ID_LEN).collect();
    format!("-{short}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::normalize_locator;

    #[test]
    fn asset_id_is_fixed_width_hex() {
        let loc = normalize_locator("https://example.com/s/abc").unwrap();
        let id = asset_id(&loc);
        assert_eq!(id.len(), ASSET_ID_HEX_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn asset_id_ignores_volatile_params() {
        let a = normalize_locator("https://example.com/s/abc?chksm=X&vid=Y").unwrap();
        let b = normalize_locator("https://example.com/s/abc").unwrap();
        assert_eq!(asset_id(&a), asset_id(&b));
    }

    #[test]
    fn asset_id_depends_on_locator_only() {
        let loc = normalize_locator("https://example.com/s/abc").unwrap();
        let one = AssetIdentity::derive(loc.clone(), "First title", 50);
        let two = AssetIdentity::derive(loc, "A different title", 50);
        assert_eq!(one.asset_id, two.asset_id);
        assert_ne!(one.slug, two.slug);
        assert!(one.slug.ends_with(&slug_suffix(&one.asset_id)));
        assert!(two.slug.ends_with(&slug_suffix(&two.asset_id)));
    }

    #[test]
    fn slug_for_cjk_title() {
        assert_eq!(build_slug("长篇笔记", "a1b2c3d4e5", 50), "长篇笔记-a1b2c3");
    }

    #[test]
    fn sanitize_strips_illegal_and_symbols() {
        assert_eq!(sanitize_title("a/b: c?", 50), "a-b- c");
        assert_eq!(sanitize_title("  Rust   vs\tGo!  ", 50), "Rust vs Go");
        assert_eq!(sanitize_title("【深度】架构 · 设计", 50), "深度架构 设计");
    }

    #[test]
    fn sanitize_truncates_by_code_points() {
        let long = "字".repeat(80);
        let out = sanitize_title(&long, 50);
        assert_eq!(out.chars().count(), 50);
    }

    #[test]
    fn sanitize_falls_back_when_empty() {
        assert_eq!(sanitize_title("???", 50), "untitled");
        assert_eq!(sanitize_title("", 50), "untitled");
        assert_eq!(build_slug("!!!", "ffeedd00", 50), "untitled-ffeedd");
    }

    #[test]
    fn slug_is_deterministic() {
        let a = build_slug("Same Title", "0123456789", 50);
        let b = build_slug("Same Title", "0123456789", 50);
        assert_eq!(a, b);
    }
}
