//! Locator canonicalization.
//!
//! Two locators that differ only in volatile query parameters (share
//! tokens, checksums, referral markers) must produce the same string; two
//! locators with different paths must not. Pure: no I/O, no clock.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use archivist_shared::{ArchivistError, Result};

/// Query keys dropped during normalization.
///
/// Anything not listed here survives, so identity-bearing parameters such
/// as `__biz`, `mid`, `idx` and `sn` on long-form article links are kept.
pub const VOLATILE_QUERY_KEYS: &[&str] = &[
    "chksm",
    "vid",
    "uin",
    "sid",
    "from",
    "scene",
    "srcid",
    "key",
    "ascene",
    "devicetype",
    "version",
    "lang",
    "nettype",
    "abtest_cookie",
    "pass_ticket",
    "exportkey",
    "wx_header",
    "clicktime",
    "enterid",
    "sessionid",
    "subscene",
    "mpshare",
    "share_token",
    "sharer_sharetime",
    "sharer_shareid",
    "sharer_shareinfo",
    "sharer_shareinfo_first",
    "poc_token",
    "realreporttime",
    "rd2werd",
];

/// Prefix-matched volatile keys (`utm_source`, `utm_medium`, ...).
const VOLATILE_KEY_PREFIXES: &[&str] = &["utm_"];

fn is_volatile(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    VOLATILE_QUERY_KEYS.contains(&key.as_str())
        || VOLATILE_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// A canonical locator string. Only constructible through [`normalize_locator`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedLocator(String);

impl NormalizedLocator {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part of the canonical locator.
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.0)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

impl fmt::Display for NormalizedLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedLocator {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize a raw locator.
///
/// Keeps scheme, host, port, path and the surviving query (sorted by key so
/// parameter order does not matter); drops the fragment and any trailing
/// slash.
pub fn normalize_locator(raw: &str) -> Result<NormalizedLocator> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ArchivistError::normalization("empty locator"));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| ArchivistError::normalization(format!("invalid locator '{trimmed}': {e}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ArchivistError::normalization(format!(
            "unsupported scheme '{scheme}' in '{trimmed}'"
        )));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ArchivistError::normalization(format!("locator '{trimmed}' has no host")))?;

    let mut out = format!("{scheme}://{host}");
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(url.path().trim_end_matches('/'));

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.is_empty() && !is_volatile(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if !pairs.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        out.push('?');
        out.push_str(&query);
    }

    Ok(NormalizedLocator(out))
}
