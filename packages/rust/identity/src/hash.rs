//! Content hashing over the normalized primary document body.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Algorithm tag persisted next to every content hash.
pub const CONTENT_HASH_ALGORITHM: &str = "sha256";

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// A content hash with its algorithm tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub hex: String,
    pub algorithm: String,
}

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.hex
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Collapse whitespace runs to one space and trim, so line-ending and
/// indentation churn never changes the hash.
pub fn normalize_body(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Hash the normalized body. Metadata never feeds into this.
pub fn content_hash(text: &str) -> ContentHash {
    let normalized = normalize_body(text);
    let digest = Sha256::digest(normalized.as_bytes());
    ContentHash {
        hex: format!("{digest:x}"),
        algorithm: CONTENT_HASH_ALGORITHM.to_string(),
    }
}
