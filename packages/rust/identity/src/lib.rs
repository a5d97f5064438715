//! Content-addressable identity for archived assets.
//!
//! - [`locator`]: canonicalizes a source URL by dropping volatile query keys
//! - [`asset`]: derives `asset_id` and the human-readable slug
//! - [`hash`]: whitespace-normalized content hashing for change detection

pub mod asset;
pub mod hash;
pub mod locator;

pub use asset::{
    ASSET_ID_ALGORITHM, AssetIdentity, DEFAULT_TITLE_MAX_LEN, asset_id, build_slug, sanitize_title,
    slug_suffix,
};
pub use hash::{CONTENT_HASH_ALGORITHM, ContentHash, content_hash, normalize_body};
pub use locator::{NormalizedLocator, VOLATILE_QUERY_KEYS, normalize_locator};
