//! Artifact plan resolution.
//!
//! Decides from the primary document text alone which optional artifact
//! kinds to request, and which template family each one uses.
//!
//! - [`rules`]: the tunable phrase lists and their validation
//! - [`resolver`]: mode handling, sub-mode lookup, comparison items

pub mod resolver;
pub mod rules;

pub use resolver::{comparison_items, count_markdown_tables, resolve_plan};
pub use rules::{BaseRules, CanvasRules, ClassifierRules, GENERIC_DENY_LIST, load_rules};
