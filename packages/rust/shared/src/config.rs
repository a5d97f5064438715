//! Application configuration for archivist.
//!
//! User config lives at `~/.archivist/archivist.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ArchivistError, Result};
use crate::types::PlanMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "archivist.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".archivist";

// ---------------------------------------------------------------------------
// Config structs (matching archivist.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Vault folder policy.
    #[serde(default)]
    pub folders: FoldersConfig,

    /// Bundled HTTP fetcher settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Batch pacing and marking.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Metadata defaults and caps.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Generation collaborator bridge.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Artifact classifier rule overrides.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Knowledge-base root. Every asset directory lives below it.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    /// Folder new assets are filed under.
    #[serde(default = "default_target_folder")]
    pub target_folder: String,

    /// Request mode for the diagram artifact.
    #[serde(default)]
    pub canvas: PlanMode,

    /// Request mode for the tabular artifact.
    #[serde(default)]
    pub base: PlanMode,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            target_folder: default_target_folder(),
            canvas: PlanMode::Auto,
            base: PlanMode::Auto,
        }
    }
}

fn default_base_dir() -> String {
    "~/archivist-vault".into()
}
fn default_target_folder() -> String {
    "20-阅读笔记".into()
}

/// `[folders]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldersConfig {
    /// Known vault folders.
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,

    /// Reject target folders outside the whitelist.
    #[serde(default)]
    pub enforce_whitelist: bool,
}

impl Default for FoldersConfig {
    fn default() -> Self {
        Self {
            whitelist: default_whitelist(),
            enforce_whitelist: false,
        }
    }
}

fn default_whitelist() -> Vec<String> {
    [
        "00-Inbox",
        "10-项目",
        "20-阅读笔记",
        "30-方法论",
        "40-工具脚本",
        "50-运维排障",
        "60-数据与表",
        "90-归档",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Hosts batch sources may point at.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,

    /// Download article images into the asset directory.
    #[serde(default = "default_true")]
    pub download_images: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            allowed_domains: default_allowed_domains(),
            download_images: true,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_allowed_domains() -> Vec<String> {
    vec!["mp.weixin.qq.com".into()]
}
fn default_true() -> bool {
    true
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Pause between successful items.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Pause after a rate-limit signal before the single retry.
    #[serde(default = "default_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,

    /// Tick checklist entries in the source file once archived.
    #[serde(default = "default_true")]
    pub mark_done: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            rate_limit_cooldown_secs: default_cooldown_secs(),
            mark_done: true,
        }
    }
}

fn default_delay_ms() -> u64 {
    1000
}
fn default_cooldown_secs() -> u64 {
    30
}

/// `[metadata]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Category written on first run, until a collaborator supplies one.
    #[serde(default = "default_category")]
    pub default_category: String,

    /// Tags written on first run, until a collaborator supplies some.
    #[serde(default = "default_tags")]
    pub default_tags: Vec<String>,

    /// Maximum number of previous content hashes kept.
    #[serde(default = "default_hash_history_cap")]
    pub hash_history_cap: usize,

    /// Maximum slug title length in code points.
    #[serde(default = "default_title_max_len")]
    pub title_max_len: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            default_category: default_category(),
            default_tags: default_tags(),
            hash_history_cap: default_hash_history_cap(),
            title_max_len: default_title_max_len(),
        }
    }
}

fn default_category() -> String {
    "article".into()
}
fn default_tags() -> Vec<String> {
    vec!["wechat".into(), "reading".into()]
}
fn default_hash_history_cap() -> usize {
    10
}
fn default_title_max_len() -> usize {
    50
}

/// `[generator]` section. No command means generation is a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Executable speaking the JSON-lines generation protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the bridge process (defaults to the base dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// `[classifier]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// TOML file replacing the built-in keyword rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.archivist/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ArchivistError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.archivist/archivist.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ArchivistError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ArchivistError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ArchivistError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ArchivistError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ArchivistError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~` against the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return dirs::home_dir()
            .ok_or_else(|| ArchivistError::config("could not determine home directory"));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| ArchivistError::config("could not determine home directory"))?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(path))
}

/// Check a target folder name against the folder policy.
///
/// The name must be a single normal path component; the whitelist only
/// applies when `enforce_whitelist` is set.
pub fn validate_folder(folders: &FoldersConfig, folder: &str) -> Result<()> {
    let mut components = Path::new(folder).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if folder.trim().is_empty() || !single_normal || folder.starts_with('.') {
        return Err(ArchivistError::config(format!(
            "invalid target folder '{folder}': must be a single directory name"
        )));
    }

    if folders.enforce_whitelist && !folders.whitelist.iter().any(|w| w == folder) {
        return Err(ArchivistError::config(format!(
            "target folder '{folder}' is not in the folder whitelist"
        )));
    }

    Ok(())
}
