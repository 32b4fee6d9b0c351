//! Application configuration for CourseBuilder.
//!
//! User config lives at `~/.coursebuilder/coursebuilder.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CourseBuilderError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "coursebuilder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".coursebuilder";

// ---------------------------------------------------------------------------
// Config structs (matching coursebuilder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// AI provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Segment planner bounds.
    #[serde(default)]
    pub segmentation: SegmentationConfig,

    /// Content generation tuning.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Task queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the course database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Owner recorded on uploaded documents.
    #[serde(default = "default_owner")]
    pub owner: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            owner: default_owner(),
        }
    }
}

impl DefaultsConfig {
    /// Path of the libSQL database file, with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.data_dir).join("coursebuilder.db")
    }
}

fn default_data_dir() -> String {
    "~/.coursebuilder/data".into()
}
fn default_owner() -> String {
    "local".into()
}

/// `[provider]` section: an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL (must end with a slash-free path, e.g. `.../api/v1`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for text completion.
    #[serde(default = "default_completion_model")]
    pub completion_model: String,

    /// Model used for embeddings.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Model used for lesson illustrations.
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Model used for narration.
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Narration voice.
    #[serde(default = "default_voice")]
    pub voice: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            completion_model: default_completion_model(),
            embedding_model: default_embedding_model(),
            image_model: default_image_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "COURSEBUILDER_API_KEY".into()
}
fn default_completion_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_image_model() -> String {
    "dall-e-3".into()
}
fn default_speech_model() -> String {
    "tts-1".into()
}
fn default_voice() -> String {
    "alloy".into()
}

/// `[segmentation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Sections larger than this many pages are split.
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: u32,

    /// Sections smaller than this many pages are carried over and merged.
    #[serde(default = "default_min_segment_size")]
    pub min_segment_size: u32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            max_segment_size: default_max_segment_size(),
            min_segment_size: default_min_segment_size(),
        }
    }
}

fn default_max_segment_size() -> u32 {
    20
}
fn default_min_segment_size() -> u32 {
    3
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Attempts per completion call when rate limited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff step; the n-th retry waits `n * step`.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Hard ceiling for the assembled RAG context, in characters.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,

    /// Pause between batch items to respect provider rate limits.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
            context_budget: default_context_budget(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl GenerationConfig {
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_step_ms() -> u64 {
    5_000
}
fn default_context_budget() -> usize {
    5_000
}
fn default_batch_delay_ms() -> u64 {
    1_500
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How many pending tasks a worker inspects per poll.
    #[serde(default = "default_poll_limit")]
    pub poll_limit: u32,

    /// Age after which a PROCESSING lease may be swept back to PENDING.
    /// Unset means leases never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_timeout_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_limit: default_poll_limit(),
            lease_timeout_secs: None,
        }
    }
}

fn default_poll_limit() -> u32 {
    10
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.coursebuilder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CourseBuilderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.coursebuilder/coursebuilder.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| CourseBuilderError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        CourseBuilderError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CourseBuilderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CourseBuilderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CourseBuilderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the provider API key from the configured env var.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.provider.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(CourseBuilderError::config(format!(
            "provider API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the provider API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(config).map(|_| ())
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("COURSEBUILDER_API_KEY"));
        assert!(!toml_str.contains("lease_timeout_secs"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.segmentation.max_segment_size, 20);
        assert_eq!(parsed.segmentation.min_segment_size, 3);
        assert_eq!(parsed.generation.context_budget, 5_000);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[generation]
backoff_step_ms = 10

[queue]
lease_timeout_secs = 600
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.generation.backoff_step(), Duration::from_millis(10));
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.queue.lease_timeout_secs, Some(600));
        assert_eq!(config.queue.poll_limit, 10);
    }

    #[test]
    fn database_path_is_inside_data_dir() {
        let defaults = DefaultsConfig {
            data_dir: "/tmp/cb-data".into(),
            owner: "me".into(),
        };
        assert_eq!(
            defaults.database_path(),
            PathBuf::from("/tmp/cb-data/coursebuilder.db")
        );
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.provider.api_key_env = "CB_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
