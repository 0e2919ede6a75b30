//! Application configuration for sitekb.
//!
//! User config lives at `~/.sitekb/sitekb.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteKbError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitekb.toml";

/// Default config/data directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitekb";

// ---------------------------------------------------------------------------
// Config structs (matching sitekb.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawl settings.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// Text chunking settings.
    #[serde(default)]
    pub chunking: ChunkingSection,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingSection,

    /// Vector index settings.
    #[serde(default)]
    pub index: IndexSection,

    /// Query-time retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalSection,
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Hard cap on pages fetched per knowledge base.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum concurrent HTTP requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Pause between crawl batches, in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Fetch attempts per URL before giving up on it.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Fixed delay between fetch attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
            throttle_ms: default_throttle_ms(),
            timeout_secs: default_timeout_secs(),
            fetch_retries: default_fetch_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_pages() -> usize {
    50
}
fn default_concurrency() -> usize {
    5
}
fn default_throttle_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}

/// `[chunking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSection {
    /// Maximum chunk size in chars.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Overlap between consecutive chunks in chars.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSection {
    /// Base URL of an OpenAI-compatible embeddings endpoint.
    /// When unset, the deterministic local embedder is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Embedding model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding vector dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            dimension: default_dimension(),
        }
    }
}

fn default_api_key_env() -> String {
    "SITEKB_EMBEDDING_API_KEY".into()
}
fn default_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimension() -> usize {
    768
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSection {
    /// Maximum datapoints per upsert call.
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

fn default_upsert_batch_size() -> usize {
    1000
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSection {
    /// Neighbors requested per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Char budget for an assembled context string.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    2000
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration handed to the crawler.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Hard cap on pages fetched.
    pub max_pages: usize,
    /// Maximum concurrent HTTP requests.
    pub concurrency: usize,
    /// Pause between crawl batches, in ms.
    pub throttle_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Fetch attempts per URL.
    pub fetch_retries: u32,
    /// Fixed delay between attempts, in ms.
    pub retry_delay_ms: u64,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_pages: config.crawl.max_pages,
            concurrency: config.crawl.concurrency,
            throttle_ms: config.crawl.throttle_ms,
            timeout_secs: config.crawl.timeout_secs,
            fetch_retries: config.crawl.fetch_retries,
            retry_delay_ms: config.crawl.retry_delay_ms,
        }
    }
}

/// Runtime chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum chunk size in chars.
    pub max_chunk_size: usize,
    /// Overlap between consecutive chunks in chars.
    pub overlap: usize,
}

impl From<&AppConfig> for ChunkConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_chunk_size: config.chunking.max_chunk_size,
            overlap: config.chunking.overlap,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config/data directory (`~/.sitekb/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SiteKbError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitekb/sitekb.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| SiteKbError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SiteKbError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteKbError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteKbError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteKbError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the embedding API key env var is set and non-empty.
/// Only required when a remote embedding endpoint is configured.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.embedding.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(SiteKbError::config(format!(
            "embedding API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_pages"));
        assert!(toml_str.contains("SITEKB_EMBEDDING_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.max_pages, 50);
        assert_eq!(parsed.chunking.max_chunk_size, 1000);
        assert_eq!(parsed.retrieval.max_context_chars, 2000);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[crawl]
max_pages = 10

[embedding]
endpoint = "https://api.example.com/v1"
dimension = 384
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.crawl.max_pages, 10);
        assert_eq!(config.crawl.concurrency, 5);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.index.upsert_batch_size, 1000);
    }

    #[test]
    fn crawl_config_from_app_config() {
        let app = AppConfig::default();
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.max_pages, 50);
        assert_eq!(crawl.concurrency, 5);
        assert_eq!(crawl.throttle_ms, 1000);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.embedding.api_key_env = "SITEKB_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
