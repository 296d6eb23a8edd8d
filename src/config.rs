use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub scrape: ScrapeConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    pub uploads: UploadsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when no job is found.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Bounded retries for the scrape call.
    #[serde(default = "default_scrape_max_attempts")]
    pub scrape_max_attempts: usize,
    /// Page size for draining document listings.
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            scrape_max_attempts: default_scrape_max_attempts(),
            page_size: default_page_size(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_scrape_max_attempts() -> usize {
    3
}
fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters of overlap carried between adjacent chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1024
}
fn default_chunk_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dims: usize,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_short_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_short_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `"openai"` (any chat-completions-compatible endpoint) or `"gemini"`.
    #[serde(default = "default_extraction_provider")]
    pub provider: String,
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_long_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_extraction_provider() -> String {
    "openai".to_string()
}
fn default_long_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeConfig {
    pub base_url: String,
    #[serde(default = "default_long_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Qdrant HTTP endpoint, e.g. `http://localhost:6333`.
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_short_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_collection() -> String {
    "embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BillingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_short_timeout_secs")]
    pub timeout_secs: u64,
}

/// Where uploaded files live. Both backends may be configured at once;
/// each document's payload kind picks the one to read from.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct UploadsConfig {
    /// Directory holding local uploads, keyed by document id.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// S3 bucket holding uploads under `<prefix>/<doc_id>`.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    /// Custom S3 endpoint for MinIO/LocalStack.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    // Validate extraction
    match config.extraction.provider.as_str() {
        "openai" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be openai or gemini.",
            other
        ),
    }

    // Validate worker
    if config.worker.scrape_max_attempts == 0 {
        anyhow::bail!("worker.scrape_max_attempts must be >= 1");
    }
    if config.worker.page_size < 1 {
        anyhow::bail!("worker.page_size must be >= 1");
    }

    // Validate billing
    if config.billing.enabled && config.billing.base_url.is_none() {
        anyhow::bail!("billing.base_url must be set when billing is enabled");
    }

    // Validate uploads
    if config.uploads.dir.is_none() && config.uploads.bucket.is_none() {
        anyhow::bail!("uploads must set at least one of dir (local) or bucket (s3)");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[db]
path = "/tmp/ragmill.sqlite"

[embedding]
model = "text-embedding-3-small"
dims = 1536

[extraction]
model = "gpt-4.1"

[scrape]
base_url = "https://api.firecrawl.dev"

[vector]
url = "http://localhost:6333"

[uploads]
dir = "/tmp/uploads"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let f = write_config(MINIMAL);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.worker.poll_interval_secs, 5);
        assert_eq!(config.worker.scrape_max_attempts, 3);
        assert_eq!(config.chunking.chunk_size, 1024);
        assert_eq!(config.chunking.chunk_overlap, 20);
        assert_eq!(config.vector.collection, "embeddings");
        assert_eq!(config.extraction.provider, "openai");
        assert!(!config.billing.enabled);
    }

    #[test]
    fn test_rejects_unknown_extraction_provider() {
        let body = MINIMAL.replace(
            "[extraction]\nmodel",
            "[extraction]\nprovider = \"claude\"\nmodel",
        );
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_billing_requires_base_url() {
        let body = format!("{}\n[billing]\nenabled = true\n", MINIMAL);
        let f = write_config(&body);
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("billing.base_url"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let body = format!(
            "{}\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n",
            MINIMAL
        );
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }
}
