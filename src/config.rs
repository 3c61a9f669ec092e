//! Configuration: an optional `config.toml` plus environment overrides for
//! secrets. Loaded once at startup; the clients it parameterizes are
//! constructed by the entry points and injected into `AppState`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub index: IndexConfig,
    pub scraper: ScraperConfig,
    /// When false the pipeline falls back to the legacy no-context prompt
    /// and skips embedding and retrieval entirely.
    pub retrieval: bool,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub log_dir: PathBuf,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Data-plane host of the index (the index name is part of the host).
    pub host: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub api_key: String,
    pub target_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            index: IndexConfig::default(),
            scraper: ScraperConfig::default(),
            retrieval: true,
            request_timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log_dir: PathBuf::from("logs"),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_key: String::new(),
            chat_model: "gemini-2.0-flash-lite".to_string(),
            embedding_model: "gemini-embedding-001".to_string(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: String::new(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.firecrawl.dev".to_string(),
            api_key: String::new(),
            target_url: "https://www.aven.com/support".to_string(),
        }
    }
}

impl Config {
    /// Loads `config.toml` (path overridable via `SUPPORT_RAG_CONFIG`) if it
    /// exists, then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var("SUPPORT_RAG_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(key) = env::var("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Ok(key) = env::var("PINECONE_API_KEY") {
            self.index.api_key = key;
        }
        if let Ok(host) = env::var("PINECONE_INDEX_HOST") {
            self.index.host = host;
        }
        if let Ok(key) = env::var("FIRECRAWL_API_KEY") {
            self.scraper.api_key = key;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
