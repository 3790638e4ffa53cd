//! Service configuration.
//!
//! Read once at startup from the environment (after `.env` is loaded) and
//! handed explicitly to the components that need it.

use anyhow::{Context, Result};
use std::env;

const DEFAULT_GRAPHDB_URL: &str = "http://localhost:7200";
const DEFAULT_REPOSITORY: &str = "taxonomy";
const DEFAULT_TAXONOMY_BASE: &str = "http://example.org/taxonomy";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_UPLOAD_MB: usize = 100;
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
const DEFAULT_MAX_OUTPUT_CHARS: usize = 65500;

/// Where the graph store lives.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub repository: String,
    /// Named graph that bulk imports are written into.
    pub graph: Option<String>,
}

/// Settings for the corpus-to-taxonomy generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub model: String,
    /// Responses at least this long are logged as possibly truncated.
    pub max_output_chars: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    /// Concept identifiers are `{taxonomy_base}/{name}`.
    pub taxonomy_base: String,
    pub bind_addr: String,
    pub max_upload_bytes: usize,
    /// `None` when no API key is configured; generation is then disabled.
    pub generator: Option<GeneratorConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = StoreConfig {
            base_url: get("GRAPHDB_URL").unwrap_or_else(|| DEFAULT_GRAPHDB_URL.to_string()),
            repository: get("GRAPHDB_REPOSITORY")
                .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string()),
            graph: get("GRAPHDB_GRAPH"),
        };

        let max_upload_mb = match get("MAX_UPLOAD_MB") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("MAX_UPLOAD_MB is not a number: {:?}", v))?,
            None => DEFAULT_MAX_UPLOAD_MB,
        };

        let generator = match get("OPENROUTER_API_KEY") {
            Some(api_key) => {
                let max_output_chars = match get("MAX_OUTPUT_CHARS") {
                    Some(v) => v
                        .parse::<usize>()
                        .with_context(|| format!("MAX_OUTPUT_CHARS is not a number: {:?}", v))?,
                    None => DEFAULT_MAX_OUTPUT_CHARS,
                };
                Some(GeneratorConfig {
                    api_key,
                    model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                    max_output_chars,
                })
            }
            None => None,
        };

        Ok(Self {
            store,
            taxonomy_base: get("TAXONOMY_BASE")
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_TAXONOMY_BASE.to_string()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            generator,
        })
    }
}
