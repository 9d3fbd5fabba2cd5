use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Chunk size cap in estimated tokens.
    #[serde(default = "default_size_budget")]
    pub size_budget_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size_budget_tokens: default_size_budget(),
        }
    }
}

fn default_size_budget() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Primary backend: "openai", "anthropic", or "ollama".
    #[serde(default = "default_primary")]
    pub primary: String,
    /// Optional secondary backend, tried once after the primary exhausts
    /// its retries.
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Model for the secondary backend; falls back to `model` when unset.
    #[serde(default)]
    pub secondary_model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bounded worker pool size for chunk dispatch.
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: None,
            model: default_model(),
            secondary_model: None,
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
            dispatch_concurrency: default_dispatch_concurrency(),
            ollama_url: default_ollama_url(),
        }
    }
}

fn default_primary() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_dispatch_concurrency() -> usize {
    4
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// OCR results below this mean confidence count as degraded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// A PDF page with fewer text-layer characters than this is flagged
    /// for OCR instead of emitting a unit.
    #[serde(default = "default_min_char_threshold")]
    pub min_char_threshold: usize,
    /// Tesseract language code.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_char_threshold: default_min_char_threshold(),
            language: default_language(),
        }
    }
}

fn default_min_confidence() -> f32 {
    0.5
}
fn default_min_char_threshold() -> usize {
    16
}
fn default_language() -> String {
    "eng".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.size_budget_tokens == 0 {
        anyhow::bail!("chunking.size_budget_tokens must be > 0");
    }

    if config.provider.dispatch_concurrency == 0 {
        anyhow::bail!("provider.dispatch_concurrency must be > 0");
    }

    if !(0.0..=1.0).contains(&config.ocr.min_confidence) {
        anyhow::bail!("ocr.min_confidence must be in [0.0, 1.0]");
    }

    for name in std::iter::once(config.provider.primary.as_str())
        .chain(config.provider.secondary.as_deref())
    {
        match name {
            "openai" | "anthropic" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown provider: '{}'. Must be openai, anthropic, or ollama.",
                other
            ),
        }
    }

    if config.provider.secondary.as_deref() == Some(config.provider.primary.as_str()) {
        anyhow::bail!("provider.secondary must differ from provider.primary");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.chunking.size_budget_tokens, 700);
        assert_eq!(config.provider.max_retries, 3);
    }

    #[test]
    fn parses_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            size_budget_tokens = 100

            [provider]
            primary = "ollama"
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.size_budget_tokens, 100);
        assert_eq!(config.provider.primary, "ollama");
        assert!(config.provider.secondary.is_none());
    }

    #[test]
    fn rejects_unknown_provider() {
        let config: Config = toml::from_str(
            r#"
            [provider]
            primary = "cohere"
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_secondary_equal_to_primary() {
        let config: Config = toml::from_str(
            r#"
            [provider]
            primary = "openai"
            secondary = "openai"
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let config: Config = toml::from_str(
            r#"
            [ocr]
            min_confidence = 1.5
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
