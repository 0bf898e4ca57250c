//! Configuration parsing and validation.
//!
//! Chat Recall is configured via a TOML file (default: `config/recall.toml`).
//! The file is read once at startup, followed by a fixed set of `RECALL_*`
//! environment overrides, then validated. The result is immutable for the
//! lifetime of the process.
//!
//! # Example Configuration
//!
//! ```toml
//! [db]
//! path = "./data/recall.sqlite"
//!
//! [retrieval]
//! vector_weight = 0.6
//! lexical_weight = 0.4
//! vector_threshold = 0.2
//! lexical_k = 2.0
//!
//! [context]
//! default_window_size = 3
//! max_window_size = 10
//! adaptive = true
//! deduplicate = true
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! # Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `RECALL_DEFAULT_WINDOW_SIZE` | `context.default_window_size` |
//! | `RECALL_MAX_WINDOW_SIZE` | `context.max_window_size` |
//! | `RECALL_ADAPTIVE_WINDOWING` | `context.adaptive` |
//! | `RECALL_DEDUPLICATE` | `context.deduplicate` |
//! | `RECALL_DEFAULT_RESULTS` | `context.default_results` |
//! | `RECALL_DEFAULT_MAX_TOKENS` | `context.default_max_tokens` |
//! | `RECALL_DECAY_LAMBDA` | `context.decay_lambda` |
//! | `RECALL_RECENCY_BONUS` | `context.recency_bonus` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chat_recall_core::config::{ContextConfig, PipelineConfig, RankingConfig};

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RankingConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file. Created on `recall init`.
    pub path: PathBuf,
}

/// Embedding provider settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"disabled"`, `"openai"`, `"ollama"` or `"local"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL, used by the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// The retrieval core's slice of the configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            ranking: self.retrieval.clone(),
            context: self.context.clone(),
        }
    }
}

/// Read, override from the environment, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Apply `RECALL_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let ctx = &mut config.context;
    override_with(&lookup, "RECALL_DEFAULT_WINDOW_SIZE", &mut ctx.default_window_size)?;
    override_with(&lookup, "RECALL_MAX_WINDOW_SIZE", &mut ctx.max_window_size)?;
    override_with(&lookup, "RECALL_DEFAULT_RESULTS", &mut ctx.default_results)?;
    override_with(&lookup, "RECALL_DEFAULT_MAX_TOKENS", &mut ctx.default_max_tokens)?;
    override_with(&lookup, "RECALL_DECAY_LAMBDA", &mut ctx.decay_lambda)?;

    for (key, field) in [
        ("RECALL_ADAPTIVE_WINDOWING", &mut ctx.adaptive),
        ("RECALL_DEDUPLICATE", &mut ctx.deduplicate),
        ("RECALL_RECENCY_BONUS", &mut ctx.recency_bonus),
    ] {
        if let Some(raw) = lookup(key) {
            *field = parse_bool(&raw)
                .ok_or_else(|| anyhow::anyhow!("{} must be a boolean, got '{}'", key, raw))?;
        }
    }
    Ok(())
}

fn override_with<F, T>(lookup: &F, key: &str, field: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *field = raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw))?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn validate(config: &Config) -> Result<()> {
    config.pipeline_config().validate()?;

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml_src: &str) -> Config {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"/tmp/recall.sqlite\"\n");
        assert_eq!(config.retrieval.vector_weight, 0.6);
        assert_eq!(config.context.default_window_size, 3);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.server.bind, "127.0.0.1:7340");
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config = parse(
            "[db]\npath = \"x\"\n[retrieval]\nvector_weight = 0.5\nlexical_weight = 0.3\n",
        );
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("must equal 1.0"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = parse("[db]\npath = \"x\"\n");
        let env: HashMap<&str, &str> = [
            ("RECALL_DEFAULT_WINDOW_SIZE", "5"),
            ("RECALL_ADAPTIVE_WINDOWING", "false"),
            ("RECALL_DECAY_LAMBDA", "0.25"),
            ("RECALL_RECENCY_BONUS", "1"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.context.default_window_size, 5);
        assert!(!config.context.adaptive);
        assert_eq!(config.context.decay_lambda, 0.25);
        assert!(config.context.recency_bonus);
    }

    #[test]
    fn test_unparseable_override_is_error() {
        let mut config = parse("[db]\npath = \"x\"\n");
        let result = apply_env_overrides(&mut config, |k| {
            (k == "RECALL_MAX_WINDOW_SIZE").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let config = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n");
        assert!(validate(&config).is_err());
    }
}
