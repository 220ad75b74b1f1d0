//! TOML configuration.
//!
//! Every section is optional and falls back to the defaults below, so a
//! minimal file only needs the values that differ. Secrets are never read
//! from the file: API keys and the webhook secret come from the
//! environment (see [`EmbeddingConfig::api_key_env`] and [`BillingConfig`]).
//!
//! ```toml
//! [db]
//! path = "./data/archmen.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8787"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use archmen_core::chunk;
use archmen_core::models::EmbeddingSettings;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/archmen.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
        }
    }
}

/// Defaults applied when a processing request omits its settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_context_window() -> usize {
    5
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            context_window: default_context_window(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_openai_url")]
    pub url: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    5
}
fn default_batch_delay_ms() -> u64 {
    100
}
fn default_max_input_chars() -> usize {
    archmen_core::embedding::MAX_EMBEDDING_INPUT_CHARS
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            url: default_openai_url(),
            api_key_env: default_openai_key_env(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_input_chars: default_max_input_chars(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_openai_url")]
    pub url: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chat_provider() -> String {
    "disabled".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_system_prompt() -> String {
    "You are ArchMen, a guide who helps people discover the Jungian archetypes \
     that shape their lives. Ask one thoughtful question at a time, listen \
     closely, and ground your observations in the knowledge base excerpts you \
     are given. Never diagnose; offer reflections the person can test against \
     their own experience."
        .to_string()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_chat_provider(),
            model: default_chat_model(),
            url: default_openai_url(),
            api_key_env: default_openai_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_threshold() -> f64 {
    0.7
}
fn default_limit() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            limit: default_limit(),
        }
    }
}

/// How bearer tokens are resolved to users.
///
/// - `static`: tokens listed in `[auth.tokens]` map directly to user ids.
/// - `remote`: `GET {url}` on the auth provider with the bearer token.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_auth_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_auth_provider() -> String {
    "static".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: default_auth_provider(),
            url: None,
            api_key_env: None,
            tokens: HashMap::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    #[serde(default = "default_billing_provider")]
    pub provider: String,
    #[serde(default = "default_billing_url")]
    pub url: String,
    #[serde(default = "default_billing_key_env")]
    pub secret_key_env: String,
    #[serde(default = "default_webhook_secret_env")]
    pub webhook_secret_env: String,
    /// Resolved from `webhook_secret_env` at load time unless set directly.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_billing_provider() -> String {
    "disabled".to_string()
}
fn default_billing_url() -> String {
    "https://api.stripe.com".to_string()
}
fn default_billing_key_env() -> String {
    "PAYMENT_SECRET_KEY".to_string()
}
fn default_webhook_secret_env() -> String {
    "PAYMENT_WEBHOOK_SECRET".to_string()
}
fn default_webhook_tolerance() -> i64 {
    300
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            provider: default_billing_provider(),
            url: default_billing_url(),
            secret_key_env: default_billing_key_env(),
            webhook_secret_env: default_webhook_secret_env(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Settings used when a processing request omits some or all fields.
    pub fn default_settings(&self) -> EmbeddingSettings {
        EmbeddingSettings {
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
            embedding_model: self.embedding.model.clone(),
            context_window: self.chunking.context_window,
            semantic_search: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        chunk::validate(self.chunking.chunk_size, self.chunking.chunk_overlap)
            .context("invalid [chunking] section")?;

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.max_input_chars == 0 {
            bail!("embedding.max_input_chars must be > 0");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        match self.chat.provider.as_str() {
            "disabled" | "openai" => {}
            other => bail!(
                "Unknown chat provider: '{}'. Must be disabled or openai.",
                other
            ),
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            bail!("chat.temperature must be in [0.0, 2.0]");
        }

        if !(0.0..=1.0).contains(&self.retrieval.threshold) {
            bail!("retrieval.threshold must be in [0.0, 1.0]");
        }
        if self.retrieval.limit == 0 {
            bail!("retrieval.limit must be >= 1");
        }

        match self.auth.provider.as_str() {
            "static" => {}
            "remote" => {
                if self.auth.url.is_none() {
                    bail!("auth.url must be set when auth.provider is 'remote'");
                }
            }
            other => bail!(
                "Unknown auth provider: '{}'. Must be static or remote.",
                other
            ),
        }

        match self.billing.provider.as_str() {
            "disabled" | "stripe" => {}
            other => bail!(
                "Unknown billing provider: '{}'. Must be disabled or stripe.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    if config.billing.webhook_secret.is_none() {
        config.billing.webhook_secret = std::env::var(&config.billing.webhook_secret_env).ok();
    }

    Ok(config)
}

/// Parse and validate configuration text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.chunk_overlap, 200);
        assert_eq!(cfg.embedding.batch_size, 5);
        assert_eq!(cfg.embedding.batch_delay_ms, 100);
        assert_eq!(cfg.embedding.max_input_chars, 8000);
        assert_eq!(cfg.auth.provider, "static");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let err = parse_config("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_remote_auth_requires_url() {
        assert!(parse_config("[auth]\nprovider = \"remote\"\n").is_err());
        assert!(
            parse_config("[auth]\nprovider = \"remote\"\nurl = \"http://auth.local/user\"\n")
                .is_ok()
        );
    }

    #[test]
    fn test_static_tokens() {
        let cfg = parse_config("[auth.tokens]\n\"dev-token\" = \"user-1\"\n").unwrap();
        assert_eq!(cfg.auth.tokens.get("dev-token").map(String::as_str), Some("user-1"));
    }
}
