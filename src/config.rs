//! TOML configuration.
//!
//! Every section has defaults, so an absent file (or an empty one) yields a
//! working configuration that reads `./data` and talks to the OpenAI API.
//!
//! ```toml
//! [corpus]
//! root = "./data"
//!
//! [embedding]
//! provider = "local"
//! model = "bge-small-en-v1.5"
//!
//! [completion]
//! model = "gpt-4o"
//! stream = true
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ============ Corpus ============

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_include_globs() -> Vec<String> {
    [
        "**/*.md", "**/*.txt", "**/*.csv", "**/*.json", "**/*.html", "**/*.pdf", "**/*.docx",
        "**/*.pptx", "**/*.xlsx",
    ]
    .iter()
    .map(|g| g.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

// ============ Chunking ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: 0,
        }
    }
}

fn default_max_tokens() -> usize {
    256
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `local`, `openai`, `ollama`, or `hashed`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for remote providers (OpenAI-compatible or Ollama).
    #[serde(default)]
    pub url: Option<String>,
    /// Prefix applied to queries (not documents) before embedding.
    #[serde(default)]
    pub query_instruction: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
            query_instruction: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
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

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

// ============ Completion ============

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier_secs: f64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            model: default_completion_model(),
            temperature: None,
            max_tokens: None,
            stream: true,
            max_attempts: default_max_attempts(),
            backoff_multiplier_secs: default_backoff_multiplier(),
            backoff_max_secs: default_backoff_max(),
            request_timeout_secs: default_request_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
        }
    }
}

impl CompletionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            multiplier: secs_or(self.backoff_multiplier_secs, default_backoff_multiplier()),
            max_backoff: secs_or(self.backoff_max_secs, default_backoff_max()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_multiplier() -> f64 {
    1.0
}
fn default_backoff_max() -> f64 {
    40.0
}
fn default_request_timeout() -> u64 {
    60
}
fn default_stream_idle_timeout() -> u64 {
    30
}

// ============ Assistant ============

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    /// The single company the assistant answers questions about.
    #[serde(default = "default_company")]
    pub company: String,
    /// System persona override. `{company}` is substituted.
    #[serde(default)]
    pub persona: Option<String>,
    /// Formatting instruction appended to every question.
    #[serde(default = "default_response_style")]
    pub response_style: String,
    /// Opening assistant line shown by interactive front ends.
    #[serde(default)]
    pub greeting: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            company: default_company(),
            persona: None,
            response_style: default_response_style(),
            greeting: None,
        }
    }
}

impl AssistantConfig {
    pub fn greeting(&self) -> String {
        self.greeting.clone().unwrap_or_else(|| {
            format!(
                "I am {company} Copilot, your AI financial assistant. You can ask me about \
                 {company}'s business, financial metrics, and market performance.",
                company = self.company
            )
        })
    }
}

fn default_company() -> String {
    "Li Auto".to_string()
}

fn default_response_style() -> String {
    "Please format your response in professional finance and banking format.".to_string()
}

// ============ Server ============

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
    "127.0.0.1:7341".to_string()
}

// ============ Loading ============

/// Longest backoff setting accepted by [`validate`], in seconds.
pub const MAX_BACKOFF_SECS: f64 = 3600.0;

fn secs_or(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .or_else(|_| Duration::try_from_secs_f64(fallback))
        .unwrap_or(Duration::ZERO)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.completion.max_attempts == 0 {
        bail!("completion.max_attempts must be >= 1");
    }
    for (name, secs) in [
        ("backoff_multiplier_secs", config.completion.backoff_multiplier_secs),
        ("backoff_max_secs", config.completion.backoff_max_secs),
    ] {
        if !secs.is_finite() || !(0.0..=MAX_BACKOFF_SECS).contains(&secs) {
            bail!(
                "completion.{} must be between 0 and {} seconds",
                name,
                MAX_BACKOFF_SECS
            );
        }
    }
    if config.completion.model.trim().is_empty() {
        bail!("completion.model must not be empty");
    }

    if config.assistant.company.trim().is_empty() {
        bail!("assistant.company must not be empty");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "local" | "hashed" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hashed.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.completion.max_attempts, 5);
        assert_eq!(config.completion.backoff_max_secs, 40.0);
        assert_eq!(config.completion.model, "gpt-4o");
        assert!(config.completion.stream);
        assert_eq!(config.embedding.provider, "local");
    }

    #[test]
    fn rejects_zero_top_k() {
        let config: Config = toml::from_str("[retrieval]\ntop_k = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("Unknown embedding provider"));
    }

    #[test]
    fn remote_provider_requires_model() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_overlap_not_below_max() {
        let config: Config =
            toml::from_str("[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn retry_policy_from_config() {
        let config: Config = toml::from_str(
            "[completion]\nmax_attempts = 3\nbackoff_multiplier_secs = 0.5\nbackoff_max_secs = 2.0\n",
        )
        .unwrap();
        let policy = config.completion.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.multiplier, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
    }

    #[test]
    fn rejects_non_finite_backoff() {
        for body in [
            "[completion]\nbackoff_max_secs = inf\n",
            "[completion]\nbackoff_max_secs = 1e30\n",
            "[completion]\nbackoff_multiplier_secs = nan\n",
            "[completion]\nbackoff_multiplier_secs = -1.0\n",
        ] {
            let config: Config = toml::from_str(body).unwrap();
            let err = validate(&config).unwrap_err().to_string();
            assert!(err.contains("must be between 0 and"), "{body}: {err}");
        }
    }

    #[test]
    fn unvalidated_backoff_does_not_panic() {
        let config: Config = toml::from_str("[completion]\nbackoff_max_secs = inf\n").unwrap();
        let policy = config.completion.retry_policy();
        assert_eq!(policy.max_backoff, Duration::from_secs(40));
        assert!(policy.backoff(10) <= Duration::from_secs(40));
    }

    #[test]
    fn default_greeting_names_company() {
        let assistant = AssistantConfig::default();
        assert!(assistant.greeting().contains("Li Auto Copilot"));
    }
}
