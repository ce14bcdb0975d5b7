//! Configuration types and loading
//!
//! Config precedence: `--config` > `CONFIG_PATH` env var > `gemini-quota.toml`.
//! Every section is optional; a missing default file means built-in defaults.
//! API keys are never read from the TOML: they come from the env slots named
//! by `credentials.env_prefix`, so the config file is safe to commit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quota_router::{DEFAULT_ENV_PREFIX, DEFAULT_MODEL_CHAIN, ModelChain, RetryPolicy};
use serde::Deserialize;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gemini-quota.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub credentials: CredentialsConfig,
    pub models: ModelsConfig,
    pub state: StateConfig,
    pub retry: RetryConfig,
    pub upstream: UpstreamConfig,
}

/// Where API keys are read from
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Primary env var; extensions are `<prefix>_2`, `<prefix>_3`, ...
    pub env_prefix: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }
}

/// Model fallback chain, highest daily allowance first
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub chain: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chain: DEFAULT_MODEL_CHAIN.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Quota state persistence
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("quota_state.json"),
        }
    }
}

/// Rate-limit retry settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries_per_pair: u32,
    pub buffer_secs: u64,
    pub backoff_base_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries_per_pair: policy.max_retries_per_pair,
            buffer_secs: policy.buffer.as_secs(),
            backoff_base_secs: policy.backoff_base.as_secs(),
            max_backoff_secs: policy.max_backoff.as_secs(),
        }
    }
}

/// Generation API endpoint
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    ///
    /// Only used for the implicit default path; an explicitly named file that
    /// does not exist is an error.
    pub fn load_or_default(path: &Path) -> common::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> common::Result<()> {
        if self.credentials.env_prefix.trim().is_empty() {
            return Err(common::Error::Config(
                "credentials.env_prefix must not be empty".into(),
            ));
        }

        if self.models.chain.iter().all(|m| m.trim().is_empty()) {
            return Err(common::Error::Config(
                "models.chain must list at least one model".into(),
            ));
        }

        if self.retry.max_retries_per_pair == 0 {
            return Err(common::Error::Config(
                "retry.max_retries_per_pair must be at least 1".into(),
            ));
        }

        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream.base_url must start with http:// or https://, got: {}",
                self.upstream.base_url
            )));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Model chain for the router.
    pub fn model_chain(&self) -> quota_router::Result<ModelChain> {
        ModelChain::new(self.models.chain.iter().cloned())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries_per_pair: self.retry.max_retries_per_pair,
            buffer: Duration::from_secs(self.retry.buffer_secs),
            backoff_base: Duration::from_secs(self.retry.backoff_base_secs),
            max_backoff: Duration::from_secs(self.retry.max_backoff_secs),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    /// Resolve the config file path from the CLI arg or `CONFIG_PATH`.
    ///
    /// Returns the path and whether it was named explicitly.
    pub fn resolve_path(cli_path: Option<&Path>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (p.to_path_buf(), true);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return (PathBuf::from(p), true);
        }
        (PathBuf::from(DEFAULT_CONFIG_FILE), false)
    }
}
