//! Gemini quota fallback CLI
//!
//! Single binary that:
//! 1. Reads API keys from `GEMINI_API_KEY`, `GEMINI_API_KEY_2`, ...
//! 2. Tracks exhausted (key, model) pairs for the current UTC day
//! 3. Routes generation requests through the fallback chain
//! 4. Reports or resets the persisted quota state

mod config;
mod error;
mod gemini;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use quota_router::{
    CredentialPool, FileStorage, ModelChain, QuotaStore, Router, SharedCredential,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::gemini::GeminiClient;

#[derive(Parser, Debug)]
#[command(name = "gemini-quota", version, about = "Multi-key, multi-model Gemini quota fallback")]
struct Cli {
    /// Config file (defaults to $CONFIG_PATH, then gemini-quota.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which key/model combinations are available today
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget all exhausted marks
    Reset,
    /// Generate text, falling back across keys and models
    Generate {
        #[arg(long)]
        prompt: String,

        /// Override the configured model chain (repeatable, in order)
        #[arg(long = "model")]
        models: Vec<String>,

        /// Attempts on a rate-limited pair before moving on
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn load_config(cli_path: Option<&std::path::Path>) -> Result<Config> {
    let (path, explicit) = Config::resolve_path(cli_path);
    info!(path = %path.display(), explicit, "loading configuration");

    let config = if explicit {
        Config::load(&path)
    } else {
        Config::load_or_default(&path)
    }
    .with_context(|| format!("failed to load config from {}", path.display()))?;

    info!(
        env_prefix = %config.credentials.env_prefix,
        models = config.models.chain.len(),
        state_path = %config.state.path.display(),
        upstream_url = %config.upstream.base_url,
        "configuration loaded"
    );
    Ok(config)
}

fn build_store(config: &Config) -> Arc<QuotaStore> {
    Arc::new(QuotaStore::new(Arc::new(FileStorage::new(
        config.state.path.clone(),
    ))))
}

fn build_router(config: &Config, binding: SharedCredential) -> Result<Router> {
    let pool = CredentialPool::from_env(&config.credentials.env_prefix)
        .context("failed to load API keys")?;
    let chain = config.model_chain().context("invalid model chain")?;
    info!(keys = pool.len(), models = chain.len(), "router ready");

    Ok(Router::new(pool, build_store(config))
        .with_chain(chain)
        .with_policy(config.retry_policy())
        .with_binding(binding))
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Status { json } => {
            let router = build_router(&config, SharedCredential::new())?;
            let report = router.report_availability().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }
        Command::Reset => {
            // Keys are not needed to clear state.
            let store = build_store(&config);
            store
                .reset()
                .await
                .context("failed to reset quota state")?;
            println!(
                "Quota state cleared ({}).",
                config.state.path.display()
            );
        }
        Command::Generate {
            prompt,
            models,
            max_retries,
        } => {
            let binding = SharedCredential::new();
            let router = build_router(&config, binding.clone())?;
            let client = GeminiClient::new(
                &config.upstream.base_url,
                config.upstream_timeout(),
                binding,
            )
            .context("failed to build HTTP client")?;

            let chain = if models.is_empty() {
                router.chain().clone()
            } else {
                ModelChain::new(models).context("invalid --model list")?
            };
            let max_retries = max_retries.unwrap_or(router.policy().max_retries_per_pair);

            let client = &client;
            let prompt = prompt.as_str();
            let text = router
                .execute_with(&chain, max_retries, move |attempt| async move {
                    client.generate(attempt.model, prompt).await
                })
                .await?;
            println!("{text}");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let prometheus = if cli.metrics {
        match metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to install Prometheus recorder");
                None
            }
        }
    } else {
        None
    };

    let result = run(cli).await;

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }

    result
}
