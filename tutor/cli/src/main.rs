//! Tutor CLI - Terminal Front End
//!
//! Chat with the four Grade-9 science tutors from a terminal. Replies stream
//! in as they are generated; history is kept per character and persisted
//! between runs.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config at ~/.config/grade9-tutor/tutor.toml)
//! tutor
//!
//! # Start with Marie Curie, a different model, history in memory only
//! tutor --character curie --model gpt-4o --memory-store
//!
//! # Verbose logging (goes to stderr)
//! RUST_LOG=debug tutor
//! ```
//!
//! # Environment Variables
//!
//! - `TUTOR_API_KEY` / `OPENAI_API_KEY`: completion API key
//! - `TUTOR_BASE_URL`, `TUTOR_MODEL`: API endpoint and model
//! - `TUTOR_CONFIG`: configuration file path
//! - `RUST_LOG`: log filter (overrides `--log-level`)
//!
//! Without an API key the tutor starts in greeting-only mode.

mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tutor_core::store::{HistoryArchive, JsonlStore, MemoryStore, MessageStore};
use tutor_core::{
    load_config, load_config_from_path, CharacterId, ChatOrchestrator, ConfigError,
    ConfigOverrides, ContextResolver, CurriculumContext, OpenAiBackend, TutorConfig,
};

use repl::Repl;

/// Tutor - chat with Aristotle, Mendel, Curie and Newton about Grade 9 science
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "TUTOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Character to start with (aristotle, mendel, curie, newton)
    #[arg(long, default_value = "aristotle", value_name = "NAME")]
    character: CharacterId,

    /// Completion model
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Chat history file
    #[arg(long, value_name = "PATH", conflicts_with = "memory_store")]
    store: Option<PathBuf>,

    /// Keep chat history in memory only
    #[arg(long)]
    memory_store: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "TUTOR_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref model) = self.model {
            overrides = overrides.with_model(model.clone());
        }
        if let Some(ref path) = self.store {
            overrides = overrides.with_store_path(path.clone());
        }
        if self.memory_store {
            overrides = overrides.with_in_memory_store(true);
        }
        overrides
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so they never interleave with the conversation.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("tutor={level},tutor_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration from file, environment and flags
fn resolve_config(args: &Args) -> Result<TutorConfig> {
    let mut config = match args.config {
        Some(ref path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    args.overrides().apply(&mut config);
    info!(source = %config.source(), model = %config.llm.model, "Configuration resolved");
    Ok(config)
}

async fn open_store(config: &TutorConfig) -> Result<Arc<dyn MessageStore>> {
    if config.storage.in_memory {
        info!("Keeping chat history in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = config
        .storage
        .path
        .clone()
        .context("No chat history location; pass --store <PATH> or --memory-store")?;
    let store = JsonlStore::open(&path)
        .await
        .with_context(|| format!("Failed to open chat history at {}", path.display()))?;
    info!(path = %path.display(), "Using chat history file");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(&args)?;

    let chat_enabled = match config.validate() {
        Ok(()) => true,
        Err(ConfigError::MissingApiKey) => {
            warn!("No API key configured, starting in greeting-only mode");
            false
        }
        Err(e) => return Err(e).context("Invalid configuration"),
    };

    let archive = HistoryArchive::with_caps(
        open_store(&config).await?,
        config.storage.per_character_cap,
        config.storage.global_cap,
    );
    let curriculum = Arc::new(CurriculumContext::grade9_science());
    let client =
        OpenAiBackend::from_settings(&config.llm).context("Failed to create completion client")?;

    let chat = ChatOrchestrator::new(
        client,
        archive,
        Arc::clone(&curriculum) as Arc<dyn ContextResolver>,
        config.chat_config(),
    );

    match chat.load_history().await {
        Ok(restored) => info!(restored, "Chat history loaded"),
        Err(e) => warn!(error = %e, "Could not load chat history, starting fresh"),
    }

    let mut repl = Repl::new(chat, curriculum, chat_enabled);
    repl.start(args.character).await?;
    repl.run().await
}
