//! TOML Configuration File Support
//!
//! Centralized configuration loading for the tutor, supporting a TOML
//! configuration file at `~/.config/grade9-tutor/tutor.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [llm]
//! api_key = "sk-live-..."
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! temperature = 0.7
//! max_tokens = 500
//! request_timeout_secs = 30
//! idle_timeout_secs = 20
//!
//! [chat]
//! context_messages = 10
//! memory_cap = 20
//!
//! [storage]
//! path = "/home/me/.local/share/grade9-tutor/chat_history.jsonl"
//! per_character_cap = 100
//! global_cap = 400
//! ```
//!
//! A missing or placeholder API key is reported as
//! [`ConfigError::MissingApiKey`] by [`TutorConfig::validate`]; everything
//! except chat keeps working without one.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::ChatConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// No usable API key
    #[error("No API key configured; set TUTOR_API_KEY or [llm].api_key to enable chat")]
    MissingApiKey,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// LLM section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmToml {
    /// API key for the completion endpoint
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API
    pub base_url: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Default sampling temperature
    pub temperature: Option<f32>,
    /// Default maximum response tokens
    pub max_tokens: Option<u32>,
    /// Seconds to wait for response headers (and for single-shot calls)
    pub request_timeout_secs: Option<u64>,
    /// Seconds allowed between streamed fragments
    pub idle_timeout_secs: Option<u64>,
    /// Upper bound on a whole streamed response, in seconds
    pub stream_timeout_secs: Option<u64>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Previous messages sent as context
    pub context_messages: Option<usize>,
    /// Messages kept in memory per character
    pub memory_cap: Option<usize>,
    /// Maximum size of a user message in bytes
    pub max_message_bytes: Option<usize>,
    /// Maximum user messages per minute
    pub max_messages_per_minute: Option<u32>,
}

/// Storage section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Path of the chat history file
    pub path: Option<String>,
    /// Keep history in memory only
    pub in_memory: Option<bool>,
    /// Persisted messages kept per character
    pub per_character_cap: Option<usize>,
    /// Persisted messages kept overall
    pub global_cap: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorToml {
    /// LLM configuration section
    pub llm: LlmToml,
    /// Chat configuration section
    pub chat: ChatToml,
    /// Storage configuration section
    pub storage: StorageToml,
}

// =============================================================================
// Resolved Settings
// =============================================================================

/// Settings for the completion backend
#[derive(Clone, Debug)]
pub struct LlmSettings {
    /// API key (may be empty or a placeholder until validated)
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Default sampling temperature
    pub temperature: f32,
    /// Default maximum response tokens
    pub max_tokens: u32,
    /// Time allowed for response headers and single-shot calls
    pub request_timeout: Duration,
    /// Time allowed between streamed fragments
    pub idle_timeout: Duration,
    /// Time allowed for a whole streamed response
    pub stream_timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(20),
            stream_timeout: Duration::from_secs(120),
        }
    }
}

impl LlmSettings {
    /// The API key, if it is usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingApiKey`] for empty or placeholder keys.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        if is_placeholder_key(&self.api_key) {
            Err(ConfigError::MissingApiKey)
        } else {
            Ok(self.api_key.trim())
        }
    }
}

/// Placeholder values shipped in sample env files
const PLACEHOLDER_KEYS: &[&str] = &[
    "changeme",
    "your-api-key",
    "your_api_key",
    "your_api_key_here",
    "your-openai-api-key",
    "<api-key>",
    "sk-xxx",
    "sk-...",
    "todo",
];

fn is_placeholder_key(key: &str) -> bool {
    let key = key.trim();
    if key.is_empty() {
        return true;
    }
    let lower = key.to_lowercase();
    PLACEHOLDER_KEYS.contains(&lower.as_str()) || lower.starts_with("your")
}

/// Settings for history persistence
#[derive(Clone, Debug)]
pub struct StorageSettings {
    /// Path of the chat history file
    pub path: Option<PathBuf>,
    /// Keep history in memory only
    pub in_memory: bool,
    /// Persisted messages kept per character
    pub per_character_cap: usize,
    /// Persisted messages kept overall
    pub global_cap: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            in_memory: false,
            per_character_cap: 100,
            global_cap: 400,
        }
    }
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the tutor
#[derive(Clone, Debug, Default)]
pub struct TutorConfig {
    /// Completion backend settings
    pub llm: LlmSettings,
    /// Orchestrator settings
    pub chat: ChatConfig,
    /// Persistence settings
    pub storage: StorageSettings,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl TutorConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Orchestrator settings with the LLM sampling defaults folded in
    #[must_use]
    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            default_temperature: self.llm.temperature,
            default_max_tokens: self.llm.max_tokens,
            ..self.chat.clone()
        }
    }

    /// Check that the configuration can drive a chat session
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for out-of-range values.
    /// Only when every value is in range is a missing or placeholder key
    /// reported, as [`ConfigError::MissingApiKey`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(format!(
                "temperature must be between 0.0 and 2.0 (got {})",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        // memory_cap 0 keeps every message
        let over_cap = self.chat.memory_cap != 0 && self.chat.context_messages > self.chat.memory_cap;
        if self.chat.context_messages == 0 || over_cap {
            return Err(ConfigError::ValidationError(format!(
                "context_messages must be between 1 and memory_cap ({})",
                self.chat.memory_cap
            )));
        }
        if self.storage.global_cap < self.storage.per_character_cap {
            return Err(ConfigError::ValidationError(
                "global_cap must not be smaller than per_character_cap".to_string(),
            ));
        }
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be an http(s) URL (got {})",
                self.llm.base_url
            )));
        }

        self.llm.require_api_key().map(|_| ())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/grade9-tutor/tutor.toml` or
/// `~/.config/grade9-tutor/tutor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("grade9-tutor").join("tutor.toml"))
}

/// Get the default chat history path
#[must_use]
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("grade9-tutor").join("chat_history.jsonl"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<TutorConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<TutorConfig, ConfigError> {
    let mut config = TutorConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: TutorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Apply TOML configuration values to the config struct
pub fn apply_toml_config(config: &mut TutorConfig, toml: &TutorToml) {
    // LLM settings
    if let Some(ref key) = toml.llm.api_key {
        config.llm.api_key.clone_from(key);
    }
    if let Some(ref url) = toml.llm.base_url {
        config.llm.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ref model) = toml.llm.model {
        config.llm.model.clone_from(model);
    }
    if let Some(temperature) = toml.llm.temperature {
        config.llm.temperature = temperature;
    }
    if let Some(max_tokens) = toml.llm.max_tokens {
        config.llm.max_tokens = max_tokens;
    }
    if let Some(secs) = toml.llm.request_timeout_secs {
        config.llm.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.llm.idle_timeout_secs {
        config.llm.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.llm.stream_timeout_secs {
        config.llm.stream_timeout = Duration::from_secs(secs);
    }

    // Chat settings
    if let Some(count) = toml.chat.context_messages {
        config.chat.context_messages = count;
    }
    if let Some(cap) = toml.chat.memory_cap {
        config.chat.memory_cap = cap;
    }
    if let Some(bytes) = toml.chat.max_message_bytes {
        config.chat.limits.max_message_bytes = bytes;
    }
    if let Some(rate) = toml.chat.max_messages_per_minute {
        config.chat.limits.max_messages_per_minute = rate;
    }

    // Storage settings
    if let Some(ref path) = toml.storage.path {
        config.storage.path = Some(PathBuf::from(path));
    }
    if let Some(in_memory) = toml.storage.in_memory {
        config.storage.in_memory = in_memory;
    }
    if let Some(cap) = toml.storage.per_character_cap {
        config.storage.per_character_cap = cap;
    }
    if let Some(cap) = toml.storage.global_cap {
        config.storage.global_cap = cap;
    }
}

/// Apply environment variable overrides to the config
///
/// `lookup` returns the value of a variable; pass `|k| std::env::var(k).ok()`
/// for the process environment.
pub fn apply_env_config<F>(config: &mut TutorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("TUTOR_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
        config.llm.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(url) = lookup("TUTOR_BASE_URL") {
        config.llm.base_url = url.trim_end_matches('/').to_string();
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup("TUTOR_MODEL") {
        config.llm.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(temperature) = lookup("TUTOR_TEMPERATURE").and_then(|v| v.parse::<f32>().ok()) {
        config.llm.temperature = temperature;
        config.source = ConfigSource::Env;
    }
    if let Some(max_tokens) = lookup("TUTOR_MAX_TOKENS").and_then(|v| v.parse::<u32>().ok()) {
        config.llm.max_tokens = max_tokens;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("TUTOR_REQUEST_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
        config.llm.request_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = lookup("TUTOR_IDLE_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
        config.llm.idle_timeout = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup("TUTOR_STORE_PATH") {
        config.storage.path = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Model override
    pub model: Option<String>,
    /// Store path override
    pub store_path: Option<PathBuf>,
    /// Memory-only storage override
    pub in_memory_store: Option<bool>,
    /// Temperature override
    pub temperature: Option<f32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set store path override
    #[must_use]
    pub fn with_store_path(mut self, path: PathBuf) -> Self {
        self.store_path = Some(path);
        self
    }

    /// Set memory-only storage override
    #[must_use]
    pub fn with_in_memory_store(mut self, in_memory: bool) -> Self {
        self.in_memory_store = Some(in_memory);
        self
    }

    /// Set temperature override
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut TutorConfig) {
        if self.model.is_none()
            && self.store_path.is_none()
            && self.in_memory_store.is_none()
            && self.temperature.is_none()
        {
            return;
        }

        if let Some(ref model) = self.model {
            config.llm.model.clone_from(model);
        }
        if let Some(ref path) = self.store_path {
            config.storage.path = Some(path.clone());
        }
        if let Some(in_memory) = self.in_memory_store {
            config.storage.in_memory = in_memory;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }
        config.source = ConfigSource::Cli;
    }
}
