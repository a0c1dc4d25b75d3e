//! Tutor Core - Headless Conversation Core for the Grade-9 Science Tutor
//!
//! Four AI tutor characters (Aristotle, Mendel, Curie and Newton) each keep
//! their own conversation with the student. This crate manages those
//! conversations independently of any UI: it streams replies from a
//! chat-completion API into incremental message updates, persists settled
//! messages, and serializes every mutation behind one lock.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  UI (CLI, app, test harness)                  │
//! │        ChatStream (per send)      HistorySnapshot (bcast)     │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┴──────────────────────────────────┐
//! │                      ChatOrchestrator                         │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────────────────────┐ │
//! │  │ Conversation │ │   Context    │ │   CompletionClient     │ │
//! │  │    Store     │ │   Resolver   │ │   (OpenAI-compatible)  │ │
//! │  └──────────────┘ └──────────────┘ └────────────────────────┘ │
//! │  ┌──────────────────────────────────────────────────────────┐ │
//! │  │        HistoryArchive → MessageStore (memory / JSONL)     │ │
//! │  └──────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use tutor_core::{
//!     backend::OpenAiBackend, store::{HistoryArchive, JsonlStore},
//!     ChatOrchestrator, CurriculumContext, SendOptions,
//! };
//!
//! let config = tutor_core::load_config()?;
//! let client = OpenAiBackend::from_settings(&config.llm)?;
//! let store = JsonlStore::open("chat_history.jsonl").await?;
//! let chat = ChatOrchestrator::new(
//!     client,
//!     HistoryArchive::new(Arc::new(store)),
//!     Arc::new(CurriculumContext::grade9_science()),
//!     config.chat_config(),
//! );
//! chat.load_history().await?;
//!
//! let mut stream = chat.send_message("What is mitosis?", SendOptions::default())?;
//! while let Some(message) = stream.next().await {
//!     println!("{}", message.content);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: completion client abstraction and the OpenAI-compatible client
//! - [`character`]: the four tutor personas and their prompts
//! - [`chat`]: the orchestrator
//! - [`config`]: TOML + environment + CLI configuration
//! - [`context`]: learning context resolution
//! - [`history`]: in-memory per-character histories
//! - [`messages`]: chat messages and snapshots
//! - [`security`]: input validation
//! - [`store`]: persistence

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod character;
pub mod chat;
pub mod config;
pub mod context;
pub mod history;
pub mod messages;
pub mod security;
pub mod store;

// Re-exports for convenience
pub use backend::{
    ChatRole, ChatTurn, CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
    OpenAiBackend, StreamingToken,
};
pub use character::{system_prompt, CharacterId, Persona, UnknownCharacter};
pub use chat::{ChatConfig, ChatError, ChatOrchestrator, ChatStream, SendOptions};
pub use context::{
    ContextResolver, CurriculumContext, LearningContext, Lesson, Location, ProgressStats,
};
pub use history::{ConversationHistory, ConversationStore, DEFAULT_MEMORY_CAP};
pub use messages::{ChatMessage, HistorySnapshot, MessageId, MessageRole, RETRY_PROMPT};
pub use security::{ChatLimits, InputValidator, ValidationResult};
pub use store::{
    HistoryArchive, JsonlStore, MemoryStore, MessageRecord, MessageStore, Sender, StoreError,
};

// Config exports
pub use config::{
    default_config_path, default_store_path, load_config, load_config_from_path, ConfigError,
    ConfigOverrides, ConfigSource, LlmSettings, StorageSettings, TutorConfig, TutorToml,
};
