//! Completion Client Traits
//!
//! Trait definitions for chat-completion backends. The orchestrator only
//! talks to [`CompletionClient`], so tests can drive it with scripted
//! backends and production uses [`super::OpenAiBackend`].
//!
//! # Contract
//!
//! - `stream_completion` yields fragments over a channel and always ends with
//!   exactly one terminal token ([`StreamingToken::Complete`] or
//!   [`StreamingToken::Error`]) unless the receiver is dropped first
//! - dropping the receiver cancels the underlying request
//! - both calls are bounded by timeouts and report
//!   [`CompletionError::Timeout`] instead of hanging

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Token stream events from completion backends
#[derive(Clone, Debug)]
pub enum StreamingToken {
    /// A text fragment of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (concatenation of all fragments)
        message: String,
    },
    /// Error occurred during streaming
    Error(CompletionError),
}

/// Errors raised by completion backends
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    /// No response, or no fragment, within the allowed time
    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    /// The API answered with a non-success status
    #[error("Completion API returned {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Network or protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response could not be understood
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The consumer went away before the response finished
    #[error("Completion cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Role of a turn sent to the completion API
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions and context
    System,
    /// The student
    User,
    /// The tutor
    Assistant,
}

/// One turn of the request transcript
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Who said it
    pub role: ChatRole,
    /// What was said
    pub content: String,
}

impl ChatTurn {
    /// Create a system turn
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion request
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// Transcript, system turn first
    pub messages: Vec<ChatTurn>,
    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,
    /// Maximum tokens in the response
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Create a request with default sampling settings
    #[must_use]
    pub fn new(messages: Vec<ChatTurn>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 500,
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }
}

/// Response from a single-shot completion
#[derive(Clone, Debug)]
pub struct CompletionResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if reported)
    pub tokens_used: Option<u32>,
    /// Response generation time in milliseconds
    pub duration_ms: u64,
}

/// Chat-completion backend
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Start a streaming completion
    ///
    /// Returns a channel receiver that will receive fragments as they arrive,
    /// followed by one terminal token.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, CompletionError>;

    /// Single-shot completion
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, CompletionError>;
}
