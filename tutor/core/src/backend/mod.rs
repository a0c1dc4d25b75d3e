//! Completion Backend Integration
//!
//! Abstracted access to chat-completion backends through a common trait.
//!
//! # Available Backends
//!
//! - **OpenAI-compatible**: any `/chat/completions` endpoint with SSE streaming
//!
//! # Usage
//!
//! ```ignore
//! use tutor_core::backend::{ChatTurn, CompletionClient, CompletionRequest, OpenAiBackend};
//!
//! let backend = OpenAiBackend::new("https://api.openai.com/v1", key, "gpt-4o-mini")?;
//! let request = CompletionRequest::new(vec![ChatTurn::user("What is mitosis?")]);
//! let rx = backend.stream_completion(&request).await?;
//! ```

mod openai;
pub mod sse;
mod traits;

pub use openai::OpenAiBackend;
pub use traits::{
    ChatRole, ChatTurn, CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
    StreamingToken,
};
