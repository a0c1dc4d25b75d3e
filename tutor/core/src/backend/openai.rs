//! OpenAI-compatible Backend Implementation
//!
//! Completion backend for any server that speaks the OpenAI chat-completions
//! protocol (OpenAI itself, or a local gateway).
//!
//! # API
//!
//! - `POST {base_url}/chat/completions` with bearer auth
//! - streaming responses arrive as `data: {...}` frames ending in
//!   `data: [DONE]` (see [`super::sse`])
//!
//! Streaming runs in a spawned reader task that owns the HTTP response.
//! Dropping the token receiver stops the task and closes the connection.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::sse::{SseDecoder, SseEvent};
use super::traits::{
    ChatTurn, CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
    StreamingToken,
};
use crate::config::LlmSettings;

/// Longest error body kept from a failed response
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Request body for `/chat/completions`
#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    total_tokens: Option<u32>,
}

/// OpenAI-compatible backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    /// API root, without trailing slash
    base_url: String,
    /// Bearer token
    api_key: String,
    /// Model name sent with every request
    model: String,
    /// Limit for response headers and single-shot calls
    request_timeout: Duration,
    /// Limit between streamed chunks
    idle_timeout: Duration,
    /// Limit for a whole streamed response
    stream_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Create a backend with default timeouts
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, CompletionError> {
        let defaults = LlmSettings::default();
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            request_timeout: defaults.request_timeout,
            idle_timeout: defaults.idle_timeout,
            stream_timeout: defaults.stream_timeout,
            http_client: reqwest::Client::builder().build()?,
        })
    }

    /// Create from resolved settings
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError::Transport`] if the HTTP client cannot be built.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, CompletionError> {
        Ok(
            Self::new(&settings.base_url, settings.api_key.trim(), &settings.model)?
                .with_timeouts(settings.request_timeout, settings.idle_timeout)
                .with_stream_timeout(settings.stream_timeout),
        )
    }

    /// Override the header and idle timeouts
    #[must_use]
    pub fn with_timeouts(mut self, request_timeout: Duration, idle_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Override the whole-response timeout for streams
    #[must_use]
    pub fn with_stream_timeout(mut self, stream_timeout: Duration) -> Self {
        self.stream_timeout = stream_timeout;
        self
    }

    /// Model name sent with requests
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest, stream: bool) -> ChatBody<'a> {
        ChatBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout(self.request_timeout)
        } else {
            CompletionError::from(err)
        }
    }
}

/// Turn a non-success response into an error carrying (part of) its body
async fn status_error(response: reqwest::Response) -> CompletionError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    CompletionError::Http {
        status,
        body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

#[async_trait]
impl CompletionClient for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, CompletionError> {
        let (tx, rx) = mpsc::channel(100);

        tracing::debug!(
            model = %self.model,
            turns = request.messages.len(),
            "Starting streaming completion"
        );

        let send = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.body(request, true))
            .send();

        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| CompletionError::Timeout(self.request_timeout))?
            .map_err(|e| self.map_send_error(e))?;

        // Check for HTTP errors
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let mut stream = response.bytes_stream();
        let idle_timeout = self.idle_timeout;
        let stream_timeout = self.stream_timeout;

        // Spawn task to process stream
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + stream_timeout;
            let mut decoder = SseDecoder::new();
            let mut full_response = String::new();

            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let wait = idle_timeout.min(remaining);

                let next = tokio::select! {
                    () = tx.closed() => {
                        // Receiver dropped, stop streaming
                        tracing::debug!("Completion receiver dropped, cancelling stream");
                        return;
                    }
                    next = tokio::time::timeout(wait, stream.next()) => next,
                };

                let (events, ended) = match next {
                    Err(_) => {
                        let limit = if wait < idle_timeout {
                            stream_timeout
                        } else {
                            idle_timeout
                        };
                        tracing::warn!(?limit, "Completion stream stalled");
                        let _ = tx
                            .send(StreamingToken::Error(CompletionError::Timeout(limit)))
                            .await;
                        return;
                    }
                    Ok(Some(Err(e))) => {
                        let _ = tx.send(StreamingToken::Error(e.into())).await;
                        return;
                    }
                    Ok(Some(Ok(bytes))) => (decoder.push(&bytes), false),
                    Ok(None) => (decoder.finish(), true),
                };

                for event in events {
                    match event {
                        SseEvent::Delta(text) => {
                            full_response.push_str(&text);
                            if tx.send(StreamingToken::Token(text)).await.is_err() {
                                return;
                            }
                        }
                        SseEvent::Done => {
                            let _ = tx
                                .send(StreamingToken::Complete {
                                    message: full_response,
                                })
                                .await;
                            return;
                        }
                    }
                }

                if ended {
                    break;
                }
            }

            // Stream ended without done signal
            let terminal = if full_response.is_empty() {
                StreamingToken::Error(CompletionError::Malformed(
                    "stream closed before any content".to_string(),
                ))
            } else {
                StreamingToken::Complete {
                    message: full_response,
                }
            };
            let _ = tx.send(terminal).await;
        });

        Ok(rx)
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&self.body(request, false))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        let data: CompletionBody = serde_json::from_slice(&bytes)
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::Malformed("response has no content".to_string()))?;

        Ok(CompletionResponse {
            content,
            model: data.model.unwrap_or_else(|| self.model.clone()),
            tokens_used: data.usage.and_then(|u| u.total_tokens),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}
