//! Chat Orchestrator - The Conversation Core
//!
//! The orchestrator owns one history per tutor character and is the only
//! writer to them. It serializes every mutating operation behind a single
//! async lock, drives the completion client, and broadcasts a
//! [`HistorySnapshot`] of the active character after every change.
//!
//! # Critical sections
//!
//! `send_message`, `retry_last_message`, `clear_history`, `switch_character`
//! and `load_history` all queue on the same FIFO lock, whichever character
//! they touch. A send holds the lock for the whole exchange: the guard lives
//! inside the returned [`ChatStream`] and is released when the stream ends or
//! is dropped.
//!
//! # Streams
//!
//! A chat stream is lazy. Nothing happens until it is polled; it then yields
//! the user message, each provisional assistant update, and finally either
//! the completed reply or an error notice. Dropping it mid-response removes
//! the provisional record and cancels the HTTP request.
//!
//! # Snapshots
//!
//! Snapshots are built and sent while the state write lock is held, so
//! subscribers see them in mutation order with strictly increasing
//! revisions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::backend::{
    ChatTurn, CompletionClient, CompletionError, CompletionRequest, StreamingToken,
};
use crate::character::{system_prompt, CharacterId};
use crate::context::{ContextResolver, LearningContext, ProgressStats};
use crate::history::{ConversationHistory, ConversationStore, DEFAULT_MEMORY_CAP};
use crate::messages::{ChatMessage, HistorySnapshot, MessageId, MessageRole};
use crate::security::{ChatLimits, InputValidator, ValidationResult};
use crate::store::{HistoryArchive, StoreError};

/// Messages yielded by a send or retry
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatMessage> + Send>>;

/// Capacity of the snapshot broadcast channel
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Previous settled messages sent as context (user message included)
    pub context_messages: usize,
    /// Messages kept in memory per character
    pub memory_cap: usize,
    /// Temperature when a send does not specify one
    pub default_temperature: f32,
    /// Response token limit when a send does not specify one
    pub default_max_tokens: u32,
    /// Input limits
    pub limits: ChatLimits,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_messages: 10,
            memory_cap: DEFAULT_MEMORY_CAP,
            default_temperature: 0.7,
            default_max_tokens: 500,
            limits: ChatLimits::default(),
        }
    }
}

/// Per-send options
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendOptions {
    /// Lesson the question is about
    pub lesson_id: Option<String>,
    /// Module of that lesson (ignored without `lesson_id`)
    pub module_index: Option<usize>,
    /// Sampling temperature override
    pub temperature: Option<f32>,
    /// Response token limit override
    pub max_tokens: Option<u32>,
}

impl SendOptions {
    /// Ask about a lesson
    #[must_use]
    pub fn for_lesson(lesson_id: impl Into<String>) -> Self {
        Self {
            lesson_id: Some(lesson_id.into()),
            ..Self::default()
        }
    }

    /// Ask about one module of a lesson
    #[must_use]
    pub fn for_module(lesson_id: impl Into<String>, module_index: usize) -> Self {
        Self {
            lesson_id: Some(lesson_id.into()),
            module_index: Some(module_index),
            ..Self::default()
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Errors returned by orchestrator operations
///
/// Completion failures are not errors here: they surface as an error
/// message inside the chat stream.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The message was rejected before anything was sent
    #[error("Invalid message: {0}")]
    InvalidInput(String),

    /// Too many messages in a short time
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// State guarded by the short synchronous lock
#[derive(Debug)]
struct ChatState {
    active: CharacterId,
    histories: ConversationStore,
    revision: u64,
}

impl ChatState {
    fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            character: self.active,
            revision: self.revision,
            messages: Arc::from(self.histories.get(self.active).messages()),
        }
    }
}

struct Shared<C> {
    config: ChatConfig,
    client: C,
    archive: HistoryArchive,
    context: Arc<dyn ContextResolver>,
    validator: InputValidator,
    state: RwLock<ChatState>,
    /// Serializes critical sections (FIFO)
    exclusive: Arc<Mutex<()>>,
    snapshots: broadcast::Sender<HistorySnapshot>,
}

/// Conversation orchestrator handle
///
/// Cheap to clone; every clone drives the same conversations.
pub struct ChatOrchestrator<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for ChatOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: CompletionClient + 'static> ChatOrchestrator<C> {
    /// Create an orchestrator with empty histories, Aristotle active
    pub fn new(
        client: C,
        archive: HistoryArchive,
        context: Arc<dyn ContextResolver>,
        config: ChatConfig,
    ) -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let state = ChatState {
            active: CharacterId::default(),
            histories: ConversationStore::new(config.memory_cap),
            revision: 0,
        };

        Self {
            shared: Arc::new(Shared {
                validator: InputValidator::new(config.limits.clone()),
                config,
                client,
                archive,
                context,
                state: RwLock::new(state),
                exclusive: Arc::new(Mutex::new(())),
                snapshots,
            }),
        }
    }

    /// The completion client
    #[must_use]
    pub fn client(&self) -> &C {
        &self.shared.client
    }

    /// The orchestrator configuration
    #[must_use]
    pub fn config(&self) -> &ChatConfig {
        &self.shared.config
    }

    /// Character the next send goes to
    #[must_use]
    pub fn active_character(&self) -> CharacterId {
        self.shared.state.read().active
    }

    /// Copy of a character's in-memory history
    #[must_use]
    pub fn history(&self, character: CharacterId) -> Vec<ChatMessage> {
        self.shared.state.read().histories.get(character).messages().to_vec()
    }

    /// Snapshot of the active history as of the latest publication
    #[must_use]
    pub fn current_snapshot(&self) -> HistorySnapshot {
        self.shared.state.read().snapshot()
    }

    /// Receive every snapshot published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HistorySnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// The current snapshot followed by every later one
    ///
    /// Lagging subscribers skip the snapshots they missed.
    pub fn snapshot_stream(&self) -> impl Stream<Item = HistorySnapshot> + Send + 'static {
        let (current, rx) = {
            let state = self.shared.state.read();
            (state.snapshot(), self.shared.snapshots.subscribe())
        };

        tokio_stream::once(current).chain(BroadcastStream::new(rx).filter_map(|item| match item {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::debug!(error = %e, "Snapshot subscriber lagged");
                None
            }
        }))
    }

    /// Populate in-memory histories from the archive
    ///
    /// Returns the number of messages restored (after the memory cap).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Store`] if the archive cannot be read; histories
    /// are left untouched in that case.
    pub async fn load_history(&self) -> Result<usize, ChatError> {
        let _guard = self.shared.exclusive.lock().await;
        let archived = self.shared.archive.load().await?;

        let mut state = self.shared.state.write();
        for character in CharacterId::ALL {
            let messages: Vec<ChatMessage> = archived
                .iter()
                .filter(|m| m.character == character)
                .cloned()
                .collect();
            state.histories.get_mut(character).restore(messages);
        }
        let restored = state.histories.total_messages();
        self.publish_locked(&mut state);

        tracing::info!(
            archived = archived.len(),
            restored,
            "Loaded chat history"
        );
        Ok(restored)
    }

    /// Send a message to the active character
    ///
    /// The input is validated immediately; the exchange itself runs when the
    /// returned stream is polled. An accepted message takes its rate-limit
    /// slot at once, even if the stream is dropped unpolled.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidInput`] or [`ChatError::RateLimited`] when
    /// the message is rejected. Nothing is sent or stored in that case.
    pub fn send_message(
        &self,
        text: impl Into<String>,
        options: SendOptions,
    ) -> Result<ChatStream, ChatError> {
        let text = text.into();
        match self.shared.validator.validate_message(&text) {
            ValidationResult::Valid => {}
            ValidationResult::Invalid(reason) => {
                tracing::warn!(reason = %reason, "Rejected user message");
                return Err(ChatError::InvalidInput(reason));
            }
            ValidationResult::RateLimited(reason) => {
                tracing::warn!(reason = %reason, "Rate limited user message");
                return Err(ChatError::RateLimited(reason));
            }
        }

        let acquire = Arc::clone(&self.shared.exclusive).lock_owned();
        Ok(self.exchange(acquire, text, options, Resend::New))
    }

    /// Resend the most recent user message of the active character
    ///
    /// Returns `None`, leaving history untouched, when there is no user
    /// message to retry. Otherwise the lock is kept and a stream is returned
    /// that, once polled, removes trailing error notices, the last user
    /// message and anything after it (also from the archive) and sends the
    /// message again. Dropping the stream unpolled changes nothing.
    ///
    /// # Errors
    ///
    /// Currently infallible; archive failures are logged.
    pub async fn retry_last_message(
        &self,
        options: SendOptions,
    ) -> Result<Option<ChatStream>, ChatError> {
        let guard = Arc::clone(&self.shared.exclusive).lock_owned().await;

        let text = {
            let state = self.shared.state.read();
            let history = state.histories.get(state.active);
            history
                .last_user_index()
                .and_then(|index| history.messages().get(index))
                .map(|m| m.content.clone())
        };
        let Some(text) = text else {
            tracing::debug!(character = %self.active_character(), "Nothing to retry");
            return Ok(None);
        };

        Ok(Some(self.exchange(
            std::future::ready(guard),
            text,
            options,
            Resend::Retry,
        )))
    }

    /// Clear the active character's history, in memory and in the archive
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Store`] if the archive could not be updated. The
    /// in-memory history is cleared regardless.
    pub async fn clear_history(&self) -> Result<(), ChatError> {
        let _guard = self.shared.exclusive.lock().await;

        let character = {
            let mut state = self.shared.state.write();
            let character = state.active;
            state.histories.get_mut(character).clear();
            self.publish_locked(&mut state);
            character
        };

        let removed = self.shared.archive.clear_character(character).await?;
        tracing::info!(character = %character, removed, "Cleared chat history");
        Ok(())
    }

    /// Make `character` the active conversation
    ///
    /// A non-empty `greeting` is appended (and archived) as an assistant
    /// message, but only when the character already has history. Switching to
    /// the active character does nothing.
    ///
    /// # Errors
    ///
    /// Currently infallible; archive failures are logged.
    pub async fn switch_character(
        &self,
        character: CharacterId,
        greeting: Option<String>,
    ) -> Result<(), ChatError> {
        let _guard = self.shared.exclusive.lock().await;

        let greeting = {
            let mut state = self.shared.state.write();
            if state.active == character {
                return Ok(());
            }

            let previous = state.active;
            state.active = character;

            let history = state.histories.get_mut(character);
            let greeting = greeting
                .filter(|text| !text.trim().is_empty() && !history.is_empty())
                .map(|text| ChatMessage::assistant(character, text));
            if let Some(ref message) = greeting {
                history.push(message.clone());
            }

            self.publish_locked(&mut state);
            tracing::info!(from = %previous, to = %character, "Switched character");
            greeting
        };

        if let Some(message) = greeting {
            self.persist(&message).await;
        }
        Ok(())
    }

    /// Greeting for a character
    ///
    /// Uses `personalized` when it is given and non-empty, the character's
    /// template otherwise. Nothing is stored.
    #[must_use]
    pub fn get_greeting(
        &self,
        stats: &ProgressStats,
        character: CharacterId,
        personalized: Option<&str>,
    ) -> ChatMessage {
        let text = match personalized.map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => character.persona().render_greeting(stats),
        };
        ChatMessage::assistant(character, text)
    }

    /// Run one exchange once `acquire` yields the lock
    fn exchange<F>(
        &self,
        acquire: F,
        text: String,
        options: SendOptions,
        resend: Resend,
    ) -> ChatStream
    where
        F: Future<Output = OwnedMutexGuard<()>> + Send + 'static,
    {
        let this = self.clone();

        Box::pin(stream! {
            let _guard = acquire.await;
            let character = this.active_character();
            let context = this.resolve_context(&options);

            tracing::info!(
                character = %character,
                chars = text.len(),
                "Sending message"
            );

            let user = ChatMessage::user(character, text);
            let replaced = this.mutate(character, |h| {
                let replaced = match resend {
                    Resend::New => Vec::new(),
                    Resend::Retry => take_retry_tail(h),
                };
                h.push(user.clone());
                replaced
            });
            if !replaced.is_empty() {
                tracing::debug!(
                    character = %character,
                    removed = replaced.len(),
                    "Retrying last user message"
                );
                this.forget(&replaced).await;
            }
            this.persist(&user).await;
            yield user;

            let request = this.build_request(character, &context, &options);
            let mut abandon = AbandonGuard::new(this.clone(), character);

            let outcome: Result<String, CompletionError> =
                match this.shared.client.stream_completion(&request).await {
                    Err(e) => Err(e),
                    Ok(mut rx) => {
                        let mut buffer = String::new();
                        loop {
                            match rx.recv().await {
                                Some(StreamingToken::Token(fragment)) => {
                                    buffer.push_str(&fragment);
                                    let update = this.mutate(character, |h| h.upsert_streaming(&buffer));
                                    yield update;
                                }
                                Some(StreamingToken::Complete { message }) => {
                                    break Ok(if message.is_empty() { buffer } else { message });
                                }
                                Some(StreamingToken::Error(e)) => break Err(e),
                                None => {
                                    break Err(CompletionError::Malformed(
                                        "completion ended without a result".to_string(),
                                    ));
                                }
                            }
                        }
                    }
                };

            match outcome {
                Ok(reply) if !reply.trim().is_empty() => {
                    let done = this.mutate(character, |h| h.complete_streaming(reply));
                    abandon.disarm();
                    tracing::info!(
                        character = %character,
                        chars = done.content.len(),
                        "Reply complete"
                    );
                    this.persist(&done).await;
                    yield done;
                }
                failed => {
                    match failed {
                        Err(e) => tracing::warn!(character = %character, error = %e, "Reply failed"),
                        Ok(_) => tracing::warn!(character = %character, "Reply was empty"),
                    }
                    let notice = this.mutate(character, |h| {
                        h.cancel_streaming();
                        let notice = ChatMessage::error(character);
                        h.push(notice.clone());
                        notice
                    });
                    abandon.disarm();
                    yield notice;
                }
            }
        })
    }

    fn resolve_context(&self, options: &SendOptions) -> LearningContext {
        let resolver = &self.shared.context;
        match (options.lesson_id.as_deref(), options.module_index) {
            (Some(lesson), Some(index)) => resolver.module_context(lesson, index),
            (Some(lesson), None) => resolver.lesson_context(lesson),
            (None, _) => resolver.current_context(),
        }
    }

    fn build_request(
        &self,
        character: CharacterId,
        context: &LearningContext,
        options: &SendOptions,
    ) -> CompletionRequest {
        let config = &self.shared.config;
        let mut messages = vec![ChatTurn::system(format!(
            "{}\n\nLearning context: {}",
            system_prompt(character),
            context.render()
        ))];

        {
            let state = self.shared.state.read();
            messages.extend(
                state
                    .histories
                    .get(character)
                    .recent_turns(config.context_messages)
                    .into_iter()
                    .map(|m| match m.role {
                        MessageRole::User => ChatTurn::user(m.content.clone()),
                        MessageRole::Assistant => ChatTurn::assistant(m.content.clone()),
                    }),
            );
        }

        CompletionRequest::new(messages)
            .with_temperature(options.temperature.unwrap_or(config.default_temperature))
            .with_max_tokens(options.max_tokens.unwrap_or(config.default_max_tokens))
    }

    /// Apply `f` to a history and publish the result
    fn mutate<R>(&self, character: CharacterId, f: impl FnOnce(&mut ConversationHistory) -> R) -> R {
        let mut state = self.shared.state.write();
        let result = f(state.histories.get_mut(character));
        self.publish_locked(&mut state);
        result
    }

    /// Bump the revision and broadcast; the caller holds the write lock
    fn publish_locked(&self, state: &mut ChatState) {
        state.revision += 1;
        // No subscribers is fine
        let _ = self.shared.snapshots.send(state.snapshot());
    }

    /// Drop settled messages from the archive
    async fn forget(&self, messages: &[ChatMessage]) {
        let ids: Vec<MessageId> = messages
            .iter()
            .filter(|m| m.is_settled())
            .map(|m| m.id.clone())
            .collect();
        if let Err(e) = self.shared.archive.remove(&ids).await {
            tracing::warn!(error = %e, "Failed to remove retried messages from archive");
        }
    }

    async fn persist(&self, message: &ChatMessage) {
        if let Err(e) = self.shared.archive.append(message).await {
            tracing::warn!(id = %message.id, error = %e, "Failed to persist message");
        }
    }

    /// Remove a provisional record left behind by a dropped stream
    fn abandon(&self, character: CharacterId) {
        let mut state = self.shared.state.write();
        if state.histories.get_mut(character).cancel_streaming() {
            self.publish_locked(&mut state);
            tracing::debug!(character = %character, "Chat stream dropped mid-reply");
        }
    }
}

/// Whether an exchange sends new text or replaces the last user message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resend {
    New,
    Retry,
}

/// Remove trailing error notices, the last user message and everything after it
fn take_retry_tail(history: &mut ConversationHistory) -> Vec<ChatMessage> {
    history.remove_trailing_errors();
    history
        .last_user_index()
        .map(|index| history.truncate_from(index))
        .unwrap_or_default()
}

/// Cleans up the provisional record if the chat stream is dropped
struct AbandonGuard<C: CompletionClient + 'static> {
    orchestrator: ChatOrchestrator<C>,
    character: CharacterId,
    armed: bool,
}

impl<C: CompletionClient + 'static> AbandonGuard<C> {
    fn new(orchestrator: ChatOrchestrator<C>, character: CharacterId) -> Self {
        Self {
            orchestrator,
            character,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: CompletionClient + 'static> Drop for AbandonGuard<C> {
    fn drop(&mut self) {
        if self.armed {
            self.orchestrator.abandon(self.character);
        }
    }
}
