//! Chat Dispatcher - Turns ready batches into model replies.
//!
//! Consumes [`ReadyBatch`]es from the debounce channel. Each batch becomes one
//! turn: the user message is appended to the conversation, the model is asked
//! for a reply with the recent context window, requested tools are run on the
//! [`ToolExecutor`], and the final reply is stored and sent back through the
//! transport.
//!
//! Turns of one identity run strictly in arrival order. Turns of different
//! identities run concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chatrelay_storage::PersistenceError;
use chatrelay_traits::{ChatTransport, Message, ModelClient};
use dashmap::DashMap;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::debounce::ReadyBatch;
use crate::context::ConversationStore;
use crate::runtime::ToolExecutor;

/// Configuration for the ChatDispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Model rounds that may request tools before the turn is abandoned.
    pub max_tool_rounds: usize,
    /// Extra attempts after a reply with neither content nor tool calls.
    pub empty_reply_retries: usize,
    /// Prompt used when the identity has no override.
    pub default_system_prompt: Option<String>,
    /// Per-identity prompt overrides.
    pub system_prompts: HashMap<String, String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            empty_reply_retries: 3,
            default_system_prompt: None,
            system_prompts: HashMap::new(),
        }
    }
}

impl DispatchConfig {
    /// System prompt for an identity, if any.
    pub fn system_prompt_for(&self, identity_key: &str) -> Option<&str> {
        self.system_prompts
            .get(identity_key)
            .or(self.default_system_prompt.as_ref())
            .map(String::as_str)
    }
}

/// Error types for one dispatch turn.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Model request failed: {0:#}")]
    Model(anyhow::Error),

    #[error("Tool loop exceeded {0} rounds")]
    ToolLoopExceeded(usize),

    #[error("Model returned an empty reply {0} times")]
    EmptyReply(usize),

    #[error("Failed to send reply: {0:#}")]
    Transport(anyhow::Error),

    #[error("Conversation storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl DispatchError {
    /// Get a participant-safe message.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ToolLoopExceeded(_) => {
                "Sorry, that took too many steps. Please try asking in a simpler way."
            }
            Self::Model(_) | Self::EmptyReply(_) => {
                "Sorry, I couldn't get an answer right now. Please try again later."
            }
            Self::Transport(_) | Self::Persistence(_) => {
                "Sorry, something went wrong while processing your message. Please try again."
            }
        }
    }
}

/// Dispatches batches to the model and replies through the transport.
pub struct ChatDispatcher {
    store: Arc<ConversationStore>,
    executor: Arc<ToolExecutor>,
    model: Arc<dyn ModelClient>,
    transport: Arc<dyn ChatTransport>,
    config: DispatchConfig,
    /// Completion signal of the latest turn per identity.
    lanes: DashMap<String, (u64, oneshot::Receiver<()>)>,
    next_turn: AtomicU64,
}

impl ChatDispatcher {
    pub fn new(
        store: Arc<ConversationStore>,
        executor: Arc<ToolExecutor>,
        model: Arc<dyn ModelClient>,
        transport: Arc<dyn ChatTransport>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            executor,
            model,
            transport,
            config,
            lanes: DashMap::new(),
            next_turn: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run [`ChatDispatcher::run`] on a background task.
    pub fn spawn(self: &Arc<Self>, rx: mpsc::Receiver<ReadyBatch>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(rx))
    }

    /// Consume batches until the channel closes, then wait for every
    /// in-flight turn.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ReadyBatch>) {
        info!("Chat dispatcher started");
        let mut turns = JoinSet::new();

        while let Some(batch) = rx.recv().await {
            while turns.try_join_next().is_some() {}
            self.schedule(&mut turns, batch);
        }

        while turns.join_next().await.is_some() {}
        info!("Chat dispatcher stopped");
    }

    /// Queue a turn behind the identity's previous one.
    fn schedule(self: &Arc<Self>, turns: &mut JoinSet<()>, batch: ReadyBatch) {
        let turn_id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self
            .lanes
            .insert(batch.identity_key.clone(), (turn_id, done_rx));

        let this = self.clone();
        turns.spawn(async move {
            if let Some((_, previous)) = previous {
                // Err just means the previous turn ended without signalling.
                let _ = previous.await;
            }

            this.handle_batch(batch.identity_key.as_str(), batch.message, batch.message_count)
                .await;

            let _ = done_tx.send(());
            this.lanes
                .remove_if(&batch.identity_key, |_, (id, _)| *id == turn_id);
        });
    }

    async fn handle_batch(&self, identity_key: &str, message: Message, message_count: usize) {
        debug!(identity_key = %identity_key, count = message_count, "Dispatching batch");

        let text = match self.process(identity_key, message).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(identity_key = %identity_key, error = %e, "Dispatch failed");
                e.user_message().to_string()
            }
        };

        if let Err(e) = self
            .transport
            .send_text(identity_key, &text)
            .await
            .map_err(DispatchError::Transport)
        {
            error!(identity_key = %identity_key, error = %e, "Failed to deliver reply");
        }
    }

    /// Run one conversational turn and return the reply text.
    ///
    /// Every message produced along the way is appended to the conversation.
    pub async fn process(
        &self,
        identity_key: &str,
        message: Message,
    ) -> Result<String, DispatchError> {
        self.store.append(identity_key, message).await?;

        let tools = self.executor.schemas();
        let mut tool_rounds = 0;
        let mut empty_replies = 0;

        loop {
            let request = self.build_request(identity_key).await?;
            let reply = self
                .model
                .complete(identity_key, &request, &tools)
                .await
                .map_err(DispatchError::Model)?;

            if reply.has_tool_calls() {
                tool_rounds += 1;
                if tool_rounds > self.config.max_tool_rounds {
                    return Err(DispatchError::ToolLoopExceeded(self.config.max_tool_rounds));
                }

                let calls = reply.tool_calls().to_vec();
                debug!(
                    identity_key = %identity_key,
                    round = tool_rounds,
                    count = calls.len(),
                    "Model requested tools"
                );
                self.store.append(identity_key, reply).await?;

                let results = join_all(
                    calls
                        .iter()
                        .map(|call| self.executor.execute_call(call, identity_key)),
                )
                .await;
                for result in results {
                    self.store
                        .append(identity_key, result.into_message())
                        .await?;
                }
                continue;
            }

            if reply.content().trim().is_empty() {
                empty_replies += 1;
                if empty_replies > self.config.empty_reply_retries {
                    return Err(DispatchError::EmptyReply(empty_replies));
                }
                warn!(identity_key = %identity_key, attempt = empty_replies, "Empty model reply, retrying");
                continue;
            }

            let text = reply.content().to_string();
            self.store.append(identity_key, reply).await?;
            return Ok(text);
        }
    }

    /// System prompt followed by the recent conversation window.
    async fn build_request(&self, identity_key: &str) -> Result<Vec<Message>, PersistenceError> {
        let window = self.store.window(identity_key).await?;
        let mut request = Vec::with_capacity(window.len() + 1);
        if let Some(prompt) = self.config.system_prompt_for(identity_key) {
            request.push(Message::system(prompt));
        }
        request.extend(window);
        Ok(request)
    }
}
