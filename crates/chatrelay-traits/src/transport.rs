//! Chat transport boundary.
//!
//! The transport receives raw platform messages and delivers replies. The
//! relay core only sees [`InboundMessage`] values going in and calls
//! [`ChatTransport`] going out, so it can be driven without a live client.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// A message received from a chat peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Conversation identity (one chat peer).
    pub identity_key: String,
    /// Always a user-role message.
    pub message: Message,
}

impl InboundMessage {
    pub fn text(identity_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            identity_key: identity_key.into(),
            message: Message::user(content),
        }
    }
}

/// Outbound side of a chat client.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text reply to a conversation.
    async fn send_text(&self, identity_key: &str, text: &str) -> anyhow::Result<()>;

    /// Send a local file to a conversation.
    async fn send_file(&self, identity_key: &str, path: &Path) -> anyhow::Result<()>;
}
