//! Language-model boundary.

use async_trait::async_trait;

use crate::message::Message;
use crate::tool::ToolSchema;

/// One request/response round with a chat-completion model.
///
/// The returned message is always assistant-role; it either carries reply
/// content or a non-empty list of tool calls.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        identity_key: &str,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> anyhow::Result<Message>;
}
