//! ChatRelay AI - Chat-completion model client.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint and maps its
//! function calls onto [`chatrelay_traits::ToolCall`].

pub mod error;
mod http_client;
pub mod openai;

pub use error::{AiError, Result};
pub use openai::{OpenAiClient, OpenAiConfig};
