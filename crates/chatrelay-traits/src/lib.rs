//! ChatRelay Traits - Shared types and collaborator seams.
//!
//! This crate provides the interfaces used across the ChatRelay workspace:
//! - Message, Role, ToolCall (the conversation data model)
//! - Tool trait, ToolSchema, ToolContext, ToolRegistry, ToolError
//! - ChatTransport and InboundMessage (the chat client boundary)
//! - ModelClient (the language-model boundary)

pub mod error;
pub mod llm;
pub mod message;
pub mod registry;
pub mod tool;
pub mod transport;

// ── Top-level re-exports ─────────────────────────────────────────────

pub use error::ToolError;
pub use llm::ModelClient;
pub use message::{Message, Role, ToolCall};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolSchema};
pub use transport::{ChatTransport, InboundMessage};
