//! Conversation context: cached histories with idle eviction.

pub mod store;

pub use store::{ContextConfig, ConversationStore};
