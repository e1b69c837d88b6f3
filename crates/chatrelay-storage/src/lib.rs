//! ChatRelay Storage - Durable per-identity conversation files
//!
//! Each identity key owns one JSON file holding an array of
//! `{role, content, tool_call_id?}` records. Files are replaced atomically
//! (temp file + rename), superseded versions are kept as timestamped backups,
//! and files that fail structural validation are quarantined instead of
//! failing the caller.
//!
//! # Layout
//!
//! - `<encoded>.json` - current history
//! - `<encoded>.json.<timestamp>.bak` - superseded versions
//! - `<encoded>.json.bak` - quarantined corrupt file

pub mod conversation_file;
pub mod error;
pub mod key_codec;

use async_trait::async_trait;
use chatrelay_traits::Message;

pub use conversation_file::{ConversationFileStore, FileStoreConfig};
pub use error::{PersistenceError, Result};
pub use key_codec::{decode_file_name, encode_key};

/// Durable backing for conversation histories.
///
/// Callers serialize access per identity key; implementations only need to
/// guarantee that a reader never observes a partially written history.
#[async_trait]
pub trait ConversationPersistence: Send + Sync {
    /// Load the history of `identity_key`, empty if none was stored.
    async fn load(&self, identity_key: &str) -> Result<Vec<Message>>;

    /// Replace the stored history of `identity_key`.
    async fn save(&self, identity_key: &str, history: &[Message]) -> Result<()>;
}
