//! ChatRelay Core - Keyed concurrency and conversation lifecycle.
//!
//! Inbound chat messages are debounced per identity, appended to a cached
//! conversation, answered by a model that may call tools, and replied to
//! through the chat transport. One lock per identity key is shared by the
//! debounce stage and the conversation store so work for one identity never
//! blocks another.

pub mod config;
pub mod context;
pub mod locks;
pub mod paths;
pub mod relay;
pub mod runtime;

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use config::{ConfigError, RelayConfig};
pub use context::{ContextConfig, ConversationStore};
pub use locks::{KeyLock, KeyedLockManager};
pub use relay::{Relay, RelayDeps, RelaySettings};
pub use runtime::channel::{
    ChatDispatcher, DebounceAggregator, DebounceConfig, DispatchConfig, DispatchError, ReadyBatch,
};
pub use runtime::{ToolCallResult, ToolExecutor, ToolExecutorConfig};
