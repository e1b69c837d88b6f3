//! Inbound message flow: debounce, then dispatch.

pub mod chat_dispatcher;
pub mod debounce;

pub use chat_dispatcher::{ChatDispatcher, DispatchConfig, DispatchError};
pub use debounce::{
    BatchSink, ChannelBatchSink, DebounceAggregator, DebounceConfig, ReadyBatch, batch_channel,
};
