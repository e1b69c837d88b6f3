//! Relay - Wires the aggregator, conversation store, tool executor and
//! dispatcher around one shared lock manager.

use std::sync::Arc;

use anyhow::{Context, Result};
use chatrelay_storage::ConversationPersistence;
use chatrelay_traits::{ChatTransport, InboundMessage, ModelClient, ToolRegistry};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::RelayConfig;
use crate::context::{ContextConfig, ConversationStore};
use crate::locks::KeyedLockManager;
use crate::runtime::channel::{
    ChatDispatcher, DebounceAggregator, DebounceConfig, DispatchConfig, batch_channel,
};
use crate::runtime::{ToolExecutor, ToolExecutorConfig};

/// Typed settings for every relay component.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub debounce: DebounceConfig,
    pub context: ContextConfig,
    pub tools: ToolExecutorConfig,
    pub dispatch: DispatchConfig,
    pub queue_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            context: ContextConfig::default(),
            tools: ToolExecutorConfig::default(),
            dispatch: DispatchConfig::default(),
            queue_capacity: 256,
        }
    }
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            debounce: config.debounce_config(),
            context: config.context_config(),
            tools: config.tool_executor_config(),
            dispatch: config.dispatch_config(),
            queue_capacity: config.dispatch.queue_capacity,
        }
    }
}

/// External collaborators the relay drives.
pub struct RelayDeps {
    pub persistence: Arc<dyn ConversationPersistence>,
    pub registry: Arc<ToolRegistry>,
    pub model: Arc<dyn ModelClient>,
    pub transport: Arc<dyn ChatTransport>,
}

/// Running relay.
pub struct Relay {
    locks: Arc<KeyedLockManager>,
    aggregator: Arc<DebounceAggregator>,
    store: Arc<ConversationStore>,
    executor: Arc<ToolExecutor>,
    dispatcher: JoinHandle<()>,
}

impl Relay {
    /// Build every component and start the background tasks.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(deps: RelayDeps, settings: RelaySettings) -> Self {
        let locks = Arc::new(KeyedLockManager::new());
        let store = ConversationStore::new(locks.clone(), deps.persistence, settings.context);
        store.start_eviction_daemon();

        let executor = ToolExecutor::start(deps.registry, settings.tools);

        let (sink, batches) = batch_channel(settings.queue_capacity);
        let aggregator = DebounceAggregator::new(locks.clone(), Arc::new(sink), settings.debounce);

        let dispatcher = ChatDispatcher::new(
            store.clone(),
            executor.clone(),
            deps.model,
            deps.transport,
            settings.dispatch,
        )
        .spawn(batches);

        info!("Relay started");
        Self {
            locks,
            aggregator,
            store,
            executor,
            dispatcher,
        }
    }

    /// Hand an inbound message to the debounce stage.
    pub async fn submit(&self, inbound: InboundMessage) {
        self.aggregator
            .submit(&inbound.identity_key, inbound.message)
            .await;
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn locks(&self) -> &KeyedLockManager {
        &self.locks
    }

    /// Flush pending batches, finish in-flight turns and persist every
    /// cached conversation.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            locks: _,
            aggregator,
            store,
            executor,
            dispatcher,
        } = self;

        let flushed = aggregator.flush_all().await;
        // Dropping the aggregator closes the batch channel once its
        // watchers have exited, which ends the dispatcher loop.
        drop(aggregator);
        dispatcher.await.context("dispatcher task failed")?;

        store.shutdown();
        let saved = store
            .flush_all()
            .await
            .context("failed to persist conversations")?;
        executor.shutdown();

        info!(flushed, saved, "Relay stopped");
        Ok(())
    }
}
