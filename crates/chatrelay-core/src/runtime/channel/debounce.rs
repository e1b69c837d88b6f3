//! Debounce Aggregator - Combines rapid sequential messages per identity.
//!
//! Each identity key accumulates a pending batch. The batch is flushed once,
//! either by the submitting caller when the message-count threshold is
//! reached, or by a per-key watcher once the identity has been silent for
//! `max_wait`. Every arrival slides the silence window forward.
//!
//! Claiming a batch means removing it from the pending map while holding the
//! identity lock, so the threshold path and the watcher path can never both
//! deliver the same batch. Delivery itself always happens after the lock is
//! released. Each claim also queues behind the previous claim of the same
//! identity, so batches reach the sink in claim order even when a watcher
//! and a threshold flush deliver back to back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chatrelay_traits::Message;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::locks::KeyedLockManager;

/// Debounce configuration.
#[derive(Clone, Debug)]
pub struct DebounceConfig {
    /// Pending messages that trigger an immediate flush.
    pub threshold: usize,
    /// Silence after the latest message that triggers a flush.
    pub max_wait: Duration,
    /// Upper bound on how long a watcher sleeps between checks.
    pub poll_interval: Duration,
    /// Inserted between contents when a batch is concatenated.
    pub separator: String,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            max_wait: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            separator: String::new(),
        }
    }
}

/// A flushed batch, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ReadyBatch {
    pub identity_key: String,
    /// Synthetic user message holding the concatenated contents.
    pub message: Message,
    /// How many inbound messages were combined.
    pub message_count: usize,
}

/// Receiver of flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, batch: ReadyBatch);
}

/// Forwards batches over a bounded channel.
///
/// A full channel makes `deliver` wait, which pushes back on whoever
/// triggered the flush.
pub struct ChannelBatchSink {
    tx: mpsc::Sender<ReadyBatch>,
}

#[async_trait]
impl BatchSink for ChannelBatchSink {
    async fn deliver(&self, batch: ReadyBatch) {
        let identity_key = batch.identity_key.clone();
        if self.tx.send(batch).await.is_err() {
            warn!(identity_key = %identity_key, "Batch receiver closed, dropping batch");
        }
    }
}

/// Create a channel-backed sink and the receiving end for the dispatcher.
pub fn batch_channel(capacity: usize) -> (ChannelBatchSink, mpsc::Receiver<ReadyBatch>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelBatchSink { tx }, rx)
}

/// Pending message buffer for one identity.
struct PendingBatch {
    id: u64,
    messages: Vec<Message>,
    last_arrival: Instant,
    watcher: Option<JoinHandle<()>>,
}

/// A batch removed from the pending map, waiting for its delivery turn.
struct ClaimedBatch {
    batch: PendingBatch,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

enum WatchStep {
    Sleep(Duration),
    Flush(ClaimedBatch),
    Done,
}

/// Per-identity message aggregator.
pub struct DebounceAggregator {
    locks: Arc<KeyedLockManager>,
    pending: DashMap<String, PendingBatch>,
    /// Delivery signal of the latest claimed batch per identity.
    deliveries: DashMap<String, (u64, oneshot::Receiver<()>)>,
    sink: Arc<dyn BatchSink>,
    config: DebounceConfig,
    next_batch_id: AtomicU64,
    self_ref: Weak<Self>,
}

impl DebounceAggregator {
    pub fn new(
        locks: Arc<KeyedLockManager>,
        sink: Arc<dyn BatchSink>,
        config: DebounceConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            locks,
            pending: DashMap::new(),
            deliveries: DashMap::new(),
            sink,
            config,
            next_batch_id: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// Add a message to the identity's pending batch.
    ///
    /// When this message reaches the threshold the batch is delivered before
    /// `submit` returns.
    pub async fn submit(&self, identity_key: &str, message: Message) {
        let claimed = {
            let _guard = self.locks.lock(identity_key).await;

            let mut batch = match self.pending.entry(identity_key.to_string()) {
                Entry::Occupied(entry) => entry.into_ref(),
                Entry::Vacant(entry) => {
                    let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
                    let watcher = self.spawn_watcher(identity_key, id);
                    debug!(identity_key = %identity_key, batch_id = id, "Debounce: new batch");
                    entry.insert(PendingBatch {
                        id,
                        messages: Vec::new(),
                        last_arrival: Instant::now(),
                        watcher: Some(watcher),
                    })
                }
            };

            batch.messages.push(message);
            batch.last_arrival = Instant::now();
            let reached = batch.messages.len() >= self.config.threshold;
            drop(batch);

            if reached {
                self.claim(identity_key)
            } else {
                None
            }
        };

        if let Some(mut claimed) = claimed {
            if let Some(watcher) = claimed.batch.watcher.take() {
                watcher.abort();
            }
            debug!(identity_key = %identity_key, "Debounce: threshold reached");
            self.deliver(identity_key, claimed).await;
        }
    }

    /// Flush every pending batch now, regardless of timing.
    ///
    /// Returns how many batches were delivered.
    pub async fn flush_all(&self) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut flushed = 0;
        for key in keys {
            let claimed = {
                let _guard = self.locks.lock(&key).await;
                self.claim(&key)
            };
            if let Some(mut claimed) = claimed {
                if let Some(watcher) = claimed.batch.watcher.take() {
                    watcher.abort();
                }
                self.deliver(&key, claimed).await;
                flushed += 1;
            }
        }
        flushed
    }

    /// Number of messages waiting for an identity.
    pub fn pending_count(&self, identity_key: &str) -> usize {
        self.pending
            .get(identity_key)
            .map(|batch| batch.messages.len())
            .unwrap_or(0)
    }

    /// Identities with a live batch (and therefore a live watcher).
    pub fn active_batches(&self) -> usize {
        self.pending.len()
    }

    fn spawn_watcher(&self, identity_key: &str, batch_id: u64) -> JoinHandle<()> {
        let this = self.self_ref.clone();
        let key = identity_key.to_string();
        let first_sleep = self.config.poll_interval.min(self.config.max_wait);
        tokio::spawn(Self::watch(this, key, batch_id, first_sleep))
    }

    async fn watch(this: Weak<Self>, identity_key: String, batch_id: u64, first_sleep: Duration) {
        let mut nap = first_sleep;
        loop {
            tokio::time::sleep(nap).await;
            let Some(aggregator) = this.upgrade() else {
                return;
            };

            match aggregator.check_expired(&identity_key, batch_id).await {
                WatchStep::Sleep(next) => nap = next,
                WatchStep::Done => return,
                WatchStep::Flush(batch) => {
                    debug!(identity_key = %identity_key, "Debounce: quiet period elapsed");
                    aggregator.deliver(&identity_key, batch).await;
                    return;
                }
            }
        }
    }

    async fn check_expired(&self, identity_key: &str, batch_id: u64) -> WatchStep {
        let _guard = self.locks.lock(identity_key).await;

        let elapsed = match self.pending.get(identity_key) {
            // Gone or replaced: a threshold flush already claimed our batch.
            Some(batch) if batch.id == batch_id => batch.last_arrival.elapsed(),
            _ => return WatchStep::Done,
        };

        if elapsed < self.config.max_wait {
            let remaining = self.config.max_wait - elapsed;
            return WatchStep::Sleep(remaining.min(self.config.poll_interval));
        }

        match self.claim(identity_key) {
            Some(mut claimed) => {
                // Our own handle; dropping it detaches rather than aborts.
                claimed.batch.watcher.take();
                WatchStep::Flush(claimed)
            }
            None => WatchStep::Done,
        }
    }

    /// Remove the identity's batch and queue it for delivery.
    ///
    /// Must be called with the identity lock held.
    fn claim(&self, identity_key: &str) -> Option<ClaimedBatch> {
        let (_, batch) = self.pending.remove(identity_key)?;
        let (done, done_rx) = oneshot::channel();
        let previous = self
            .deliveries
            .insert(identity_key.to_string(), (batch.id, done_rx))
            .map(|(_, rx)| rx);
        Some(ClaimedBatch {
            batch,
            previous,
            done,
        })
    }

    async fn deliver(&self, identity_key: &str, claimed: ClaimedBatch) {
        let ClaimedBatch {
            batch,
            previous,
            done,
        } = claimed;
        if let Some(previous) = previous {
            // Err just means the earlier delivery was abandoned.
            let _ = previous.await;
        }

        let batch_id = batch.id;
        let message_count = batch.messages.len();
        let content = batch
            .messages
            .iter()
            .map(Message::content)
            .collect::<Vec<_>>()
            .join(&self.config.separator);

        debug!(
            identity_key = %identity_key,
            batch_id = batch.id,
            count = message_count,
            "Debounce: delivering batch"
        );

        self.sink
            .deliver(ReadyBatch {
                identity_key: identity_key.to_string(),
                message: Message::user(content),
                message_count,
            })
            .await;

        let _ = done.send(());
        self.deliveries
            .remove_if(identity_key, |_, (id, _)| *id == batch_id);
    }
}
