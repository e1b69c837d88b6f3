use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chatrelay_storage::{ConversationPersistence, PersistenceError};
use chatrelay_traits::{Message, Role};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::locks::KeyedLockManager;

/// Smallest context window handed to the model.
const MIN_WINDOW_LENGTH: usize = 10;

/// Conversation cache configuration.
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Entries untouched for this long are persisted and dropped.
    pub idle_timeout: Duration,
    /// Upper bound on the time between two sweeps.
    pub max_sweep_interval: Duration,
    /// Messages returned by [`ConversationStore::window`].
    pub window_length: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            max_sweep_interval: Duration::from_secs(60),
            window_length: 15,
        }
    }
}

impl ContextConfig {
    /// Half the idle timeout, capped by `max_sweep_interval`.
    pub fn sweep_interval(&self) -> Duration {
        (self.idle_timeout / 2)
            .min(self.max_sweep_interval)
            .max(Duration::from_millis(1))
    }

    fn effective_window(&self) -> usize {
        self.window_length.max(MIN_WINDOW_LENGTH)
    }
}

struct ConversationEntry {
    history: Vec<Message>,
    last_access: Instant,
}

/// Cached per-identity conversation histories backed by durable storage.
///
/// Every read-modify-write on an identity runs under that identity's lock.
/// Callers only ever receive copies of the cached history.
pub struct ConversationStore {
    locks: Arc<KeyedLockManager>,
    persistence: Arc<dyn ConversationPersistence>,
    cache: DashMap<String, ConversationEntry>,
    config: ContextConfig,
    daemon_started: AtomicBool,
    shutdown: CancellationToken,
}

impl ConversationStore {
    pub fn new(
        locks: Arc<KeyedLockManager>,
        persistence: Arc<dyn ConversationPersistence>,
        config: ContextConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            locks,
            persistence,
            cache: DashMap::new(),
            config,
            daemon_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Append a message to the identity's history.
    pub async fn append(&self, identity_key: &str, message: Message) -> Result<(), PersistenceError> {
        self.with_entry(identity_key, |entry| entry.history.push(message))
            .await
    }

    /// Copy of the full cached history.
    pub async fn get(&self, identity_key: &str) -> Result<Vec<Message>, PersistenceError> {
        self.with_entry(identity_key, |entry| entry.history.clone())
            .await
    }

    /// Copy of the most recent messages, sized for a model request.
    ///
    /// Tool results at the start of the window are skipped, since the
    /// assistant message that requested them fell outside it.
    pub async fn window(&self, identity_key: &str) -> Result<Vec<Message>, PersistenceError> {
        let length = self.config.effective_window();
        self.with_entry(identity_key, |entry| {
            let start = entry.history.len().saturating_sub(length);
            entry.history[start..]
                .iter()
                .skip_while(|msg| msg.role() == Role::Tool)
                .cloned()
                .collect()
        })
        .await
    }

    /// Persist the identity's cached history without evicting it.
    pub async fn save(&self, identity_key: &str) -> Result<(), PersistenceError> {
        let _guard = self.locks.lock(identity_key).await;
        let Some(history) = self.cached_history(identity_key) else {
            return Ok(());
        };
        self.persistence.save(identity_key, &history).await
    }

    /// Persist every cached history.
    ///
    /// All identities are attempted; the first failure is returned after.
    pub async fn flush_all(&self) -> Result<usize, PersistenceError> {
        let keys: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        let mut saved = 0;
        let mut first_error = None;

        for key in keys {
            match self.save(&key).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!(identity_key = %key, error = %e, "Failed to persist conversation");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// Whether the identity is currently held in memory.
    pub fn is_cached(&self, identity_key: &str) -> bool {
        self.cache.contains_key(identity_key)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Run one eviction sweep. Returns how many entries were evicted.
    pub async fn evict_idle(&self) -> usize {
        let idle = self.config.idle_timeout;
        let candidates: Vec<String> = self
            .cache
            .iter()
            .filter(|entry| entry.last_access.elapsed() >= idle)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            let _guard = self.locks.lock(&key).await;

            // The entry may have been touched since the snapshot.
            let history = match self.cache.get(&key) {
                Some(entry) if entry.last_access.elapsed() >= idle => entry.history.clone(),
                _ => continue,
            };

            match self.persistence.save(&key, &history).await {
                Ok(()) => {
                    self.cache.remove(&key);
                    evicted += 1;
                    debug!(identity_key = %key, count = history.len(), "Evicted idle conversation");
                }
                Err(e) => {
                    warn!(identity_key = %key, error = %e, "Eviction write failed, keeping entry cached");
                }
            }
        }

        let pruned = self.locks.prune();
        if evicted > 0 || pruned > 0 {
            info!(evicted, pruned_locks = pruned, "Eviction sweep finished");
        }
        evicted
    }

    /// Start the background eviction sweep.
    ///
    /// Returns `false` if the daemon was already started for this store.
    pub fn start_eviction_daemon(self: &Arc<Self>) -> bool {
        if self.daemon_started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let store = Arc::downgrade(self);
        let interval = self.config.sweep_interval();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Eviction daemon started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.evict_idle().await;
            }
            info!("Eviction daemon stopped");
        });

        true
    }

    /// Stop the eviction daemon. Cached entries stay in memory.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn cached_history(&self, identity_key: &str) -> Option<Vec<Message>> {
        self.cache
            .get(identity_key)
            .map(|entry| entry.history.clone())
    }

    /// Load-or-create the entry under the identity lock, refresh its
    /// timestamp and apply `f`.
    async fn with_entry<R>(
        &self,
        identity_key: &str,
        f: impl FnOnce(&mut ConversationEntry) -> R,
    ) -> Result<R, PersistenceError> {
        let _guard = self.locks.lock(identity_key).await;

        let loaded = if self.cache.contains_key(identity_key) {
            None
        } else {
            let history = self.persistence.load(identity_key).await?;
            debug!(identity_key = %identity_key, count = history.len(), "Loaded conversation");
            Some(history)
        };

        let mut entry = self
            .cache
            .entry(identity_key.to_string())
            .or_insert_with(|| ConversationEntry {
                history: loaded.unwrap_or_default(),
                last_access: Instant::now(),
            });
        entry.last_access = Instant::now();
        Ok(f(entry.value_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FlakyPersistence;
    use chatrelay_storage::{ConversationFileStore, FileStoreConfig};
    use tempfile::TempDir;
    use tokio::time::sleep;

    fn file_store(dir: &TempDir) -> Arc<ConversationFileStore> {
        Arc::new(ConversationFileStore::new(FileStoreConfig::new(dir.path())).unwrap())
    }

    fn store_with(
        persistence: Arc<dyn ConversationPersistence>,
        idle_ms: u64,
    ) -> Arc<ConversationStore> {
        ConversationStore::new(
            Arc::new(KeyedLockManager::new()),
            persistence,
            ContextConfig {
                idle_timeout: Duration::from_millis(idle_ms),
                max_sweep_interval: Duration::from_secs(60),
                window_length: 15,
            },
        )
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 60_000);

        store.append("user1", Message::user("Hello")).await.unwrap();
        store.append("user1", Message::assistant("Hi")).await.unwrap();

        let context = store.get("user1").await.unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content(), "Hello");
        assert_eq!(context[1].content(), "Hi");
    }

    #[tokio::test]
    async fn test_get_returns_independent_copy() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 60_000);
        store.append("user1", Message::user("Hello")).await.unwrap();

        let mut copy = store.get("user1").await.unwrap();
        copy.push(Message::user("injected"));
        copy.clear();

        let again = store.get("user1").await.unwrap();
        assert_eq!(again, vec![Message::user("Hello")]);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 60_000);
        assert!(store.get("user2").await.unwrap().is_empty());
        assert!(store.is_cached("user2"));
    }

    #[tokio::test]
    async fn test_window_trims_to_recent_messages() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 60_000);
        for i in 0..16 {
            store.append("user1", Message::user(format!("Q{i}"))).await.unwrap();
            store
                .append("user1", Message::assistant(format!("A{i}")))
                .await
                .unwrap();
        }

        let window = store.window("user1").await.unwrap();
        assert_eq!(window.len(), 15);
        assert_eq!(window[0].content(), "A8");
        assert_eq!(store.get("user1").await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_window_skips_orphaned_tool_results() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 60_000);
        for i in 0..14 {
            store.append("user1", Message::user(format!("Q{i}"))).await.unwrap();
        }
        store
            .append("user1", Message::tool("r1", "call_1"))
            .await
            .unwrap();
        store.append("user1", Message::assistant("done")).await.unwrap();
        // Force the tool result to be the first message of the window.
        for i in 0..13 {
            store.append("user1", Message::user(format!("P{i}"))).await.unwrap();
        }

        let window = store.window("user1").await.unwrap();
        assert_eq!(window.len(), 14);
        assert_eq!(window[0].content(), "done");
    }

    #[tokio::test]
    async fn test_idle_entry_is_persisted_then_reloaded() {
        let dir = TempDir::new().unwrap();
        let files = file_store(&dir);
        let store = store_with(files.clone(), 100);
        assert!(store.start_eviction_daemon());

        store.append("user3", Message::user("Keep")).await.unwrap();
        store.append("user3", Message::assistant("Kept")).await.unwrap();
        assert!(store.is_cached("user3"));

        sleep(Duration::from_millis(400)).await;
        assert!(!store.is_cached("user3"));
        assert!(files.path_for("user3").exists());

        let reloaded = store.get("user3").await.unwrap();
        assert_eq!(
            reloaded,
            vec![Message::user("Keep"), Message::assistant("Kept")]
        );
        assert!(store.is_cached("user3"));
        store.shutdown();
    }

    #[tokio::test]
    async fn test_recent_access_prevents_eviction() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 300);
        assert!(store.start_eviction_daemon());

        store.append("busy", Message::user("hi")).await.unwrap();
        for _ in 0..6 {
            sleep(Duration::from_millis(100)).await;
            store.get("busy").await.unwrap();
        }
        assert!(store.is_cached("busy"));
        store.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_access_after_snapshot_prevents_eviction() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 50);
        store.append("race", Message::user("first")).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        // Hold the identity lock so the append queues ahead of the sweep.
        let guard = store.locks.lock("race").await;

        let appender = {
            let store = store.clone();
            tokio::spawn(async move { store.append("race", Message::user("second")).await })
        };
        sleep(Duration::from_millis(30)).await;

        // The sweep snapshots the entry while it is still idle.
        let sweeper = {
            let store = store.clone();
            tokio::spawn(async move { store.evict_idle().await })
        };
        sleep(Duration::from_millis(30)).await;

        drop(guard);
        appender.await.unwrap().unwrap();
        let evicted = sweeper.await.unwrap();

        assert_eq!(evicted, 0);
        assert!(store.is_cached("race"));
        assert_eq!(
            store.get("race").await.unwrap(),
            vec![Message::user("first"), Message::user("second")]
        );
    }

    #[tokio::test]
    async fn test_eviction_round_trip_respects_load_cap() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 20);

        for i in 0..60 {
            store.append("user4", Message::user(format!("m{i}"))).await.unwrap();
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(store.evict_idle().await, 1);

        let reloaded = store.get("user4").await.unwrap();
        assert_eq!(reloaded.len(), 50);
        assert_eq!(reloaded[0].content(), "m10");
        assert_eq!(reloaded[49].content(), "m59");
    }

    #[tokio::test]
    async fn test_failed_write_keeps_entry_for_next_sweep() {
        let persistence = Arc::new(FlakyPersistence::failing(1));
        let store = store_with(persistence.clone(), 10);

        store.append("user5", Message::user("precious")).await.unwrap();
        sleep(Duration::from_millis(30)).await;

        assert_eq!(store.evict_idle().await, 0);
        assert!(store.is_cached("user5"));

        assert_eq!(store.evict_idle().await, 1);
        assert!(!store.is_cached("user5"));
        assert_eq!(
            persistence.stored("user5"),
            Some(vec![Message::user("precious")])
        );
    }

    #[tokio::test]
    async fn test_explicit_save_propagates_write_failure() {
        let persistence = Arc::new(FlakyPersistence::failing(1));
        let store = store_with(persistence.clone(), 60_000);
        store.append("user6", Message::user("x")).await.unwrap();

        let err = store.save("user6").await.unwrap_err();
        assert!(matches!(err, PersistenceError::WriteFailed { .. }));

        store.save("user6").await.unwrap();
        assert!(store.is_cached("user6"));
        assert_eq!(persistence.stored("user6"), Some(vec![Message::user("x")]));
    }

    #[tokio::test]
    async fn test_flush_all_persists_every_entry() {
        let persistence = Arc::new(FlakyPersistence::failing(0));
        let store = store_with(persistence.clone(), 60_000);
        store.append("a", Message::user("1")).await.unwrap();
        store.append("b", Message::user("2")).await.unwrap();

        assert_eq!(store.flush_all().await.unwrap(), 2);
        assert!(persistence.stored("a").is_some());
        assert!(persistence.stored("b").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let files = file_store(&dir);
        std::fs::write(files.path_for("broken"), "[{\"role\": 7").unwrap();
        let store = store_with(files.clone(), 60_000);

        assert!(store.get("broken").await.unwrap().is_empty());
        assert!(files.quarantine_path_for("broken").exists());
    }

    #[tokio::test]
    async fn test_daemon_starts_once() {
        let dir = TempDir::new().unwrap();
        let store = store_with(file_store(&dir), 60_000);
        assert!(store.start_eviction_daemon());
        assert!(!store.start_eviction_daemon());
        store.shutdown();
    }

    #[test]
    fn test_sweep_interval_is_capped() {
        let config = ContextConfig {
            idle_timeout: Duration::from_secs(600),
            max_sweep_interval: Duration::from_secs(60),
            window_length: 15,
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));

        let config = ContextConfig {
            idle_timeout: Duration::from_secs(10),
            ..config
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_identity_does_not_block_others() {
        let locks = Arc::new(KeyedLockManager::new());
        let persistence = Arc::new(FlakyPersistence::failing(0));
        let store = ConversationStore::new(locks.clone(), persistence, ContextConfig::default());

        let _held = locks.lock("slow").await;
        let other = tokio::time::timeout(
            Duration::from_millis(200),
            store.append("fast", Message::user("hi")),
        )
        .await;
        assert!(other.is_ok());

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            store.append("slow", Message::user("hi")),
        )
        .await;
        assert!(blocked.is_err());
    }
}
