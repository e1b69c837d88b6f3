//! In-memory doubles for the persistence, model and transport boundaries.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_storage::{ConversationPersistence, PersistenceError};
use chatrelay_traits::{ChatTransport, Message, ModelClient, ToolSchema};
use parking_lot::Mutex;

/// Map-backed persistence whose first `n` saves fail.
#[derive(Default)]
pub struct FlakyPersistence {
    stored: Mutex<HashMap<String, Vec<Message>>>,
    failures_left: AtomicUsize,
}

impl FlakyPersistence {
    pub fn failing(failures: usize) -> Self {
        Self {
            stored: Mutex::new(HashMap::new()),
            failures_left: AtomicUsize::new(failures),
        }
    }

    pub fn stored(&self, identity_key: &str) -> Option<Vec<Message>> {
        self.stored.lock().get(identity_key).cloned()
    }
}

#[async_trait]
impl ConversationPersistence for FlakyPersistence {
    async fn load(&self, identity_key: &str) -> chatrelay_storage::Result<Vec<Message>> {
        Ok(self.stored(identity_key).unwrap_or_default())
    }

    async fn save(&self, identity_key: &str, history: &[Message]) -> chatrelay_storage::Result<()> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(PersistenceError::WriteFailed {
                path: PathBuf::from(identity_key),
                source: std::io::Error::other("disk full"),
            });
        }
        self.stored
            .lock()
            .insert(identity_key.to_string(), history.to_vec());
        Ok(())
    }
}

/// One scripted model turn.
pub enum Scripted {
    Reply(Message),
    Fail(String),
}

/// Model that replays a fixed script and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<(String, Vec<Message>)>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, step: Scripted) {
        self.script.lock().push_back(step);
    }

    pub fn requests(&self) -> Vec<(String, Vec<Message>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        identity_key: &str,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<Message> {
        self.requests
            .lock()
            .push((identity_key.to_string(), messages.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self.script.lock().pop_front();
        match step {
            Some(Scripted::Reply(message)) => Ok(message),
            Some(Scripted::Fail(reason)) => Err(anyhow::anyhow!(reason)),
            // Default once the script runs out: echo the latest user message.
            None => {
                let last = messages.last().map(Message::content).unwrap_or_default();
                Ok(Message::assistant(format!("echo: {last}")))
            }
        }
    }
}

/// Transport that records what it was asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    texts: Mutex<Vec<(String, String)>>,
    files: Mutex<Vec<(String, PathBuf)>>,
}

impl RecordingTransport {
    pub fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().clone()
    }

    pub fn texts_for(&self, identity_key: &str) -> Vec<String> {
        self.texts
            .lock()
            .iter()
            .filter(|(key, _)| key == identity_key)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn files(&self) -> Vec<(String, PathBuf)> {
        self.files.lock().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, identity_key: &str, text: &str) -> anyhow::Result<()> {
        self.texts
            .lock()
            .push((identity_key.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_file(&self, identity_key: &str, path: &Path) -> anyhow::Result<()> {
        self.files
            .lock()
            .push((identity_key.to_string(), path.to_path_buf()));
        Ok(())
    }
}
