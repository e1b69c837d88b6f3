use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatrelay_traits::Message;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::ConversationPersistence;
use crate::error::{PersistenceError, Result};
use crate::key_codec::file_name;

const TEMP_SUFFIX: &str = "tmp";
const BACKUP_SUFFIX: &str = "bak";

/// File store configuration.
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Directory holding one file per identity.
    pub storage_dir: PathBuf,
    /// Most-recent messages kept when loading.
    pub load_cap: usize,
    /// Timestamped backups retained per identity.
    pub max_backups: usize,
}

impl FileStoreConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("contexts"),
            load_cap: 50,
            max_backups: 5,
        }
    }
}

/// JSON-file backed conversation persistence.
pub struct ConversationFileStore {
    config: FileStoreConfig,
}

impl ConversationFileStore {
    /// Create the store, making sure the storage directory exists.
    pub fn new(config: FileStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.storage_dir)?;
        Ok(Self { config })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.config.storage_dir
    }

    /// Path of the current history file for `identity_key`.
    pub fn path_for(&self, identity_key: &str) -> PathBuf {
        self.config.storage_dir.join(file_name(identity_key))
    }

    /// Path a corrupt file is moved to.
    pub fn quarantine_path_for(&self, identity_key: &str) -> PathBuf {
        self.config
            .storage_dir
            .join(format!("{}.{}", file_name(identity_key), BACKUP_SUFFIX))
    }

    /// Identity keys that currently have a history file.
    pub async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.config.storage_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = entry
                .file_name()
                .to_str()
                .and_then(crate::key_codec::decode_file_name)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Timestamped backups of `identity_key`, oldest first.
    pub async fn list_backups(&self, identity_key: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}.", file_name(identity_key));
        let suffix = format!(".{}", BACKUP_SUFFIX);
        let mut backups = Vec::new();
        let mut entries = fs::read_dir(&self.config.storage_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_timestamped = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
                .is_some_and(|stamp| !stamp.is_empty());
            if is_timestamped {
                backups.push(entry.path());
            }
        }
        // Timestamps are fixed-width, so lexical order is chronological.
        backups.sort();
        Ok(backups)
    }

    /// Read the capped history without touching the file.
    ///
    /// Unlike `load`, a corrupt file is reported as `Corrupt` and left in place.
    pub async fn peek(&self, identity_key: &str) -> Result<Vec<Message>> {
        let path = self.path_for(identity_key);
        match fs::read_to_string(&path).await {
            Ok(content) => parse_history(&path, &content, self.config.load_cap),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn quarantine(&self, identity_key: &str, path: &Path) -> Result<()> {
        let backup = self.quarantine_path_for(identity_key);
        fs::rename(path, &backup).await?;
        fs::write(path, b"[]").await?;
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let temp_path = path.with_extension(format!(
            "json.{}.{}",
            uuid::Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        if let Err(source) = write_synced(&temp_path, content).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(PersistenceError::WriteFailed {
                path: path.to_path_buf(),
                source,
            });
        }

        if fs::try_exists(path).await.unwrap_or(false) {
            let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S%6f");
            let backup = path.with_extension(format!("json.{}.{}", stamp, BACKUP_SUFFIX));
            if let Err(source) = fs::copy(path, &backup).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(PersistenceError::WriteFailed {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        if let Err(source) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(PersistenceError::WriteFailed {
                path: path.to_path_buf(),
                source,
            });
        }

        Ok(())
    }

    async fn prune_backups(&self, identity_key: &str) -> Result<()> {
        let backups = self.list_backups(identity_key).await?;
        let excess = backups.len().saturating_sub(self.config.max_backups);
        for stale in backups.into_iter().take(excess) {
            fs::remove_file(&stale).await?;
            debug!(path = %stale.display(), "Pruned conversation backup");
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

/// Validate a history file and keep its most recent `cap` messages.
fn parse_history(path: &Path, content: &str, cap: usize) -> Result<Vec<Message>> {
    let corrupt = |reason: String| PersistenceError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_json::from_str(content).map_err(|e| corrupt(e.to_string()))?;
    let Value::Array(mut records) = value else {
        return Err(corrupt("expected a JSON array".to_string()));
    };

    // Records older than the cap are dropped unread.
    if records.len() > cap {
        records.drain(..records.len() - cap);
    }

    let well_formed = records.iter().all(|record| {
        record
            .as_object()
            .is_some_and(|obj| obj.contains_key("role") && obj.contains_key("content"))
    });
    if !well_formed {
        return Err(corrupt("every record needs role and content".to_string()));
    }

    serde_json::from_value(Value::Array(records)).map_err(|e| corrupt(e.to_string()))
}

#[async_trait]
impl ConversationPersistence for ConversationFileStore {
    async fn load(&self, identity_key: &str) -> Result<Vec<Message>> {
        let path = self.path_for(identity_key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        match parse_history(&path, &content, self.config.load_cap) {
            Ok(history) => Ok(history),
            Err(err) => {
                warn!(identity_key = %identity_key, error = %err, "Quarantining conversation file");
                self.quarantine(identity_key, &path).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, identity_key: &str, history: &[Message]) -> Result<()> {
        let path = self.path_for(identity_key);
        let content = serde_json::to_vec_pretty(history)?;
        self.write_atomic(&path, &content).await?;

        if let Err(e) = self.prune_backups(identity_key).await {
            warn!(identity_key = %identity_key, error = %e, "Failed to prune conversation backups");
        }

        debug!(identity_key = %identity_key, count = history.len(), "Saved conversation");
        Ok(())
    }
}
