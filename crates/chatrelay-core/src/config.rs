//! Relay configuration file support
//!
//! Loads `config.toml` from the ChatRelay directory. Every section and field
//! is optional; missing values take their defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatrelay_storage::FileStoreConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ContextConfig;
use crate::paths;
use crate::runtime::ToolExecutorConfig;
use crate::runtime::channel::{DebounceConfig, DispatchConfig};

/// Environment variable consulted when `model.api_key` is unset.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Complete relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub debounce: DebounceSection,
    pub context: ContextSection,
    pub tools: ToolsSection,
    pub model: ModelSection,
    pub dispatch: DispatchSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceSection {
    /// Messages that trigger an immediate flush
    pub threshold: usize,
    /// Seconds of silence before a batch is flushed
    pub max_wait_secs: u64,
    /// Watcher wake cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Inserted between concatenated contents
    pub separator: String,
}

impl Default for DebounceSection {
    fn default() -> Self {
        Self {
            threshold: 5,
            max_wait_secs: 3,
            poll_interval_ms: 1000,
            separator: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// Seconds a conversation stays cached without access
    pub idle_secs: u64,
    /// Conversation file directory, defaults to ~/.chatrelay/contexts
    pub storage_dir: Option<PathBuf>,
    /// Most recent messages kept when loading
    pub load_cap: usize,
    /// Messages sent to the model
    pub window_length: usize,
    pub max_sweep_interval_secs: u64,
    /// Timestamped backups kept per identity
    pub max_backups: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            idle_secs: 60,
            storage_dir: None,
            load_cap: 50,
            window_length: 15,
            max_sweep_interval_secs: 60,
            max_backups: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub pool_size: usize,
    pub timeout_secs: u64,
    /// Directory exposed by the file tools, defaults to ~/.chatrelay/files
    pub files_dir: Option<PathBuf>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            timeout_secs: 30,
            files_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Base URL of an OpenAI-compatible API
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout_secs: u64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub max_tool_rounds: usize,
    pub empty_reply_retries: usize,
    /// Capacity of the aggregator to dispatcher channel
    pub queue_capacity: usize,
    pub default_system_prompt: Option<String>,
    /// Per-identity prompt overrides
    pub system_prompts: HashMap<String, String>,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            empty_reply_retries: 3,
            queue_capacity: 256,
            default_system_prompt: Some("You are a helpful assistant.".to_string()),
            system_prompts: HashMap::new(),
        }
    }
}

impl RelayConfig {
    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => paths::config_path()?,
        };
        Ok(Self::load_from_path(&path)?)
    }

    /// Load and validate a config file. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or disable a component.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("debounce.threshold", self.debounce.threshold as u64),
            ("debounce.max_wait_secs", self.debounce.max_wait_secs),
            ("debounce.poll_interval_ms", self.debounce.poll_interval_ms),
            ("context.idle_secs", self.context.idle_secs),
            ("context.load_cap", self.context.load_cap as u64),
            (
                "context.max_sweep_interval_secs",
                self.context.max_sweep_interval_secs,
            ),
            ("tools.pool_size", self.tools.pool_size as u64),
            ("tools.timeout_secs", self.tools.timeout_secs),
            ("model.timeout_secs", self.model.timeout_secs),
            ("dispatch.max_tool_rounds", self.dispatch.max_tool_rounds as u64),
            ("dispatch.queue_capacity", self.dispatch.queue_capacity as u64),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                field: *field,
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.model.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "model.endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn debounce_config(&self) -> DebounceConfig {
        DebounceConfig {
            threshold: self.debounce.threshold,
            max_wait: Duration::from_secs(self.debounce.max_wait_secs),
            poll_interval: Duration::from_millis(self.debounce.poll_interval_ms),
            separator: self.debounce.separator.clone(),
        }
    }

    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            idle_timeout: Duration::from_secs(self.context.idle_secs),
            max_sweep_interval: Duration::from_secs(self.context.max_sweep_interval_secs),
            window_length: self.context.window_length,
        }
    }

    pub fn file_store_config(&self) -> anyhow::Result<FileStoreConfig> {
        let storage_dir = match &self.context.storage_dir {
            Some(dir) => dir.clone(),
            None => paths::contexts_dir()?,
        };
        Ok(FileStoreConfig {
            storage_dir,
            load_cap: self.context.load_cap,
            max_backups: self.context.max_backups,
        })
    }

    pub fn tool_executor_config(&self) -> ToolExecutorConfig {
        ToolExecutorConfig {
            pool_size: self.tools.pool_size,
            timeout: Duration::from_secs(self.tools.timeout_secs),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_tool_rounds: self.dispatch.max_tool_rounds,
            empty_reply_retries: self.dispatch.empty_reply_retries,
            default_system_prompt: self.dispatch.default_system_prompt.clone(),
            system_prompts: self.dispatch.system_prompts.clone(),
        }
    }

    pub fn files_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.tools.files_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::files_dir(),
        }
    }

    /// Model API key, falling back to `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.model
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RelayConfig::load_from_path(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.debounce.threshold, 5);
        assert_eq!(config.context.load_cap, 50);
        assert_eq!(config.dispatch.max_tool_rounds, 8);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[debounce]
threshold = 3
separator = "\n"

[context]
idle_secs = 10
storage_dir = "/var/lib/chatrelay/contexts"

[dispatch.system_prompts]
vip = "Be formal."
"#,
        )
        .unwrap();

        let config = RelayConfig::load_from_path(&path).unwrap();
        assert_eq!(config.debounce.threshold, 3);
        assert_eq!(config.debounce.max_wait_secs, 3);
        assert_eq!(config.debounce_config().separator, "\n");

        let context = config.context_config();
        assert_eq!(context.idle_timeout, Duration::from_secs(10));
        assert_eq!(context.sweep_interval(), Duration::from_secs(5));
        assert_eq!(
            config.file_store_config().unwrap().storage_dir,
            PathBuf::from("/var/lib/chatrelay/contexts")
        );

        let dispatch = config.dispatch_config();
        assert_eq!(dispatch.system_prompt_for("vip"), Some("Be formal."));
        assert_eq!(
            dispatch.system_prompt_for("guest"),
            Some("You are a helpful assistant.")
        );
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[debounce]\nthreshold = 0\n").unwrap();

        let err = RelayConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "debounce.threshold",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[debounce\nthreshold = ").unwrap();
        assert!(matches!(
            RelayConfig::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_toml_output_reloads() {
        let mut config = RelayConfig::default();
        config.tools.pool_size = 3;
        config.model.api_key = Some("sk-test".to_string());
        let rendered = config.to_toml().unwrap();

        let parsed: RelayConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.tools.pool_size, 3);
        assert_eq!(parsed.api_key().as_deref(), Some("sk-test"));
    }
}
