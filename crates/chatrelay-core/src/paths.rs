use anyhow::Result;
use std::path::PathBuf;

const CHATRELAY_DIR: &str = ".chatrelay";
const CONFIG_FILE: &str = "config.toml";
const LOGS_DIR: &str = "logs";
const CONTEXTS_DIR: &str = "contexts";
const FILES_DIR: &str = "files";

/// Environment variable to override the ChatRelay directory.
pub const CHATRELAY_DIR_ENV: &str = "CHATRELAY_DIR";

/// Resolve the ChatRelay data directory.
/// Priority: CHATRELAY_DIR env var > ~/.chatrelay/
pub fn resolve_chatrelay_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CHATRELAY_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(CHATRELAY_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the ChatRelay directory exists and return its path.
pub fn ensure_chatrelay_dir() -> Result<PathBuf> {
    let dir = resolve_chatrelay_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Get the config file path: ~/.chatrelay/config.toml
pub fn config_path() -> Result<PathBuf> {
    Ok(resolve_chatrelay_dir()?.join(CONFIG_FILE))
}

/// Get the logs directory: ~/.chatrelay/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = resolve_chatrelay_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Default conversation storage: ~/.chatrelay/contexts/
pub fn contexts_dir() -> Result<PathBuf> {
    Ok(resolve_chatrelay_dir()?.join(CONTEXTS_DIR))
}

/// Default directory exposed by the file tools: ~/.chatrelay/files/
pub fn files_dir() -> Result<PathBuf> {
    Ok(resolve_chatrelay_dir()?.join(FILES_DIR))
}
