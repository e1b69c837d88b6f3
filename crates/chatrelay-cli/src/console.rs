//! Console transport: stdin lines in, stdout replies out.

use std::path::Path;

use async_trait::async_trait;
use chatrelay_traits::{ChatTransport, InboundMessage};
use colored::Colorize;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// Prints replies as `[identity] text`.
pub struct ConsoleTransport {
    stdout: Mutex<Stdout>,
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn write_line(&self, line: String) -> anyhow::Result<()> {
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_text(&self, identity_key: &str, text: &str) -> anyhow::Result<()> {
        let prefix = format!("[{identity_key}]").green().bold();
        self.write_line(format!("{prefix} {text}")).await
    }

    async fn send_file(&self, identity_key: &str, path: &Path) -> anyhow::Result<()> {
        let prefix = format!("[{identity_key}]").green().bold();
        let file = format!("<file: {}>", path.display()).cyan();
        self.write_line(format!("{prefix} {file}")).await
    }
}

/// Parse `<identity>: <text>`, falling back to `default_identity`.
///
/// Blank lines yield `None`.
pub fn parse_line(line: &str, default_identity: &str) -> Option<InboundMessage> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    match line.split_once(':') {
        Some((identity, text)) if is_identity(identity) => {
            Some(InboundMessage::text(identity.trim(), text.trim_start()))
        }
        _ => Some(InboundMessage::text(default_identity, line)),
    }
}

fn is_identity(candidate: &str) -> bool {
    let candidate = candidate.trim();
    !candidate.is_empty() && !candidate.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_line() {
        let inbound = parse_line("alice: hello there", "console").unwrap();
        assert_eq!(inbound.identity_key, "alice");
        assert_eq!(inbound.message.content(), "hello there");
    }

    #[test]
    fn test_unprefixed_line_uses_default() {
        let inbound = parse_line("what time is it: now?", "console").unwrap();
        assert_eq!(inbound.identity_key, "console");
        assert_eq!(inbound.message.content(), "what time is it: now?");
    }

    #[test]
    fn test_blank_line_is_skipped() {
        assert!(parse_line("   \n", "console").is_none());
    }

    #[test]
    fn test_text_keeps_inner_colons() {
        let inbound = parse_line("bob: ratio 1:2", "console").unwrap();
        assert_eq!(inbound.identity_key, "bob");
        assert_eq!(inbound.message.content(), "ratio 1:2");
    }
}
