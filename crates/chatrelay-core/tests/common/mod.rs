#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatrelay_core::{
    ContextConfig, DebounceConfig, DispatchConfig, Relay, RelayDeps, RelaySettings,
    ToolExecutorConfig,
};
use chatrelay_storage::{ConversationFileStore, FileStoreConfig};
use chatrelay_traits::{
    ChatTransport, Message, ModelClient, Role, Tool, ToolCall, ToolContext, ToolRegistry,
    ToolSchema,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Model that echoes the latest message.
///
/// A user message starting with `shout:` makes it call the `shout` tool
/// first, and the reply then quotes the tool result.
#[derive(Default)]
pub struct EchoModel {
    seen: Mutex<Vec<String>>,
}

impl EchoModel {
    /// Contents of the latest message in every request, in call order.
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ModelClient for EchoModel {
    async fn complete(
        &self,
        _identity_key: &str,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> anyhow::Result<Message> {
        let Some(last) = messages.last() else {
            anyhow::bail!("empty request");
        };
        self.seen.lock().push(last.content().to_string());

        match last.role() {
            Role::Tool => Ok(Message::assistant(format!("tool said: {}", last.content()))),
            _ => match last.content().strip_prefix("shout:") {
                Some(text) => Ok(Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("call_1", "shout", json!({ "text": text.trim() }))],
                )),
                None => Ok(Message::assistant(format!("echo: {}", last.content()))),
            },
        }
    }
}

pub struct ShoutTool;

#[async_trait]
impl Tool for ShoutTool {
    fn name(&self) -> &str {
        "shout"
    }

    fn description(&self) -> &str {
        "Uppercase the given text"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let text = input["text"].as_str().unwrap_or_default();
        Ok(json!(format!("{} ({})", text.to_uppercase(), ctx.identity_key)))
    }
}

/// Transport that forwards every outgoing text to a channel.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(String, String)>,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn send_text(&self, identity_key: &str, text: &str) -> anyhow::Result<()> {
        self.tx
            .send((identity_key.to_string(), text.to_string()))
            .map_err(|_| anyhow::anyhow!("reply receiver closed"))
    }

    async fn send_file(&self, _identity_key: &str, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn settings(threshold: usize, max_wait_ms: u64) -> RelaySettings {
    RelaySettings {
        debounce: DebounceConfig {
            threshold,
            max_wait: Duration::from_millis(max_wait_ms),
            poll_interval: Duration::from_millis(20),
            separator: String::new(),
        },
        context: ContextConfig {
            idle_timeout: Duration::from_secs(60),
            max_sweep_interval: Duration::from_secs(60),
            window_length: 15,
        },
        tools: ToolExecutorConfig {
            pool_size: 2,
            timeout: Duration::from_secs(2),
        },
        dispatch: DispatchConfig::default(),
        queue_capacity: 16,
    }
}

pub struct TestRelay {
    pub relay: Relay,
    pub model: Arc<EchoModel>,
    pub replies: mpsc::UnboundedReceiver<(String, String)>,
}

pub fn start_relay(storage_dir: &Path, settings: RelaySettings) -> TestRelay {
    let persistence = Arc::new(
        ConversationFileStore::new(FileStoreConfig::new(storage_dir)).expect("storage dir"),
    );
    let mut registry = ToolRegistry::new();
    registry.register(ShoutTool);
    let model = Arc::new(EchoModel::default());
    let (transport, replies) = ChannelTransport::new();

    let relay = Relay::start(
        RelayDeps {
            persistence,
            registry: Arc::new(registry),
            model: model.clone(),
            transport,
        },
        settings,
    );
    TestRelay {
        relay,
        model,
        replies,
    }
}

/// Wait for `count` replies, failing the test after `timeout`.
pub async fn collect_replies(
    replies: &mut mpsc::UnboundedReceiver<(String, String)>,
    count: usize,
    timeout: Duration,
) -> Vec<(String, String)> {
    let mut received = Vec::with_capacity(count);
    let deadline = tokio::time::Instant::now() + timeout;
    while received.len() < count {
        match tokio::time::timeout_at(deadline, replies.recv()).await {
            Ok(Some(reply)) => received.push(reply),
            Ok(None) => break,
            Err(_) => panic!("timed out with {} of {count} replies", received.len()),
        }
    }
    received
}
