use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chatrelay_ai::{OpenAiClient, OpenAiConfig};
use chatrelay_core::{Relay, RelayConfig, RelayDeps, RelaySettings};
use chatrelay_storage::ConversationFileStore;
use chatrelay_traits::{ChatTransport, ToolRegistry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::cli::RunArgs;
use crate::console::{ConsoleTransport, parse_line};

pub async fn run(config: &RelayConfig, args: RunArgs) -> Result<()> {
    let Some(api_key) = config.api_key() else {
        bail!("No API key configured. Set model.api_key in the config file or OPENAI_API_KEY.");
    };

    let model = OpenAiClient::new(OpenAiConfig {
        base_url: config.model.endpoint.clone(),
        api_key,
        model: config.model.model.clone(),
        temperature: Some(config.model.temperature),
        top_p: Some(config.model.top_p),
        timeout: Duration::from_secs(config.model.timeout_secs),
        ..OpenAiConfig::default()
    })
    .context("failed to build model client")?;

    let store_config = config.file_store_config()?;
    let persistence = ConversationFileStore::new(store_config.clone()).with_context(|| {
        format!(
            "failed to open conversation storage at {}",
            store_config.storage_dir.display()
        )
    })?;

    let transport: Arc<dyn ChatTransport> = Arc::new(ConsoleTransport::new());
    let files_dir = config.files_dir()?;
    std::fs::create_dir_all(&files_dir)
        .with_context(|| format!("failed to create {}", files_dir.display()))?;
    let mut registry = ToolRegistry::new();
    chatrelay_tools::register_builtin_tools(&mut registry, files_dir, transport.clone());

    let relay = Relay::start(
        RelayDeps {
            persistence: Arc::new(persistence),
            registry: Arc::new(registry),
            model: Arc::new(model),
            transport,
        },
        RelaySettings::from(config),
    );
    info!(model = %config.model.model, "Console relay running");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if let Some(inbound) = parse_line(&line, &args.identity) {
                    relay.submit(inbound).await;
                }
            }
        }
    }

    relay.shutdown().await
}
