use anyhow::Result;
use chatrelay_core::RelayConfig;
use chatrelay_storage::ConversationFileStore;
use chatrelay_traits::Role;
use colored::Colorize;

use crate::cli::HistoryArgs;

pub async fn run(config: &RelayConfig, args: HistoryArgs) -> Result<()> {
    let store = ConversationFileStore::new(config.file_store_config()?)?;
    // Read-only: a corrupt file is reported, not quarantined.
    let history = store.peek(&args.identity).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No history for {}", args.identity);
        return Ok(());
    }

    for message in &history {
        let role = match message.role() {
            Role::User => "user".blue(),
            Role::Assistant => "assistant".green(),
            Role::Tool => "tool".yellow(),
            Role::System => "system".dimmed(),
        };
        match message.tool_call_id() {
            Some(call_id) => println!("{role} ({call_id}): {}", message.content()),
            None => println!("{role}: {}", message.content()),
        }
        for call in message.tool_calls() {
            println!("  -> {}({})", call.name, call.arguments);
        }
    }
    Ok(())
}
