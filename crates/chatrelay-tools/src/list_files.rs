use std::path::PathBuf;

use async_trait::async_trait;
use chatrelay_traits::{Tool, ToolContext};
use serde_json::{Value, json};
use tokio::fs;
use tracing::debug;

/// Optional file whose content is appended to the listing.
pub const DESCRIPTIONS_FILE: &str = "file_descriptions.txt";

/// Lists the regular files available for sending.
#[derive(Clone)]
pub struct ListFilesTool {
    files_dir: PathBuf,
}

impl ListFilesTool {
    pub fn new(files_dir: impl Into<PathBuf>) -> Self {
        Self {
            files_dir: files_dir.into(),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files_in_directory"
    }

    fn description(&self) -> &str {
        "List the files that can be sent to the user, followed by their descriptions when available."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.files_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut listing = names.join("\n");
        match fs::read_to_string(self.files_dir.join(DESCRIPTIONS_FILE)).await {
            Ok(descriptions) => {
                listing.push_str("\n\nfile descriptions:\n");
                listing.push_str(&descriptions);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!(identity_key = %ctx.identity_key, count = names.len(), "Listed shared files");
        Ok(Value::String(listing))
    }
}
