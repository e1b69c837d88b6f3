use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_traits::{ChatTransport, Tool, ToolContext};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::files::resolve_file;

#[derive(Debug, Deserialize)]
struct SendFileInput {
    file_name: String,
}

/// Sends a file from the shared directory to the calling identity.
pub struct SendFileTool {
    files_dir: PathBuf,
    transport: Arc<dyn ChatTransport>,
}

impl SendFileTool {
    pub fn new(files_dir: impl Into<PathBuf>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            files_dir: files_dir.into(),
            transport,
        }
    }
}

#[async_trait]
impl Tool for SendFileTool {
    fn name(&self) -> &str {
        "send_a_file"
    }

    fn description(&self) -> &str {
        "Send one of the listed files to the user. Call list_files_in_directory first to see the available names."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_name": {
                    "description": "Name of the file as shown by list_files_in_directory",
                    "type": "string"
                }
            },
            "required": ["file_name"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<Value> {
        let params: SendFileInput = serde_json::from_value(input)?;

        // An unknown name is an answer for the model, not a tool failure.
        let path = match resolve_file(&self.files_dir, &params.file_name) {
            Ok(path) => path,
            Err(reason) => return Ok(Value::String(reason)),
        };

        self.transport.send_file(&ctx.identity_key, &path).await?;
        info!(identity_key = %ctx.identity_key, file = %params.file_name, "Sent file");
        Ok(Value::String(format!(
            "File {} sent successfully",
            params.file_name
        )))
    }
}
