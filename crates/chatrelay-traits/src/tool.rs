//! Tool trait and types for model-invoked tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON Schema for tool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema object
}

impl ToolSchema {
    /// Names listed in the schema's `required` array.
    pub fn required_parameters(&self) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Who asked for a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub identity_key: String,
    pub call_id: String,
}

impl ToolContext {
    pub fn new(identity_key: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            identity_key: identity_key.into(),
            call_id: call_id.into(),
        }
    }
}

/// Core trait for tools.
///
/// Implementations run on the executor's worker pool. Work that blocks the
/// thread should go through `tokio::task::spawn_blocking`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (used in model function calls).
    fn name(&self) -> &str;

    /// Human-readable description for model context.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with given input.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<Value>;

    /// Build complete schema for the model.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Parameters that must be present before the call is dispatched.
    fn required_parameters(&self) -> Vec<String> {
        self.schema().required_parameters()
    }
}
