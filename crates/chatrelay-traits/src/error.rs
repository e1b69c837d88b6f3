//! Tool failure taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Reasons a tool call did not produce a value.
///
/// These are never raised to the conversation: the executor folds them into
/// a structured result that the model can react to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not registered: {0}")]
    NotRegistered(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Execution timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("{0}")]
    Runtime(String),
}

impl ToolError {
    /// Stable tag used in tool-result payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotRegistered(_) => "ToolNotRegistered",
            Self::MissingParameter(_) => "MissingParameter",
            Self::TimedOut(_) => "ExecutionTimedOut",
            Self::Runtime(_) => "ToolRuntimeError",
        }
    }
}
