pub mod channel;
pub mod tool_executor;

pub use tool_executor::{ToolCallResult, ToolExecutor, ToolExecutorConfig};
