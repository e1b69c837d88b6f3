//! ChatRelay Tools - Built-in tools for the chat model.
//!
//! Both tools operate on one configured directory of shareable files.

mod files;
mod list_files;
mod send_file;

use std::path::PathBuf;
use std::sync::Arc;

use chatrelay_traits::{ChatTransport, ToolRegistry};

pub use list_files::{DESCRIPTIONS_FILE, ListFilesTool};
pub use send_file::SendFileTool;

/// Register every built-in tool against `files_dir`.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    files_dir: impl Into<PathBuf>,
    transport: Arc<dyn ChatTransport>,
) {
    let files_dir = files_dir.into();
    registry.register(ListFilesTool::new(files_dir.clone()));
    registry.register(SendFileTool::new(files_dir, transport));
}
