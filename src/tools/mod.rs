pub mod broadcast;
pub mod list_files;
pub mod observe;
pub mod read_file;
pub mod registry;
pub mod search_files;
pub mod shell;
pub mod traits;
pub mod write_file;

pub use registry::ToolRegistry;
pub use traits::{Tool, ToolOutcome};

use std::path::Path;
use std::sync::Arc;

use crate::bus::MessageBus;

/// Registry with every built-in tool, file tools rooted at `workdir` and the
/// inter-agent pair wired to `bus`.
pub fn default_registry(workdir: &Path, bus: Arc<MessageBus>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(read_file::ReadFileTool::new(workdir)));
    registry.register(Arc::new(write_file::WriteFileTool::new(workdir)));
    registry.register(Arc::new(list_files::ListFilesTool::new(workdir)));
    registry.register(Arc::new(search_files::SearchFilesTool::new(workdir)));
    registry.register(Arc::new(shell::ShellTool::new(workdir)));
    registry.register(Arc::new(broadcast::BroadcastTool::new(bus.clone())));
    registry.register(Arc::new(observe::ObserveTool::new(bus)));
    registry
}
