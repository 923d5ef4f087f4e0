//! Built-in tools for the agent framework

mod communicate;
mod fetch;
mod patch_file;
mod read_file;
mod search_replace;
mod search_web;
mod shell;
mod spawn;
mod write_file;

pub use communicate::{CommunicateTool, COMMUNICATE_TOOL};
pub use fetch::FetchTool;
pub use patch_file::PatchFileTool;
pub use read_file::ReadFileTool;
pub use search_replace::SearchReplaceTool;
pub use search_web::SearchWebTool;
pub use shell::ShellTool;
pub use spawn::SpawnTool;
pub use write_file::WriteFileTool;

use super::registry::ToolRegistry;

/// Create a registry with all default tools
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    // Safe
    registry.register(ReadFileTool);
    registry.register(CommunicateTool);

    // Moderate (network)
    registry.register(FetchTool::new());
    registry.register(SearchWebTool::new());
    registry.register(SpawnTool::from_env());

    // Dangerous (write/execute)
    registry.register(ShellTool);
    registry.register(WriteFileTool);
    registry.register(SearchReplaceTool);
    registry.register(PatchFileTool);

    registry
}
