//! Built-in tools and the path sandbox.
//!
//! The fixed initial registry contains `load_file`, `save_file`,
//! `list_directory`, `web_search`, and `update_workflow_status`; see
//! [`default_registry`] for the one-call assembly used by the runtime.

pub mod filesystem;
pub mod sandbox;
pub mod web_search;
pub mod workflow;

use std::sync::Arc;

use crate::squadron::clock::Clock;
use crate::squadron::tool_protocol::ToolRegistry;

pub use filesystem::{ListDirectoryTool, LoadFileTool, SaveFileTool};
pub use sandbox::{Access, PathSandbox};
pub use web_search::WebSearchTool;
pub use workflow::UpdateWorkflowStatusTool;

/// Assemble the fixed initial registry against one sandbox.
pub fn default_registry(sandbox: PathSandbox, clock: Arc<dyn Clock>) -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(Arc::new(LoadFileTool::new(sandbox.clone())))
        .with_tool(Arc::new(SaveFileTool::new(sandbox.clone())))
        .with_tool(Arc::new(ListDirectoryTool::new(sandbox.clone())))
        .with_tool(Arc::new(WebSearchTool::new()))
        .with_tool(Arc::new(UpdateWorkflowStatusTool::new(sandbox, clock)))
}
