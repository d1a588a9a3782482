//! Sandboxed filesystem tools: `load_file`, `save_file`, `list_directory`.
//!
//! Every path argument goes through the [`PathSandbox`] before any
//! filesystem access, and reads refuse files above the configured ceiling.
//! Output is plain text shaped for an LLM to consume.

use async_trait::async_trait;
use tokio::fs;

use crate::squadron::client_wrapper::ToolDefinition;
use crate::squadron::tool_protocol::{object_schema, Tool, ToolError};
use crate::squadron::tools::sandbox::{Access, PathSandbox};

fn path_arg(arguments: &serde_json::Value) -> Result<&str, ToolError> {
    arguments
        .get("path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::BadArguments("missing string field 'path'".to_string()))
}

fn io_error(err: std::io::Error) -> ToolError {
    ToolError::Io(err.to_string())
}

/// Read a whitelisted file and return its contents.
pub struct LoadFileTool {
    sandbox: PathSandbox,
}

impl LoadFileTool {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for LoadFileTool {
    fn name(&self) -> &str {
        "load_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "load_file".to_string(),
            description: "Read a project file and return its text content.".to_string(),
            parameters_schema: object_schema(
                serde_json::json!({
                    "path": {
                        "type": "string",
                        "description": "Project-relative path, e.g. docs/plan.md"
                    }
                }),
                &["path"],
            ),
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let raw = path_arg(arguments)?;
        let path = self.sandbox.resolve(raw, Access::Read)?;

        let metadata = fs::metadata(&path).await.map_err(io_error)?;
        if metadata.is_dir() {
            return Err(ToolError::Io(format!("'{}' is a directory", raw)));
        }
        if metadata.len() > self.sandbox.max_read_bytes() {
            return Err(ToolError::FileTooLarge(metadata.len()));
        }

        fs::read_to_string(&path).await.map_err(io_error)
    }
}

/// Write content to a file under the write whitelist, creating parents.
pub struct SaveFileTool {
    sandbox: PathSandbox,
}

impl SaveFileTool {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for SaveFileTool {
    fn name(&self) -> &str {
        "save_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "save_file".to_string(),
            description: "Write text content to a project file, overwriting it.".to_string(),
            parameters_schema: object_schema(
                serde_json::json!({
                    "path": {
                        "type": "string",
                        "description": "Project-relative path under a writable area, e.g. docs/report.md"
                    },
                    "content": {
                        "type": "string",
                        "description": "Full text content to write"
                    }
                }),
                &["path", "content"],
            ),
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let raw = path_arg(arguments)?;
        let content = arguments
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::BadArguments("missing string field 'content'".to_string()))?;
        let path = self.sandbox.resolve(raw, Access::Write)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::write(&path, content).await.map_err(io_error)?;
        Ok(format!("saved {} bytes to {}", content.len(), raw))
    }
}

/// List a whitelisted directory, one entry per line, directories suffixed
/// with `/`.
pub struct ListDirectoryTool {
    sandbox: PathSandbox,
}

impl ListDirectoryTool {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List the entries of a project directory.".to_string(),
            parameters_schema: object_schema(
                serde_json::json!({
                    "path": {
                        "type": "string",
                        "description": "Project-relative directory, e.g. docs"
                    }
                }),
                &["path"],
            ),
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let raw = path_arg(arguments)?;
        let path = self.sandbox.resolve(raw, Access::Read)?;

        let mut reader = fs::read_dir(&path).await.map_err(io_error)?;
        let mut lines = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            lines.push(if is_dir { format!("{}/", name) } else { name });
        }
        lines.sort();
        Ok(lines.join("\n"))
    }
}
