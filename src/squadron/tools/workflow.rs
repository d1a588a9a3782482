//! Workflow status tool: `update_workflow_status`.
//!
//! Workflows track their progress in markdown checklists.  This tool marks
//! the named workflow's checkbox as done in the given status file, or appends
//! a completion line when the workflow is not listed yet.  The file must sit
//! under the write whitelist.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::fs;

use crate::squadron::client_wrapper::ToolDefinition;
use crate::squadron::clock::Clock;
use crate::squadron::tool_protocol::{object_schema, Tool, ToolError};
use crate::squadron::tools::sandbox::{Access, PathSandbox};

pub struct UpdateWorkflowStatusTool {
    sandbox: PathSandbox,
    clock: Arc<dyn Clock>,
}

impl UpdateWorkflowStatusTool {
    pub fn new(sandbox: PathSandbox, clock: Arc<dyn Clock>) -> Self {
        Self { sandbox, clock }
    }
}

#[async_trait]
impl Tool for UpdateWorkflowStatusTool {
    fn name(&self) -> &str {
        "update_workflow_status"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "update_workflow_status".to_string(),
            description: "Mark a workflow as completed in a status checklist file.".to_string(),
            parameters_schema: object_schema(
                serde_json::json!({
                    "workflow": {
                        "type": "string",
                        "description": "Workflow name as it appears in the checklist"
                    },
                    "file": {
                        "type": "string",
                        "description": "Project-relative status file, e.g. docs/status.md"
                    }
                }),
                &["workflow", "file"],
            ),
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let workflow = arguments
            .get("workflow")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ToolError::BadArguments("missing string field 'workflow'".to_string())
            })?;
        let file = arguments
            .get("file")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::BadArguments("missing string field 'file'".to_string()))?;

        let path = self.sandbox.resolve(file, Access::Write)?;
        let existing = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(ToolError::Io(err.to_string())),
        };

        let open_entry = format!("- [ ] {}", workflow);
        let done_entry = format!("- [x] {}", workflow);

        let updated = if existing.contains(&open_entry) {
            existing.replacen(&open_entry, &done_entry, 1)
        } else if existing.contains(&done_entry) {
            return Ok(format!("workflow '{}' already completed", workflow));
        } else {
            let timestamp = self.clock.utc_now().format("%Y-%m-%d %H:%M:%S UTC");
            let mut updated = existing;
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(&format!("{} ({})\n", done_entry, timestamp));
            updated
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Io(e.to_string()))?;
        }
        fs::write(&path, updated)
            .await
            .map_err(|e| ToolError::Io(e.to_string()))?;

        Ok(format!("workflow '{}' marked completed in {}", workflow, file))
    }
}
