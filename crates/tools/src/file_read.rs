//! File read tool: read a text file from the workspace.

use async_trait::async_trait;
use ratchet_core::error::ToolError;
use ratchet_core::tool::{Tool, ToolContext};
use tracing::debug;

use crate::{required_str, workspace_path};

/// Largest file returned in full; longer files are cut at this many bytes.
pub const MAX_READ_BYTES: usize = 256 * 1024;

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file in the project workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the workspace"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let requested = required_str(&arguments, "path")?;
        let path = workspace_path(ctx, requested)?;
        debug!(path = %path.display(), "Reading file");

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "file_read".into(),
                reason: format!("failed to read {requested}: {e}"),
            })?;

        let truncated = bytes.len() > MAX_READ_BYTES;
        let shown = &bytes[..bytes.len().min(MAX_READ_BYTES)];
        Ok(serde_json::json!({
            "path": requested,
            "content": String::from_utf8_lossy(shown),
            "bytes": bytes.len(),
            "truncated": truncated,
        }))
    }
}
