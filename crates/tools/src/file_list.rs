//! File list tool: list a workspace directory.

use async_trait::async_trait;
use ratchet_core::error::ToolError;
use ratchet_core::tool::{Tool, ToolContext};

use crate::workspace_path;

/// Listings stop after this many entries.
pub const MAX_ENTRIES: usize = 1000;

pub struct FileListTool;

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory in the project workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory, relative to the workspace (default \".\")"
                }
            }
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let requested = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(".");
        let path = workspace_path(ctx, requested)?;
        let failed = |e: std::io::Error| ToolError::ExecutionFailed {
            tool_name: "file_list".into(),
            reason: format!("failed to list {requested}: {e}"),
        };

        let mut reader = tokio::fs::read_dir(&path).await.map_err(failed)?;
        let mut entries = Vec::new();
        let mut truncated = false;
        while let Some(entry) = reader.next_entry().await.map_err(failed)? {
            if entries.len() == MAX_ENTRIES {
                truncated = true;
                break;
            }
            let metadata = entry.metadata().await.map_err(failed)?;
            entries.push((
                entry.file_name().to_string_lossy().into_owned(),
                metadata.is_dir(),
                metadata.len(),
            ));
        }
        entries.sort();

        let entries: Vec<serde_json::Value> = entries
            .into_iter()
            .map(|(name, is_dir, size)| {
                serde_json::json!({
                    "name": name,
                    "kind": if is_dir { "dir" } else { "file" },
                    "size": size,
                })
            })
            .collect();

        Ok(serde_json::json!({
            "path": requested,
            "entries": entries,
            "truncated": truncated,
        }))
    }
}
