//! File write tool: create or overwrite a file in the workspace.

use async_trait::async_trait;
use ratchet_core::error::ToolError;
use ratchet_core::tool::{Tool, ToolContext};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{required_str, workspace_path};

pub struct FileWriteTool;

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "file_write".into(),
        reason,
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in the project workspace. Creates parent directories \
         as needed and overwrites the file unless append is true."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Text to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append instead of overwriting (default false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let requested = required_str(&arguments, "path")?;
        let content = required_str(&arguments, "content")?;
        let append = arguments
            .get("append")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let path = workspace_path(ctx, requested)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("creating {}: {e}", parent.display())))?;
        }

        debug!(path = %path.display(), bytes = content.len(), append, "Writing file");
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| failed(format!("opening {requested}: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| failed(format!("writing {requested}: {e}")))?;
        file.flush()
            .await
            .map_err(|e| failed(format!("flushing {requested}: {e}")))?;

        Ok(serde_json::json!({
            "path": requested,
            "bytes_written": content.len(),
            "appended": append,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext {
            workspace: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn writes_into_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileWriteTool
            .execute(
                &ctx(&dir),
                args(serde_json::json!({"path": "out/report.txt", "content": "processed"})),
            )
            .await
            .unwrap();
        assert_eq!(result["bytes_written"], 9);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/report.txt")).unwrap(),
            "processed"
        );
    }

    #[tokio::test]
    async fn overwrite_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        for content in ["first", "second"] {
            FileWriteTool
                .execute(&ctx, args(serde_json::json!({"path": "log.txt", "content": content})))
                .await
                .unwrap();
        }
        FileWriteTool
            .execute(
                &ctx,
                args(serde_json::json!({"path": "log.txt", "content": "+more", "append": true})),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("log.txt")).unwrap(),
            "second+more"
        );
    }

    #[tokio::test]
    async fn refuses_to_write_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileWriteTool
            .execute(
                &ctx(&dir),
                args(serde_json::json!({"path": "../escape.txt", "content": "x"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
    }

    #[tokio::test]
    async fn content_is_required() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileWriteTool
                .execute(&ctx(&dir), args(serde_json::json!({"path": "a.txt"})))
                .await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
