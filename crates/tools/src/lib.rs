//! Built-in tool implementations for Ratchet.
//!
//! Every file tool resolves its path against the project workspace carried
//! in the [`ToolContext`]; paths that escape it are rejected as sandbox
//! violations. The shell tool prefers the project's container executor and
//! falls back to a local process in the workspace directory.

pub mod file_list;
pub mod file_read;
pub mod file_write;
pub mod shell;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ratchet_core::error::ToolError;
use ratchet_core::tool::{ToolContext, ToolRegistry};
use ratchet_security::resolve_in_workspace;

pub use file_list::FileListTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use shell::ShellTool;

/// Register `file_read`, `file_write`, `file_list` and `shell`.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    exec_timeout: Duration,
    max_exec_timeout: Duration,
) {
    registry.register(Arc::new(FileReadTool));
    registry.register(Arc::new(FileWriteTool));
    registry.register(Arc::new(FileListTool));
    registry.register(Arc::new(ShellTool::new(exec_timeout, max_exec_timeout)));
}

/// A required string argument.
pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{key}' argument")))
}

/// Resolve `path` inside the context's workspace.
pub(crate) fn workspace_path(ctx: &ToolContext, path: &str) -> Result<PathBuf, ToolError> {
    resolve_in_workspace(ctx.workspace.as_deref(), path)
        .map_err(|e| ToolError::SandboxViolation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_four_tools() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(
            registry.names(),
            vec!["file_list", "file_read", "file_write", "shell"]
        );
    }

    #[test]
    fn escaping_paths_are_sandbox_violations() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext {
            workspace: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            workspace_path(&ctx, "../secrets"),
            Err(ToolError::SandboxViolation(_))
        ));
        assert!(matches!(
            workspace_path(&ctx, "/etc/passwd"),
            Err(ToolError::SandboxViolation(_))
        ));
        assert!(workspace_path(&ctx, "notes/today.md").is_ok());
    }
}
