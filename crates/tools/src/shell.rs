//! Shell tool: run a command in the project's container or workspace.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ratchet_core::error::ToolError;
use ratchet_core::tool::{ExecOutput, Tool, ToolContext};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::required_str;

/// Output streams longer than this are cut.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub struct ShellTool {
    default_timeout: Duration,
    max_timeout: Duration,
}

impl ShellTool {
    pub fn new(default_timeout: Duration, max_timeout: Duration) -> Self {
        let max_timeout = max_timeout.max(Duration::from_secs(1));
        Self {
            default_timeout: default_timeout.min(max_timeout),
            max_timeout,
        }
    }

    /// Requested timeout, or the default, capped at the maximum.
    fn timeout_for(&self, arguments: &serde_json::Map<String, serde_json::Value>) -> Duration {
        arguments
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300))
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n[output truncated]");
    }
    text
}

async fn run_local(
    command: &str,
    ctx: &ToolContext,
    timeout: Duration,
) -> Result<ExecOutput, ToolError> {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    if let Some(workspace) = &ctx.workspace {
        cmd.current_dir(workspace);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| ToolError::ExecutionFailed {
        tool_name: "shell".into(),
        reason: e.to_string(),
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout {
            tool_name: "shell".into(),
            timeout_secs: timeout.as_secs(),
        })?
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "shell".into(),
            reason: e.to_string(),
        })?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project workspace and return stdout, stderr \
         and the exit code."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": format!(
                        "Wall-clock limit in seconds (default {}, max {})",
                        self.default_timeout.as_secs(),
                        self.max_timeout.as_secs()
                    )
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let command = required_str(&arguments, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("empty command".into()));
        }
        let timeout = self.timeout_for(&arguments);

        let (output, runner) = match ctx.container.as_ref().filter(|c| c.is_ready()) {
            Some(container) => {
                debug!(command, timeout_secs = timeout.as_secs(), "Executing in container");
                let workdir = ctx
                    .workspace
                    .as_ref()
                    .map(|w| w.to_string_lossy().into_owned());
                (
                    container.exec(command, workdir.as_deref(), timeout).await?,
                    "container",
                )
            }
            None => {
                debug!(command, timeout_secs = timeout.as_secs(), "Executing locally");
                (run_local(command, ctx, timeout).await?, "local")
            }
        };

        if output.exit_code != 0 {
            warn!(command, exit_code = output.exit_code, "Command failed");
        }

        Ok(serde_json::json!({
            "stdout": truncate(output.stdout).trim_end(),
            "stderr": truncate(output.stderr).trim_end(),
            "exit_code": output.exit_code,
            "runner": runner,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use ratchet_core::tool::ContainerExecutor;

    fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    struct FakeContainer {
        ready: AtomicBool,
    }

    #[async_trait]
    impl ContainerExecutor for FakeContainer {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn exec(
            &self,
            command: &str,
            _workdir: Option<&str>,
            timeout: Duration,
        ) -> Result<ExecOutput, ToolError> {
            Ok(ExecOutput {
                stdout: format!("container ran `{command}` within {}s", timeout.as_secs()),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    #[test]
    fn timeout_is_capped() {
        let tool = ShellTool::new(Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(tool.timeout_for(&args(serde_json::json!({}))), Duration::from_secs(30));
        assert_eq!(
            tool.timeout_for(&args(serde_json::json!({"timeout_secs": 90}))),
            Duration::from_secs(90)
        );
        assert_eq!(
            tool.timeout_for(&args(serde_json::json!({"timeout_secs": 9999}))),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn long_output_is_truncated_on_a_char_boundary() {
        let text = "é".repeat(MAX_OUTPUT_BYTES);
        let cut = truncate(text);
        assert!(cut.ends_with("[output truncated]"));
        assert!(cut.len() < MAX_OUTPUT_BYTES + 32);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_locally_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let ctx = ToolContext {
            workspace: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let result = ShellTool::default()
            .execute(&ctx, args(serde_json::json!({"command": "ls; echo oops >&2; exit 3"})))
            .await
            .unwrap();
        assert!(result["stdout"].as_str().unwrap().contains("marker.txt"));
        assert_eq!(result["stderr"], "oops");
        assert_eq!(result["exit_code"], 3);
        assert_eq!(result["runner"], "local");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let tool = ShellTool::new(Duration::from_secs(1), Duration::from_secs(1));
        let err = tool
            .execute(&ToolContext::default(), args(serde_json::json!({"command": "sleep 5"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn ready_container_is_preferred() {
        let container = Arc::new(FakeContainer {
            ready: AtomicBool::new(true),
        });
        let ctx = ToolContext {
            container: Some(container.clone()),
            ..Default::default()
        };
        let result = ShellTool::default()
            .execute(&ctx, args(serde_json::json!({"command": "make test"})))
            .await
            .unwrap();
        assert_eq!(result["runner"], "container");
        assert_eq!(result["stdout"], "container ran `make test` within 30s");
    }
}
