//! Task records as stored in the `tasks` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task row.
///
/// The last three variants are the loop's soft terminal outcomes and are
/// written to the row exactly like `completed` / `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    LoopDetected,
    ApprovalTimeout,
    RequestExpired,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::LoopDetected => "loop_detected",
            TaskStatus::ApprovalTimeout => "approval_timeout",
            TaskStatus::RequestExpired => "request_expired",
        }
    }

    /// Whether the task will never run again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "loop_detected" => Ok(TaskStatus::LoopDetected),
            "approval_timeout" => Ok(TaskStatus::ApprovalTimeout),
            "request_expired" => Ok(TaskStatus::RequestExpired),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// A unit of work assigned to exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A new pending task.
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: 0,
            assigned_to: String::new(),
            parent_id: String::new(),
            result: String::new(),
            error: String::new(),
            project_id: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Result text, falling back to the error once the task is terminal.
    pub fn effective_result(&self) -> &str {
        if self.status.is_terminal() && self.result.is_empty() {
            &self.error
        } else {
            &self.result
        }
    }
}

/// Point-in-time view of a task, as reported to a waiting parent agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error: String,
}

impl TaskSnapshot {
    /// Synthetic status for tasks still running when a wait gave up.
    pub const TIMEOUT: &'static str = "timeout";

    pub fn from_record(task: &TaskRecord) -> Self {
        Self {
            status: task.status.as_str().to_string(),
            result: task.effective_result().to_string(),
            error: task.error.clone(),
        }
    }

    pub fn timed_out() -> Self {
        Self {
            status: Self::TIMEOUT.to_string(),
            result: String::new(),
            error: "task did not finish before the wait timeout".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::LoopDetected.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(
            "approval_timeout".parse::<TaskStatus>().unwrap(),
            TaskStatus::ApprovalTimeout
        );
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn failed_task_without_result_reports_error() {
        let mut task = TaskRecord::new("t1", "build", "");
        task.status = TaskStatus::Failed;
        task.error = "provider unreachable".into();
        assert_eq!(task.effective_result(), "provider unreachable");

        let snap = TaskSnapshot::from_record(&task);
        assert_eq!(snap.status, "failed");
        assert_eq!(snap.result, "provider unreachable");
    }

    #[test]
    fn running_task_keeps_empty_result() {
        let mut task = TaskRecord::new("t1", "build", "");
        task.status = TaskStatus::InProgress;
        task.error = "stale".into();
        assert_eq!(task.effective_result(), "");
    }
}
