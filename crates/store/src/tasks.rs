//! `tasks` table access.

use ratchet_core::error::StoreError;
use ratchet_core::task::{TaskRecord, TaskStatus};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::{Database, db_err, format_ts, now_ts, parse_ts};

/// Decode a `tasks` row.
pub fn row_to_task(row: &SqliteRow) -> Result<TaskRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "tasks",
        reason,
    };

    let status_raw: String = row.try_get("status").map_err(db_err("tasks.status"))?;
    let created_raw: String = row.try_get("created_at").map_err(db_err("tasks.created_at"))?;
    let updated_raw: String = row.try_get("updated_at").map_err(db_err("tasks.updated_at"))?;

    Ok(TaskRecord {
        id: row.try_get("id").map_err(db_err("tasks.id"))?,
        title: row.try_get("title").map_err(db_err("tasks.title"))?,
        description: row
            .try_get("description")
            .map_err(db_err("tasks.description"))?,
        status: status_raw.parse::<TaskStatus>().map_err(corrupt)?,
        priority: row.try_get("priority").map_err(db_err("tasks.priority"))?,
        assigned_to: row
            .try_get("assigned_to")
            .map_err(db_err("tasks.assigned_to"))?,
        parent_id: row.try_get("parent_id").map_err(db_err("tasks.parent_id"))?,
        result: row.try_get("result").map_err(db_err("tasks.result"))?,
        error: row.try_get("error").map_err(db_err("tasks.error"))?,
        project_id: row
            .try_get("project_id")
            .map_err(db_err("tasks.project_id"))?,
        created_at: parse_ts(&created_raw).map_err(corrupt)?,
        updated_at: parse_ts(&updated_raw).map_err(corrupt)?,
    })
}

/// Insert a task, executed on any sqlx executor (pool or transaction).
pub async fn insert_task_with<'e, E>(executor: E, task: &TaskRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO tasks (id, title, description, status, priority, assigned_to,
                           parent_id, result, error, project_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&task.id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority)
    .bind(&task.assigned_to)
    .bind(&task.parent_id)
    .bind(&task.result)
    .bind(&task.error)
    .bind(&task.project_id)
    .bind(format_ts(task.created_at))
    .bind(format_ts(task.updated_at))
    .execute(executor)
    .await
    .map_err(db_err("INSERT task"))?;
    Ok(())
}

impl Database {
    pub async fn insert_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        insert_task_with(self.pool(), task).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("GET task"))?;
        row.as_ref().map(row_to_task).transpose()
    }

    /// Fetch a task or fail with `NotFound`.
    pub async fn require_task(&self, id: &str) -> Result<TaskRecord, StoreError> {
        self.get_task(id).await?.ok_or_else(|| StoreError::NotFound {
            kind: "task",
            id: id.to_string(),
        })
    }

    /// Unconditionally set a task's status.
    pub async fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now_ts())
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err("UPDATE task status"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a pending task to `in_progress`. Returns false when another
    /// worker got there first or the task is no longer pending.
    pub async fn claim_task(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'in_progress', updated_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(db_err("CLAIM task"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Write a task's outcome. A cancelled task is left as it is.
    pub async fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        result: &str,
        error: &str,
    ) -> Result<bool, StoreError> {
        let outcome = sqlx::query(
            "UPDATE tasks SET status = ?1, result = ?2, error = ?3, updated_at = ?4 \
             WHERE id = ?5 AND status <> 'cancelled'",
        )
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(db_err("FINISH task"))?;
        Ok(outcome.rows_affected() > 0)
    }

    /// Pending top-level tasks that have an assignee, highest priority then
    /// oldest first.
    pub async fn list_runnable_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, StoreError> {
        self.list_pending_assigned("parent_id = ''", limit).await
    }

    /// Pending sub-agent tasks (those with a parent), same ordering.
    pub async fn list_runnable_subtasks(&self, limit: usize) -> Result<Vec<TaskRecord>, StoreError> {
        self.list_pending_assigned("parent_id <> ''", limit).await
    }

    async fn list_pending_assigned(&self, parent_filter: &str, limit: usize) -> Result<Vec<TaskRecord>, StoreError> {
        let sql = format!(
            "SELECT * FROM tasks WHERE status = 'pending' AND assigned_to <> '' AND {parent_filter} \
             ORDER BY priority DESC, created_at, rowid LIMIT ?1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(self.pool())
            .await
            .map_err(db_err("LIST runnable tasks"))?;
        rows.iter().map(row_to_task).collect()
    }

    /// Tasks whose parent is `parent_id`, oldest first.
    pub async fn list_subtasks(&self, parent_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE parent_id = ?1 ORDER BY created_at, rowid")
            .bind(parent_id)
            .fetch_all(self.pool())
            .await
            .map_err(db_err("LIST subtasks"))?;
        rows.iter().map(row_to_task).collect()
    }

    /// Reset an in-progress or terminal task to pending (clears result/error).
    pub async fn reset_task(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', result = '', error = '', updated_at = ?1 \
             WHERE id = ?2",
        )
        .bind(now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(db_err("RESET task"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, assignee: &str, priority: i64) -> TaskRecord {
        let mut t = TaskRecord::new(id, format!("task {id}"), "do the thing");
        t.assigned_to = assignee.into();
        t.priority = priority;
        t
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let db = Database::open_in_memory().await.unwrap();
        let t = task("t1", "a1", 0);
        db.insert_task(&t).await.unwrap();
        let loaded = db.require_task("t1").await.unwrap();
        assert_eq!(loaded.title, "task t1");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            t.created_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_task(&task("t1", "a1", 0)).await.unwrap();
        assert!(db.claim_task("t1").await.unwrap());
        assert!(!db.claim_task("t1").await.unwrap());
        assert_eq!(
            db.require_task("t1").await.unwrap().status,
            TaskStatus::InProgress
        );
    }

    #[tokio::test]
    async fn finish_does_not_overwrite_cancellation() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_task(&task("t1", "a1", 0)).await.unwrap();
        db.set_task_status("t1", TaskStatus::Cancelled).await.unwrap();
        assert!(!db.finish_task("t1", TaskStatus::Completed, "done", "").await.unwrap());
        assert_eq!(
            db.require_task("t1").await.unwrap().status,
            TaskStatus::Cancelled
        );

        db.insert_task(&task("t2", "a1", 0)).await.unwrap();
        assert!(db.finish_task("t2", TaskStatus::Failed, "", "boom").await.unwrap());
        let t2 = db.require_task("t2").await.unwrap();
        assert_eq!(t2.status, TaskStatus::Failed);
        assert_eq!(t2.error, "boom");
    }

    #[tokio::test]
    async fn runnable_tasks_need_assignee_and_sort_by_priority() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_task(&task("low", "a1", 1)).await.unwrap();
        db.insert_task(&task("unassigned", "", 9)).await.unwrap();
        db.insert_task(&task("high", "a2", 5)).await.unwrap();
        let ids: Vec<String> = db
            .list_runnable_tasks(10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn subtasks_are_listed_apart_from_top_level_tasks() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_task(&task("root", "a1", 0)).await.unwrap();
        let mut child = task("child", "c1", 0);
        child.parent_id = "a1".into();
        db.insert_task(&child).await.unwrap();

        let roots: Vec<String> = db.list_runnable_tasks(10).await.unwrap().into_iter().map(|t| t.id).collect();
        let subtasks: Vec<String> = db
            .list_runnable_subtasks(10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(roots, vec!["root"]);
        assert_eq!(subtasks, vec!["child"]);
    }

    #[tokio::test]
    async fn reset_clears_outcome() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_task(&task("t1", "a1", 0)).await.unwrap();
        db.finish_task("t1", TaskStatus::Failed, "", "boom").await.unwrap();
        assert!(db.reset_task("t1").await.unwrap());
        let t = db.require_task("t1").await.unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.error.is_empty());
    }
}
