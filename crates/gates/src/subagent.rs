//! Sub-agent manager.
//!
//! A parent agent may spawn ephemeral children, each bound to a fresh
//! pending task that the dispatcher picks up. Fan-out and depth are bounded;
//! the active count is always derived from a live query, never cached.

use std::collections::BTreeMap;
use std::time::Duration;

use ratchet_core::CancellationToken;
use ratchet_core::agent::{AgentRecord, AgentStatus};
use ratchet_core::error::GateError;
use ratchet_core::task::{TaskRecord, TaskSnapshot};
use ratchet_store::agents::insert_agent_with;
use ratchet_store::tasks::insert_task_with;
use ratchet_store::{Database, db_err, now_ts};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{DEFAULT_POLL_INTERVAL, next_poll};

pub const DEFAULT_MAX_PER_PARENT: usize = 5;
pub const DEFAULT_MAX_DEPTH: usize = 1;

/// Guards against a corrupt parent chain that loops back on itself.
const MAX_CHAIN: usize = 32;

/// Everything needed to spawn one child.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub parent_id: String,
    pub name: String,
    pub task: String,
    /// Empty means a generated prompt naming the parent
    pub system_prompt: String,
    /// Project the child's task belongs to; usually the parent task's
    pub project_id: String,
}

pub struct SubAgentManager {
    db: Database,
    max_per_parent: usize,
    max_depth: usize,
    poll_interval: Duration,
}

impl SubAgentManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_per_parent: DEFAULT_MAX_PER_PARENT,
            max_depth: DEFAULT_MAX_DEPTH,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Zero keeps the corresponding default.
    pub fn with_limits(mut self, max_per_parent: usize, max_depth: usize) -> Self {
        if max_per_parent > 0 {
            self.max_per_parent = max_per_parent;
        }
        if max_depth > 0 {
            self.max_depth = max_depth;
        }
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.poll_interval = interval;
        }
        self
    }

    pub fn max_per_parent(&self) -> usize {
        self.max_per_parent
    }

    /// Spawn an ephemeral child of `parent_id` and return its task id.
    pub async fn spawn(
        &self,
        parent_id: &str,
        name: &str,
        task: &str,
        system_prompt: &str,
    ) -> Result<String, GateError> {
        self.spawn_with(SpawnRequest {
            parent_id: parent_id.to_string(),
            name: name.to_string(),
            task: task.to_string(),
            system_prompt: system_prompt.to_string(),
            project_id: String::new(),
        })
        .await
    }

    pub async fn spawn_with(&self, request: SpawnRequest) -> Result<String, GateError> {
        if request.name.trim().is_empty() {
            return Err(GateError::Invalid("sub-agent name must not be empty".into()));
        }
        if request.task.trim().is_empty() {
            return Err(GateError::Invalid("sub-agent task must not be empty".into()));
        }

        let parent = self.db.require_agent(&request.parent_id).await?;
        let depth = self.depth_of(&parent).await?;
        if depth + 1 > self.max_depth {
            return Err(GateError::DepthExceeded {
                parent_id: parent.id,
            });
        }

        let system_prompt = if request.system_prompt.trim().is_empty() {
            format!(
                "You are {}, a sub-agent working for {}. Complete the task you are given \
                 and reply with a concise result.",
                request.name, parent.name
            )
        } else {
            request.system_prompt
        };

        let mut child = AgentRecord::new(Uuid::new_v4().to_string(), request.name.clone());
        child.role = "sub-agent".into();
        child.system_prompt = system_prompt;
        child.provider_alias = parent.provider_alias.clone();
        child.model = parent.model.clone();
        child.team_id = parent.team_id.clone();
        child.status = AgentStatus::Busy;
        child.is_ephemeral = true;
        child.parent_agent_id = parent.id.clone();

        let mut task = TaskRecord::new(Uuid::new_v4().to_string(), request.name, request.task);
        task.assigned_to = child.id.clone();
        task.parent_id = parent.id.clone();
        task.project_id = request.project_id;

        // The pool has one connection, so the transaction serializes the
        // count check with concurrent spawns.
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_err("BEGIN spawn"))?;

        let (active,): (i64,) = sqlx::query_as(ACTIVE_CHILDREN_SQL)
            .bind(&parent.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("COUNT active children"))?;
        let active = active as usize;
        if active >= self.max_per_parent {
            return Err(GateError::FanOutExceeded {
                parent_id: parent.id,
                active,
                limit: self.max_per_parent,
            });
        }

        insert_agent_with(&mut *tx, &child).await?;
        insert_task_with(&mut *tx, &task).await?;
        tx.commit().await.map_err(db_err("COMMIT spawn"))?;

        info!(
            parent_id = %parent.id,
            child_id = %child.id,
            task_id = %task.id,
            "Sub-agent spawned"
        );
        Ok(task.id)
    }

    /// Number of ephemeral children of `parent_id` still working.
    pub async fn count_active(&self, parent_id: &str) -> Result<usize, GateError> {
        let (count,): (i64,) = sqlx::query_as(ACTIVE_CHILDREN_SQL)
            .bind(parent_id)
            .fetch_one(self.db.pool())
            .await
            .map_err(db_err("COUNT active children"))?;
        Ok(count as usize)
    }

    /// Current status and result of one task. A terminal task with an empty
    /// result reports its error instead.
    pub async fn check_task(&self, task_id: &str) -> Result<TaskSnapshot, GateError> {
        let task = self.db.get_task(task_id).await?.ok_or_else(|| GateError::NotFound {
            kind: "task",
            id: task_id.to_string(),
        })?;
        Ok(TaskSnapshot::from_record(&task))
    }

    /// Poll until every task is terminal.
    ///
    /// Returns immediately when they already are. On timeout the unfinished
    /// tasks are reported with status `timeout` inside
    /// [`GateError::WaitTimeout`]; on cancellation the results gathered so
    /// far come back in [`GateError::WaitCancelled`].
    pub async fn wait_tasks(
        &self,
        cancel: &CancellationToken,
        task_ids: &[String],
        timeout: Duration,
    ) -> Result<BTreeMap<String, TaskSnapshot>, GateError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut results = BTreeMap::new();
        let mut pending: Vec<String> = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            if !pending.contains(id) {
                pending.push(id.clone());
            }
        }

        loop {
            let mut still_running = Vec::with_capacity(pending.len());
            for id in pending {
                let task = self.db.get_task(&id).await?.ok_or_else(|| GateError::NotFound {
                    kind: "task",
                    id: id.clone(),
                })?;
                if task.status.is_terminal() {
                    results.insert(id, TaskSnapshot::from_record(&task));
                } else {
                    still_running.push(id);
                }
            }
            pending = still_running;

            if pending.is_empty() {
                return Ok(results);
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(unfinished = pending.len(), "Sub-agent wait timed out");
                for id in pending {
                    results.insert(id, TaskSnapshot::timed_out());
                }
                return Err(GateError::WaitTimeout { results });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GateError::WaitCancelled { results }),
                _ = tokio::time::sleep(next_poll(self.poll_interval, deadline)) => {}
            }
        }
    }

    /// Cancel the open tasks of every ephemeral child of `parent_id` and
    /// idle the children that were still busy. Returns the number of tasks
    /// cancelled.
    pub async fn cancel_children(&self, parent_id: &str) -> Result<u64, GateError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_err("BEGIN cancel children"))?;

        let cancelled = sqlx::query(
            "UPDATE tasks SET status = 'cancelled', updated_at = ?1 \
             WHERE status IN ('pending', 'in_progress') \
               AND assigned_to IN (SELECT id FROM agents \
                                   WHERE parent_agent_id = ?2 AND is_ephemeral = 1)",
        )
        .bind(now_ts())
        .bind(parent_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("CANCEL child tasks"))?
        .rows_affected();

        sqlx::query(
            "UPDATE agents SET status = 'idle' \
             WHERE parent_agent_id = ?1 AND is_ephemeral = 1 AND status = 'busy'",
        )
        .bind(parent_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("IDLE child agents"))?;

        tx.commit().await.map_err(db_err("COMMIT cancel children"))?;

        if cancelled > 0 {
            info!(parent_id, cancelled, "Cancelled sub-agent tasks");
        }
        Ok(cancelled)
    }

    /// Number of ephemeral links between `agent` and its root.
    async fn depth_of(&self, agent: &AgentRecord) -> Result<usize, GateError> {
        let mut depth = 0;
        let mut current = agent.clone();
        while current.is_ephemeral && depth < MAX_CHAIN {
            depth += 1;
            match self.db.get_agent(&current.parent_agent_id).await? {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(depth)
    }
}

const ACTIVE_CHILDREN_SQL: &str = "SELECT COUNT(*) FROM agents \
     WHERE parent_agent_id = ?1 AND is_ephemeral = 1 \
       AND status NOT IN ('completed', 'failed', 'idle')";

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_core::task::TaskStatus;

    async fn setup() -> (Database, SubAgentManager) {
        let db = Database::open_in_memory().await.unwrap();
        let mut lead = AgentRecord::new("lead", "Lead");
        lead.is_lead = true;
        lead.provider_alias = "mock".into();
        lead.team_id = "team-1".into();
        db.insert_agent(&lead).await.unwrap();
        let mgr = SubAgentManager::new(db.clone())
            .with_limits(2, 1)
            .with_poll_interval(Duration::from_millis(20));
        (db, mgr)
    }

    #[tokio::test]
    async fn spawn_creates_ephemeral_child_and_pending_task() {
        let (db, mgr) = setup().await;
        let task_id = mgr.spawn("lead", "researcher", "find the docs", "").await.unwrap();

        let task = db.require_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.parent_id, "lead");
        assert_eq!(task.description, "find the docs");

        let child = db.require_agent(&task.assigned_to).await.unwrap();
        assert!(child.is_ephemeral);
        assert_eq!(child.parent_agent_id, "lead");
        assert_eq!(child.status, AgentStatus::Busy);
        assert_eq!(child.provider_alias, "mock");
        assert_eq!(child.team_id, "team-1");
        assert!(child.system_prompt.contains("Lead"));
        assert_eq!(mgr.count_active("lead").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ephemeral_parent_cannot_spawn() {
        let (db, mgr) = setup().await;
        let task_id = mgr.spawn("lead", "child", "work", "").await.unwrap();
        let child_id = db.require_task(&task_id).await.unwrap().assigned_to;

        let err = mgr.spawn(&child_id, "grandchild", "more work", "").await.unwrap_err();
        assert!(matches!(err, GateError::DepthExceeded { .. }));
    }

    #[tokio::test]
    async fn deeper_trees_need_a_higher_limit() {
        let (db, _) = setup().await;
        let mgr = SubAgentManager::new(db.clone()).with_limits(5, 2);
        let task_id = mgr.spawn("lead", "child", "work", "").await.unwrap();
        let child_id = db.require_task(&task_id).await.unwrap().assigned_to;
        let grandchild_task = mgr.spawn(&child_id, "grandchild", "more", "").await.unwrap();
        let grandchild = db
            .require_agent(&db.require_task(&grandchild_task).await.unwrap().assigned_to)
            .await
            .unwrap();
        assert!(matches!(
            mgr.spawn(&grandchild.id, "too deep", "x", "").await,
            Err(GateError::DepthExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn fan_out_is_bounded_by_active_children() {
        let (db, mgr) = setup().await;
        let first = mgr.spawn("lead", "a", "work", "").await.unwrap();
        mgr.spawn("lead", "b", "work", "").await.unwrap();

        let err = mgr.spawn("lead", "c", "work", "").await.unwrap_err();
        assert!(matches!(
            err,
            GateError::FanOutExceeded { active: 2, limit: 2, .. }
        ));

        // Finishing a child frees a slot.
        let first_agent = db.require_task(&first).await.unwrap().assigned_to;
        db.set_agent_status(&first_agent, AgentStatus::Completed).await.unwrap();
        assert_eq!(mgr.count_active("lead").await.unwrap(), 1);
        mgr.spawn("lead", "c", "work", "").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_parent_is_rejected() {
        let (_, mgr) = setup().await;
        assert!(mgr.spawn("ghost", "a", "work", "").await.is_err());
    }

    #[tokio::test]
    async fn check_task_substitutes_error_for_empty_result() {
        let (db, mgr) = setup().await;
        let task_id = mgr.spawn("lead", "a", "work", "").await.unwrap();
        db.finish_task(&task_id, TaskStatus::Failed, "", "provider down")
            .await
            .unwrap();
        let snapshot = mgr.check_task(&task_id).await.unwrap();
        assert_eq!(snapshot.status, "failed");
        assert_eq!(snapshot.result, "provider down");
    }

    #[tokio::test]
    async fn wait_on_finished_tasks_returns_without_polling() {
        let (db, _) = setup().await;
        let mgr = SubAgentManager::new(db.clone()).with_poll_interval(Duration::from_secs(30));
        let task_id = mgr.spawn("lead", "a", "work", "").await.unwrap();
        db.finish_task(&task_id, TaskStatus::Completed, "done", "").await.unwrap();

        let started = std::time::Instant::now();
        let results = mgr
            .wait_tasks(&CancellationToken::new(), &[task_id.clone()], Duration::from_secs(60))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(results[&task_id].result, "done");
    }

    #[tokio::test]
    async fn wait_collects_results_as_tasks_finish() {
        let (db, mgr) = setup().await;
        let a = mgr.spawn("lead", "a", "work", "").await.unwrap();
        let b = mgr.spawn("lead", "b", "work", "").await.unwrap();

        let finisher = {
            let db = db.clone();
            let (a, b) = (a.clone(), b.clone());
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                db.finish_task(&a, TaskStatus::Completed, "A", "").await.unwrap();
                tokio::time::sleep(Duration::from_millis(40)).await;
                db.set_task_status(&b, TaskStatus::Cancelled).await.unwrap();
            })
        };

        let results = mgr
            .wait_tasks(&CancellationToken::new(), &[a.clone(), b.clone()], Duration::from_secs(5))
            .await
            .unwrap();
        finisher.await.unwrap();
        assert_eq!(results[&a].status, "completed");
        assert_eq!(results[&b].status, "cancelled");
    }

    #[tokio::test]
    async fn wait_timeout_keeps_partial_results() {
        let (db, mgr) = setup().await;
        let done = mgr.spawn("lead", "a", "work", "").await.unwrap();
        let stuck = mgr.spawn("lead", "b", "work", "").await.unwrap();
        db.finish_task(&done, TaskStatus::Completed, "ok", "").await.unwrap();

        let err = mgr
            .wait_tasks(
                &CancellationToken::new(),
                &[done.clone(), stuck.clone()],
                Duration::from_millis(60),
            )
            .await
            .unwrap_err();
        let GateError::WaitTimeout { results } = err else {
            panic!("expected WaitTimeout");
        };
        assert_eq!(results[&done].status, "completed");
        assert_eq!(results[&stuck].status, TaskSnapshot::TIMEOUT);
    }

    #[tokio::test]
    async fn cancel_children_closes_open_work() {
        let (db, mgr) = setup().await;
        let open = mgr.spawn("lead", "a", "work", "").await.unwrap();
        let finished = mgr.spawn("lead", "b", "work", "").await.unwrap();
        db.finish_task(&finished, TaskStatus::Completed, "ok", "").await.unwrap();
        let finished_agent = db.require_task(&finished).await.unwrap().assigned_to;
        db.set_agent_status(&finished_agent, AgentStatus::Completed).await.unwrap();

        assert_eq!(mgr.cancel_children("lead").await.unwrap(), 1);
        assert_eq!(db.require_task(&open).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(
            db.require_task(&finished).await.unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(mgr.count_active("lead").await.unwrap(), 0);
        assert_eq!(
            db.require_agent(&finished_agent).await.unwrap().status,
            AgentStatus::Completed
        );
    }
}
