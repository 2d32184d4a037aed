//! Runs a stored task through the agent loop and writes the outcome back.

use std::sync::Arc;

use ratchet_core::CancellationToken;
use ratchet_core::agent::{AgentRecord, AgentStatus};
use ratchet_core::error::Error;
use ratchet_core::task::TaskStatus;
use ratchet_store::Database;
use tracing::{info, warn};

use crate::loop_runner::{AgentLoop, StepOutcome, TaskInput};

pub struct TaskRunner {
    db: Database,
    agent_loop: Arc<AgentLoop>,
}

impl TaskRunner {
    pub fn new(db: Database, agent_loop: Arc<AgentLoop>) -> Self {
        Self { db, agent_loop }
    }

    pub fn agent_loop(&self) -> &Arc<AgentLoop> {
        &self.agent_loop
    }

    /// Run the task with id `task_id`.
    ///
    /// A pending task is claimed first; an `in_progress` task is assumed to
    /// have been claimed by the caller. The task row ends in the outcome's
    /// status, or `cancelled` when `cancel` fires. A task without a runnable
    /// agent is marked failed and reported as a configuration error.
    pub async fn run_task(&self, task_id: &str, cancel: &CancellationToken) -> Result<StepOutcome, Error> {
        let task = self.db.require_task(task_id).await?;
        match task.status {
            TaskStatus::Pending => {
                if !self.db.claim_task(task_id).await? {
                    return Err(Error::config(format!("task {task_id} was claimed by another worker")));
                }
            }
            TaskStatus::InProgress => {}
            status => {
                return Err(Error::config(format!("task {task_id} is already {status}")));
            }
        }

        let agent = match self.assignee(&task.assigned_to).await {
            Ok(agent) => agent,
            Err(e) => {
                self.db
                    .finish_task(task_id, TaskStatus::Failed, "", &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        self.db.set_agent_status(&agent.id, AgentStatus::Busy).await?;
        info!(task_id, agent_id = %agent.id, "Running task");

        let input = TaskInput::from_records(&agent, &task);
        let result = self.agent_loop.run(&input, cancel).await;

        let succeeded = match &result {
            Ok(outcome) => {
                self.db
                    .finish_task(task_id, outcome.status, &outcome.result, &outcome.error)
                    .await?;
                outcome.is_completed()
            }
            Err(e) if e.is_cancelled() => {
                self.db.set_task_status(task_id, TaskStatus::Cancelled).await?;
                false
            }
            Err(e) => {
                self.db
                    .finish_task(task_id, TaskStatus::Failed, "", &e.to_string())
                    .await?;
                false
            }
        };

        let agent_status = match (agent.is_ephemeral, succeeded) {
            (false, _) => AgentStatus::Idle,
            (true, true) => AgentStatus::Completed,
            (true, false) => AgentStatus::Failed,
        };
        if let Err(e) = self.db.set_agent_status(&agent.id, agent_status).await {
            warn!(agent_id = %agent.id, error = %e, "Failed to release agent");
        }
        result
    }

    async fn assignee(&self, agent_id: &str) -> Result<AgentRecord, Error> {
        if agent_id.is_empty() {
            return Err(Error::config("task has no assigned agent"));
        }
        self.db
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| Error::config(format!("assigned agent {agent_id} does not exist")))
    }
}
