//! Background dispatch of runnable tasks.
//!
//! Every poll the dispatcher claims pending tasks that have an assignee and
//! runs each on its own tokio task. Top-level tasks are bounded by a
//! semaphore. Sub-agent tasks skip it: a parent holds its permit while it
//! waits on its children, and their number is already capped per parent and
//! by depth when they are spawned. Rows that were cancelled in the store
//! while running get their run cancelled too.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ratchet_core::CancellationToken;
use ratchet_core::error::Error;
use ratchet_core::task::TaskStatus;
use ratchet_store::Database;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::loop_runner::StepOutcome;
use crate::runner::TaskRunner;

/// Sub-agent tasks claimed per pass.
const SUBTASK_BATCH: usize = 32;

pub struct Dispatcher {
    db: Database,
    runner: Arc<TaskRunner>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    poll_interval: Duration,
    top_level: bool,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Dispatcher {
    pub fn new(db: Database, runner: Arc<TaskRunner>, max_concurrent: usize, poll_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            db,
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            poll_interval: poll_interval.max(Duration::from_millis(10)),
            top_level: true,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Leave top-level tasks alone and only dispatch sub-agent tasks.
    pub fn subtasks_only(mut self) -> Self {
        self.top_level = false;
        self
    }

    /// Ids of the tasks currently running, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// One dispatch pass. Returns the number of tasks started.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<usize, Error> {
        self.cancel_stale_runs().await;

        let mut started = 0;
        let free = self.permits.available_permits();
        if self.top_level && free > 0 {
            for task in self.db.list_runnable_tasks(free).await? {
                let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                    break;
                };
                if self.launch(task.id, cancel, Some(permit)).await? {
                    started += 1;
                }
            }
        }
        for task in self.db.list_runnable_subtasks(SUBTASK_BATCH).await? {
            if self.launch(task.id, cancel, None).await? {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Run `task_id` in the foreground while dispatching in the background,
    /// so the sub-agents it spawns get picked up.
    pub async fn run_foreground(
        self: &Arc<Self>,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, Error> {
        let stop = cancel.child_token();
        let poller = self.clone().start(stop.clone());
        let outcome = self.runner.run_task(task_id, cancel).await;
        stop.cancel();
        if let Err(e) = poller.await {
            warn!(error = %e, "Dispatcher task panicked");
        }
        outcome
    }

    /// Claim `task_id` and run it on its own tokio task. The permit, if
    /// any, is held until the run ends.
    async fn launch(
        &self,
        task_id: String,
        cancel: &CancellationToken,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<bool, Error> {
        if !self.db.claim_task(&task_id).await? {
            return Ok(false);
        }

        let child = cancel.child_token();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.clone(), child.clone());

        let runner = self.runner.clone();
        let running = self.running.clone();
        debug!(task_id = %task_id, bounded = permit.is_some(), "Dispatching task");
        tokio::spawn(async move {
            match runner.run_task(&task_id, &child).await {
                Ok(outcome) => debug!(task_id = %task_id, status = %outcome.status, "Task finished"),
                Err(e) if e.is_cancelled() => info!(task_id = %task_id, "Task cancelled"),
                Err(e) => warn!(task_id = %task_id, error = %e, "Task run failed"),
            }
            running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_id);
            drop(permit);
        });
        Ok(true)
    }

    async fn cancel_stale_runs(&self) {
        let running: Vec<(String, CancellationToken)> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, token)| (id.clone(), token.clone()))
            .collect();
        for (task_id, token) in running {
            match self.db.get_task(&task_id).await {
                Ok(Some(task)) if task.status == TaskStatus::Cancelled => {
                    info!(task_id = %task_id, "Task cancelled in store; stopping its run");
                    token.cancel();
                }
                Ok(_) => {}
                Err(e) => warn!(task_id = %task_id, error = %e, "Task status check failed"),
            }
        }
    }

    /// Poll until `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                max_concurrent = self.max_concurrent,
                top_level = self.top_level,
                poll_ms = self.poll_interval.as_millis() as u64,
                "Dispatcher started"
            );
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Dispatcher stopping");
                        return;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.tick(&cancel).await {
                            warn!(error = %e, "Dispatch pass failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_config::AgentConfig;
    use ratchet_core::agent::AgentRecord;
    use ratchet_core::task::TaskRecord;
    use ratchet_providers::ScriptedProvider;

    use crate::loop_runner::AgentLoop;
    use crate::services::AgentServices;

    async fn dispatcher(provider: ScriptedProvider, max_concurrent: usize) -> (Database, Arc<Dispatcher>) {
        let db = Database::open_in_memory().await.unwrap();
        let services = AgentServices::new()
            .with_db(db.clone())
            .with_fallback_provider(Arc::new(provider));
        let runner = Arc::new(TaskRunner::new(
            db.clone(),
            Arc::new(AgentLoop::new(AgentConfig::default(), services)),
        ));
        let dispatcher = Dispatcher::new(db.clone(), runner, max_concurrent, Duration::from_millis(20));
        (db, Arc::new(dispatcher))
    }

    async fn seed(db: &Database, tasks: &[&str]) {
        db.insert_agent(&AgentRecord::new("a1", "Worker")).await.unwrap();
        for id in tasks {
            let mut task = TaskRecord::new(*id, "Job", "do it");
            task.assigned_to = "a1".into();
            db.insert_task(&task).await.unwrap();
        }
    }

    async fn wait_for(db: &Database, id: &str, status: TaskStatus) {
        for _ in 0..200 {
            if db.require_task(id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {status}");
    }

    #[tokio::test]
    async fn tick_runs_pending_tasks() {
        let (db, dispatcher) = dispatcher(ScriptedProvider::always("ok"), 4).await;
        seed(&db, &["t1", "t2"]).await;

        let cancel = CancellationToken::new();
        assert_eq!(dispatcher.tick(&cancel).await.unwrap(), 2);
        wait_for(&db, "t1", TaskStatus::Completed).await;
        wait_for(&db, "t2", TaskStatus::Completed).await;
        assert_eq!(dispatcher.tick(&cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let provider = ScriptedProvider::always("ok").with_latency(Duration::from_millis(200));
        let (db, dispatcher) = dispatcher(provider, 1).await;
        seed(&db, &["t1", "t2"]).await;

        let cancel = CancellationToken::new();
        assert_eq!(dispatcher.tick(&cancel).await.unwrap(), 1);
        assert_eq!(dispatcher.tick(&cancel).await.unwrap(), 0);
        assert_eq!(dispatcher.running().len(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn subtasks_run_while_every_permit_is_held() {
        let provider = ScriptedProvider::always("ok").with_latency(Duration::from_millis(300));
        let (db, dispatcher) = dispatcher(provider, 1).await;
        seed(&db, &["root"]).await;
        db.insert_agent(&AgentRecord::new("c1", "Helper")).await.unwrap();
        let mut child = TaskRecord::new("child", "Help", "assist");
        child.assigned_to = "c1".into();
        child.parent_id = "a1".into();

        let cancel = CancellationToken::new();
        assert_eq!(dispatcher.tick(&cancel).await.unwrap(), 1);
        db.insert_task(&child).await.unwrap();
        assert_eq!(dispatcher.tick(&cancel).await.unwrap(), 1);
        assert_eq!(dispatcher.running(), vec!["child", "root"]);
        wait_for(&db, "child", TaskStatus::Completed).await;
        wait_for(&db, "root", TaskStatus::Completed).await;
    }

    #[tokio::test]
    async fn subtasks_only_skips_top_level_tasks() {
        let (db, dispatcher) = dispatcher(ScriptedProvider::always("ok"), 2).await;
        let dispatcher = Arc::new(Arc::into_inner(dispatcher).unwrap().subtasks_only());
        seed(&db, &["root"]).await;

        let cancel = CancellationToken::new();
        assert_eq!(dispatcher.tick(&cancel).await.unwrap(), 0);
        assert_eq!(db.require_task("root").await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn cancelled_rows_stop_their_runs() {
        let provider = ScriptedProvider::always("ok").with_latency(Duration::from_secs(30));
        let (db, dispatcher) = dispatcher(provider, 2).await;
        seed(&db, &["t1"]).await;

        let cancel = CancellationToken::new();
        let handle = dispatcher.clone().start(cancel.clone());
        wait_for(&db, "t1", TaskStatus::InProgress).await;

        db.set_task_status("t1", TaskStatus::Cancelled).await.unwrap();
        for _ in 0..200 {
            if dispatcher.running().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dispatcher.running().is_empty());
        assert_eq!(db.require_task("t1").await.unwrap().status, TaskStatus::Cancelled);

        cancel.cancel();
        handle.await.unwrap();
    }
}
