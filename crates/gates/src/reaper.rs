//! Background timeout reconciliation.
//!
//! Waiting loops expire their own gate when their wall clock runs out, but a
//! gate whose waiter died (process restart, cancelled task) would stay
//! pending forever. The reaper sweeps both tables on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use ratchet_core::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ApprovalManager, HumanRequestManager};

pub struct TimeoutReaper {
    approvals: Arc<ApprovalManager>,
    requests: Arc<HumanRequestManager>,
    interval: Duration,
}

impl TimeoutReaper {
    pub fn new(
        approvals: Arc<ApprovalManager>,
        requests: Arc<HumanRequestManager>,
        interval: Duration,
    ) -> Self {
        Self {
            approvals,
            requests,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// One pass over both tables. Returns `(approvals timed out, requests expired)`.
    pub async fn sweep(&self) -> (u64, u64) {
        let approvals = self.approvals.check_timeout().await.unwrap_or_else(|e| {
            warn!(error = %e, "Approval timeout sweep failed");
            0
        });
        let requests = self.requests.check_timeout().await.unwrap_or_else(|e| {
            warn!(error = %e, "Human request timeout sweep failed");
            0
        });
        if approvals + requests > 0 {
            info!(approvals, requests, "Reaped timed-out gates");
        }
        (approvals, requests)
    }

    /// Run [`sweep`](Self::sweep) every interval until `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Timeout reaper stopping");
                        return;
                    }
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::Approval;
    use crate::human::{HumanRequest, RequestStatus};
    use crate::ApprovalStatus;
    use ratchet_store::Database;

    async fn managers() -> (Database, Arc<ApprovalManager>, Arc<HumanRequestManager>) {
        let db = Database::open_in_memory().await.unwrap();
        (
            db.clone(),
            Arc::new(ApprovalManager::new(db.clone())),
            Arc::new(HumanRequestManager::new(db)),
        )
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_gates_alone() {
        let (_, approvals, requests) = managers().await;
        approvals
            .create(Approval::new("a", "t", "deploy", "release"))
            .await
            .unwrap();
        requests
            .create(HumanRequest::new("a", "t", "info", "which env?"))
            .await
            .unwrap();

        let reaper = TimeoutReaper::new(approvals, requests, Duration::from_secs(60));
        assert_eq!(reaper.sweep().await, (0, 0));
    }

    #[tokio::test]
    async fn sweep_expires_overdue_gates() {
        let (db, approvals, requests) = managers().await;
        let approval = approvals
            .create(Approval::new("a", "t", "deploy", "release"))
            .await
            .unwrap();
        let request = requests
            .create(HumanRequest::new("a", "t", "info", "which env?"))
            .await
            .unwrap();

        // Age both rows past their timeouts.
        sqlx::query("UPDATE approvals SET created_at = '2000-01-01T00:00:00.000000Z'")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE human_requests SET created_at = '2000-01-01T00:00:00.000000Z'")
            .execute(db.pool())
            .await
            .unwrap();

        let reaper = TimeoutReaper::new(approvals.clone(), requests.clone(), Duration::from_secs(60));
        assert_eq!(reaper.sweep().await, (1, 1));
        assert_eq!(
            approvals.require(&approval.id).await.unwrap().status,
            ApprovalStatus::Timeout
        );
        assert_eq!(
            requests.require(&request.id).await.unwrap().status,
            RequestStatus::Expired
        );
    }

    #[tokio::test]
    async fn started_reaper_stops_on_cancel() {
        let (_, approvals, requests) = managers().await;
        let cancel = CancellationToken::new();
        let handle = TimeoutReaper::new(approvals, requests, Duration::from_secs(1))
            .start(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
