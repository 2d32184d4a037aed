//! Persistent gates the agent loop can block on.
//!
//! - **Approvals**: a reviewer approves or rejects a risky action
//! - **Human requests**: typed questions (tokens, info, yes/no) for an operator
//! - **Sub-agents**: bounded fan-out of ephemeral child agents and waits on their tasks
//! - **Reaper**: periodic timeout reconciliation for the first two
//!
//! Every state change is a conditional update on the row's primary key, so a
//! resolved gate can never be resolved again.

pub mod approval;
pub mod human;
pub mod reaper;
pub mod subagent;

use std::time::Duration;

pub use approval::{Approval, ApprovalManager, ApprovalStatus};
pub use human::{HumanRequest, HumanRequestManager, RequestStatus, Urgency};
pub use reaper::TimeoutReaper;
pub use subagent::{SpawnRequest, SubAgentManager};

/// Default interval between store polls while waiting on a gate.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long to sleep before the next poll without overshooting `deadline`.
pub(crate) fn next_poll(interval: Duration, deadline: tokio::time::Instant) -> Duration {
    interval.min(deadline.saturating_duration_since(tokio::time::Instant::now()))
}
