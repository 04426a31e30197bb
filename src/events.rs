//! Pipeline lifecycle events.
//!
//! The orchestrator broadcasts [`PipelineEvent`] values on a
//! `tokio::sync::broadcast` channel. External observers (a dashboard, a
//! logger) subscribe and react; the pipeline never waits on them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{Issue, PipelineRun, RunStage};
use crate::stats::{Alert, StatsSnapshot};

/// Capacity of the event channel. Slow subscribers that fall further
/// behind than this see `RecvError::Lagged` and miss events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// All collaborators started; the pipeline accepts work.
    Initialized,
    /// A run was created for an accepted issue.
    RunStarted { run: Box<PipelineRun> },
    /// A stage began executing.
    StageStarted { run_id: String, stage: RunStage },
    /// A stage finished executing.
    StageCompleted {
        run_id: String,
        stage: RunStage,
        duration_ms: u64,
    },
    /// A run reached `success`.
    RunCompleted { run: Box<PipelineRun> },
    /// A run reached `failed`.
    RunFailed { run: Box<PipelineRun> },
    /// A run was cancelled while active.
    RunCancelled { run: Box<PipelineRun> },
    /// A committed fix was reverted.
    RolledBack { run: Box<PipelineRun> },
    /// A rollback attempt failed; the run keeps its prior terminal status.
    RollbackFailed { run_id: String, error: String },
    /// A run is suspended waiting for human sign-off.
    ApprovalRequired {
        run_id: String,
        approvers: Vec<String>,
    },
    /// An approval was resolved one way or the other.
    ApprovalResponse {
        run_id: String,
        approved: bool,
        approver: String,
    },
    /// The post-commit scan found new issues in the touched files.
    PostCommitIssues {
        run_id: String,
        issues: Vec<Issue>,
    },
    /// Periodic statistics snapshot.
    MetricsUpdated { stats: StatsSnapshot },
    /// A monitored metric crossed its configured threshold.
    Alert { alert: Alert },
    /// A collaborator reported a failure independent of any run.
    ComponentError { component: String, error: String },
    /// The pipeline stopped accepting work.
    Shutdown,
}

/// Create the pipeline event channel.
pub fn channel() -> broadcast::Sender<PipelineEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Broadcast an event to all subscribers. A send error only means there
/// are currently no receivers, which is fine.
pub fn emit(tx: &broadcast::Sender<PipelineEvent>, event: PipelineEvent) {
    let _ = tx.send(event);
}
