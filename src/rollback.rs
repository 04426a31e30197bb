//! Rollback controller: undoes a committed fix when verification turns
//! out to have been wrong in hindsight.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::collab::Committer;
use crate::events::{emit, PipelineEvent};
use crate::models::{PipelineRun, RunStatus};

pub struct RollbackController {
    committer: Arc<dyn Committer>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl RollbackController {
    pub fn new(committer: Arc<dyn Committer>, event_tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self { committer, event_tx }
    }

    /// Attempt to revert the run's committed fix. Returns true when the
    /// run transitioned to `rolled_back`.
    ///
    /// No-op without a commit result, and refuses to act when the commit
    /// carries no rollback info (no backup was taken). A committer failure
    /// leaves the run's prior terminal status in place and surfaces a
    /// `rollback_failed` event; failures are never retried.
    pub async fn attempt_rollback(&self, run: &mut PipelineRun) -> bool {
        let Some(commit) = &run.commit else {
            return false;
        };
        let Some(rollback_info) = &commit.rollback_info else {
            eprintln!(
                "[rollback] run_id={}: commit has no rollback info, refusing to roll back",
                run.id
            );
            return false;
        };

        match self.committer.rollback(rollback_info).await {
            Ok(()) => {
                run.status = RunStatus::RolledBack;
                emit(
                    &self.event_tx,
                    PipelineEvent::RolledBack {
                        run: Box::new(run.clone()),
                    },
                );
                true
            }
            Err(e) => {
                eprintln!("[rollback] run_id={}: rollback failed: {:#}", run.id, e);
                emit(
                    &self.event_tx,
                    PipelineEvent::RollbackFailed {
                        run_id: run.id.clone(),
                        error: format!("{:#}", e),
                    },
                );
                false
            }
        }
    }
}
