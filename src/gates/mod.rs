//! Approval gate: decides whether a run needs human sign-off and suspends
//! it until an external response arrives or the wait times out.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::config::ApprovalConfig;
use crate::errors::PipelineError;
use crate::models::{PipelineRun, Priority};

/// Verification score above which high-confidence auto-approval applies.
const HIGH_CONFIDENCE_SCORE: f64 = 0.9;

/// Resolution of an approval wait.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Approved { approver: String },
    Rejected { approver: String },
    TimedOut,
    /// The pending entry was revoked while waiting (run cancelled or
    /// pipeline shut down).
    Aborted,
}

/// Response delivered through [`ApprovalGate::resolve`].
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub approver: String,
}

/// Owns the pending-approvals index. A run in `awaiting_approval` status
/// always has an entry here; the pipeline clears both together.
pub struct ApprovalGate {
    config: ApprovalConfig,
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalResponse>>>,
}

impl ApprovalGate {
    pub fn new(config: ApprovalConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether this run needs human sign-off.
    ///
    /// Approval is skipped entirely when globally disabled, and
    /// auto-granted when any enabled auto-approval condition holds:
    /// low priority, verification score above [`HIGH_CONFIDENCE_SCORE`],
    /// or all verification checks passed.
    pub fn requires_approval(&self, run: &PipelineRun) -> bool {
        if !self.config.required {
            return false;
        }
        if self.config.auto_approve_low_risk && run.metadata.priority == Priority::Low {
            return false;
        }
        if let Some(verification) = &run.verification {
            if self.config.auto_approve_high_confidence
                && verification.score > HIGH_CONFIDENCE_SCORE
            {
                return false;
            }
            if self.config.auto_approve_tests_passing && verification.all_checks_passed() {
                return false;
            }
        }
        true
    }

    /// Suspend until [`resolve`](Self::resolve) is called for this run id
    /// or the configured timeout elapses, whichever comes first.
    pub async fn wait_for_approval(&self, run_id: &str) -> GateDecision {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(run_id.to_string(), tx);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if response.approved {
                    GateDecision::Approved {
                        approver: response.approver,
                    }
                } else {
                    GateDecision::Rejected {
                        approver: response.approver,
                    }
                }
            }
            // Sender dropped without a response: the entry was revoked
            Ok(Err(_)) => GateDecision::Aborted,
            Err(_) => {
                self.pending.lock().await.remove(run_id);
                GateDecision::TimedOut
            }
        }
    }

    /// Deliver an external approval response. Fails when no approval is
    /// pending for the run.
    pub async fn resolve(
        &self,
        run_id: &str,
        approved: bool,
        approver: &str,
    ) -> Result<(), PipelineError> {
        let sender = self.pending.lock().await.remove(run_id).ok_or_else(|| {
            PipelineError::NoPendingApproval {
                run_id: run_id.to_string(),
            }
        })?;
        // Receiver gone means the wait already ended; nothing to do.
        let _ = sender.send(ApprovalResponse {
            approved,
            approver: approver.to_string(),
        });
        Ok(())
    }

    /// Drop a pending entry without a response. The waiting side observes
    /// [`GateDecision::Aborted`]. Returns whether an entry existed.
    pub async fn revoke(&self, run_id: &str) -> bool {
        self.pending.lock().await.remove(run_id).is_some()
    }

    /// Run ids currently awaiting approval.
    pub async fn pending_ids(&self) -> Vec<String> {
        self.pending.lock().await.keys().cloned().collect()
    }

    /// Drop all pending entries. Every waiter observes `Aborted`.
    pub async fn clear(&self) {
        self.pending.lock().await.clear();
    }

    pub fn approvers(&self) -> &[String] {
        &self.config.approvers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CheckStatus, Issue, IssueType, Location, PipelineRun, Severity, TriggerSource,
        VerificationCheck, VerificationResult,
    };
    use chrono::Utc;

    fn run_with_severity(severity: Severity) -> PipelineRun {
        let issue = Issue {
            id: "issue-1".to_string(),
            issue_type: IssueType::Lint,
            severity,
            location: Location {
                file: "src/lib.rs".to_string(),
                line: None,
                column: None,
            },
            title: "t".to_string(),
            description: "d".to_string(),
            detected_at: Utc::now(),
        };
        PipelineRun::new(issue, TriggerSource::Automatic)
    }

    fn verification(score: f64, all_passed: bool) -> VerificationResult {
        VerificationResult {
            success: true,
            score,
            message: "ok".to_string(),
            checks: vec![VerificationCheck {
                name: "tests".to_string(),
                status: if all_passed {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed
                },
            }],
        }
    }

    #[test]
    fn test_approval_disabled_never_requires() {
        let gate = ApprovalGate::new(ApprovalConfig {
            required: false,
            ..Default::default()
        });
        assert!(!gate.requires_approval(&run_with_severity(Severity::Critical)));
    }

    #[test]
    fn test_default_policy_requires_approval() {
        let gate = ApprovalGate::new(ApprovalConfig::default());
        assert!(gate.requires_approval(&run_with_severity(Severity::Medium)));
    }

    #[test]
    fn test_low_risk_auto_approval() {
        let gate = ApprovalGate::new(ApprovalConfig {
            auto_approve_low_risk: true,
            ..Default::default()
        });
        assert!(!gate.requires_approval(&run_with_severity(Severity::Low)));
        assert!(gate.requires_approval(&run_with_severity(Severity::High)));
    }

    #[test]
    fn test_high_confidence_auto_approval() {
        let gate = ApprovalGate::new(ApprovalConfig {
            auto_approve_high_confidence: true,
            ..Default::default()
        });
        let mut run = run_with_severity(Severity::High);
        run.verification = Some(verification(0.95, false));
        assert!(!gate.requires_approval(&run));

        run.verification = Some(verification(0.9, false));
        assert!(gate.requires_approval(&run), "score must exceed 0.9");
    }

    #[test]
    fn test_tests_passing_auto_approval() {
        let gate = ApprovalGate::new(ApprovalConfig {
            auto_approve_tests_passing: true,
            ..Default::default()
        });
        let mut run = run_with_severity(Severity::High);
        run.verification = Some(verification(0.5, true));
        assert!(!gate.requires_approval(&run));

        run.verification = Some(verification(0.5, false));
        assert!(gate.requires_approval(&run));
    }

    #[tokio::test]
    async fn test_resolve_approves_waiter() {
        let gate = std::sync::Arc::new(ApprovalGate::new(ApprovalConfig::default()));
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_approval("run-1").await })
        };
        // Give the waiter time to register
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(gate.pending_ids().await, vec!["run-1".to_string()]);

        gate.resolve("run-1", true, "alice").await.unwrap();
        let decision = waiter.await.unwrap();
        assert_eq!(
            decision,
            GateDecision::Approved {
                approver: "alice".to_string()
            }
        );
        assert!(gate.pending_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_rejects_waiter() {
        let gate = std::sync::Arc::new(ApprovalGate::new(ApprovalConfig::default()));
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_approval("run-1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.resolve("run-1", false, "bob").await.unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            GateDecision::Rejected {
                approver: "bob".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let gate = ApprovalGate::new(ApprovalConfig {
            timeout_secs: 0,
            ..Default::default()
        });
        assert_eq!(gate.wait_for_approval("run-1").await, GateDecision::TimedOut);
        assert!(gate.pending_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_revoke_aborts_waiter() {
        let gate = std::sync::Arc::new(ApprovalGate::new(ApprovalConfig::default()));
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for_approval("run-1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.revoke("run-1").await);
        assert_eq!(waiter.await.unwrap(), GateDecision::Aborted);
    }

    #[tokio::test]
    async fn test_resolve_unknown_run_fails() {
        let gate = ApprovalGate::new(ApprovalConfig::default());
        let err = gate.resolve("missing", true, "alice").await.unwrap_err();
        assert!(matches!(err, PipelineError::NoPendingApproval { .. }));
    }
}
