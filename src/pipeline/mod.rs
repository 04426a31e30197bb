//! Auto-fix pipeline orchestrator.
//!
//! Owns the run state machine and coordinates the detector, fixer,
//! verifier, and committer collaborators. Runs execute their stages
//! strictly in order; multiple runs may be in flight up to the configured
//! concurrency cap. The active-run map, the pending-approvals index, and
//! the statistics are the only shared mutable state, and only the
//! orchestrator writes to them.

pub mod filter;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};

use crate::collab::{Committer, Detector, Fixer, ScanScope, Verifier};
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::events::{emit, PipelineEvent};
use crate::gates::{ApprovalGate, GateDecision};
use crate::models::{Issue, PipelineRun, RunStage, RunStatus, TriggerSource};
use crate::rollback::RollbackController;
use crate::stats::{PipelineStats, StatsSnapshot};

/// Maximum number of completed runs retained in history.
const HISTORY_CAPACITY: usize = 1000;

/// How a run left the stage sequence.
enum StageFlow {
    /// All stages ran; the run is a success.
    Completed,
    /// The run was cancelled out from under the stage sequence; its
    /// results are discarded.
    Cancelled,
}

/// The auto-fix pipeline orchestrator.
pub struct AutoFixPipeline {
    config: PipelineConfig,
    detector: Arc<dyn Detector>,
    fixer: Arc<dyn Fixer>,
    verifier: Arc<dyn Verifier>,
    committer: Arc<dyn Committer>,
    gate: Arc<ApprovalGate>,
    rollback: Arc<RollbackController>,
    active_runs: Arc<Mutex<HashMap<String, PipelineRun>>>,
    history: Arc<Mutex<VecDeque<PipelineRun>>>,
    stats: Arc<Mutex<PipelineStats>>,
    event_tx: broadcast::Sender<PipelineEvent>,
    /// Handles of spawned background work (detector loop, metrics loop,
    /// post-commit checks), aborted on shutdown.
    background: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl AutoFixPipeline {
    pub fn new(
        config: PipelineConfig,
        detector: Arc<dyn Detector>,
        fixer: Arc<dyn Fixer>,
        verifier: Arc<dyn Verifier>,
        committer: Arc<dyn Committer>,
    ) -> Self {
        let event_tx = crate::events::channel();
        let gate = Arc::new(ApprovalGate::new(config.approval.clone()));
        let rollback = Arc::new(RollbackController::new(
            Arc::clone(&committer),
            event_tx.clone(),
        ));
        Self {
            config,
            detector,
            fixer,
            verifier,
            committer,
            gate,
            rollback,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(VecDeque::new())),
            stats: Arc::new(Mutex::new(PipelineStats::new())),
            event_tx,
            background: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Subscribe to pipeline lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Start all collaborators, the detector subscription (automatic
    /// mode), and the periodic metrics task. Fails fatally when any
    /// collaborator fails to start.
    pub async fn initialize(self: Arc<Self>) -> Result<(), PipelineError> {
        let components = ["detector", "fixer", "verifier", "committer"];
        let results = join_all([
            self.detector.start(),
            self.fixer.start(),
            self.verifier.start(),
            self.committer.start(),
        ])
        .await;
        for (name, result) in components.iter().zip(results) {
            result.map_err(|e| PipelineError::ComponentStartFailed {
                component: name.to_string(),
                source: e,
            })?;
        }

        Self::spawn_detector_loop(Arc::clone(&self)).await;
        if self.config.monitoring.enabled {
            Self::spawn_metrics_loop(Arc::clone(&self)).await;
        }

        emit(&self.event_tx, PipelineEvent::Initialized);
        Ok(())
    }

    /// Entry point for both automatic and manual invocation. Creates a
    /// run, enforces the concurrency cap, executes the stage sequence,
    /// and returns the terminal run. Expected stage failures land on the
    /// returned run's `status`/`error`; only contract violations error.
    pub async fn process_issue(
        &self,
        issue: Issue,
        triggered_by: TriggerSource,
    ) -> Result<PipelineRun, PipelineError> {
        let mut run = PipelineRun::new(issue, triggered_by);

        // Capacity check and insertion are one critical section, so two
        // concurrent calls cannot both squeeze past the cap.
        {
            let mut active = self.active_runs.lock().await;
            if active.len() >= self.config.max_concurrent_fixes {
                return Err(PipelineError::CapacityExceeded {
                    active: active.len(),
                    limit: self.config.max_concurrent_fixes,
                });
            }
            active.insert(run.id.clone(), run.clone());
        }
        emit(
            &self.event_tx,
            PipelineEvent::RunStarted {
                run: Box::new(run.clone()),
            },
        );

        match self.execute_stages(&mut run).await {
            Ok(StageFlow::Completed) => {
                run.status = RunStatus::Success;
                run.stage = RunStage::Completed;
            }
            Ok(StageFlow::Cancelled) => {
                // The cancel path already finalized the run; fall back to
                // a locally marked copy if the history write is still in
                // flight on another worker.
                if let Some(cancelled) = self.find_in_history(&run.id).await {
                    return Ok(cancelled);
                }
                run.status = RunStatus::Cancelled;
                run.finish();
                return Ok(run);
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(format!("{:#}", e));
                eprintln!("[pipeline] run_id={}: {:#}", run.id, e);
                let committed = run.commit.as_ref().is_some_and(|c| c.success);
                if self.config.rollback.enabled && committed {
                    self.rollback.attempt_rollback(&mut run).await;
                }
            }
        }

        Ok(self.finalize_run(run).await)
    }

    /// Resolve a pending approval. Unknown run ids fail with a not-found
    /// error; known runs without a pending approval fail distinctly.
    pub async fn approve_fix(
        &self,
        run_id: &str,
        approved: bool,
        approver: &str,
    ) -> Result<(), PipelineError> {
        if !self.active_runs.lock().await.contains_key(run_id) {
            return Err(PipelineError::RunNotFound {
                id: run_id.to_string(),
            });
        }
        self.gate.resolve(run_id, approved, approver).await?;
        emit(
            &self.event_tx,
            PipelineEvent::ApprovalResponse {
                run_id: run_id.to_string(),
                approved,
                approver: approver.to_string(),
            },
        );
        Ok(())
    }

    /// Cancel an active run. Cooperative: an in-flight collaborator call
    /// may still complete, and its result is discarded.
    pub async fn cancel_run(&self, run_id: &str) -> Result<PipelineRun, PipelineError> {
        let removed = self.active_runs.lock().await.remove(run_id);
        let mut run = match removed {
            Some(run) => run,
            None => {
                return Err(if self.find_in_history(run_id).await.is_some() {
                    PipelineError::RunNotActive {
                        id: run_id.to_string(),
                    }
                } else {
                    PipelineError::RunNotFound {
                        id: run_id.to_string(),
                    }
                });
            }
        };

        // A run awaiting approval has a pending entry; both go together.
        self.gate.revoke(run_id).await;

        run.status = RunStatus::Cancelled;
        run.finish();
        self.push_history(run.clone()).await;
        self.stats.lock().await.record_run(&run);
        emit(
            &self.event_tx,
            PipelineEvent::RunCancelled {
                run: Box::new(run.clone()),
            },
        );
        Ok(run)
    }

    /// Look up an issue via the detector and process it with a manual
    /// trigger.
    pub async fn manual_fix(&self, issue_id: &str) -> Result<PipelineRun, PipelineError> {
        let issue = self
            .detector
            .get_issue(issue_id)
            .await
            .context("Issue lookup failed")?
            .ok_or_else(|| PipelineError::IssueNotFound {
                id: issue_id.to_string(),
            })?;
        self.process_issue(issue, TriggerSource::Manual).await
    }

    // ── Read accessors ───────────────────────────────────────────────

    /// Fetch a run by id, active runs first, then history.
    pub async fn get_run(&self, run_id: &str) -> Option<PipelineRun> {
        if let Some(run) = self.active_runs.lock().await.get(run_id) {
            return Some(run.clone());
        }
        self.find_in_history(run_id).await
    }

    pub async fn active_runs(&self) -> Vec<PipelineRun> {
        self.active_runs.lock().await.values().cloned().collect()
    }

    pub async fn pending_approvals(&self) -> Vec<String> {
        self.gate.pending_ids().await
    }

    /// Most recent completed runs first, at most `limit`.
    pub async fn run_history(&self, limit: usize) -> Vec<PipelineRun> {
        self.history
            .lock()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn statistics(&self) -> StatsSnapshot {
        self.stats.lock().await.snapshot()
    }

    /// Cancel all active runs, stop background tasks and collaborators,
    /// and emit the shutdown event. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<String> = self.active_runs.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.cancel_run(&id).await {
                eprintln!("[pipeline] run_id={}: cancel during shutdown failed: {}", id, e);
            }
        }
        self.gate.clear().await;

        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }

        let components = ["detector", "fixer", "verifier", "committer"];
        let results = join_all([
            self.detector.stop(),
            self.fixer.stop(),
            self.verifier.stop(),
            self.committer.stop(),
        ])
        .await;
        for (name, result) in components.iter().zip(results) {
            if let Err(e) = result {
                eprintln!("[pipeline] {} failed to stop: {:#}", name, e);
                emit(
                    &self.event_tx,
                    PipelineEvent::ComponentError {
                        component: name.to_string(),
                        error: format!("{:#}", e),
                    },
                );
            }
        }

        emit(&self.event_tx, PipelineEvent::Shutdown);
    }

    // ── Stage execution ──────────────────────────────────────────────

    async fn execute_stages(&self, run: &mut PipelineRun) -> anyhow::Result<StageFlow> {
        // FIXING
        let started = self.begin_stage(run, RunStage::Fixing).await;
        let fix = self
            .fixer
            .generate_fix(&run.issue)
            .await
            .context("Fix generation failed")?;
        run.fix = Some(fix.clone());
        self.end_stage(run, RunStage::Fixing, started).await;
        if !self.is_active(&run.id).await {
            return Ok(StageFlow::Cancelled);
        }

        // VERIFICATION
        let started = self.begin_stage(run, RunStage::Verification).await;
        let verification = self
            .verifier
            .verify_fix(&fix, &run.issue)
            .await
            .context("Verification failed")?;
        run.verification = Some(verification.clone());
        if !verification.success {
            anyhow::bail!("Verification failed: {}", verification.message);
        }
        self.end_stage(run, RunStage::Verification, started).await;
        if !self.is_active(&run.id).await {
            return Ok(StageFlow::Cancelled);
        }

        // APPROVAL (conditional)
        if self.gate.requires_approval(run) {
            let started = self.begin_stage(run, RunStage::Approval).await;
            run.status = RunStatus::AwaitingApproval;
            self.sync_run(run).await;
            emit(
                &self.event_tx,
                PipelineEvent::ApprovalRequired {
                    run_id: run.id.clone(),
                    approvers: self.gate.approvers().to_vec(),
                },
            );
            let decision = self.gate.wait_for_approval(&run.id).await;
            run.status = RunStatus::Running;
            match decision {
                GateDecision::Approved { .. } => {
                    self.end_stage(run, RunStage::Approval, started).await;
                }
                GateDecision::Rejected { .. } => anyhow::bail!("Fix was rejected"),
                GateDecision::TimedOut => anyhow::bail!("Approval timeout"),
                GateDecision::Aborted => return Ok(StageFlow::Cancelled),
            }
        }

        // COMMIT
        let started = self.begin_stage(run, RunStage::Commit).await;
        let commit = self
            .committer
            .commit_fix(&fix, &verification, &run.issue)
            .await
            .context("Commit failed")?;
        run.commit = Some(commit.clone());
        if !commit.success {
            anyhow::bail!("Commit failed");
        }
        self.end_stage(run, RunStage::Commit, started).await;
        if !self.is_active(&run.id).await {
            return Ok(StageFlow::Cancelled);
        }

        // MONITORING (conditional, fire-and-forget)
        if self.config.monitoring.enabled {
            let started = self.begin_stage(run, RunStage::Monitoring).await;
            self.schedule_post_commit_check(run.clone()).await;
            self.end_stage(run, RunStage::Monitoring, started).await;
        }

        Ok(StageFlow::Completed)
    }

    async fn begin_stage(&self, run: &mut PipelineRun, stage: RunStage) -> Instant {
        debug_assert!(crate::models::is_forward_transition(&run.stage, &stage));
        run.stage = stage;
        self.sync_run(run).await;
        emit(
            &self.event_tx,
            PipelineEvent::StageStarted {
                run_id: run.id.clone(),
                stage,
            },
        );
        Instant::now()
    }

    async fn end_stage(&self, run: &mut PipelineRun, stage: RunStage, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        run.metadata
            .stage_timings_ms
            .insert(stage.as_str().to_string(), duration_ms);
        self.sync_run(run).await;
        emit(
            &self.event_tx,
            PipelineEvent::StageCompleted {
                run_id: run.id.clone(),
                stage,
                duration_ms,
            },
        );
    }

    /// Mirror the working copy of a run into the active map, so read
    /// accessors observe stage transitions. A cancelled run is absent
    /// from the map and stays that way.
    async fn sync_run(&self, run: &PipelineRun) {
        let mut active = self.active_runs.lock().await;
        if let Some(entry) = active.get_mut(&run.id) {
            *entry = run.clone();
        }
    }

    async fn is_active(&self, run_id: &str) -> bool {
        self.active_runs.lock().await.contains_key(run_id)
    }

    /// Terminal bookkeeping: remove from active, stamp duration, push to
    /// history, fold into statistics, emit the terminal event. Runs for
    /// every non-cancelled outcome.
    async fn finalize_run(&self, mut run: PipelineRun) -> PipelineRun {
        let was_active = self.active_runs.lock().await.remove(&run.id).is_some();
        if !was_active {
            // Cancelled while the last stage was in flight; the cancel
            // path finalized already and this result is discarded.
            eprintln!(
                "[pipeline] run_id={}: discarding result of cancelled run",
                run.id
            );
            return self.find_in_history(&run.id).await.unwrap_or(run);
        }

        run.finish();
        self.push_history(run.clone()).await;
        self.stats.lock().await.record_run(&run);

        let event = match run.status {
            RunStatus::Success => Some(PipelineEvent::RunCompleted {
                run: Box::new(run.clone()),
            }),
            RunStatus::Failed => Some(PipelineEvent::RunFailed {
                run: Box::new(run.clone()),
            }),
            // RolledBack already emitted its event from the controller
            _ => None,
        };
        if let Some(event) = event {
            emit(&self.event_tx, event);
        }
        run
    }

    async fn push_history(&self, run: PipelineRun) {
        let mut history = self.history.lock().await;
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(run);
    }

    async fn find_in_history(&self, run_id: &str) -> Option<PipelineRun> {
        self.history
            .lock()
            .await
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Consume the detector's issue stream and feed accepted issues into
    /// the pipeline with an automatic trigger.
    async fn spawn_detector_loop(pipeline: Arc<Self>) {
        let mut issue_rx = pipeline.detector.subscribe();
        let owner = Arc::clone(&pipeline);
        let handle = tokio::spawn(async move {
            loop {
                match issue_rx.recv().await {
                    Ok(issue) => {
                        if !filter::should_process_issue(&pipeline.config.filters, &issue) {
                            continue;
                        }
                        match pipeline
                            .process_issue(issue, TriggerSource::Automatic)
                            .await
                        {
                            Ok(_) => {}
                            Err(PipelineError::CapacityExceeded { active, limit }) => {
                                eprintln!(
                                    "[pipeline] capacity reached ({}/{}), dropping detected issue",
                                    active, limit
                                );
                            }
                            Err(e) => {
                                eprintln!("[pipeline] automatic run failed to start: {}", e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        eprintln!(
                            "[pipeline] detector stream lagged, {} issues skipped",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        owner.background.lock().await.push(handle);
    }

    /// Periodic metrics collection: roll trend buckets, evaluate alerts,
    /// publish a statistics snapshot.
    async fn spawn_metrics_loop(pipeline: Arc<Self>) {
        let period = Duration::from_secs(pipeline.config.monitoring.metrics_interval_secs.max(1));
        let owner = Arc::clone(&pipeline);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            // The first tick completes immediately; consume it so the
            // first collection happens after one full period.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pipeline.collect_metrics().await;
            }
        });
        owner.background.lock().await.push(handle);
    }

    async fn collect_metrics(&self) {
        let now = Utc::now();
        let (snapshot, alerts) = {
            let mut stats = self.stats.lock().await;
            stats.roll_trends(now);
            let alerts = stats.check_alerts(now, &self.config.monitoring);
            (stats.snapshot(), alerts)
        };
        emit(
            &self.event_tx,
            PipelineEvent::MetricsUpdated { stats: snapshot },
        );
        for alert in alerts {
            emit(&self.event_tx, PipelineEvent::Alert { alert });
        }
    }

    /// One-shot delayed post-commit check: after the grace period,
    /// re-scan the files the fix touched for issues newer than the
    /// commit. Never blocks the owning run's terminal state.
    async fn schedule_post_commit_check(&self, run: PipelineRun) {
        let Some(commit) = run.commit.clone() else {
            return;
        };
        let paths = run
            .fix
            .as_ref()
            .map(|f| f.touched_paths())
            .unwrap_or_default();
        let grace = Duration::from_secs(self.config.rollback.grace_period_secs);
        let auto_rollback = self.config.rollback.enabled && self.config.rollback.auto_rollback;

        let detector = Arc::clone(&self.detector);
        let rollback = Arc::clone(&self.rollback);
        let history = Arc::clone(&self.history);
        let stats = Arc::clone(&self.stats);
        let event_tx = self.event_tx.clone();
        let run_id = run.id.clone();

        let handle = tokio::spawn(async move {
            sleep(grace).await;

            let scope = ScanScope {
                paths,
                since: Some(commit.timestamp),
            };
            let issues = match detector.scan_for_issues(&scope).await {
                Ok(issues) => issues,
                Err(e) => {
                    eprintln!(
                        "[monitor] run_id={}: post-commit scan failed: {:#}",
                        run_id, e
                    );
                    emit(
                        &event_tx,
                        PipelineEvent::ComponentError {
                            component: "detector".to_string(),
                            error: format!("{:#}", e),
                        },
                    );
                    return;
                }
            };
            if issues.is_empty() {
                return;
            }

            emit(
                &event_tx,
                PipelineEvent::PostCommitIssues {
                    run_id: run_id.clone(),
                    issues,
                },
            );

            if auto_rollback {
                let mut run = run;
                if rollback.attempt_rollback(&mut run).await {
                    // The owning run normally reaches history long before
                    // the grace period elapses; a zero grace period can
                    // land here first, so wait for the entry.
                    for _ in 0..50 {
                        let updated = {
                            let mut history = history.lock().await;
                            match history.iter_mut().find(|r| r.id == run_id) {
                                Some(entry) => {
                                    entry.status = RunStatus::RolledBack;
                                    true
                                }
                                None => false,
                            }
                        };
                        if updated {
                            stats.lock().await.record_rollback();
                            break;
                        }
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
        self.background.lock().await.push(handle);
    }
}
