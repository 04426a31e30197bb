//! Running statistics and threshold alerting.
//!
//! Core types:
//! - [`PipelineStats`] — process-wide aggregate state, mutated only by the
//!   orchestrator when a run terminates
//! - [`BucketStats`] — per-issue-type / per-strategy aggregates with
//!   incremental means, so memory stays proportional to distinct keys
//! - [`Alert`] — transient threshold-crossing payload, emitted as an
//!   event and never stored

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MonitoringConfig;
use crate::models::{FixStrategy, IssueType, PipelineRun, RunStatus};

/// Capacity of the recent-window ring buffer.
const RECENT_WINDOW_CAPACITY: usize = 512;

/// Width of the recent window used for alert evaluation, in seconds.
const RECENT_WINDOW_SECS: i64 = 3600;

/// Number of hourly trend buckets.
const HOURLY_BUCKETS: usize = 24;

/// Number of daily trend buckets.
const DAILY_BUCKETS: usize = 7;

/// Kind of threshold alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighFailureRate,
    SlowResponseTime,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighFailureRate => "high_failure_rate",
            Self::SlowResponseTime => "slow_response_time",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_failure_rate" => Ok(Self::HighFailureRate),
            "slow_response_time" => Ok(Self::SlowResponseTime),
            _ => Err(format!("Invalid alert type: {}", s)),
        }
    }
}

/// A metric that crossed its configured limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub value: f64,
    pub threshold: f64,
}

/// Aggregate for one breakdown key. The average uses the incremental
/// `new_avg = old_avg + (v - old_avg) / n` update.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BucketStats {
    pub count: u64,
    pub successes: u64,
    pub avg_duration_ms: f64,
    duration_samples: u64,
}

impl BucketStats {
    fn record(&mut self, success: bool, duration_ms: Option<u64>) {
        self.count += 1;
        if success {
            self.successes += 1;
        }
        if let Some(ms) = duration_ms {
            self.duration_samples += 1;
            self.avg_duration_ms +=
                (ms as f64 - self.avg_duration_ms) / self.duration_samples as f64;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.successes as f64 / self.count as f64
        }
    }
}

/// One terminated run in the recent window.
#[derive(Debug, Clone)]
struct WindowSample {
    finished_at: DateTime<Utc>,
    success: bool,
    duration_ms: u64,
}

/// Fixed-length sliding trend counters. Rolling shifts buckets and
/// discards the oldest; counts are never decayed.
#[derive(Debug, Clone)]
struct TrendBuckets {
    hourly: VecDeque<u64>,
    daily: VecDeque<u64>,
    current_hour: DateTime<Utc>,
    current_day: DateTime<Utc>,
}

impl TrendBuckets {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            hourly: VecDeque::from(vec![0; HOURLY_BUCKETS]),
            daily: VecDeque::from(vec![0; DAILY_BUCKETS]),
            current_hour: truncate_to_hour(now),
            current_day: truncate_to_day(now),
        }
    }

    fn record(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        if let Some(bucket) = self.hourly.back_mut() {
            *bucket += 1;
        }
        if let Some(bucket) = self.daily.back_mut() {
            *bucket += 1;
        }
    }

    /// Advance buckets to cover `now`, appending one empty bucket per
    /// elapsed hour/day and discarding the oldest.
    fn roll(&mut self, now: DateTime<Utc>) {
        let hour = truncate_to_hour(now);
        let mut elapsed_hours = hour
            .signed_duration_since(self.current_hour)
            .num_hours()
            .max(0) as usize;
        if elapsed_hours > 0 {
            elapsed_hours = elapsed_hours.min(HOURLY_BUCKETS);
            for _ in 0..elapsed_hours {
                self.hourly.pop_front();
                self.hourly.push_back(0);
            }
            self.current_hour = hour;
        }

        let day = truncate_to_day(now);
        let mut elapsed_days = day
            .signed_duration_since(self.current_day)
            .num_days()
            .max(0) as usize;
        if elapsed_days > 0 {
            elapsed_days = elapsed_days.min(DAILY_BUCKETS);
            for _ in 0..elapsed_days {
                self.daily.pop_front();
                self.daily.push_back(0);
            }
            self.current_day = day;
        }
    }
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}

fn truncate_to_day(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::days(1)).unwrap_or(t)
}

/// Serializable view of the aggregates, carried on `metrics_updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_runs: u64,
    pub successful: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rolled_back: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub by_issue_type: HashMap<IssueType, BucketStats>,
    pub by_strategy: HashMap<FixStrategy, BucketStats>,
    pub hourly_trend: Vec<u64>,
    pub daily_trend: Vec<u64>,
}

/// Process-wide run statistics. Never reset except on process restart.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    total_runs: u64,
    successful: u64,
    failed: u64,
    cancelled: u64,
    rolled_back: u64,
    avg_duration_ms: f64,
    duration_samples: u64,
    by_issue_type: HashMap<IssueType, BucketStats>,
    by_strategy: HashMap<FixStrategy, BucketStats>,
    trends: TrendBuckets,
    window: VecDeque<WindowSample>,
    last_alert_at: HashMap<AlertType, DateTime<Utc>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            total_runs: 0,
            successful: 0,
            failed: 0,
            cancelled: 0,
            rolled_back: 0,
            avg_duration_ms: 0.0,
            duration_samples: 0,
            by_issue_type: HashMap::new(),
            by_strategy: HashMap::new(),
            trends: TrendBuckets::new(now),
            window: VecDeque::new(),
            last_alert_at: HashMap::new(),
        }
    }

    /// Fold a terminated run into the aggregates. Called exactly once per
    /// run, by the orchestrator, after the run reached a terminal status.
    pub fn record_run(&mut self, run: &PipelineRun) {
        let now = run.completed_at.unwrap_or_else(Utc::now);
        self.total_runs += 1;
        let success = match run.status {
            RunStatus::Success => {
                self.successful += 1;
                true
            }
            RunStatus::Failed => {
                self.failed += 1;
                false
            }
            RunStatus::Cancelled => {
                self.cancelled += 1;
                false
            }
            RunStatus::RolledBack => {
                self.rolled_back += 1;
                false
            }
            // Non-terminal statuses are a caller bug; count as failure
            // rather than corrupt the totals.
            RunStatus::Running | RunStatus::AwaitingApproval => {
                self.failed += 1;
                false
            }
        };

        // Cancelled runs carry partial stage timings that would skew the
        // duration averages the alerts key off.
        let duration = if run.status == RunStatus::Cancelled {
            None
        } else {
            run.duration_ms
        };

        if let Some(ms) = duration {
            self.duration_samples += 1;
            self.avg_duration_ms +=
                (ms as f64 - self.avg_duration_ms) / self.duration_samples as f64;
        }

        self.by_issue_type
            .entry(run.issue.issue_type)
            .or_default()
            .record(success, duration);
        if let Some(fix) = &run.fix {
            self.by_strategy
                .entry(fix.strategy)
                .or_default()
                .record(success, duration);
        }

        self.trends.record(now);

        if run.status != RunStatus::Cancelled {
            if self.window.len() == RECENT_WINDOW_CAPACITY {
                self.window.pop_front();
            }
            self.window.push_back(WindowSample {
                finished_at: now,
                success,
                duration_ms: duration.unwrap_or(0),
            });
        }
    }

    /// Promote an already-recorded successful run to rolled-back after a
    /// post-commit rollback.
    pub fn record_rollback(&mut self) {
        self.successful = self.successful.saturating_sub(1);
        self.rolled_back += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_runs as f64
        }
    }

    /// Advance the trend buckets to cover `now` without recording a run.
    /// Called on each metrics tick so idle hours still roll over.
    pub fn roll_trends(&mut self, now: DateTime<Utc>) {
        self.trends.roll(now);
    }

    /// Evaluate the recent window against the configured thresholds.
    /// Alerts of a type fired within the cooldown are suppressed.
    pub fn check_alerts(&mut self, now: DateTime<Utc>, config: &MonitoringConfig) -> Vec<Alert> {
        let cutoff = now - Duration::seconds(RECENT_WINDOW_SECS);
        while self
            .window
            .front()
            .is_some_and(|s| s.finished_at < cutoff)
        {
            self.window.pop_front();
        }

        let recent: Vec<&WindowSample> = self
            .window
            .iter()
            .filter(|s| s.finished_at >= cutoff)
            .collect();
        if recent.is_empty() {
            return Vec::new();
        }

        let mut alerts = Vec::new();
        let cooldown = Duration::seconds(config.alert_cooldown_secs as i64);

        let failures = recent.iter().filter(|s| !s.success).count();
        let failure_rate = failures as f64 / recent.len() as f64;
        if failure_rate > config.failure_rate_threshold
            && self.cooldown_elapsed(AlertType::HighFailureRate, now, cooldown)
        {
            self.last_alert_at.insert(AlertType::HighFailureRate, now);
            alerts.push(Alert {
                alert_type: AlertType::HighFailureRate,
                value: failure_rate,
                threshold: config.failure_rate_threshold,
            });
        }

        let avg_duration =
            recent.iter().map(|s| s.duration_ms as f64).sum::<f64>() / recent.len() as f64;
        if avg_duration > config.slow_run_threshold_ms as f64
            && self.cooldown_elapsed(AlertType::SlowResponseTime, now, cooldown)
        {
            self.last_alert_at.insert(AlertType::SlowResponseTime, now);
            alerts.push(Alert {
                alert_type: AlertType::SlowResponseTime,
                value: avg_duration,
                threshold: config.slow_run_threshold_ms as f64,
            });
        }

        alerts
    }

    fn cooldown_elapsed(
        &self,
        alert_type: AlertType,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> bool {
        match self.last_alert_at.get(&alert_type) {
            Some(last) => now.signed_duration_since(*last) >= cooldown,
            None => true,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_runs: self.total_runs,
            successful: self.successful,
            failed: self.failed,
            cancelled: self.cancelled,
            rolled_back: self.rolled_back,
            success_rate: self.success_rate(),
            avg_duration_ms: self.avg_duration_ms,
            by_issue_type: self.by_issue_type.clone(),
            by_strategy: self.by_strategy.clone(),
            hourly_trend: self.trends.hourly.iter().copied().collect(),
            daily_trend: self.trends.daily.iter().copied().collect(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
