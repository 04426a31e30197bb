//! Configuration for the auto-fix pipeline.
//!
//! Reads from `.remedy/remedy.toml`. Every section defaults independently,
//! so a partial file only overrides what it names.
//!
//! # Configuration File Format
//!
//! ```toml
//! max_concurrent_fixes = 3
//!
//! [retry]
//! attempts = 2
//! delay_ms = 1000
//!
//! [filters]
//! min_severity = "medium"
//! allowed_types = ["lint", "security"]
//! include_paths = ["src/*"]
//! exclude_paths = ["*/generated/*"]
//!
//! [approval]
//! required = true
//! auto_approve_low_risk = true
//! auto_approve_high_confidence = false
//! auto_approve_tests_passing = false
//! approvers = ["alice", "bob"]
//! timeout_secs = 3600
//!
//! [rollback]
//! enabled = true
//! auto_rollback = false
//! grace_period_secs = 300
//!
//! [monitoring]
//! enabled = true
//! metrics_interval_secs = 60
//! failure_rate_threshold = 0.3
//! slow_run_threshold_ms = 300000
//! alert_cooldown_secs = 300
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{IssueType, Severity};

/// Directory holding pipeline configuration within a project.
pub const REMEDY_DIR: &str = ".remedy";

/// Configuration file name within [`REMEDY_DIR`].
pub const CONFIG_FILE: &str = "remedy.toml";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of runs in flight at once. Work beyond the cap is
    /// rejected, not queued.
    #[serde(default = "default_max_concurrent_fixes")]
    pub max_concurrent_fixes: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Reserved. The approval wait is the only enforced per-run deadline.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fixes: default_max_concurrent_fixes(),
            retry: RetryConfig::default(),
            run_timeout_secs: None,
            filters: FilterConfig::default(),
            approval: ApprovalConfig::default(),
            rollback: RollbackConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `<project_dir>/.remedy/remedy.toml`.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(REMEDY_DIR).join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(project_dir: &Path) -> Self {
        let path = project_dir.join(REMEDY_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match Self::load(project_dir) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("[config] {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }
}

/// Retry policy reserved for collaborator-level retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Which automatically detected issues the pipeline accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Issues below this severity are ignored in automatic mode.
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// Allow-list of issue types. Empty means all types are accepted.
    #[serde(default)]
    pub allowed_types: Vec<IssueType>,
    /// Path patterns an issue's file must match at least one of.
    /// Empty means no path restriction. `*` is a wildcard.
    #[serde(default)]
    pub include_paths: Vec<String>,
    /// Path patterns that reject an issue when any matches.
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_severity: default_min_severity(),
            allowed_types: Vec::new(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
        }
    }
}

/// When a run needs human sign-off, and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Master switch. When false no run ever waits for approval.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Auto-approve runs whose priority is low.
    #[serde(default)]
    pub auto_approve_low_risk: bool,
    /// Auto-approve runs whose verification score exceeds 0.9.
    #[serde(default)]
    pub auto_approve_high_confidence: bool,
    /// Auto-approve runs whose verification checks all passed.
    #[serde(default)]
    pub auto_approve_tests_passing: bool,
    /// Who may approve. Informational; carried on the approval event.
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            required: true,
            auto_approve_low_risk: false,
            auto_approve_high_confidence: false,
            auto_approve_tests_passing: false,
            approvers: Vec::new(),
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

/// Post-commit rollback policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Roll back automatically when the post-commit scan finds new issues.
    /// When false the issues are surfaced for a human to decide.
    #[serde(default)]
    pub auto_rollback: bool,
    /// Delay after commit before re-scanning for regressions.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_rollback: false,
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

/// Periodic metrics collection and threshold alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    /// Fraction of failed runs over the recent window that trips an alert.
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    /// Average run duration over the recent window that trips an alert.
    #[serde(default = "default_slow_run_threshold_ms")]
    pub slow_run_threshold_ms: u64,
    /// Minimum gap between alerts of the same type.
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_interval_secs: default_metrics_interval_secs(),
            failure_rate_threshold: default_failure_rate_threshold(),
            slow_run_threshold_ms: default_slow_run_threshold_ms(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
        }
    }
}

fn default_max_concurrent_fixes() -> usize {
    3
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_min_severity() -> Severity {
    Severity::Medium
}

fn default_true() -> bool {
    true
}

fn default_approval_timeout_secs() -> u64 {
    3600
}

fn default_grace_period_secs() -> u64 {
    300
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_failure_rate_threshold() -> f64 {
    0.3
}

fn default_slow_run_threshold_ms() -> u64 {
    300_000
}

fn default_alert_cooldown_secs() -> u64 {
    300
}
