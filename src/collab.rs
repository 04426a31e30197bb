//! Collaborator contracts consumed by the pipeline.
//!
//! Detection, fix synthesis, verification, and commit mechanics live
//! behind these traits. Real implementations are external to this crate;
//! the integration tests carry mock doubles.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::models::{CommitResult, Fix, Issue, RollbackInfo, VerificationResult};

/// Scope restriction for a detector scan.
#[derive(Debug, Clone, Default)]
pub struct ScanScope {
    /// Restrict the scan to these paths. Empty means the whole project.
    pub paths: Vec<String>,
    /// Only report issues detected at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Finds and classifies issues.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;

    /// Look up a previously detected issue by id.
    async fn get_issue(&self, id: &str) -> Result<Option<Issue>>;

    /// Scan for issues within the given scope.
    async fn scan_for_issues(&self, scope: &ScanScope) -> Result<Vec<Issue>>;

    /// Stream of newly detected issues. Feeds the pipeline's automatic mode.
    fn subscribe(&self) -> broadcast::Receiver<Issue>;
}

/// Produces candidate fixes for issues.
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;

    /// Generate a fix for the issue. An error means no fix could be
    /// produced, which fails the run.
    async fn generate_fix(&self, issue: &Issue) -> Result<Fix>;
}

/// Runs checks against a candidate fix.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;

    async fn verify_fix(&self, fix: &Fix, issue: &Issue) -> Result<VerificationResult>;
}

/// Applies fixes to version control and can undo them.
#[async_trait]
pub trait Committer: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;

    async fn commit_fix(
        &self,
        fix: &Fix,
        verification: &VerificationResult,
        issue: &Issue,
    ) -> Result<CommitResult>;

    /// Revert a committed fix using its pre-commit backup. Errors on
    /// failure; never retried by the pipeline.
    async fn rollback(&self, rollback_info: &RollbackInfo) -> Result<()>;
}
