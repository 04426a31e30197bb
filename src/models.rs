use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered issue severity. Ordering follows declaration order, so
/// `Severity::High > Severity::Medium` holds and the filter threshold
/// comparison is a plain `>=`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Category assigned to an issue by the detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Syntax,
    Lint,
    TypeError,
    Security,
    Performance,
    Style,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Lint => "lint",
            Self::TypeError => "type_error",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Style => "style",
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "syntax" => Ok(Self::Syntax),
            "lint" => Ok(Self::Lint),
            "type_error" => Ok(Self::TypeError),
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            "style" => Ok(Self::Style),
            _ => Err(format!("Invalid issue type: {}", s)),
        }
    }
}

/// Source location of a detected issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// A detected, classified code problem. Owned by the detector; runs
/// reference it but never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub location: Location,
    pub title: String,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

/// Kind of file-level edit within a fix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    Create,
    Modify,
    Delete,
}

impl EditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for EditOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("Invalid edit operation: {}", s)),
        }
    }
}

/// One ordered edit action within a fix. `contents` is the full post-edit
/// file body for create/modify and absent for delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditAction {
    pub path: String,
    pub operation: EditOperation,
    pub contents: Option<String>,
}

/// How the fixer produced a fix. The statistics breakdown keys off this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    RuleBased,
    Template,
    AiGenerated,
}

impl FixStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleBased => "rule_based",
            Self::Template => "template",
            Self::AiGenerated => "ai_generated",
        }
    }
}

impl std::fmt::Display for FixStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FixStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule_based" => Ok(Self::RuleBased),
            "template" => Ok(Self::Template),
            "ai_generated" => Ok(Self::AiGenerated),
            _ => Err(format!("Invalid fix strategy: {}", s)),
        }
    }
}

/// Estimated blast radius of a fix.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FixImpact {
    pub files_touched: u32,
    pub lines_touched: u32,
    /// Heuristic risk score in [0, 1].
    pub risk_score: f64,
}

/// Which validation passes the fixer ran against its own output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationRecord {
    pub syntax: bool,
    pub tests: bool,
    pub lint: bool,
    pub security: bool,
}

/// A proposed remedy for one issue. Owned by the fixer until applied,
/// then co-owned by the run for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    pub id: String,
    pub issue_id: String,
    pub strategy: FixStrategy,
    pub edits: Vec<EditAction>,
    pub test_updates: Vec<EditAction>,
    /// Fixer confidence in [0, 1].
    pub confidence: f64,
    pub impact: FixImpact,
    pub validation: ValidationRecord,
}

impl Fix {
    /// Paths touched by this fix, edits first, test updates after.
    pub fn touched_paths(&self) -> Vec<String> {
        self.edits
            .iter()
            .chain(self.test_updates.iter())
            .map(|e| e.path.clone())
            .collect()
    }
}

/// Outcome of a single verifier check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub status: CheckStatus,
}

/// Verifier verdict for one fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    /// Aggregate confidence score in [0, 1].
    pub score: f64,
    pub message: String,
    pub checks: Vec<VerificationCheck>,
}

impl VerificationResult {
    /// True when every non-skipped check passed and at least one check ran.
    pub fn all_checks_passed(&self) -> bool {
        !self.checks.is_empty()
            && self
                .checks
                .iter()
                .all(|c| c.status != CheckStatus::Failed)
    }
}

/// Pre-commit backup reference. Present on a commit result if and only if
/// a backup was taken; the rollback controller refuses to act without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackInfo {
    pub backup_ref: String,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Committer outcome for one fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResult {
    pub success: bool,
    pub commit_sha: Option<String>,
    pub rollback_info: Option<RollbackInfo>,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingApproval,
    Success,
    Failed,
    Cancelled,
    RolledBack,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "rolled_back" => Ok(Self::RolledBack),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Check if a run status is terminal. Terminal runs live in history and
/// never change again, with the single exception of a post-commit rollback
/// promoting `Success` to `RolledBack`.
pub fn is_terminal(status: &RunStatus) -> bool {
    matches!(
        status,
        RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled | RunStatus::RolledBack
    )
}

/// Ordered stage of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Detection,
    Fixing,
    Verification,
    Approval,
    Commit,
    Monitoring,
    Completed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Fixing => "fixing",
            Self::Verification => "verification",
            Self::Approval => "approval",
            Self::Commit => "commit",
            Self::Monitoring => "monitoring",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detection" => Ok(Self::Detection),
            "fixing" => Ok(Self::Fixing),
            "verification" => Ok(Self::Verification),
            "approval" => Ok(Self::Approval),
            "commit" => Ok(Self::Commit),
            "monitoring" => Ok(Self::Monitoring),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid run stage: {}", s)),
        }
    }
}

/// Position of a stage in the fixed execution order.
pub fn stage_order(stage: &RunStage) -> u8 {
    match stage {
        RunStage::Detection => 0,
        RunStage::Fixing => 1,
        RunStage::Verification => 2,
        RunStage::Approval => 3,
        RunStage::Commit => 4,
        RunStage::Monitoring => 5,
        RunStage::Completed => 6,
    }
}

/// Validate that a stage transition moves forward. Stages never regress;
/// a failing run keeps its last stage and changes status instead.
pub fn is_forward_transition(from: &RunStage, to: &RunStage) -> bool {
    stage_order(to) > stage_order(from)
}

/// What started a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Automatic,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(Self::Automatic),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid trigger source: {}", s)),
        }
    }
}

/// Scheduling priority of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Priority derived from issue severity when a run is created.
impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info | Severity::Low => Priority::Low,
            Severity::Medium => Priority::Medium,
            Severity::High => Priority::High,
            Severity::Critical => Priority::Critical,
        }
    }
}

/// Bookkeeping attached to a run: trigger, priority, tags, the repository
/// context snapshot, and per-stage wall-clock timings in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub triggered_by: TriggerSource,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub repository: Option<String>,
    pub stage_timings_ms: std::collections::HashMap<String, u64>,
}

impl RunMetadata {
    pub fn new(triggered_by: TriggerSource, priority: Priority) -> Self {
        Self {
            triggered_by,
            priority,
            tags: Vec::new(),
            repository: None,
            stage_timings_ms: std::collections::HashMap::new(),
        }
    }
}

/// One execution instance of the pipeline for a single issue, tracked from
/// creation to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub issue: Issue,
    pub status: RunStatus,
    pub stage: RunStage,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub fix: Option<Fix>,
    pub verification: Option<VerificationResult>,
    pub commit: Option<CommitResult>,
    pub error: Option<String>,
    pub metadata: RunMetadata,
}

impl PipelineRun {
    /// Create a fresh run for an accepted issue.
    pub fn new(issue: Issue, triggered_by: TriggerSource) -> Self {
        let priority = Priority::from(issue.severity);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issue,
            status: RunStatus::Running,
            stage: RunStage::Detection,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            fix: None,
            verification: None,
            commit: None,
            error: None,
            metadata: RunMetadata::new(triggered_by, priority),
        }
    }

    /// Stamp the terminal timestamp and derived duration.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = Some(
            now.signed_duration_since(self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        self.completed_at = Some(now);
    }

    /// True when the commit stage succeeded and left a backup behind.
    pub fn has_rollback_info(&self) -> bool {
        self.commit
            .as_ref()
            .and_then(|c| c.rollback_info.as_ref())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_issue() -> Issue {
        Issue {
            id: "issue-1".to_string(),
            issue_type: IssueType::Lint,
            severity: Severity::Medium,
            location: Location {
                file: "src/lib.rs".to_string(),
                line: Some(10),
                column: None,
            },
            title: "unused import".to_string(),
            description: "import is never used".to_string(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_roundtrip() {
        for s in &["info", "low", "medium", "high", "critical"] {
            let parsed: Severity = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<Severity>().is_err());
    }

    #[test]
    fn test_issue_type_roundtrip() {
        for s in &[
            "syntax",
            "lint",
            "type_error",
            "security",
            "performance",
            "style",
        ] {
            let parsed: IssueType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<IssueType>().is_err());
    }

    #[test]
    fn test_run_status_roundtrip() {
        for s in &[
            "running",
            "awaiting_approval",
            "success",
            "failed",
            "cancelled",
            "rolled_back",
        ] {
            let parsed: RunStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_stage_roundtrip() {
        for s in &[
            "detection",
            "fixing",
            "verification",
            "approval",
            "commit",
            "monitoring",
            "completed",
        ] {
            let parsed: RunStage = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<RunStage>().is_err());
    }

    #[test]
    fn test_fix_strategy_roundtrip() {
        for s in &["rule_based", "template", "ai_generated"] {
            let parsed: FixStrategy = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<FixStrategy>().is_err());
    }

    #[test]
    fn test_is_terminal() {
        assert!(!is_terminal(&RunStatus::Running));
        assert!(!is_terminal(&RunStatus::AwaitingApproval));
        assert!(is_terminal(&RunStatus::Success));
        assert!(is_terminal(&RunStatus::Failed));
        assert!(is_terminal(&RunStatus::Cancelled));
        assert!(is_terminal(&RunStatus::RolledBack));
    }

    #[test]
    fn test_stage_order_is_strictly_increasing() {
        let stages = [
            RunStage::Detection,
            RunStage::Fixing,
            RunStage::Verification,
            RunStage::Approval,
            RunStage::Commit,
            RunStage::Monitoring,
            RunStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert!(is_forward_transition(&pair[0], &pair[1]));
            assert!(!is_forward_transition(&pair[1], &pair[0]));
        }
        assert!(!is_forward_transition(
            &RunStage::Commit,
            &RunStage::Commit
        ));
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&RunStatus::AwaitingApproval).unwrap(),
            "\"awaiting_approval\""
        );
        assert_eq!(
            serde_json::to_string(&IssueType::TypeError).unwrap(),
            "\"type_error\""
        );
        assert_eq!(
            serde_json::to_string(&RunStage::Verification).unwrap(),
            "\"verification\""
        );
        assert_eq!(
            serde_json::to_string(&FixStrategy::AiGenerated).unwrap(),
            "\"ai_generated\""
        );
    }

    #[test]
    fn test_priority_from_severity() {
        assert_eq!(Priority::from(Severity::Info), Priority::Low);
        assert_eq!(Priority::from(Severity::Low), Priority::Low);
        assert_eq!(Priority::from(Severity::Medium), Priority::Medium);
        assert_eq!(Priority::from(Severity::High), Priority::High);
        assert_eq!(Priority::from(Severity::Critical), Priority::Critical);
    }

    #[test]
    fn test_new_run_starts_in_detection() {
        let run = PipelineRun::new(sample_issue(), TriggerSource::Manual);
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.stage, RunStage::Detection);
        assert_eq!(run.metadata.priority, Priority::Medium);
        assert!(run.completed_at.is_none());
        assert!(run.error.is_none());
    }

    #[test]
    fn test_finish_stamps_duration() {
        let mut run = PipelineRun::new(sample_issue(), TriggerSource::Automatic);
        run.finish();
        assert!(run.completed_at.is_some());
        assert!(run.duration_ms.is_some());
    }

    #[test]
    fn test_touched_paths_preserves_order() {
        let fix = Fix {
            id: "fix-1".to_string(),
            issue_id: "issue-1".to_string(),
            strategy: FixStrategy::RuleBased,
            edits: vec![EditAction {
                path: "src/a.rs".to_string(),
                operation: EditOperation::Modify,
                contents: Some("fn a() {}".to_string()),
            }],
            test_updates: vec![EditAction {
                path: "tests/a.rs".to_string(),
                operation: EditOperation::Create,
                contents: Some("#[test] fn t() {}".to_string()),
            }],
            confidence: 0.8,
            impact: FixImpact::default(),
            validation: ValidationRecord::default(),
        };
        assert_eq!(fix.touched_paths(), vec!["src/a.rs", "tests/a.rs"]);
    }

    #[test]
    fn test_all_checks_passed() {
        let mut result = VerificationResult {
            success: true,
            score: 0.9,
            message: "ok".to_string(),
            checks: vec![
                VerificationCheck {
                    name: "tests".to_string(),
                    status: CheckStatus::Passed,
                },
                VerificationCheck {
                    name: "lint".to_string(),
                    status: CheckStatus::Skipped,
                },
            ],
        };
        assert!(result.all_checks_passed());

        result.checks.push(VerificationCheck {
            name: "security".to_string(),
            status: CheckStatus::Failed,
        });
        assert!(!result.all_checks_passed());

        result.checks.clear();
        assert!(!result.all_checks_passed());
    }

    #[test]
    fn test_has_rollback_info() {
        let mut run = PipelineRun::new(sample_issue(), TriggerSource::Manual);
        assert!(!run.has_rollback_info());

        run.commit = Some(CommitResult {
            success: true,
            commit_sha: Some("abc123".to_string()),
            rollback_info: None,
            timestamp: Utc::now(),
        });
        assert!(!run.has_rollback_info());

        run.commit.as_mut().unwrap().rollback_info = Some(RollbackInfo {
            backup_ref: "backup/abc123".to_string(),
            files: vec!["src/a.rs".to_string()],
            created_at: Utc::now(),
        });
        assert!(run.has_rollback_info());
    }
}
