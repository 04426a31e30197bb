//! Automatic-mode issue filtering.

use glob::Pattern;

use crate::config::FilterConfig;
use crate::models::Issue;

/// Decide whether an automatically detected issue enters the pipeline.
///
/// Accepts when severity meets the threshold, the type allow-list is
/// empty or names the issue's type, the file matches at least one include
/// pattern (or none are configured), and no exclude pattern matches.
pub fn should_process_issue(filters: &FilterConfig, issue: &Issue) -> bool {
    if issue.severity < filters.min_severity {
        return false;
    }
    if !filters.allowed_types.is_empty() && !filters.allowed_types.contains(&issue.issue_type) {
        return false;
    }
    let path = &issue.location.file;
    if !filters.include_paths.is_empty()
        && !filters.include_paths.iter().any(|p| matches_path(p, path))
    {
        return false;
    }
    if filters.exclude_paths.iter().any(|p| matches_path(p, path)) {
        return false;
    }
    true
}

/// Match a `*`-wildcard pattern against the full path. `glob`'s default
/// options let `*` cross path separators, which is the behavior the
/// filter patterns expect.
fn matches_path(pattern: &str, path: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches(path),
        Err(e) => {
            eprintln!("[pipeline] invalid filter pattern '{}': {}", pattern, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueType, Location, Severity};
    use chrono::Utc;

    fn issue(severity: Severity, issue_type: IssueType, file: &str) -> Issue {
        Issue {
            id: "issue-1".to_string(),
            issue_type,
            severity,
            location: Location {
                file: file.to_string(),
                line: None,
                column: None,
            },
            title: "t".to_string(),
            description: "d".to_string(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_filters_accept_medium() {
        let filters = FilterConfig::default();
        assert!(should_process_issue(
            &filters,
            &issue(Severity::Medium, IssueType::Lint, "src/lib.rs")
        ));
    }

    #[test]
    fn test_severity_below_threshold_rejected() {
        let filters = FilterConfig {
            min_severity: Severity::High,
            ..Default::default()
        };
        assert!(!should_process_issue(
            &filters,
            &issue(Severity::Medium, IssueType::Lint, "src/lib.rs")
        ));
        assert!(should_process_issue(
            &filters,
            &issue(Severity::High, IssueType::Lint, "src/lib.rs")
        ));
    }

    #[test]
    fn test_empty_allow_list_accepts_all_types() {
        let filters = FilterConfig::default();
        for issue_type in [IssueType::Syntax, IssueType::Security, IssueType::Style] {
            assert!(should_process_issue(
                &filters,
                &issue(Severity::Critical, issue_type, "src/lib.rs")
            ));
        }
    }

    #[test]
    fn test_allow_list_rejects_other_types() {
        let filters = FilterConfig {
            allowed_types: vec![IssueType::Security],
            ..Default::default()
        };
        assert!(should_process_issue(
            &filters,
            &issue(Severity::High, IssueType::Security, "src/lib.rs")
        ));
        assert!(!should_process_issue(
            &filters,
            &issue(Severity::High, IssueType::Lint, "src/lib.rs")
        ));
    }

    #[test]
    fn test_include_patterns_must_match() {
        let filters = FilterConfig {
            include_paths: vec!["src/*".to_string()],
            ..Default::default()
        };
        assert!(should_process_issue(
            &filters,
            &issue(Severity::High, IssueType::Lint, "src/deep/nested.rs")
        ));
        assert!(!should_process_issue(
            &filters,
            &issue(Severity::High, IssueType::Lint, "vendor/lib.rs")
        ));
    }

    #[test]
    fn test_exclude_patterns_reject() {
        let filters = FilterConfig {
            exclude_paths: vec!["*/generated/*".to_string()],
            ..Default::default()
        };
        assert!(!should_process_issue(
            &filters,
            &issue(Severity::High, IssueType::Lint, "src/generated/schema.rs")
        ));
        assert!(should_process_issue(
            &filters,
            &issue(Severity::High, IssueType::Lint, "src/handwritten.rs")
        ));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        assert!(!matches_path("[", "src/lib.rs"));
    }
}
