//! Typed error hierarchy for the remedy orchestrator.
//!
//! `PipelineError` covers programming-contract violations: capacity
//! rejections and unknown identifiers. Expected failure modes of a run
//! (generation, verification, approval, commit) never surface here —
//! callers inspect the terminal run's `status` and `error` instead.

use thiserror::Error;

/// Errors returned by the pipeline's public API.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Concurrency limit reached: {active} of {limit} runs active")]
    CapacityExceeded { active: usize, limit: usize },

    #[error("Run {id} not found")]
    RunNotFound { id: String },

    #[error("Run {id} is not active")]
    RunNotActive { id: String },

    #[error("Issue {id} not found")]
    IssueNotFound { id: String },

    #[error("No pending approval for run {run_id}")]
    NoPendingApproval { run_id: String },

    #[error("Component {component} failed to start: {source}")]
    ComponentStartFailed {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_exceeded_carries_counts() {
        let err = PipelineError::CapacityExceeded {
            active: 3,
            limit: 3,
        };
        match &err {
            PipelineError::CapacityExceeded { active, limit } => {
                assert_eq!(*active, 3);
                assert_eq!(*limit, 3);
            }
            _ => panic!("Expected CapacityExceeded"),
        }
        assert!(err.to_string().contains("3 of 3"));
    }

    #[test]
    fn run_not_found_carries_id() {
        let err = PipelineError::RunNotFound {
            id: "run-42".to_string(),
        };
        match &err {
            PipelineError::RunNotFound { id } => assert_eq!(id, "run-42"),
            _ => panic!("Expected RunNotFound"),
        }
        assert!(err.to_string().contains("run-42"));
    }

    #[test]
    fn component_start_failed_carries_component() {
        let err = PipelineError::ComponentStartFailed {
            component: "detector".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };
        assert!(err.to_string().contains("detector"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn variants_are_distinct() {
        let not_found = PipelineError::RunNotFound { id: "a".into() };
        let not_active = PipelineError::RunNotActive { id: "a".into() };
        assert!(matches!(not_found, PipelineError::RunNotFound { .. }));
        assert!(matches!(not_active, PipelineError::RunNotActive { .. }));
        assert!(!matches!(not_found, PipelineError::RunNotActive { .. }));
    }

    #[test]
    fn implements_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let err = PipelineError::NoPendingApproval {
            run_id: "x".into(),
        };
        assert_std_error(&err);
    }
}
