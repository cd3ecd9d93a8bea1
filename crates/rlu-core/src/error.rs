//! Error taxonomy for the update workflow.

use crate::ids::ResourceId;
use crate::model::ResourceStatus;

/// The result type used by the workflow steps.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that abort a workflow step.
///
/// Polling timeouts and best-effort propagation failures are not errors:
/// the first is recorded in the execution context, the second is logged.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// No record exists for the resource id.
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// The record exists but lacks something the update depends on.
    #[error("precondition failed for {resource_id}: {message}")]
    PreconditionFailed {
        resource_id: ResourceId,
        message: String,
    },

    /// The request itself is malformed or contradictory.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested status change is not an edge of the state machine.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ResourceStatus,
        to: ResourceStatus,
    },

    /// A conditional write lost against a concurrent update.
    #[error("conflicting update for {resource_id}: expected status {expected}")]
    Conflict {
        resource_id: ResourceId,
        expected: ResourceStatus,
    },

    /// A collaborator call failed.
    #[error("{operation} failed: {source:#}")]
    External {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl WorkflowError {
    pub fn external(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::External { operation, source: source.into() }
    }

    /// Validation and lookup failures; the workflow run should end here.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::PreconditionFailed { .. } | Self::InvalidRequest(_) | Self::InvalidStateTransition { .. }
        )
    }
}

/// Errors surfaced by a record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(ResourceId),

    /// The write condition (expected status) did not hold.
    #[error("condition failed for {resource_id}: expected status {expected}")]
    ConditionFailed {
        resource_id: ResourceId,
        expected: ResourceStatus,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => WorkflowError::NotFound(id),
            StoreError::ConditionFailed { resource_id, expected } => WorkflowError::Conflict { resource_id, expected },
            StoreError::Backend(source) => WorkflowError::external("record store", source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_failure_becomes_conflict() {
        let err: WorkflowError = StoreError::ConditionFailed {
            resource_id: ResourceId::from_str("m1"),
            expected: ResourceStatus::InService,
        }
        .into();
        assert!(matches!(err, WorkflowError::Conflict { .. }));
        assert!(!err.is_validation());
    }

    #[test]
    fn external_error_keeps_context_chain() {
        let source = anyhow::anyhow!("throttled").context("describe service");
        let err = WorkflowError::external("resolve stack", source);
        assert_eq!(err.to_string(), "resolve stack failed: describe service: throttled");
    }
}
