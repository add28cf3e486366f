use thiserror::Error;

use crate::approvals::routing::RoutingError;
use crate::domain::request::StepStatus;
use crate::workflow::bulk::BulkItemFailure;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid step transition from {from:?} to {to:?}")]
    InvalidStepTransition { from: StepStatus, to: StepStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was modified concurrently (expected version {expected_version})")]
    Conflict { entity: &'static str, id: String, expected_version: u64 },
}

/// Failure reported by a notification or scheduling collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("collaborator `{collaborator}` failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self { collaborator, message: message.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("user `{actor}` is not allowed to act: {reason}")]
    Forbidden { actor: String, reason: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("step `{step_id}` requires a passed quiz before it can be approved")]
    QuizRequired { step_id: String },
    #[error("quiz was already submitted (score {score}, passed: {passed})")]
    QuizAlreadySubmitted { score: u8, passed: bool },
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("bulk approval failed for all {} items", .failures.len())]
    BulkApprovalFailed { failures: Vec<BulkItemFailure> },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn forbidden(actor: impl ToString, reason: impl Into<String>) -> Self {
        Self::Forbidden { actor: actor.to_string(), reason: reason.into() }
    }
}

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { .. } => Self::Conflict(value.to_string()),
            RepositoryError::Storage(message) | RepositoryError::Decode(message) => {
                Self::Persistence(message)
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested item does not exist.",
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::Conflict { .. } => "The item was changed by someone else. Reload and retry.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }
}

impl WorkflowError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<WorkflowError> for InterfaceError {
    fn from(value: WorkflowError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            WorkflowError::NotFound { .. } => Self::NotFound { message, correlation_id },
            WorkflowError::Forbidden { .. } => Self::Forbidden { message, correlation_id },
            WorkflowError::InvalidState(_)
            | WorkflowError::QuizRequired { .. }
            | WorkflowError::QuizAlreadySubmitted { .. }
            | WorkflowError::Routing(_)
            | WorkflowError::Validation(_)
            | WorkflowError::BulkApprovalFailed { .. } => {
                Self::BadRequest { message, correlation_id }
            }
            WorkflowError::Conflict(_) => Self::Conflict { message, correlation_id },
            WorkflowError::Persistence(_) => Self::ServiceUnavailable { message, correlation_id },
            WorkflowError::Domain(_) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::routing::RoutingError;
    use crate::errors::{DomainError, InterfaceError, RepositoryError, WorkflowError};

    #[test]
    fn routing_failure_maps_to_bad_request_interface_error() {
        let interface = WorkflowError::from(RoutingError::NoApproverFound {
            step_order: 2,
            spec: "direct supervisor".to_owned(),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn repository_conflict_becomes_workflow_conflict() {
        let error = WorkflowError::from(RepositoryError::Conflict {
            entity: "request",
            id: "r-1".to_owned(),
            expected_version: 3,
        });

        assert!(matches!(error, WorkflowError::Conflict(ref message) if message.contains("r-1")));
        assert_eq!(error.into_interface("req-2").class(), "conflict");
    }

    #[test]
    fn storage_error_maps_to_service_unavailable() {
        let interface = WorkflowError::from(RepositoryError::Storage("database locked".to_owned()))
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn forbidden_and_not_found_keep_their_class() {
        let forbidden = WorkflowError::forbidden("u-1", "not the assigned approver")
            .into_interface("req-4");
        let missing = WorkflowError::not_found("request", "r-404").into_interface("req-5");

        assert_eq!(forbidden.class(), "forbidden");
        assert_eq!(missing.class(), "not_found");
        assert!(missing.to_string().contains("r-404"));
    }

    #[test]
    fn invariant_violation_is_internal() {
        let interface =
            WorkflowError::from(DomainError::InvariantViolation("two active steps".to_owned()))
                .into_interface("req-6");

        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
