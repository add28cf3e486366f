pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod vacation;
pub mod workflow;

pub use approvals::{
    ApproverResolver, QuizGrade, QuizGrader, RoutedApprover, RoutingError, SubmittedAnswer,
    SubstituteRouter,
};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::request::{
    ApprovalStep, FormData, Priority, Request, RequestId, RequestStatus, StepId, StepStatus,
};
pub use domain::template::{ApprovalStepTemplate, ApproverSpec, RequestTemplate, TemplateId};
pub use domain::user::{Department, LeaveType, User, UserId, VacationBalance};
pub use errors::{
    CollaboratorError, DomainError, InterfaceError, RepositoryError, WorkflowError,
};
pub use vacation::{KeywordFormFieldExtractor, LedgerError, VacationLedger};
pub use workflow::{
    BulkApproval, BulkApprovalOutcome, BulkItemFailure, QuizOutcome, SubmitRequest,
    WorkflowEngine, WorkflowPorts, WorkflowSettings,
};
