//! Collaborators the workflow engine is written against.
//!
//! Storage adapters live in `portal-db`; in-memory adapters for tests and
//! embedders live in [`crate::workflow::memory`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::request::{Request, RequestId, StepId};
use crate::domain::template::{RequestTemplate, TemplateId};
use crate::domain::user::{Department, DepartmentId, GroupId, User, UserId};
use crate::errors::{CollaboratorError, RepositoryError};

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError>;
    async fn find_by_step_id(&self, step_id: &StepId) -> Result<Option<Request>, RepositoryError>;
    async fn count(&self) -> Result<u64, RepositoryError>;
    async fn insert(&self, request: Request) -> Result<Request, RepositoryError>;
    /// Saves an existing request if its stored version still equals `request.version`.
    /// Returns the request carrying the bumped version.
    async fn save(&self, request: Request) -> Result<Request, RepositoryError>;
    /// Saves every request or none of them.
    async fn save_batch(&self, requests: Vec<Request>) -> Result<Vec<Request>, RepositoryError>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_by_id(&self, id: &TemplateId)
        -> Result<Option<RequestTemplate>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_supervisor(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_department(
        &self,
        id: &DepartmentId,
    ) -> Result<Option<Department>, RepositoryError>;
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RoleGroupRepository: Send + Sync {
    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait SubstituteLookup: Send + Sync {
    /// The user standing in for `user_id` on `on`, if they are away.
    async fn active_substitute(
        &self,
        user_id: &UserId,
        on: NaiveDate,
    ) -> Result<Option<User>, RepositoryError>;
}

#[async_trait]
pub trait DelegationLookup: Send + Sync {
    async fn can_act_for(
        &self,
        delegate_id: &UserId,
        original_id: &UserId,
        on: NaiveDate,
    ) -> Result<bool, RepositoryError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_approver(
        &self,
        approver_id: &UserId,
        request: &Request,
    ) -> Result<(), CollaboratorError>;

    async fn notify_submitter(
        &self,
        request: &Request,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait VacationScheduler: Send + Sync {
    async fn create_from_approved_request(&self, request: &Request)
        -> Result<(), CollaboratorError>;
    async fn remove_for_request(&self, request_id: &RequestId) -> Result<(), CollaboratorError>;
}
