//! In-memory adapters for every workflow port.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::request::{Request, RequestId, StepId};
use crate::domain::template::{RequestTemplate, TemplateId};
use crate::domain::user::{Department, DepartmentId, GroupId, User, UserId};
use crate::errors::{CollaboratorError, RepositoryError};
use crate::workflow::ports::{
    DelegationLookup, NotificationKind, Notifier, RequestRepository, RoleGroupRepository,
    SubstituteLookup, TemplateRepository, UserRepository, VacationScheduler,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct InMemoryRequestRepository {
    requests: Arc<Mutex<HashMap<RequestId, Request>>>,
    fail_batches: Arc<AtomicBool>,
}

impl InMemoryRequestRepository {
    /// Makes every following `save_batch` fail without writing anything.
    pub fn fail_batch_saves(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, id: &RequestId) -> Option<Request> {
        lock(&self.requests).get(id).cloned()
    }

    fn check_version(
        stored: &HashMap<RequestId, Request>,
        request: &Request,
    ) -> Result<(), RepositoryError> {
        match stored.get(&request.id) {
            Some(current) if current.version == request.version => Ok(()),
            Some(_) => Err(RepositoryError::Conflict {
                entity: "request",
                id: request.id.0.clone(),
                expected_version: request.version,
            }),
            None => Err(RepositoryError::Storage(format!("request {} does not exist", request.id))),
        }
    }
}

#[async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        Ok(self.get(id))
    }

    async fn find_by_step_id(&self, step_id: &StepId) -> Result<Option<Request>, RepositoryError> {
        Ok(lock(&self.requests).values().find(|request| request.step(step_id).is_some()).cloned())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(lock(&self.requests).len() as u64)
    }

    async fn insert(&self, request: Request) -> Result<Request, RepositoryError> {
        let mut requests = lock(&self.requests);
        if requests.contains_key(&request.id) {
            return Err(RepositoryError::Storage(format!("request {} already exists", request.id)));
        }
        if requests.values().any(|existing| existing.number == request.number) {
            return Err(RepositoryError::Storage(format!(
                "request number {} is already taken",
                request.number
            )));
        }
        requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn save(&self, mut request: Request) -> Result<Request, RepositoryError> {
        let mut requests = lock(&self.requests);
        Self::check_version(&requests, &request)?;
        request.version += 1;
        requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn save_batch(&self, batch: Vec<Request>) -> Result<Vec<Request>, RepositoryError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("batch save rejected".to_string()));
        }
        let mut requests = lock(&self.requests);
        for request in &batch {
            Self::check_version(&requests, request)?;
        }
        Ok(batch
            .into_iter()
            .map(|mut request| {
                request.version += 1;
                requests.insert(request.id.clone(), request.clone());
                request
            })
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTemplateRepository {
    templates: Arc<Mutex<HashMap<TemplateId, RequestTemplate>>>,
}

impl InMemoryTemplateRepository {
    pub fn add(&self, template: RequestTemplate) {
        lock(&self.templates).insert(template.id.clone(), template);
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn find_by_id(
        &self,
        id: &TemplateId,
    ) -> Result<Option<RequestTemplate>, RepositoryError> {
        Ok(lock(&self.templates).get(id).cloned())
    }
}

/// Users, departments and group memberships.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    users: Arc<Mutex<BTreeMap<UserId, User>>>,
    departments: Arc<Mutex<HashMap<DepartmentId, Department>>>,
    fail_saves: Arc<AtomicBool>,
}

impl InMemoryDirectory {
    /// Makes every following `UserRepository::save` fail.
    pub fn fail_user_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    pub fn add_user(&self, user: User) {
        lock(&self.users).insert(user.id.clone(), user);
    }

    pub fn add_department(&self, department: Department) {
        lock(&self.departments).insert(department.id.clone(), department);
    }

    pub fn user(&self, id: &UserId) -> Option<User> {
        lock(&self.users).get(id).cloned()
    }
}

#[async_trait]
impl UserRepository for InMemoryDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.user(id))
    }

    async fn find_supervisor(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = lock(&self.users);
        Ok(users
            .get(id)
            .and_then(|user| user.supervisor_id.as_ref())
            .and_then(|supervisor_id| users.get(supervisor_id))
            .cloned())
    }

    async fn find_department(
        &self,
        id: &DepartmentId,
    ) -> Result<Option<Department>, RepositoryError> {
        Ok(lock(&self.departments).get(id).cloned())
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage(format!("user {} could not be written", user.id)));
        }
        self.add_user(user);
        Ok(())
    }
}

#[async_trait]
impl RoleGroupRepository for InMemoryDirectory {
    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<User>, RepositoryError> {
        let users = lock(&self.users);
        Ok(users.values().filter(|user| user.groups.contains(group_id)).cloned().collect())
    }
}

#[derive(Clone, Debug)]
struct DatedAssignment<T> {
    original: UserId,
    assignee: T,
    from: NaiveDate,
    to: NaiveDate,
}

impl<T> DatedAssignment<T> {
    fn covers(&self, original: &UserId, on: NaiveDate) -> bool {
        &self.original == original && self.from <= on && on <= self.to
    }
}

#[derive(Clone, Default)]
pub struct InMemorySubstituteLookup {
    entries: Arc<Mutex<Vec<DatedAssignment<User>>>>,
    failing: Arc<AtomicBool>,
}

impl InMemorySubstituteLookup {
    /// `substitute` stands in for `original` from `from` through `to`, inclusive.
    pub fn add(&self, original: UserId, substitute: User, from: NaiveDate, to: NaiveDate) {
        lock(&self.entries).push(DatedAssignment { original, assignee: substitute, from, to });
    }

    pub fn fail_lookups(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubstituteLookup for InMemorySubstituteLookup {
    async fn active_substitute(
        &self,
        user_id: &UserId,
        on: NaiveDate,
    ) -> Result<Option<User>, RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage("substitution lookup unavailable".to_string()));
        }
        Ok(lock(&self.entries)
            .iter()
            .find(|entry| entry.covers(user_id, on))
            .map(|entry| entry.assignee.clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDelegationLookup {
    entries: Arc<Mutex<Vec<DatedAssignment<UserId>>>>,
}

impl InMemoryDelegationLookup {
    pub fn add(&self, original: UserId, delegate: UserId, from: NaiveDate, to: NaiveDate) {
        lock(&self.entries).push(DatedAssignment { original, assignee: delegate, from, to });
    }
}

#[async_trait]
impl DelegationLookup for InMemoryDelegationLookup {
    async fn can_act_for(
        &self,
        delegate_id: &UserId,
        original_id: &UserId,
        on: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        Ok(lock(&self.entries)
            .iter()
            .any(|entry| entry.covers(original_id, on) && &entry.assignee == delegate_id))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentNotification {
    pub recipient: UserId,
    pub request_id: RequestId,
    pub message: String,
    pub kind: NotificationKind,
}

/// Keeps every notification instead of delivering it. Can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        lock(&self.sent).clone()
    }

    fn record(&self, notification: SentNotification) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("notifier", "delivery refused"));
        }
        lock(&self.sent).push(notification);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_approver(
        &self,
        approver_id: &UserId,
        request: &Request,
    ) -> Result<(), CollaboratorError> {
        self.record(SentNotification {
            recipient: approver_id.clone(),
            request_id: request.id.clone(),
            message: format!("Request {} awaits your approval", request.number),
            kind: NotificationKind::Info,
        })
    }

    async fn notify_submitter(
        &self,
        request: &Request,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), CollaboratorError> {
        self.record(SentNotification {
            recipient: request.submitter_id.clone(),
            request_id: request.id.clone(),
            message: message.to_string(),
            kind,
        })
    }
}

#[derive(Clone, Default)]
pub struct RecordingScheduler {
    created: Arc<Mutex<Vec<RequestId>>>,
    removed: Arc<Mutex<Vec<RequestId>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingScheduler {
    pub fn failing() -> Self {
        let scheduler = Self::default();
        scheduler.failing.store(true, Ordering::SeqCst);
        scheduler
    }

    pub fn created(&self) -> Vec<RequestId> {
        lock(&self.created).clone()
    }

    pub fn removed(&self) -> Vec<RequestId> {
        lock(&self.removed).clone()
    }

    fn check(&self) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("vacation_scheduler", "schedule store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl VacationScheduler for RecordingScheduler {
    async fn create_from_approved_request(
        &self,
        request: &Request,
    ) -> Result<(), CollaboratorError> {
        self.check()?;
        lock(&self.created).push(request.id.clone());
        Ok(())
    }

    async fn remove_for_request(&self, request_id: &RequestId) -> Result<(), CollaboratorError> {
        self.check()?;
        lock(&self.removed).push(request_id.clone());
        Ok(())
    }
}
