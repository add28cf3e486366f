use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::template::{ApproverSpec, DepartmentRole};
use crate::domain::user::{DepartmentId, User, UserId};
use crate::errors::RepositoryError;
use crate::workflow::ports::{RoleGroupRepository, SubstituteLookup, UserRepository};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no approver found for step {step_order} ({spec})")]
    NoApproverFound { step_order: u32, spec: String },
}

/// Binds an [`ApproverSpec`] to a concrete user for a given submitter.
#[derive(Clone)]
pub struct ApproverResolver {
    users: Arc<dyn UserRepository>,
    groups: Arc<dyn RoleGroupRepository>,
}

impl ApproverResolver {
    pub fn new(users: Arc<dyn UserRepository>, groups: Arc<dyn RoleGroupRepository>) -> Self {
        Self { users, groups }
    }

    /// Returns `Ok(None)` when the approver spec cannot be satisfied; storage failures are errors.
    pub async fn find_approver(
        &self,
        spec: &ApproverSpec,
        submitter: &User,
    ) -> Result<Option<UserId>, RepositoryError> {
        match spec {
            ApproverSpec::DirectSupervisor => {
                if let Some(supervisor) = self.users.find_supervisor(&submitter.id).await? {
                    return Ok(Some(supervisor.id));
                }
                match &submitter.department_id {
                    Some(department_id) => {
                        self.department_member(department_id, DepartmentRole::Head).await
                    }
                    None => Ok(None),
                }
            }
            ApproverSpec::SpecificUser { user_id } => {
                Ok(self.users.find_by_id(user_id).await?.map(|user| user.id))
            }
            ApproverSpec::SpecificDepartment { department_id, role } => {
                self.department_member(department_id, *role).await
            }
            ApproverSpec::UserGroup { group_id } => {
                let mut members = self.groups.list_members(group_id).await?;
                members.retain(|member| member.active);
                members.sort_by(|left, right| left.id.cmp(&right.id));
                Ok(members.into_iter().next().map(|member| member.id))
            }
            ApproverSpec::Submitter => Ok(Some(submitter.id.clone())),
        }
    }

    pub async fn resolve(
        &self,
        spec: &ApproverSpec,
        submitter: &User,
        step_order: u32,
    ) -> Result<Result<UserId, RoutingError>, RepositoryError> {
        Ok(self.find_approver(spec, submitter).await?.ok_or_else(|| {
            RoutingError::NoApproverFound { step_order, spec: spec.to_string() }
        }))
    }

    async fn department_member(
        &self,
        department_id: &DepartmentId,
        role: DepartmentRole,
    ) -> Result<Option<UserId>, RepositoryError> {
        let Some(department) = self.users.find_department(department_id).await? else {
            return Ok(None);
        };
        Ok(match role {
            DepartmentRole::Head => department.head_id,
            DepartmentRole::Director => department.director_id,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedApprover {
    pub approver_id: UserId,
    pub substituted_for: Option<UserId>,
    pub substitute_name: Option<String>,
}

impl RoutedApprover {
    pub fn annotation(&self) -> Option<String> {
        let original = self.substituted_for.as_ref()?;
        let name = self.substitute_name.as_deref().unwrap_or(&self.approver_id.0);
        Some(format!("Reassigned to substitute {name} while {original} is away"))
    }
}

/// Redirects a step to a stand-in when its approver is away.
#[derive(Clone)]
pub struct SubstituteRouter {
    lookup: Arc<dyn SubstituteLookup>,
}

impl SubstituteRouter {
    pub fn new(lookup: Arc<dyn SubstituteLookup>) -> Self {
        Self { lookup }
    }

    pub async fn route(&self, original: &UserId, on: NaiveDate) -> RoutedApprover {
        let keep = || RoutedApprover {
            approver_id: original.clone(),
            substituted_for: None,
            substitute_name: None,
        };

        match self.lookup.active_substitute(original, on).await {
            Ok(Some(substitute)) if substitute.id != *original => RoutedApprover {
                approver_id: substitute.id,
                substituted_for: Some(original.clone()),
                substitute_name: Some(substitute.display_name),
            },
            Ok(_) => keep(),
            Err(error) => {
                tracing::warn!(
                    event_name = "workflow.routing.substitute_lookup_failed",
                    approver_id = %original,
                    error = %error,
                    "substitute lookup failed; keeping original approver"
                );
                keep()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::{ApproverResolver, RoutingError, SubstituteRouter};
    use crate::domain::template::{ApproverSpec, DepartmentRole};
    use crate::domain::user::{Department, DepartmentId, GroupId, User, UserId};
    use crate::workflow::memory::{InMemoryDirectory, InMemorySubstituteLookup};

    fn directory() -> Arc<InMemoryDirectory> {
        let directory = InMemoryDirectory::default();
        directory.add_user(User::new("u-head", "Hanna Head").in_department("d-eng"));
        directory.add_user(User::new("u-director", "Dora Director").in_department("d-eng"));
        directory.add_user(User::new("u-lead", "Lee Lead").in_department("d-eng"));
        directory.add_user(
            User::new("u-dev", "Dev Eloper").in_department("d-eng").with_supervisor("u-lead"),
        );
        directory.add_user(User::new("u-intern", "Ina Intern").in_department("d-eng"));
        directory.add_user(User::new("u-loner", "Lo Ner"));
        directory.add_user(User::new("u-hr-b", "Bea HR").in_group("g-hr"));
        directory.add_user(User::new("u-hr-a", "Abe HR").in_group("g-hr").inactive());
        directory.add_user(User::new("u-hr-c", "Cy HR").in_group("g-hr"));
        directory.add_department(Department {
            id: DepartmentId("d-eng".to_string()),
            name: "Engineering".to_string(),
            head_id: Some(UserId("u-head".to_string())),
            director_id: Some(UserId("u-director".to_string())),
        });
        Arc::new(directory)
    }

    fn resolver(directory: &Arc<InMemoryDirectory>) -> ApproverResolver {
        ApproverResolver::new(directory.clone(), directory.clone())
    }

    fn user(directory: &InMemoryDirectory, id: &str) -> User {
        directory.user(&UserId(id.to_string())).expect("fixture user")
    }

    async fn resolve(directory: &Arc<InMemoryDirectory>, spec: ApproverSpec, submitter: &str) -> Option<String> {
        resolver(directory)
            .find_approver(&spec, &user(directory, submitter))
            .await
            .expect("lookup should not fail")
            .map(|id| id.0)
    }

    #[tokio::test]
    async fn direct_supervisor_prefers_configured_supervisor() {
        let directory = directory();
        let approver = resolve(&directory, ApproverSpec::DirectSupervisor, "u-dev").await;
        assert_eq!(approver.as_deref(), Some("u-lead"));
    }

    #[tokio::test]
    async fn direct_supervisor_falls_back_to_department_head() {
        let directory = directory();
        let approver = resolve(&directory, ApproverSpec::DirectSupervisor, "u-intern").await;
        assert_eq!(approver.as_deref(), Some("u-head"));
    }

    #[tokio::test]
    async fn direct_supervisor_without_supervisor_or_department_is_not_found() {
        let directory = directory();
        let resolved = resolver(&directory)
            .resolve(&ApproverSpec::DirectSupervisor, &user(&directory, "u-loner"), 1)
            .await
            .expect("lookup should not fail");

        assert_eq!(
            resolved,
            Err(RoutingError::NoApproverFound { step_order: 1, spec: "direct supervisor".to_string() })
        );
    }

    #[tokio::test]
    async fn specific_user_is_used_for_every_submitter() {
        let directory = directory();
        let spec = ApproverSpec::SpecificUser { user_id: UserId("u-director".to_string()) };
        assert_eq!(resolve(&directory, spec.clone(), "u-dev").await.as_deref(), Some("u-director"));
        assert_eq!(resolve(&directory, spec, "u-loner").await.as_deref(), Some("u-director"));

        let missing = ApproverSpec::SpecificUser { user_id: UserId("u-ghost".to_string()) };
        assert_eq!(resolve(&directory, missing, "u-dev").await, None);
    }

    #[tokio::test]
    async fn specific_department_selects_requested_role() {
        let directory = directory();
        let head = ApproverSpec::SpecificDepartment {
            department_id: DepartmentId("d-eng".to_string()),
            role: DepartmentRole::Head,
        };
        let director = ApproverSpec::SpecificDepartment {
            department_id: DepartmentId("d-eng".to_string()),
            role: DepartmentRole::Director,
        };

        assert_eq!(resolve(&directory, head, "u-loner").await.as_deref(), Some("u-head"));
        assert_eq!(resolve(&directory, director, "u-loner").await.as_deref(), Some("u-director"));
    }

    #[tokio::test]
    async fn user_group_picks_first_active_member_by_id() {
        let directory = directory();
        let spec = ApproverSpec::UserGroup { group_id: GroupId("g-hr".to_string()) };

        let first = resolve(&directory, spec.clone(), "u-dev").await;
        let second = resolve(&directory, spec, "u-dev").await;
        assert_eq!(first.as_deref(), Some("u-hr-b"));
        assert_eq!(first, second);

        let empty = ApproverSpec::UserGroup { group_id: GroupId("g-none".to_string()) };
        assert_eq!(resolve(&directory, empty, "u-dev").await, None);
    }

    #[tokio::test]
    async fn submitter_spec_resolves_to_submitter() {
        let directory = directory();
        assert_eq!(resolve(&directory, ApproverSpec::Submitter, "u-dev").await.as_deref(), Some("u-dev"));
    }

    #[tokio::test]
    async fn substitute_router_reassigns_when_approver_is_away() {
        let lookup = InMemorySubstituteLookup::default();
        let day = NaiveDate::from_ymd_opt(2026, 7, 15).expect("valid date");
        lookup.add(
            UserId("u-lead".to_string()),
            User::new("u-deputy", "Dee Deputy"),
            NaiveDate::from_ymd_opt(2026, 7, 10).expect("valid date"),
            NaiveDate::from_ymd_opt(2026, 7, 20).expect("valid date"),
        );
        let router = SubstituteRouter::new(Arc::new(lookup));

        let routed = router.route(&UserId("u-lead".to_string()), day).await;
        assert_eq!(routed.approver_id.0, "u-deputy");
        assert_eq!(routed.substituted_for.as_ref().map(|id| id.0.as_str()), Some("u-lead"));
        assert!(routed.annotation().expect("annotation").contains("Dee Deputy"));

        let later = NaiveDate::from_ymd_opt(2026, 7, 21).expect("valid date");
        let routed = router.route(&UserId("u-lead".to_string()), later).await;
        assert_eq!(routed.approver_id.0, "u-lead");
        assert!(routed.annotation().is_none());
    }
}
