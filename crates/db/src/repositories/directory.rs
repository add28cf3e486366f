//! Users, departments, group memberships and dated stand-ins.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use portal_core::domain::user::{Department, DepartmentId, GroupId, User, UserId, VacationBalance};
use portal_core::errors::RepositoryError;
use portal_core::workflow::ports::{
    DelegationLookup, RoleGroupRepository, SubstituteLookup, UserRepository,
};

use super::{decode, format_date, SqlError};
use crate::DbPool;

const USER_COLUMNS: &str = "u.id, u.display_name, u.email, u.department_id, u.supervisor_id, u.active,
     u.annual_vacation_days, u.vacation_days_used, u.on_demand_vacation_days_used,
     u.circumstantial_leave_days_used, u.carried_over_vacation_days";

#[derive(Clone)]
pub struct SqlDirectory {
    pool: DbPool,
}

impl SqlDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_department(&self, department: &Department) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO departments (id, name, head_id, director_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 head_id = excluded.head_id,
                 director_id = excluded.director_id",
        )
        .bind(&department.id.0)
        .bind(&department.name)
        .bind(department.head_id.as_ref().map(|id| id.0.as_str()))
        .bind(department.director_id.as_ref().map(|id| id.0.as_str()))
        .execute(&self.pool)
        .await
        .map_err(SqlError::from)?;
        Ok(())
    }

    /// `substitute_id` handles `user_id`'s approvals from `from` through `to`, inclusive.
    pub async fn add_substitution(
        &self,
        user_id: &UserId,
        substitute_id: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO substitutions (user_id, substitute_id, starts_on, ends_on) VALUES (?, ?, ?, ?)",
        )
        .bind(&user_id.0)
        .bind(&substitute_id.0)
        .bind(format_date(from))
        .bind(format_date(to))
        .execute(&self.pool)
        .await
        .map_err(SqlError::from)?;
        Ok(())
    }

    pub async fn add_delegation(
        &self,
        original_id: &UserId,
        delegate_id: &UserId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO delegations (original_id, delegate_id, starts_on, ends_on) VALUES (?, ?, ?, ?)",
        )
        .bind(&original_id.0)
        .bind(&delegate_id.0)
        .bind(format_date(from))
        .bind(format_date(to))
        .execute(&self.pool)
        .await
        .map_err(SqlError::from)?;
        Ok(())
    }

    async fn groups_of(&self, user_id: &str) -> Result<Vec<GroupId>, SqlError> {
        let rows =
            sqlx::query("SELECT group_id FROM user_groups WHERE user_id = ? ORDER BY group_id ASC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("group_id").map(GroupId).map_err(decode))
            .collect()
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, SqlError> {
        let user = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()?;
        match user {
            Some(mut user) => {
                user.groups = self.groups_of(&user.id.0).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, SqlError> {
    let department_id: Option<String> = row.try_get("department_id").map_err(decode)?;
    let supervisor_id: Option<String> = row.try_get("supervisor_id").map_err(decode)?;

    Ok(User {
        id: UserId(row.try_get("id").map_err(decode)?),
        display_name: row.try_get("display_name").map_err(decode)?,
        email: row.try_get("email").map_err(decode)?,
        department_id: department_id.map(DepartmentId),
        supervisor_id: supervisor_id.map(UserId),
        active: row.try_get("active").map_err(decode)?,
        groups: Vec::new(),
        vacation: VacationBalance {
            annual_vacation_days: row.try_get("annual_vacation_days").map_err(decode)?,
            vacation_days_used: row.try_get("vacation_days_used").map_err(decode)?,
            on_demand_vacation_days_used: row
                .try_get("on_demand_vacation_days_used")
                .map_err(decode)?,
            circumstantial_leave_days_used: row
                .try_get("circumstantial_leave_days_used")
                .map_err(decode)?,
            carried_over_vacation_days: row.try_get("carried_over_vacation_days").map_err(decode)?,
        },
    })
}

#[async_trait]
impl UserRepository for SqlDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.find_user(&id.0).await?)
    }

    async fn find_supervisor(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let supervisor_id: Option<Option<String>> =
            sqlx::query_scalar("SELECT supervisor_id FROM users WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(SqlError::from)?;
        match supervisor_id.flatten() {
            Some(supervisor_id) => Ok(self.find_user(&supervisor_id).await?),
            None => Ok(None),
        }
    }

    async fn find_department(
        &self,
        id: &DepartmentId,
    ) -> Result<Option<Department>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, head_id, director_id FROM departments WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlError::from)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let head_id: Option<String> = row.try_get("head_id").map_err(decode)?;
        let director_id: Option<String> = row.try_get("director_id").map_err(decode)?;
        Ok(Some(Department {
            id: DepartmentId(row.try_get("id").map_err(decode)?),
            name: row.try_get("name").map_err(decode)?,
            head_id: head_id.map(UserId),
            director_id: director_id.map(UserId),
        }))
    }

    /// Upserts the user and replaces their group memberships in one transaction.
    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(SqlError::from)?;

        sqlx::query(
            "INSERT INTO users (id, display_name, email, department_id, supervisor_id, active,
                                annual_vacation_days, vacation_days_used, on_demand_vacation_days_used,
                                circumstantial_leave_days_used, carried_over_vacation_days)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 email = excluded.email,
                 department_id = excluded.department_id,
                 supervisor_id = excluded.supervisor_id,
                 active = excluded.active,
                 annual_vacation_days = excluded.annual_vacation_days,
                 vacation_days_used = excluded.vacation_days_used,
                 on_demand_vacation_days_used = excluded.on_demand_vacation_days_used,
                 circumstantial_leave_days_used = excluded.circumstantial_leave_days_used,
                 carried_over_vacation_days = excluded.carried_over_vacation_days",
        )
        .bind(&user.id.0)
        .bind(&user.display_name)
        .bind(&user.email)
        .bind(user.department_id.as_ref().map(|id| id.0.as_str()))
        .bind(user.supervisor_id.as_ref().map(|id| id.0.as_str()))
        .bind(user.active)
        .bind(user.vacation.annual_vacation_days)
        .bind(user.vacation.vacation_days_used)
        .bind(user.vacation.on_demand_vacation_days_used)
        .bind(user.vacation.circumstantial_leave_days_used)
        .bind(user.vacation.carried_over_vacation_days)
        .execute(&mut *tx)
        .await
        .map_err(SqlError::from)?;

        sqlx::query("DELETE FROM user_groups WHERE user_id = ?")
            .bind(&user.id.0)
            .execute(&mut *tx)
            .await
            .map_err(SqlError::from)?;
        for group in &user.groups {
            sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?, ?)")
                .bind(&user.id.0)
                .bind(&group.0)
                .execute(&mut *tx)
                .await
                .map_err(SqlError::from)?;
        }

        tx.commit().await.map_err(SqlError::from)?;
        Ok(())
    }
}

#[async_trait]
impl RoleGroupRepository for SqlDirectory {
    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<User>, RepositoryError> {
        let mut members = sqlx::query(&format!(
            "SELECT {USER_COLUMNS}
             FROM users u JOIN user_groups g ON g.user_id = u.id
             WHERE g.group_id = ?
             ORDER BY u.id ASC"
        ))
        .bind(&group_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(SqlError::from)?
        .iter()
        .map(user_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        for member in &mut members {
            member.groups = self.groups_of(&member.id.0).await?;
        }
        Ok(members)
    }
}

#[async_trait]
impl SubstituteLookup for SqlDirectory {
    async fn active_substitute(
        &self,
        user_id: &UserId,
        on: NaiveDate,
    ) -> Result<Option<User>, RepositoryError> {
        let substitute_id: Option<String> = sqlx::query_scalar(
            "SELECT substitute_id FROM substitutions
             WHERE user_id = ? AND starts_on <= ? AND ends_on >= ?
             ORDER BY id ASC
             LIMIT 1",
        )
        .bind(&user_id.0)
        .bind(format_date(on))
        .bind(format_date(on))
        .fetch_optional(&self.pool)
        .await
        .map_err(SqlError::from)?;

        match substitute_id {
            Some(substitute_id) => Ok(self.find_user(&substitute_id).await?),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DelegationLookup for SqlDirectory {
    async fn can_act_for(
        &self,
        delegate_id: &UserId,
        original_id: &UserId,
        on: NaiveDate,
    ) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM delegations
             WHERE original_id = ? AND delegate_id = ? AND starts_on <= ? AND ends_on >= ?",
        )
        .bind(&original_id.0)
        .bind(&delegate_id.0)
        .bind(format_date(on))
        .bind(format_date(on))
        .fetch_one(&self.pool)
        .await
        .map_err(SqlError::from)?;
        Ok(count > 0)
    }
}
