use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use portal_core::domain::request::{Request, RequestId};
use portal_core::domain::user::UserId;
use portal_core::errors::CollaboratorError;
use portal_core::vacation::{FormFieldExtractor, LeavePeriod};
use portal_core::workflow::ports::VacationScheduler;

use super::{format_date, parse_date};
use crate::DbPool;

/// Team calendar entries for approved leave, one per request.
#[derive(Clone)]
pub struct SqlVacationScheduler {
    pool: DbPool,
    forms: Arc<dyn FormFieldExtractor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledLeave {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub leave_type: Option<String>,
    pub period: LeavePeriod,
}

impl SqlVacationScheduler {
    pub fn new(pool: DbPool, forms: Arc<dyn FormFieldExtractor>) -> Self {
        Self { pool, forms }
    }

    pub async fn list_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ScheduledLeave>, CollaboratorError> {
        let rows = sqlx::query(
            "SELECT request_id, user_id, leave_type, starts_on, ends_on
             FROM vacation_schedule WHERE user_id = ? ORDER BY starts_on ASC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(scheduler_error)?;

        rows.iter()
            .map(|row| -> Result<ScheduledLeave, CollaboratorError> {
                let starts_on: String = row.try_get("starts_on").map_err(scheduler_error)?;
                let ends_on: String = row.try_get("ends_on").map_err(scheduler_error)?;
                Ok(ScheduledLeave {
                    request_id: RequestId(row.try_get("request_id").map_err(scheduler_error)?),
                    user_id: UserId(row.try_get("user_id").map_err(scheduler_error)?),
                    leave_type: row.try_get("leave_type").map_err(scheduler_error)?,
                    period: LeavePeriod {
                        start: parse_date(&starts_on).map_err(scheduler_error)?,
                        end: parse_date(&ends_on).map_err(scheduler_error)?,
                    },
                })
            })
            .collect()
    }
}

fn scheduler_error(error: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::new("vacation_scheduler", error.to_string())
}

#[async_trait]
impl VacationScheduler for SqlVacationScheduler {
    async fn create_from_approved_request(
        &self,
        request: &Request,
    ) -> Result<(), CollaboratorError> {
        let period = self.forms.leave_period(&request.form_data).ok_or_else(|| {
            scheduler_error(format!("request {} has no leave period", request.id))
        })?;
        let leave_type = request.leave_type.or_else(|| self.forms.leave_type(&request.form_data));

        sqlx::query(
            "INSERT INTO vacation_schedule (request_id, user_id, leave_type, starts_on, ends_on, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(request_id) DO UPDATE SET
                 leave_type = excluded.leave_type,
                 starts_on = excluded.starts_on,
                 ends_on = excluded.ends_on",
        )
        .bind(&request.id.0)
        .bind(&request.submitter_id.0)
        .bind(leave_type.map(|leave_type| leave_type.as_str()))
        .bind(format_date(period.start))
        .bind(format_date(period.end))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(scheduler_error)?;
        Ok(())
    }

    async fn remove_for_request(&self, request_id: &RequestId) -> Result<(), CollaboratorError> {
        sqlx::query("DELETE FROM vacation_schedule WHERE request_id = ?")
            .bind(&request_id.0)
            .execute(&self.pool)
            .await
            .map_err(scheduler_error)?;
        Ok(())
    }
}
