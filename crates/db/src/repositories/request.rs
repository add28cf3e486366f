//! Requests with their approval steps and quiz answers.
//!
//! A request row carries a `version` counter. Saves compare it against the
//! caller's copy and bump it, so a stale copy is refused instead of
//! overwriting newer state. Steps and answers are rewritten on every save
//! inside the same transaction.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use portal_core::domain::request::{
    ApprovalStep, QuizAnswer, Request, RequestId, StepId,
};
use portal_core::domain::template::{QuestionId, TemplateId};
use portal_core::domain::user::UserId;
use portal_core::errors::RepositoryError;
use portal_core::workflow::ports::RequestRepository;

use super::{decode, parse_optional_timestamp, parse_timestamp, score_from_column, SqlError};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, number, template_id, submitter_id, submitted_at, priority,
     form_data_json, leave_type, status, completed_at, version";

#[derive(Clone)]
pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Requests whose active step is assigned to `approver_id`, oldest first.
    pub async fn list_awaiting(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<Request>, RepositoryError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT r.id FROM requests r
             JOIN approval_steps s ON s.request_id = r.id
             WHERE s.approver_id = ? AND s.status IN ('in_review', 'requires_survey')
             ORDER BY r.submitted_at ASC, r.id ASC",
        )
        .bind(&approver_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(SqlError::from)?;

        let mut requests = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(request) = self.load(&id).await? {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    async fn load(&self, id: &str) -> Result<Option<Request>, SqlError> {
        let mut conn = self.pool.acquire().await?;
        load_request(&mut conn, id).await
    }
}

async fn load_request(conn: &mut SqliteConnection, id: &str) -> Result<Option<Request>, SqlError> {
    let request = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(request_from_row)
        .transpose()?;
    let Some(mut request) = request else {
        return Ok(None);
    };

    let mut steps = sqlx::query(
        "SELECT id, step_order, approver_id, status, started_at, finished_at, comment,
                requires_quiz, passing_score, quiz_score, quiz_passed
         FROM approval_steps WHERE request_id = ? ORDER BY position ASC",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(step_from_row)
    .collect::<Result<Vec<_>, _>>()?;

    let answers = sqlx::query(
        "SELECT a.step_id, a.question_id, a.selected_value, a.is_correct, a.answered_at
         FROM quiz_answers a JOIN approval_steps s ON s.id = a.step_id
         WHERE s.request_id = ?
         ORDER BY a.step_id ASC, a.position ASC",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    for row in &answers {
        let step_id: String = row.try_get("step_id").map_err(decode)?;
        let answer = answer_from_row(row)?;
        if let Some(step) = steps.iter_mut().find(|step| step.id.0 == step_id) {
            step.quiz_answers.push(answer);
        }
    }

    request.steps = steps;
    Ok(Some(request))
}

fn request_from_row(row: &SqliteRow) -> Result<Request, SqlError> {
    let submitted_at: String = row.try_get("submitted_at").map_err(decode)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(decode)?;
    let priority: String = row.try_get("priority").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let leave_type: Option<String> = row.try_get("leave_type").map_err(decode)?;
    let form_data_json: String = row.try_get("form_data_json").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;

    Ok(Request {
        id: RequestId(row.try_get("id").map_err(decode)?),
        number: row.try_get("number").map_err(decode)?,
        template_id: TemplateId(row.try_get("template_id").map_err(decode)?),
        submitter_id: UserId(row.try_get("submitter_id").map_err(decode)?),
        submitted_at: parse_timestamp(&submitted_at)?,
        priority: priority.parse().map_err(SqlError::Decode)?,
        form_data: serde_json::from_str(&form_data_json).map_err(decode)?,
        leave_type: leave_type.map(|value| value.parse()).transpose().map_err(SqlError::Decode)?,
        status: status.parse().map_err(SqlError::Decode)?,
        completed_at: parse_optional_timestamp(completed_at)?,
        steps: Vec::new(),
        version: u64::try_from(version).map_err(decode)?,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<ApprovalStep, SqlError> {
    let status: String = row.try_get("status").map_err(decode)?;
    let step_order: i64 = row.try_get("step_order").map_err(decode)?;

    Ok(ApprovalStep {
        id: StepId(row.try_get("id").map_err(decode)?),
        step_order: u32::try_from(step_order).map_err(decode)?,
        approver_id: UserId(row.try_get("approver_id").map_err(decode)?),
        status: status.parse().map_err(SqlError::Decode)?,
        started_at: parse_optional_timestamp(row.try_get("started_at").map_err(decode)?)?,
        finished_at: parse_optional_timestamp(row.try_get("finished_at").map_err(decode)?)?,
        comment: row.try_get("comment").map_err(decode)?,
        requires_quiz: row.try_get("requires_quiz").map_err(decode)?,
        passing_score: score_from_column(row.try_get("passing_score").map_err(decode)?)?,
        quiz_score: score_from_column(row.try_get("quiz_score").map_err(decode)?)?,
        quiz_passed: row.try_get("quiz_passed").map_err(decode)?,
        quiz_answers: Vec::new(),
    })
}

fn answer_from_row(row: &SqliteRow) -> Result<QuizAnswer, SqlError> {
    let answered_at: String = row.try_get("answered_at").map_err(decode)?;
    Ok(QuizAnswer {
        question_id: QuestionId(row.try_get("question_id").map_err(decode)?),
        selected_value: row.try_get("selected_value").map_err(decode)?,
        is_correct: row.try_get("is_correct").map_err(decode)?,
        answered_at: parse_timestamp(&answered_at)?,
    })
}

fn version_column(version: u64) -> Result<i64, SqlError> {
    i64::try_from(version).map_err(decode)
}

async fn write_steps(conn: &mut SqliteConnection, request: &Request) -> Result<(), SqlError> {
    // Answers go with their steps through ON DELETE CASCADE.
    sqlx::query("DELETE FROM approval_steps WHERE request_id = ?")
        .bind(&request.id.0)
        .execute(&mut *conn)
        .await?;

    for (position, step) in request.steps.iter().enumerate() {
        sqlx::query(
            "INSERT INTO approval_steps (id, request_id, position, step_order, approver_id, status,
                                         started_at, finished_at, comment, requires_quiz,
                                         passing_score, quiz_score, quiz_passed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id.0)
        .bind(&request.id.0)
        .bind(position as i64)
        .bind(i64::from(step.step_order))
        .bind(&step.approver_id.0)
        .bind(step.status.as_str())
        .bind(step.started_at.map(|at| at.to_rfc3339()))
        .bind(step.finished_at.map(|at| at.to_rfc3339()))
        .bind(step.comment.as_deref())
        .bind(step.requires_quiz)
        .bind(step.passing_score.map(i64::from))
        .bind(step.quiz_score.map(i64::from))
        .bind(step.quiz_passed)
        .execute(&mut *conn)
        .await?;

        for (answer_position, answer) in step.quiz_answers.iter().enumerate() {
            sqlx::query(
                "INSERT INTO quiz_answers (step_id, position, question_id, selected_value, is_correct, answered_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&step.id.0)
            .bind(answer_position as i64)
            .bind(&answer.question_id.0)
            .bind(&answer.selected_value)
            .bind(answer.is_correct)
            .bind(answer.answered_at.to_rfc3339())
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Writes one existing request if its stored version matches. Returns it with the bumped version.
async fn save_versioned(
    conn: &mut SqliteConnection,
    mut request: Request,
) -> Result<Request, SqlError> {
    let form_data_json = serde_json::to_string(&request.form_data).map_err(decode)?;
    let updated = sqlx::query(
        "UPDATE requests
         SET priority = ?, form_data_json = ?, leave_type = ?, status = ?, completed_at = ?,
             version = version + 1
         WHERE id = ? AND version = ?",
    )
    .bind(request.priority.as_str())
    .bind(form_data_json)
    .bind(request.leave_type.map(|leave_type| leave_type.as_str()))
    .bind(request.status.as_str())
    .bind(request.completed_at.map(|at| at.to_rfc3339()))
    .bind(&request.id.0)
    .bind(version_column(request.version)?)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM requests WHERE id = ?")
            .bind(&request.id.0)
            .fetch_optional(&mut *conn)
            .await?;
        return Err(match exists {
            Some(_) => SqlError::Repository(RepositoryError::Conflict {
                entity: "request",
                id: request.id.0.clone(),
                expected_version: request.version,
            }),
            None => SqlError::Repository(RepositoryError::Storage(format!(
                "request {} does not exist",
                request.id
            ))),
        });
    }

    write_steps(conn, &request).await?;
    request.version += 1;
    Ok(request)
}

#[async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        Ok(self.load(&id.0).await?)
    }

    async fn find_by_step_id(&self, step_id: &StepId) -> Result<Option<Request>, RepositoryError> {
        let request_id: Option<String> =
            sqlx::query_scalar("SELECT request_id FROM approval_steps WHERE id = ?")
                .bind(&step_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(SqlError::from)?;
        match request_id {
            Some(request_id) => Ok(self.load(&request_id).await?),
            None => Ok(None),
        }
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
            .fetch_one(&self.pool)
            .await
            .map_err(SqlError::from)?;
        Ok(u64::try_from(count).map_err(decode)?)
    }

    async fn insert(&self, request: Request) -> Result<Request, RepositoryError> {
        let form_data_json = serde_json::to_string(&request.form_data).map_err(decode)?;
        let mut tx = self.pool.begin().await.map_err(SqlError::from)?;

        sqlx::query(
            "INSERT INTO requests (id, number, template_id, submitter_id, submitted_at, priority,
                                   form_data_json, leave_type, status, completed_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.number)
        .bind(&request.template_id.0)
        .bind(&request.submitter_id.0)
        .bind(request.submitted_at.to_rfc3339())
        .bind(request.priority.as_str())
        .bind(form_data_json)
        .bind(request.leave_type.map(|leave_type| leave_type.as_str()))
        .bind(request.status.as_str())
        .bind(request.completed_at.map(|at| at.to_rfc3339()))
        .bind(version_column(request.version)?)
        .execute(&mut *tx)
        .await
        .map_err(SqlError::from)?;

        write_steps(&mut tx, &request).await?;
        tx.commit().await.map_err(SqlError::from)?;

        tracing::debug!(
            event_name = "db.request.inserted",
            request_id = %request.id,
            number = %request.number,
            steps = request.steps.len(),
            "request stored"
        );
        Ok(request)
    }

    async fn save(&self, request: Request) -> Result<Request, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(SqlError::from)?;
        let saved = save_versioned(&mut tx, request).await?;
        tx.commit().await.map_err(SqlError::from)?;
        Ok(saved)
    }

    async fn save_batch(&self, requests: Vec<Request>) -> Result<Vec<Request>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(SqlError::from)?;
        let mut saved = Vec::with_capacity(requests.len());
        for request in requests {
            // Dropping `tx` on error rolls back every earlier write.
            saved.push(save_versioned(&mut tx, request).await?);
        }
        tx.commit().await.map_err(SqlError::from)?;

        tracing::debug!(
            event_name = "db.request.batch_saved",
            count = saved.len(),
            "request batch committed"
        );
        Ok(saved)
    }
}
