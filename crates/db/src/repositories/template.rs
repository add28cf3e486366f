use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use portal_core::domain::template::{ApprovalStepTemplate, RequestTemplate, TemplateId};
use portal_core::errors::RepositoryError;
use portal_core::workflow::ports::TemplateRepository;

use super::{decode, score_from_column, SqlError};
use crate::DbPool;

/// Templates with their step definitions stored as one JSON column.
#[derive(Clone)]
pub struct SqlTemplateRepository {
    pool: DbPool,
}

impl SqlTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, template: &RequestTemplate) -> Result<(), RepositoryError> {
        let steps_json = serde_json::to_string(&template.steps).map_err(decode)?;
        sqlx::query(
            "INSERT INTO request_templates
                 (id, name, is_vacation_request, requires_approval, default_passing_score, steps_json)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 is_vacation_request = excluded.is_vacation_request,
                 requires_approval = excluded.requires_approval,
                 default_passing_score = excluded.default_passing_score,
                 steps_json = excluded.steps_json",
        )
        .bind(&template.id.0)
        .bind(&template.name)
        .bind(template.is_vacation_request)
        .bind(template.requires_approval)
        .bind(template.default_passing_score.map(i64::from))
        .bind(steps_json)
        .execute(&self.pool)
        .await
        .map_err(SqlError::from)?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<RequestTemplate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, is_vacation_request, requires_approval, default_passing_score, steps_json
             FROM request_templates ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(SqlError::from)?;

        Ok(rows.iter().map(template_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn template_from_row(row: &SqliteRow) -> Result<RequestTemplate, SqlError> {
    let steps_json: String = row.try_get("steps_json").map_err(decode)?;
    let steps: Vec<ApprovalStepTemplate> = serde_json::from_str(&steps_json).map_err(decode)?;

    Ok(RequestTemplate {
        id: TemplateId(row.try_get("id").map_err(decode)?),
        name: row.try_get("name").map_err(decode)?,
        is_vacation_request: row.try_get("is_vacation_request").map_err(decode)?,
        requires_approval: row.try_get("requires_approval").map_err(decode)?,
        steps,
        default_passing_score: score_from_column(
            row.try_get("default_passing_score").map_err(decode)?,
        )?,
    })
}

#[async_trait]
impl TemplateRepository for SqlTemplateRepository {
    async fn find_by_id(
        &self,
        id: &TemplateId,
    ) -> Result<Option<RequestTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, is_vacation_request, requires_approval, default_passing_score, steps_json
             FROM request_templates WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(SqlError::from)?;

        Ok(row.as_ref().map(template_from_row).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use portal_core::domain::template::{
        ApprovalStepTemplate, ApproverSpec, QuestionId, QuizOption, QuizQuestion, RequestTemplate,
        TemplateId,
    };
    use portal_core::domain::user::GroupId;
    use portal_core::workflow::ports::TemplateRepository;

    use super::SqlTemplateRepository;
    use crate::repositories::test_support::setup;

    fn training_template() -> RequestTemplate {
        RequestTemplate {
            id: TemplateId("tpl-training".to_string()),
            name: "Training".to_string(),
            is_vacation_request: false,
            requires_approval: true,
            steps: vec![
                ApprovalStepTemplate::new(1, ApproverSpec::DirectSupervisor).with_quiz(
                    vec![QuizQuestion {
                        id: QuestionId("q1".to_string()),
                        text: "Safety first?".to_string(),
                        options: vec![
                            QuizOption { label: "Yes".to_string(), value: "a".to_string(), is_correct: true },
                            QuizOption { label: "No".to_string(), value: "b".to_string(), is_correct: false },
                        ],
                    }],
                    Some(80),
                ),
                ApprovalStepTemplate::new(2, ApproverSpec::UserGroup {
                    group_id: GroupId("g-hr".to_string()),
                }),
            ],
            default_passing_score: Some(60),
        }
    }

    #[tokio::test]
    async fn template_round_trips_with_steps_and_quiz() {
        let repo = SqlTemplateRepository::new(setup().await);
        let template = training_template();

        repo.upsert(&template).await.expect("save template");
        let loaded = repo.find_by_id(&template.id).await.expect("find").expect("present");

        assert_eq!(loaded, template);
    }

    #[tokio::test]
    async fn upsert_replaces_existing_definition() {
        let repo = SqlTemplateRepository::new(setup().await);
        let mut template = training_template();
        repo.upsert(&template).await.expect("first save");

        template.name = "Training (2026)".to_string();
        template.steps.truncate(1);
        repo.upsert(&template).await.expect("second save");

        let all = repo.list().await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Training (2026)");
        assert_eq!(all[0].steps.len(), 1);
    }

    #[tokio::test]
    async fn missing_template_is_none() {
        let repo = SqlTemplateRepository::new(setup().await);

        let missing = repo.find_by_id(&TemplateId("tpl-ghost".to_string())).await.expect("find");

        assert!(missing.is_none());
    }
}
