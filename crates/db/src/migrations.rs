use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    tracing::info!(event_name = "db.migrations.applied", "schema migrations are current");
    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "departments",
        "users",
        "user_groups",
        "request_templates",
        "requests",
        "approval_steps",
        "quiz_answers",
        "substitutions",
        "delegations",
        "vacation_schedule",
    ];

    const MANAGED_INDEXES: &[&str] = &[
        "idx_requests_number",
        "idx_requests_status",
        "idx_requests_submitter_id",
        "idx_approval_steps_request_order",
        "idx_approval_steps_approver_status",
        "idx_user_groups_group_id",
        "idx_substitutions_user_id",
        "idx_delegations_delegate_id",
        "idx_vacation_schedule_user_id",
    ];

    async fn object_count(pool: &sqlx::SqlitePool, kind: &str, name: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS count FROM sqlite_master WHERE type = ? AND name = ?")
            .bind(kind)
            .bind(name)
            .fetch_one(pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count")
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in MANAGED_TABLES {
            assert_eq!(object_count(&pool, "table", table).await, 1, "missing table {table}");
        }
        for index in MANAGED_INDEXES {
            assert_eq!(object_count(&pool, "index", index).await, 1, "missing index {index}");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert_eq!(object_count(&pool, "table", "requests").await, 0);
        assert_eq!(object_count(&pool, "table", "approval_steps").await, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_TABLES.len() + MANAGED_INDEXES.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(
            managed_schema_signature(&pool).await.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(
            managed_schema_signature(&pool).await,
            initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    #[tokio::test]
    async fn request_numbers_are_unique() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO users (id, display_name, email) VALUES ('u-1', 'One', 'one@x')")
            .execute(&pool)
            .await
            .expect("insert user");
        sqlx::query("INSERT INTO request_templates (id, name) VALUES ('tpl-1', 'Template')")
            .execute(&pool)
            .await
            .expect("insert template");

        let insert = "INSERT INTO requests (id, number, template_id, submitter_id, submitted_at, priority, status)
                      VALUES (?, 'REQ-2026-1', 'tpl-1', 'u-1', '2026-03-10T09:00:00+00:00', 'normal', 'in_review')";
        sqlx::query(insert).bind("r-1").execute(&pool).await.expect("first insert");
        let duplicate = sqlx::query(insert).bind("r-2").execute(&pool).await;

        assert!(duplicate.is_err(), "a second request with the same number must be refused");
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_TABLES.contains(&name.as_str()) || MANAGED_INDEXES.contains(&name.as_str())
            {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
