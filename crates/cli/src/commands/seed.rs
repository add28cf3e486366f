//! Loads directory and template fixtures from a JSON file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use portal_core::config::LoadOptions;
use portal_core::workflow::ports::UserRepository;
use portal_core::{Department, RequestTemplate, User, UserId, VacationBalance};
use portal_db::{SqlDirectory, SqlTemplateRepository};
use serde::{Deserialize, Serialize};

use crate::commands::{with_application, CommandResult, EXIT_WORKFLOW};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub departments: Vec<Department>,
    pub users: Vec<UserFixture>,
    pub templates: Vec<RequestTemplate>,
    pub substitutions: Vec<DatedFixture>,
    pub delegations: Vec<DatedFixture>,
}

#[derive(Debug, Deserialize)]
pub struct UserFixture {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub department_id: Option<String>,
    pub supervisor_id: Option<String>,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub vacation: VacationBalance,
}

fn active_by_default() -> bool {
    true
}

impl From<UserFixture> for User {
    fn from(fixture: UserFixture) -> Self {
        let mut user = User::new(fixture.id, fixture.display_name).with_vacation(fixture.vacation);
        if let Some(email) = fixture.email {
            user.email = email;
        }
        if let Some(department_id) = fixture.department_id {
            user = user.in_department(department_id);
        }
        if let Some(supervisor_id) = fixture.supervisor_id {
            user = user.with_supervisor(supervisor_id);
        }
        for group in fixture.groups {
            user = user.in_group(group);
        }
        if !fixture.active {
            user = user.inactive();
        }
        user
    }
}

/// `assignee` covers for `user_id` from `from` through `to`, inclusive.
#[derive(Debug, Deserialize)]
pub struct DatedFixture {
    pub user_id: String,
    pub assignee: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub departments: usize,
    pub users: usize,
    pub templates: usize,
    pub substitutions: usize,
    pub delegations: usize,
}

pub fn read_seed_file(path: &Path) -> anyhow::Result<SeedFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read seed file `{}`", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("could not parse seed file `{}`", path.display()))
}

pub async fn apply(
    directory: &SqlDirectory,
    templates: &SqlTemplateRepository,
    seed: SeedFile,
) -> anyhow::Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for department in &seed.departments {
        directory
            .save_department(department)
            .await
            .with_context(|| format!("saving department `{}`", department.id.0))?;
        summary.departments += 1;
    }
    for fixture in seed.users {
        let user = User::from(fixture);
        let id = user.id.clone();
        directory.save(user).await.with_context(|| format!("saving user `{id}`"))?;
        summary.users += 1;
    }
    for template in &seed.templates {
        templates
            .upsert(template)
            .await
            .with_context(|| format!("saving template `{}`", template.id.0))?;
        summary.templates += 1;
    }
    for entry in &seed.substitutions {
        directory
            .add_substitution(
                &UserId(entry.user_id.clone()),
                &UserId(entry.assignee.clone()),
                entry.from,
                entry.to,
            )
            .await
            .with_context(|| format!("saving substitution for `{}`", entry.user_id))?;
        summary.substitutions += 1;
    }
    for entry in &seed.delegations {
        directory
            .add_delegation(
                &UserId(entry.user_id.clone()),
                &UserId(entry.assignee.clone()),
                entry.from,
                entry.to,
            )
            .await
            .with_context(|| format!("saving delegation for `{}`", entry.user_id))?;
        summary.delegations += 1;
    }

    tracing::info!(
        event_name = "cli.seed.applied",
        users = summary.users,
        templates = summary.templates,
        "seed data loaded"
    );
    Ok(summary)
}

pub fn run(options: LoadOptions, file: PathBuf) -> CommandResult {
    let seed = match read_seed_file(&file) {
        Ok(seed) => seed,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "bad_request",
                format!("{error:#}"),
                EXIT_WORKFLOW,
            );
        }
    };

    with_application("seed", options, |app| async move {
        let directory = SqlDirectory::new(app.db_pool.clone());
        let templates = SqlTemplateRepository::new(app.db_pool.clone());
        match apply(&directory, &templates, seed).await {
            Ok(summary) => CommandResult::success_with_data(
                "seed",
                format!("loaded {} users and {} templates", summary.users, summary.templates),
                &summary,
            ),
            Err(error) => {
                let message = format!("{error:#}");
                CommandResult::failure("seed", "seed_execution", message, EXIT_WORKFLOW)
            }
        }
    })
}
