use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use portal_cli::commands::workflow::{
    self, BulkApproveArgs, CancelArgs, DecisionArgs, QuizArgs, SubmitArgs,
};
use portal_cli::commands::{config, migrate, seed};
use portal_core::config::{ConfigOverrides, LoadOptions};
use serde_json::{json, Value};
use tempfile::TempDir;

const SEED: &str = r#"{
  "departments": [
    {"id": "d-eng", "name": "Engineering", "head_id": "u-head", "director_id": "u-director"}
  ],
  "users": [
    {"id": "u-alice", "display_name": "Alice", "department_id": "d-eng", "supervisor_id": "u-lead",
     "vacation": {"annual_vacation_days": 26, "vacation_days_used": 0, "on_demand_vacation_days_used": 0,
                  "circumstantial_leave_days_used": 0, "carried_over_vacation_days": 0}},
    {"id": "u-lead", "display_name": "Lead", "department_id": "d-eng"},
    {"id": "u-head", "display_name": "Head", "department_id": "d-eng"},
    {"id": "u-director", "display_name": "Director", "department_id": "d-eng"}
  ],
  "templates": [
    {"id": "tpl-purchase", "name": "Purchase", "is_vacation_request": false, "requires_approval": true,
     "default_passing_score": null,
     "steps": [
       {"step_order": 1, "approver": {"kind": "direct_supervisor"}, "requires_quiz": false, "passing_score": null},
       {"step_order": 2, "approver": {"kind": "specific_department", "department_id": "d-eng", "role": "director"},
        "requires_quiz": false, "passing_score": null}
     ]},
    {"id": "tpl-vacation", "name": "Vacation", "is_vacation_request": true, "requires_approval": true,
     "default_passing_score": null,
     "steps": [
       {"step_order": 1, "approver": {"kind": "direct_supervisor"}, "requires_quiz": false, "passing_score": null}
     ]},
    {"id": "tpl-training", "name": "Training", "is_vacation_request": false, "requires_approval": true,
     "default_passing_score": null,
     "steps": [
       {"step_order": 1, "approver": {"kind": "direct_supervisor"}, "requires_quiz": true, "passing_score": 70,
        "quiz_questions": [
          {"id": "q1", "text": "First?", "options": [
            {"label": "A", "value": "a", "is_correct": true}, {"label": "B", "value": "b", "is_correct": false}]},
          {"id": "q2", "text": "Second?", "options": [
            {"label": "A", "value": "a", "is_correct": false}, {"label": "B", "value": "b", "is_correct": true}]}
        ]}
     ]}
  ]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn seeded() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let workspace = Self { dir };
        let seed_path = workspace.dir.path().join("seed.json");
        std::fs::write(&seed_path, SEED).expect("write seed file");

        let result = seed::run(workspace.options(), seed_path);
        assert_eq!(result.exit_code, 0, "seed failed: {}", result.output);
        workspace
    }

    fn options(&self) -> LoadOptions {
        database_options(&self.dir.path().join("portal.db"))
    }

    fn submit(&self, template: &str, form: Value) -> Value {
        let result = workflow::submit(
            self.options(),
            SubmitArgs {
                template: template.to_string(),
                submitter: "u-alice".to_string(),
                form: form.to_string(),
                priority: "normal".to_string(),
            },
        );
        assert_eq!(result.exit_code, 0, "submit failed: {}", result.output);
        parse_payload(&result.output)["data"].clone()
    }

    fn decide(&self, request: &Value, step_index: usize, approver: &str) -> DecisionArgs {
        DecisionArgs {
            request: request["id"].as_str().expect("request id").to_string(),
            step: request["steps"][step_index]["id"].as_str().expect("step id").to_string(),
            approver: approver.to_string(),
            comment: None,
        }
    }
}

fn database_options(path: &Path) -> LoadOptions {
    LoadOptions {
        config_path: None,
        require_file: false,
        overrides: ConfigOverrides {
            database_url: Some(format!("sqlite://{}", path.display())),
            ..ConfigOverrides::default()
        },
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

#[test]
fn migrate_returns_success_for_fresh_database() {
    with_env(&[], || {
        let dir = TempDir::new().expect("temp dir");

        let result = migrate::run(database_options(&dir.path().join("fresh.db")));
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn submit_and_approve_through_every_step() {
    with_env(&[], || {
        let workspace = Workspace::seeded();
        let request = workspace.submit("tpl-purchase", json!({"item": "monitor"}));

        assert_eq!(request["status"], "in_review");
        assert_eq!(request["steps"][0]["approver_id"], "u-lead");
        assert_eq!(request["steps"][1]["approver_id"], "u-director");

        let first = workflow::approve(workspace.options(), workspace.decide(&request, 0, "u-lead"));
        assert_eq!(first.exit_code, 0, "{}", first.output);
        let after_first = parse_payload(&first.output)["data"].clone();
        assert_eq!(after_first["steps"][1]["status"], "in_review");

        let second =
            workflow::approve(workspace.options(), workspace.decide(&request, 1, "u-director"));
        assert_eq!(second.exit_code, 0, "{}", second.output);

        let shown = workflow::show(workspace.options(), request["id"].as_str().expect("id").to_string());
        let shown = parse_payload(&shown.output);
        assert_eq!(shown["data"]["status"], "approved");
        assert!(shown["data"]["completed_at"].is_string());
    });
}

#[test]
fn wrong_approver_is_forbidden() {
    with_env(&[], || {
        let workspace = Workspace::seeded();
        let request = workspace.submit("tpl-purchase", json!({"item": "chair"}));

        let result = workflow::approve(workspace.options(), workspace.decide(&request, 0, "u-alice"));

        assert_eq!(result.exit_code, 6);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "forbidden");
    });
}

#[test]
fn reject_requires_a_reason_and_closes_request() {
    with_env(&[], || {
        let workspace = Workspace::seeded();
        let request = workspace.submit("tpl-purchase", json!({"item": "desk"}));

        let missing = workflow::reject(workspace.options(), workspace.decide(&request, 0, "u-lead"));
        assert_eq!(parse_payload(&missing.output)["error_class"], "bad_request");

        let mut args = workspace.decide(&request, 0, "u-lead");
        args.comment = Some("over budget".to_string());
        let rejected = workflow::reject(workspace.options(), args);
        assert_eq!(rejected.exit_code, 0, "{}", rejected.output);
        let data = parse_payload(&rejected.output)["data"].clone();
        assert_eq!(data["status"], "rejected");
        assert_eq!(data["steps"][0]["comment"], "over budget");
    });
}

#[test]
fn quiz_gate_blocks_then_passing_quiz_unlocks_approval() {
    with_env(&[], || {
        let workspace = Workspace::seeded();
        let request = workspace.submit("tpl-training", json!({"course": "rust"}));

        let blocked = workflow::approve(workspace.options(), workspace.decide(&request, 0, "u-lead"));
        assert_eq!(blocked.exit_code, 6);
        assert_eq!(parse_payload(&blocked.output)["error_class"], "bad_request");

        let quiz = workflow::quiz(
            workspace.options(),
            QuizArgs {
                request: request["id"].as_str().expect("id").to_string(),
                step: request["steps"][0]["id"].as_str().expect("step").to_string(),
                actor: "u-alice".to_string(),
                answers: vec!["q1=a".to_string(), "q2=b".to_string()],
            },
        );
        assert_eq!(quiz.exit_code, 0, "{}", quiz.output);
        let outcome = parse_payload(&quiz.output)["data"].clone();
        assert_eq!(outcome["grade"]["score"], 100);
        assert_eq!(outcome["request"]["status"], "in_review");

        let approved = workflow::approve(workspace.options(), workspace.decide(&request, 0, "u-lead"));
        assert_eq!(approved.exit_code, 0, "{}", approved.output);
        assert_eq!(parse_payload(&approved.output)["data"]["status"], "approved");
    });
}

#[test]
fn bulk_approve_reports_partial_success() {
    with_env(&[], || {
        let workspace = Workspace::seeded();
        let first = workspace.submit("tpl-purchase", json!({"item": "a"}));
        let second = workspace.submit("tpl-purchase", json!({"item": "b"}));

        let result = workflow::bulk_approve(
            workspace.options(),
            BulkApproveArgs {
                steps: vec![
                    first["steps"][0]["id"].as_str().expect("step").to_string(),
                    second["steps"][0]["id"].as_str().expect("step").to_string(),
                    second["steps"][1]["id"].as_str().expect("step").to_string(),
                ],
                approver: "u-lead".to_string(),
                comment: Some("batch".to_string()),
                skip_validation: false,
                correlation_id: Some("corr-1".to_string()),
            },
        );

        assert_eq!(result.exit_code, 0, "{}", result.output);
        let data = parse_payload(&result.output)["data"].clone();
        assert_eq!(data["success_count"], 2);
        assert_eq!(data["fail_count"], 1);
        assert_eq!(data["failures"][0]["step_id"], second["steps"][1]["id"]);
    });
}

#[test]
fn approved_vacation_can_be_cancelled_by_submitter() {
    with_env(&[], || {
        let workspace = Workspace::seeded();
        let request = workspace.submit(
            "tpl-vacation",
            json!({"leave_type": "annual", "start_date": "2026-03-16", "end_date": "2026-03-20"}),
        );
        let approved = workflow::approve(workspace.options(), workspace.decide(&request, 0, "u-lead"));
        assert_eq!(parse_payload(&approved.output)["data"]["status"], "approved");

        let cancelled = workflow::cancel(
            workspace.options(),
            CancelArgs {
                request: request["id"].as_str().expect("id").to_string(),
                actor: "u-alice".to_string(),
            },
        );

        assert_eq!(cancelled.exit_code, 0, "{}", cancelled.output);
        assert_eq!(parse_payload(&cancelled.output)["data"]["status"], "cancelled");
    });
}

#[test]
fn on_demand_submit_over_configured_cap_is_refused() {
    with_env(&[("PORTAL_WORKFLOW_ON_DEMAND_ANNUAL_CAP", "2")], || {
        let workspace = Workspace::seeded();
        // Monday to Wednesday: three business days.
        let form =
            json!({"leave_type": "on_demand", "start_date": "2026-03-16", "end_date": "2026-03-18"});
        let args = |form: &Value| SubmitArgs {
            template: "tpl-vacation".to_string(),
            submitter: "u-alice".to_string(),
            form: form.to_string(),
            priority: "normal".to_string(),
        };

        let refused = workflow::submit(workspace.options(), args(&form));
        assert_eq!(refused.exit_code, 6, "{}", refused.output);
        let payload = parse_payload(&refused.output);
        assert_eq!(payload["error_class"], "bad_request");
        assert!(payload["message"].as_str().expect("message").contains("annual cap 2"));

        let within =
            json!({"leave_type": "on_demand", "start_date": "2026-03-16", "end_date": "2026-03-17"});
        let accepted = workflow::submit(workspace.options(), args(&within));
        assert_eq!(accepted.exit_code, 0, "{}", accepted.output);
        assert_eq!(parse_payload(&accepted.output)["data"]["status"], "in_review");
    });
}

#[test]
fn awaiting_lists_requests_on_the_approvers_desk() {
    with_env(&[], || {
        let workspace = Workspace::seeded();
        let request = workspace.submit("tpl-purchase", json!({"item": "laptop"}));

        let lead = workflow::awaiting(workspace.options(), "u-lead".to_string());
        assert_eq!(lead.exit_code, 0, "{}", lead.output);
        let listed = parse_payload(&lead.output)["data"].clone();
        assert_eq!(listed.as_array().map(Vec::len), Some(1));
        assert_eq!(listed[0]["id"], request["id"]);

        let director = workflow::awaiting(workspace.options(), "u-director".to_string());
        let listed = parse_payload(&director.output)["data"].clone();
        assert_eq!(listed.as_array().map(Vec::len), Some(0));

        let approved = workflow::approve(workspace.options(), workspace.decide(&request, 0, "u-lead"));
        assert_eq!(approved.exit_code, 0, "{}", approved.output);
        let director = workflow::awaiting(workspace.options(), "u-director".to_string());
        let listed = parse_payload(&director.output)["data"].clone();
        assert_eq!(listed[0]["id"], request["id"]);
    });
}

#[test]
fn unknown_request_is_not_found() {
    with_env(&[], || {
        let workspace = Workspace::seeded();

        let result = workflow::show(workspace.options(), "r-missing".to_string());

        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "not_found");
    });
}

#[test]
fn config_reports_override_and_invalid_env() {
    with_env(&[("PORTAL_WORKFLOW_DEFAULT_PASSING_SCORE", "150")], || {
        let result = config::run(LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        assert_eq!(payload["error_class"], "config_validation");
    });

    with_env(&[("PORTAL_WORKFLOW_BULK_MAX_ITEMS", "25")], || {
        let result = config::run(LoadOptions::default());
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let entries = parse_payload(&result.output)["data"].clone();
        let bulk = entries
            .as_array()
            .expect("entries")
            .iter()
            .find(|entry| entry["key"] == "workflow.bulk_max_items")
            .cloned()
            .expect("bulk entry");
        assert_eq!(bulk["value"], "25");
        assert_eq!(bulk["source"], "env (PORTAL_WORKFLOW_BULK_MAX_ITEMS)");
    });
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PORTAL_DATABASE_URL",
        "PORTAL_DATABASE_MAX_CONNECTIONS",
        "PORTAL_DATABASE_TIMEOUT_SECS",
        "PORTAL_WORKFLOW_DEFAULT_PASSING_SCORE",
        "PORTAL_WORKFLOW_REQUEST_NUMBER_PREFIX",
        "PORTAL_WORKFLOW_ON_DEMAND_ANNUAL_CAP",
        "PORTAL_WORKFLOW_BULK_MAX_ITEMS",
        "PORTAL_LOGGING_LEVEL",
        "PORTAL_LOGGING_FORMAT",
        "PORTAL_LOG_LEVEL",
        "PORTAL_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
