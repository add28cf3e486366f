pub mod config;
pub mod migrate;
pub mod seed;
pub mod workflow;

use std::future::Future;

use portal_core::config::LoadOptions;
use portal_core::WorkflowError;
use serde::Serialize;
use serde_json::Value;

use crate::bootstrap::{bootstrap, Application};

pub const EXIT_OK: u8 = 0;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DB_CONNECTIVITY: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_WORKFLOW: u8 = 6;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::ok(command, message.into(), None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: &impl Serialize,
    ) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self::ok(command, message.into(), Some(data)),
            Err(error) => Self::failure(command, "serialization", error.to_string(), EXIT_RUNTIME),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::failure_with_data(command, error_class, message, exit_code, None)
    }

    /// Maps a workflow failure to its caller-facing class.
    pub fn workflow_failure(command: &str, error: WorkflowError) -> Self {
        let data = match &error {
            WorkflowError::BulkApprovalFailed { failures } => serde_json::to_value(failures).ok(),
            _ => None,
        };
        let message = error.to_string();
        let class = error.into_interface(command).class();
        Self::failure_with_data(command, class, message, EXIT_WORKFLOW, data)
    }

    fn ok(command: &str, message: String, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message,
            data,
        };
        Self { exit_code: EXIT_OK, output: serialize_payload(payload) }
    }

    fn failure_with_data(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Runs `action` against a bootstrapped application on a fresh current-thread runtime.
pub(crate) fn with_application<F, Fut>(
    command: &str,
    options: LoadOptions,
    action: F,
) -> CommandResult
where
    F: FnOnce(Application) -> Fut,
    Fut: Future<Output = CommandResult>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    runtime.block_on(async {
        let app = match bootstrap(options).await {
            Ok(app) => app,
            Err(error) => {
                return CommandResult::failure(
                    command,
                    error.class(),
                    error.to_string(),
                    error.exit_code(),
                );
            }
        };
        let pool = app.db_pool.clone();
        let result = action(app).await;
        pool.close().await;
        result
    })
}
