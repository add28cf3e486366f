use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use portal_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path(explicit_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: [(&'static str, String, &[&str]); 9] = [
        ("database.url", redact_url(&config.database.url), &["PORTAL_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["PORTAL_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["PORTAL_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "workflow.default_passing_score",
            config.workflow.default_passing_score.to_string(),
            &["PORTAL_WORKFLOW_DEFAULT_PASSING_SCORE"],
        ),
        (
            "workflow.request_number_prefix",
            config.workflow.request_number_prefix.clone(),
            &["PORTAL_WORKFLOW_REQUEST_NUMBER_PREFIX"],
        ),
        (
            "workflow.on_demand_annual_cap",
            config.workflow.on_demand_annual_cap.to_string(),
            &["PORTAL_WORKFLOW_ON_DEMAND_ANNUAL_CAP"],
        ),
        (
            "workflow.bulk_max_items",
            config.workflow.bulk_max_items.to_string(),
            &["PORTAL_WORKFLOW_BULK_MAX_ITEMS"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["PORTAL_LOGGING_LEVEL", "PORTAL_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["PORTAL_LOGGING_FORMAT", "PORTAL_LOG_FORMAT"],
        ),
    ];

    let entries: Vec<ConfigEntry> = fields
        .into_iter()
        .map(|(key, value, env_keys)| ConfigEntry {
            key,
            value,
            source: field_source(
                key,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect();

    CommandResult::success_with_data(
        "config",
        "effective config (source precedence: env > file > default)",
        &entries,
    )
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    [PathBuf::from("portal.toml"), PathBuf::from("config/portal.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Hides credentials embedded in a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://<redacted>@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
