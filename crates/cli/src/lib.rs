pub mod bootstrap;
pub mod commands;
pub mod notifier;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use portal_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use crate::commands::workflow::{BulkApproveArgs, CancelArgs, DecisionArgs, QuizArgs, SubmitArgs};

#[derive(Debug, Parser)]
#[command(
    name = "portal",
    about = "Portal request approval CLI",
    long_about = "Submit requests, drive approval steps, grade quizzes and inspect configuration.",
    after_help = "Examples:\n  portal migrate\n  portal seed --file fixtures.json\n  portal submit --template tpl-vacation --submitter u-alice --form '{\"leave_type\":\"annual\",\"start_date\":\"2026-03-16\",\"end_date\":\"2026-03-20\"}'\n  portal approve --request <id> --step <step-id> --approver u-lead"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file path (defaults to portal.toml or config/portal.toml)")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Load users, departments, templates and stand-ins from a JSON file")]
    Seed {
        #[arg(long)]
        file: PathBuf,
    },
    #[command(about = "Submit a request from a template")]
    Submit(SubmitArgs),
    #[command(about = "Approve the active step of a request")]
    Approve(DecisionArgs),
    #[command(about = "Reject the active step of a request; --comment is the reason")]
    Reject(DecisionArgs),
    #[command(about = "Submit quiz answers for a quiz-gated step")]
    Quiz(QuizArgs),
    #[command(about = "Approve many steps at once; successes commit together")]
    BulkApprove(BulkApproveArgs),
    #[command(about = "Cancel a request as its submitter")]
    Cancel(CancelArgs),
    #[command(about = "Print a request with its steps")]
    Show {
        #[arg(long)]
        request: String,
    },
    #[command(about = "List requests waiting on an approver's decision or quiz")]
    Awaiting {
        #[arg(long)]
        approver: String,
    },
}

impl Cli {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    // stdout carries the JSON result payload.
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();
    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Config => commands::config::run(options),
        Command::Seed { file } => commands::seed::run(options, file),
        Command::Submit(args) => commands::workflow::submit(options, args),
        Command::Approve(args) => commands::workflow::approve(options, args),
        Command::Reject(args) => commands::workflow::reject(options, args),
        Command::Quiz(args) => commands::workflow::quiz(options, args),
        Command::BulkApprove(args) => commands::workflow::bulk_approve(options, args),
        Command::Cancel(args) => commands::workflow::cancel(options, args),
        Command::Show { request } => commands::workflow::show(options, request),
        Command::Awaiting { approver } => commands::workflow::awaiting(options, approver),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
