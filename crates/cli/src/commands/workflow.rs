//! Request lifecycle commands. Each prints the resulting request as `data`.

use clap::Args;
use portal_core::config::LoadOptions;
use portal_core::{
    BulkApproval, FormData, Priority, RequestId, StepId, SubmitRequest, SubmittedAnswer,
    TemplateId, UserId,
};
use portal_db::SqlRequestRepository;

use crate::commands::{with_application, CommandResult, EXIT_WORKFLOW};

#[derive(Debug, Clone, Args)]
pub struct SubmitArgs {
    #[arg(long, help = "Template to instantiate")]
    pub template: String,
    #[arg(long, help = "Submitting user id")]
    pub submitter: String,
    #[arg(long, default_value = "{}", help = "Form fields as a JSON object")]
    pub form: String,
    #[arg(long, default_value = "normal", help = "low | normal | high | urgent")]
    pub priority: String,
}

#[derive(Debug, Clone, Args)]
pub struct DecisionArgs {
    #[arg(long)]
    pub request: String,
    #[arg(long)]
    pub step: String,
    #[arg(long, help = "Acting approver id")]
    pub approver: String,
    #[arg(long, help = "Approval comment or rejection reason")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct QuizArgs {
    #[arg(long)]
    pub request: String,
    #[arg(long)]
    pub step: String,
    #[arg(long, help = "Submitting user id")]
    pub actor: String,
    #[arg(long = "answer", help = "question_id=value, repeatable")]
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct BulkApproveArgs {
    #[arg(long = "step", required = true, help = "Step id, repeatable")]
    pub steps: Vec<String>,
    #[arg(long)]
    pub approver: String,
    #[arg(long)]
    pub comment: Option<String>,
    #[arg(long, help = "Administrative override of status, assignment and quiz checks")]
    pub skip_validation: bool,
    #[arg(long)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct CancelArgs {
    #[arg(long)]
    pub request: String,
    #[arg(long, help = "Cancelling user id; must be the submitter")]
    pub actor: String,
}

fn bad_input(command: &str, message: impl Into<String>) -> CommandResult {
    CommandResult::failure(command, "bad_request", message, EXIT_WORKFLOW)
}

pub fn submit(options: LoadOptions, args: SubmitArgs) -> CommandResult {
    let form_data: FormData = match serde_json::from_str(&args.form) {
        Ok(form) => form,
        Err(error) => return bad_input("submit", format!("--form must be a JSON object: {error}")),
    };
    let priority: Priority = match args.priority.parse() {
        Ok(priority) => priority,
        Err(error) => return bad_input("submit", error),
    };
    let input = SubmitRequest {
        template_id: TemplateId(args.template),
        submitter_id: UserId(args.submitter),
        form_data,
        priority,
    };

    with_application("submit", options, |app| async move {
        let cap = app.config.workflow.on_demand_annual_cap;
        if let Err(error) = app.engine.check_leave_capacity(&input, cap).await {
            return CommandResult::workflow_failure("submit", error);
        }
        match app.engine.submit(input).await {
            Ok(request) => CommandResult::success_with_data(
                "submit",
                format!("submitted request {}", request.number),
                &request,
            ),
            Err(error) => CommandResult::workflow_failure("submit", error),
        }
    })
}

pub fn approve(options: LoadOptions, args: DecisionArgs) -> CommandResult {
    with_application("approve", options, |app| async move {
        let result = app
            .engine
            .approve_step(
                &RequestId(args.request),
                &StepId(args.step),
                &UserId(args.approver),
                args.comment,
            )
            .await;
        match result {
            Ok(request) => CommandResult::success_with_data(
                "approve",
                format!("request {} is {}", request.number, request.status.as_str()),
                &request,
            ),
            Err(error) => CommandResult::workflow_failure("approve", error),
        }
    })
}

pub fn reject(options: LoadOptions, args: DecisionArgs) -> CommandResult {
    let Some(reason) = args.comment.filter(|reason| !reason.trim().is_empty()) else {
        return bad_input("reject", "--comment is required as the rejection reason");
    };

    with_application("reject", options, |app| async move {
        let result = app
            .engine
            .reject_step(
                &RequestId(args.request),
                &StepId(args.step),
                &UserId(args.approver),
                reason,
            )
            .await;
        match result {
            Ok(request) => CommandResult::success_with_data(
                "reject",
                format!("request {} rejected", request.number),
                &request,
            ),
            Err(error) => CommandResult::workflow_failure("reject", error),
        }
    })
}

fn parse_answers(raw: &[String]) -> Result<Vec<SubmittedAnswer>, String> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((question, value)) if !question.trim().is_empty() => {
                Ok(SubmittedAnswer::new(question.trim(), value.trim()))
            }
            _ => Err(format!("answer `{pair}` must look like question_id=value")),
        })
        .collect()
}

pub fn quiz(options: LoadOptions, args: QuizArgs) -> CommandResult {
    let answers = match parse_answers(&args.answers) {
        Ok(answers) => answers,
        Err(message) => return bad_input("quiz", message),
    };

    with_application("quiz", options, |app| async move {
        let result = app
            .engine
            .submit_quiz(
                &RequestId(args.request),
                &StepId(args.step),
                &UserId(args.actor),
                &answers,
            )
            .await;
        match result {
            Ok(outcome) => CommandResult::success_with_data(
                "quiz",
                format!(
                    "scored {} (required {}): {}",
                    outcome.grade.score,
                    outcome.grade.required_score,
                    if outcome.grade.passed { "passed" } else { "failed" }
                ),
                &outcome,
            ),
            Err(error) => CommandResult::workflow_failure("quiz", error),
        }
    })
}

pub fn bulk_approve(options: LoadOptions, args: BulkApproveArgs) -> CommandResult {
    let batch = BulkApproval {
        step_ids: args.steps.into_iter().map(StepId).collect(),
        approver_id: UserId(args.approver),
        comment: args.comment,
        skip_validation: args.skip_validation,
        correlation_id: args.correlation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    };

    with_application("bulk-approve", options, |app| async move {
        match app.engine.bulk_approve(batch).await {
            Ok(outcome) => CommandResult::success_with_data(
                "bulk-approve",
                format!(
                    "approved {} of {} steps",
                    outcome.success_count,
                    outcome.success_count + outcome.fail_count
                ),
                &outcome,
            ),
            Err(error) => CommandResult::workflow_failure("bulk-approve", error),
        }
    })
}

pub fn cancel(options: LoadOptions, args: CancelArgs) -> CommandResult {
    with_application("cancel", options, |app| async move {
        match app.engine.cancel_request(&RequestId(args.request), &UserId(args.actor)).await {
            Ok(request) => CommandResult::success_with_data(
                "cancel",
                format!("request {} cancelled", request.number),
                &request,
            ),
            Err(error) => CommandResult::workflow_failure("cancel", error),
        }
    })
}

pub fn show(options: LoadOptions, request_id: String) -> CommandResult {
    with_application("show", options, |app| async move {
        match app.engine.find_request(&RequestId(request_id)).await {
            Ok(request) => CommandResult::success_with_data(
                "show",
                format!("request {} is {}", request.number, request.status.as_str()),
                &request,
            ),
            Err(error) => CommandResult::workflow_failure("show", error),
        }
    })
}

/// Lists requests whose active step waits on `approver`.
pub fn awaiting(options: LoadOptions, approver: String) -> CommandResult {
    with_application("awaiting", options, |app| async move {
        let repository = SqlRequestRepository::new(app.db_pool.clone());
        let approver_id = UserId(approver);
        match repository.list_awaiting(&approver_id).await {
            Ok(requests) => CommandResult::success_with_data(
                "awaiting",
                format!("{} requests await {approver_id}", requests.len()),
                &requests,
            ),
            Err(error) => CommandResult::workflow_failure("awaiting", error.into()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::parse_answers;

    #[test]
    fn answers_parse_from_pairs() {
        let answers =
            parse_answers(&["q1=a".to_string(), " q2 = b ".to_string()]).expect("answers");

        assert_eq!(answers.len(), 2);
        assert_eq!(answers[1].question_id.0, "q2");
        assert_eq!(answers[1].selected_value, "b");
    }

    #[test]
    fn malformed_answer_is_rejected() {
        assert!(parse_answers(&["q1".to_string()]).is_err());
        assert!(parse_answers(&["=a".to_string()]).is_err());
    }
}
