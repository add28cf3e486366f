//! Pure step and request transitions shared by single-item and bulk paths.

use chrono::{DateTime, Utc};

use crate::approvals::quiz::QuizGrade;
use crate::domain::request::{ApprovalStep, Request, RequestStatus, StepStatus};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advancement {
    /// The step at this index is now in review.
    Started { step_index: usize },
    /// No pending step was left; the request is approved.
    Completed,
    /// Another step is still active, so nothing was started.
    Waiting,
}

pub fn can_transition(from: StepStatus, to: StepStatus) -> bool {
    use StepStatus::{Approved, InReview, Pending, Rejected, RequiresSurvey, SurveyFailed};

    matches!(
        (from, to),
        (Pending, InReview)
            | (InReview, Approved)
            | (InReview, Rejected)
            | (InReview, RequiresSurvey)
            | (InReview, SurveyFailed)
            | (RequiresSurvey, InReview)
            | (RequiresSurvey, SurveyFailed)
    )
}

pub fn transition_step(step: &mut ApprovalStep, to: StepStatus) -> Result<(), DomainError> {
    if !can_transition(step.status, to) {
        return Err(DomainError::InvalidStepTransition { from: step.status, to });
    }
    step.status = to;
    Ok(())
}

pub fn open_step(step: &mut ApprovalStep, now: DateTime<Utc>) -> Result<(), DomainError> {
    transition_step(step, StepStatus::InReview)?;
    step.started_at = Some(now);
    Ok(())
}

/// Marks the step approved. `force` skips the transition table (administrative override).
pub fn approve_step(
    request: &mut Request,
    step_index: usize,
    comment: Option<String>,
    now: DateTime<Utc>,
    force: bool,
) -> Result<(), DomainError> {
    let step = step_at(request, step_index)?;
    if force {
        step.status = StepStatus::Approved;
    } else {
        transition_step(step, StepStatus::Approved)?;
    }
    step.finished_at = Some(now);
    step.comment = comment;
    Ok(())
}

/// Starts the next pending step or completes the request.
pub fn advance(request: &mut Request, now: DateTime<Utc>) -> Result<Advancement, DomainError> {
    let still_active = request.steps.iter().any(|step| {
        matches!(
            step.status,
            StepStatus::InReview | StepStatus::RequiresSurvey | StepStatus::SurveyFailed
        )
    });
    if still_active {
        return Ok(Advancement::Waiting);
    }

    match request.next_pending_index() {
        Some(step_index) => {
            open_step(step_at(request, step_index)?, now)?;
            request.status = RequestStatus::InReview;
            Ok(Advancement::Started { step_index })
        }
        None => {
            request.status = RequestStatus::Approved;
            request.completed_at = Some(now);
            Ok(Advancement::Completed)
        }
    }
}

pub fn block_on_quiz(request: &mut Request, step_index: usize) -> Result<(), DomainError> {
    transition_step(step_at(request, step_index)?, StepStatus::RequiresSurvey)?;
    request.status = RequestStatus::AwaitingSurvey;
    Ok(())
}

pub fn reject_step(
    request: &mut Request,
    step_index: usize,
    reason: String,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    let step = step_at(request, step_index)?;
    transition_step(step, StepStatus::Rejected)?;
    step.finished_at = Some(now);
    step.comment = Some(reason);
    request.status = RequestStatus::Rejected;
    request.completed_at = Some(now);
    Ok(())
}

/// Stores a graded quiz. A pass reopens a blocked step; a fail blocks it for good.
pub fn record_quiz(
    request: &mut Request,
    step_index: usize,
    grade: &QuizGrade,
) -> Result<(), DomainError> {
    let step = step_at(request, step_index)?;
    step.quiz_score = Some(grade.score);
    step.quiz_passed = Some(grade.passed);
    step.quiz_answers = grade.answers.clone();

    if grade.passed {
        if step.status == StepStatus::RequiresSurvey {
            transition_step(step, StepStatus::InReview)?;
            request.status = RequestStatus::InReview;
        }
    } else {
        transition_step(step, StepStatus::SurveyFailed)?;
        request.status = RequestStatus::AwaitingSurvey;
    }
    Ok(())
}

pub fn cancel(request: &mut Request, now: DateTime<Utc>) {
    request.status = RequestStatus::Cancelled;
    request.completed_at = Some(now);
}

fn step_at(request: &mut Request, step_index: usize) -> Result<&mut ApprovalStep, DomainError> {
    let request_id = request.id.0.clone();
    request.steps.get_mut(step_index).ok_or_else(|| {
        DomainError::InvariantViolation(format!(
            "request {request_id} has no step at index {step_index}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{advance, approve_step, block_on_quiz, record_quiz, reject_step, Advancement};
    use crate::approvals::quiz::QuizGrade;
    use crate::domain::request::{
        ApprovalStep, Priority, Request, RequestId, RequestStatus, StepId, StepStatus,
    };
    use crate::domain::template::TemplateId;
    use crate::domain::user::UserId;
    use crate::errors::DomainError;

    fn step(order: u32, status: StepStatus) -> ApprovalStep {
        ApprovalStep {
            id: StepId(format!("s-{order}")),
            step_order: order,
            approver_id: UserId(format!("u-{order}")),
            status,
            started_at: None,
            finished_at: None,
            comment: None,
            requires_quiz: false,
            passing_score: None,
            quiz_score: None,
            quiz_passed: None,
            quiz_answers: Vec::new(),
        }
    }

    fn request(steps: Vec<ApprovalStep>) -> Request {
        Request {
            id: RequestId("r-1".to_string()),
            number: "REQ-2026-1".to_string(),
            template_id: TemplateId("tpl".to_string()),
            submitter_id: UserId("u-submitter".to_string()),
            submitted_at: Utc::now(),
            priority: Priority::Normal,
            form_data: Default::default(),
            leave_type: None,
            status: RequestStatus::InReview,
            completed_at: None,
            steps,
            version: 0,
        }
    }

    fn grade(score: u8, passed: bool) -> QuizGrade {
        QuizGrade {
            correct: 0,
            total_questions: 3,
            score,
            required_score: 70,
            passed,
            answers: Vec::new(),
        }
    }

    #[test]
    fn approving_first_of_three_starts_only_the_second() {
        let mut request = request(vec![
            step(1, StepStatus::InReview),
            step(2, StepStatus::Pending),
            step(3, StepStatus::Pending),
        ]);
        let now = Utc::now();

        approve_step(&mut request, 0, Some("ok".to_string()), now, false).expect("approve");
        let advancement = advance(&mut request, now).expect("advance");

        assert_eq!(advancement, Advancement::Started { step_index: 1 });
        assert_eq!(request.status, RequestStatus::InReview);
        assert_eq!(request.steps[1].status, StepStatus::InReview);
        assert_eq!(request.steps[1].started_at, Some(now));
        assert_eq!(request.steps[2].status, StepStatus::Pending);
        assert!(request.status_violation().is_none());
    }

    #[test]
    fn approving_last_step_completes_request() {
        let mut request = request(vec![step(1, StepStatus::Approved), step(2, StepStatus::InReview)]);
        let now = Utc::now();

        approve_step(&mut request, 1, None, now, false).expect("approve");
        assert_eq!(advance(&mut request, now).expect("advance"), Advancement::Completed);
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.completed_at, Some(now));
    }

    #[test]
    fn approving_a_pending_step_is_an_invalid_transition_unless_forced() {
        let mut request = request(vec![step(1, StepStatus::InReview), step(2, StepStatus::Pending)]);
        let now = Utc::now();

        let error = approve_step(&mut request, 1, None, now, false).expect_err("pending");
        assert_eq!(
            error,
            DomainError::InvalidStepTransition { from: StepStatus::Pending, to: StepStatus::Approved }
        );

        approve_step(&mut request, 1, None, now, true).expect("forced");
        assert_eq!(advance(&mut request, now).expect("advance"), Advancement::Waiting);
        assert_eq!(request.steps[0].status, StepStatus::InReview);
    }

    #[test]
    fn quiz_block_then_pass_reopens_step() {
        let mut request = request(vec![step(1, StepStatus::InReview)]);

        block_on_quiz(&mut request, 0).expect("block");
        assert_eq!(request.status, RequestStatus::AwaitingSurvey);
        assert_eq!(request.steps[0].status, StepStatus::RequiresSurvey);

        record_quiz(&mut request, 0, &grade(100, true)).expect("record");
        assert_eq!(request.status, RequestStatus::InReview);
        assert_eq!(request.steps[0].status, StepStatus::InReview);
        assert_eq!(request.steps[0].quiz_score, Some(100));
    }

    #[test]
    fn quiz_fail_blocks_step_permanently() {
        let mut request = request(vec![step(1, StepStatus::InReview)]);

        record_quiz(&mut request, 0, &grade(33, false)).expect("record");
        assert_eq!(request.status, RequestStatus::AwaitingSurvey);
        assert_eq!(request.steps[0].status, StepStatus::SurveyFailed);
        assert!(approve_step(&mut request, 0, None, Utc::now(), false).is_err());
    }

    #[test]
    fn rejection_is_terminal_regardless_of_remaining_steps() {
        let mut request = request(vec![
            step(1, StepStatus::InReview),
            step(2, StepStatus::Pending),
            step(3, StepStatus::Pending),
        ]);

        reject_step(&mut request, 0, "budget frozen this quarter".to_string(), Utc::now())
            .expect("reject");
        assert_eq!(request.status, RequestStatus::Rejected);
        assert!(request.completed_at.is_some());
        assert_eq!(request.steps[1].status, StepStatus::Pending);
        assert!(request.active_step().is_none());
    }
}
