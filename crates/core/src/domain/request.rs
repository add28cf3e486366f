use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::template::{QuestionId, TemplateId};
use crate::domain::user::{LeaveType, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Submitted form fields, kept as an opaque key to value map.
pub type FormData = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    InReview,
    Approved,
    Rejected,
    AwaitingSurvey,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AwaitingSurvey => "awaiting_survey",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "in_review" => Ok(Self::InReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "awaiting_survey" => Ok(Self::AwaitingSurvey),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown request status `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    RequiresSurvey,
    SurveyFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RequiresSurvey => "requires_survey",
            Self::SurveyFailed => "survey_failed",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_review" => Ok(Self::InReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "requires_survey" => Ok(Self::RequiresSurvey),
            "survey_failed" => Ok(Self::SurveyFailed),
            other => Err(format!("unknown step status `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority `{other}` (expected low|normal|high|urgent)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub question_id: QuestionId,
    pub selected_value: String,
    pub is_correct: bool,
    pub answered_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub step_order: u32,
    pub approver_id: UserId,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub requires_quiz: bool,
    pub passing_score: Option<u8>,
    pub quiz_score: Option<u8>,
    pub quiz_passed: Option<bool>,
    pub quiz_answers: Vec<QuizAnswer>,
}

impl ApprovalStep {
    pub fn quiz_cleared(&self) -> bool {
        !self.requires_quiz || self.quiz_passed == Some(true)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub number: String,
    pub template_id: TemplateId,
    pub submitter_id: UserId,
    pub submitted_at: DateTime<Utc>,
    pub priority: Priority,
    pub form_data: FormData,
    pub leave_type: Option<LeaveType>,
    pub status: RequestStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<ApprovalStep>,
    /// Bumped by the store on every successful save of an existing request.
    pub version: u64,
}

impl Request {
    pub fn step(&self, step_id: &StepId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| &step.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &StepId) -> Option<&mut ApprovalStep> {
        self.steps.iter_mut().find(|step| &step.id == step_id)
    }

    pub fn active_step(&self) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.status == StepStatus::InReview)
    }

    /// Index of the lowest-ordered step still waiting to start.
    pub fn next_pending_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, step)| step.status == StepStatus::Pending)
            .min_by_key(|(_, step)| step.step_order)
            .map(|(index, _)| index)
    }

    /// Checks that the request status agrees with its step states.
    pub fn status_violation(&self) -> Option<String> {
        let in_review =
            self.steps.iter().filter(|step| step.status == StepStatus::InReview).count();
        match self.status {
            RequestStatus::InReview if in_review != 1 => Some(format!(
                "request {} is in review with {in_review} steps in review",
                self.id
            )),
            RequestStatus::AwaitingSurvey
            | RequestStatus::Approved
            | RequestStatus::Rejected
            | RequestStatus::Draft
                if in_review != 0 =>
            {
                Some(format!(
                    "request {} is {} but has {in_review} steps in review",
                    self.id,
                    self.status.as_str()
                ))
            }
            RequestStatus::Approved
                if self.steps.iter().any(|step| step.status != StepStatus::Approved) =>
            {
                Some(format!("request {} is approved with unapproved steps", self.id))
            }
            _ => None,
        }
    }
}
