use serde::{Deserialize, Serialize};

use crate::domain::user::{DepartmentId, GroupId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentRole {
    Head,
    Director,
}

/// Who approves a step, before it is bound to a concrete user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApproverSpec {
    DirectSupervisor,
    SpecificUser { user_id: UserId },
    SpecificDepartment { department_id: DepartmentId, role: DepartmentRole },
    UserGroup { group_id: GroupId },
    Submitter,
}

impl std::fmt::Display for ApproverSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectSupervisor => f.write_str("direct supervisor"),
            Self::SpecificUser { user_id } => write!(f, "user `{}`", user_id.0),
            Self::SpecificDepartment { department_id, role } => {
                let role = match role {
                    DepartmentRole::Head => "head",
                    DepartmentRole::Director => "director",
                };
                write!(f, "{role} of department `{}`", department_id.0)
            }
            Self::UserGroup { group_id } => write!(f, "group `{}`", group_id.0),
            Self::Submitter => f.write_str("submitter"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizOption {
    pub label: String,
    pub value: String,
    pub is_correct: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: QuestionId,
    pub text: String,
    pub options: Vec<QuizOption>,
}

impl QuizQuestion {
    pub fn correct_option(&self) -> Option<&QuizOption> {
        self.options.iter().find(|option| option.is_correct)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepTemplate {
    pub step_order: u32,
    pub approver: ApproverSpec,
    pub requires_quiz: bool,
    pub passing_score: Option<u8>,
    #[serde(default)]
    pub quiz_questions: Vec<QuizQuestion>,
}

impl ApprovalStepTemplate {
    pub fn new(step_order: u32, approver: ApproverSpec) -> Self {
        Self {
            step_order,
            approver,
            requires_quiz: false,
            passing_score: None,
            quiz_questions: Vec::new(),
        }
    }

    pub fn with_quiz(mut self, questions: Vec<QuizQuestion>, passing_score: Option<u8>) -> Self {
        self.requires_quiz = true;
        self.quiz_questions = questions;
        self.passing_score = passing_score;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub id: TemplateId,
    pub name: String,
    pub is_vacation_request: bool,
    pub requires_approval: bool,
    pub steps: Vec<ApprovalStepTemplate>,
    pub default_passing_score: Option<u8>,
}

impl RequestTemplate {
    /// Step templates in strictly ascending order; gaps in numbering are kept.
    pub fn ordered_steps(&self) -> Vec<&ApprovalStepTemplate> {
        let mut steps: Vec<&ApprovalStepTemplate> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.step_order);
        steps
    }

    pub fn step(&self, step_order: u32) -> Option<&ApprovalStepTemplate> {
        self.steps.iter().find(|step| step.step_order == step_order)
    }
}
