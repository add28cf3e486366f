use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{ApprovalStep, QuizAnswer};
use crate::domain::template::{ApprovalStepTemplate, QuestionId, QuizQuestion};

pub const DEFAULT_PASSING_SCORE: u8 = 70;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: QuestionId,
    pub selected_value: String,
}

impl SubmittedAnswer {
    pub fn new(question_id: impl Into<String>, selected_value: impl Into<String>) -> Self {
        Self { question_id: QuestionId(question_id.into()), selected_value: selected_value.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizGrade {
    pub correct: usize,
    pub total_questions: usize,
    pub score: u8,
    pub required_score: u8,
    pub passed: bool,
    pub answers: Vec<QuizAnswer>,
}

#[derive(Clone, Copy, Debug)]
pub struct QuizGrader {
    fallback_passing_score: u8,
}

impl Default for QuizGrader {
    fn default() -> Self {
        Self::new(DEFAULT_PASSING_SCORE)
    }
}

impl QuizGrader {
    pub fn new(fallback_passing_score: u8) -> Self {
        Self { fallback_passing_score: fallback_passing_score.min(100) }
    }

    /// Step override, then step template, then template default, then the configured fallback.
    pub fn required_score(
        &self,
        step: &ApprovalStep,
        step_template: Option<&ApprovalStepTemplate>,
        template_default: Option<u8>,
    ) -> u8 {
        step.passing_score
            .or_else(|| step_template.and_then(|template| template.passing_score))
            .or(template_default)
            .unwrap_or(self.fallback_passing_score)
    }

    pub fn grade(
        &self,
        questions: &[QuizQuestion],
        submitted: &[SubmittedAnswer],
        required_score: u8,
        answered_at: DateTime<Utc>,
    ) -> QuizGrade {
        let mut seen = HashSet::new();
        let mut answers = Vec::with_capacity(submitted.len());

        for answer in submitted {
            if !seen.insert(answer.question_id.clone()) {
                continue;
            }
            let Some(question) = questions.iter().find(|question| question.id == answer.question_id)
            else {
                continue;
            };
            let is_correct = question
                .correct_option()
                .is_some_and(|option| option.value == answer.selected_value);
            answers.push(QuizAnswer {
                question_id: answer.question_id.clone(),
                selected_value: answer.selected_value.clone(),
                is_correct,
                answered_at,
            });
        }

        let correct = answers.iter().filter(|answer| answer.is_correct).count();
        let score = percentage(correct, questions.len());

        QuizGrade {
            correct,
            total_questions: questions.len(),
            score,
            required_score,
            passed: score >= required_score,
            answers,
        }
    }
}

/// `round(correct / total * 100)` with halves rounded up.
fn percentage(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total);
    let rounded = (200 * correct + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}
