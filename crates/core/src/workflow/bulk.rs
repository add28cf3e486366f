use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
use crate::domain::request::{Request, RequestId, StepId, StepStatus};
use crate::domain::user::UserId;
use crate::errors::WorkflowError;
use crate::workflow::engine::{ensure_open, WorkflowEngine};
use crate::workflow::states;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemFailure {
    pub step_id: StepId,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkApproval {
    pub step_ids: Vec<StepId>,
    pub approver_id: UserId,
    pub comment: Option<String>,
    /// Administrative override: skips status, assignment, and quiz checks.
    pub skip_validation: bool,
    pub correlation_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkApprovalOutcome {
    pub success_count: usize,
    pub fail_count: usize,
    pub failures: Vec<BulkItemFailure>,
    pub requests: Vec<Request>,
}

/// Requests loaded during one batch. Later items see earlier items' effects.
#[derive(Default)]
struct WorkingSet {
    requests: HashMap<RequestId, Request>,
    touched: Vec<RequestId>,
}

impl WorkingSet {
    fn holding(&self, step_id: &StepId) -> Option<&Request> {
        self.requests.values().find(|request| request.step(step_id).is_some())
    }

    fn store(&mut self, request: Request) {
        if !self.touched.contains(&request.id) {
            self.touched.push(request.id.clone());
        }
        self.requests.insert(request.id.clone(), request);
    }

    fn into_touched(mut self) -> Vec<Request> {
        self.touched.iter().filter_map(|id| self.requests.remove(id)).collect()
    }
}

impl WorkflowEngine {
    pub async fn bulk_approve(
        &self,
        batch: BulkApproval,
    ) -> Result<BulkApprovalOutcome, WorkflowError> {
        if batch.step_ids.is_empty() {
            return Err(WorkflowError::Validation(
                "bulk approval needs at least one step id".into(),
            ));
        }
        let max_items = self.settings().bulk_max_items;
        if batch.step_ids.len() > max_items {
            return Err(WorkflowError::Validation(format!(
                "bulk approval accepts at most {max_items} items, got {}",
                batch.step_ids.len()
            )));
        }

        let audit = AuditContext::new(batch.correlation_id.clone(), batch.approver_id.0.clone());
        let now = self.now();
        let mut working = WorkingSet::default();
        let mut success_count = 0;
        let mut failures = Vec::new();

        for step_id in &batch.step_ids {
            match self.bulk_item(&mut working, step_id, &batch, now).await {
                Ok(request_id) => {
                    success_count += 1;
                    self.audit_sink().emit(
                        AuditEvent::new(
                            Some(request_id),
                            &audit,
                            "bulk_approval.item_approved",
                            AuditCategory::BulkApproval,
                            AuditOutcome::Success,
                        )
                        .with_metadata("step_id", step_id.0.clone()),
                    );
                }
                Err(error) => {
                    let reason = error.to_string();
                    self.audit_sink().emit(
                        AuditEvent::new(
                            None,
                            &audit,
                            "bulk_approval.item_failed",
                            AuditCategory::BulkApproval,
                            AuditOutcome::Failed,
                        )
                        .with_metadata("step_id", step_id.0.clone())
                        .with_metadata("reason", reason.clone()),
                    );
                    failures.push(BulkItemFailure { step_id: step_id.clone(), reason });
                }
            }
        }

        if success_count == 0 {
            tracing::warn!(
                event_name = "workflow.bulk.all_failed",
                correlation_id = %batch.correlation_id,
                fail_count = failures.len(),
                "bulk approval failed for every item"
            );
            return Err(WorkflowError::BulkApprovalFailed { failures });
        }

        let requests = self.requests().save_batch(working.into_touched()).await?;
        tracing::info!(
            event_name = "workflow.bulk.committed",
            correlation_id = %batch.correlation_id,
            approver_id = %batch.approver_id,
            success_count,
            fail_count = failures.len(),
            "bulk approval committed"
        );

        Ok(BulkApprovalOutcome {
            success_count,
            fail_count: failures.len(),
            failures,
            requests,
        })
    }

    /// Approves one step against the working set. Nothing is stored on failure.
    async fn bulk_item(
        &self,
        working: &mut WorkingSet,
        step_id: &StepId,
        batch: &BulkApproval,
        now: DateTime<Utc>,
    ) -> Result<RequestId, WorkflowError> {
        let mut request = match working.holding(step_id) {
            Some(request) => request.clone(),
            None => self
                .requests()
                .find_by_step_id(step_id)
                .await?
                .ok_or_else(|| WorkflowError::not_found("approval step", step_id.0.clone()))?,
        };
        let index = request
            .steps
            .iter()
            .position(|step| &step.id == step_id)
            .ok_or_else(|| WorkflowError::not_found("approval step", step_id.0.clone()))?;

        if !batch.skip_validation {
            ensure_open(&request)?;
            let step = &request.steps[index];
            if step.status != StepStatus::InReview {
                return Err(WorkflowError::InvalidState(format!(
                    "step {} is {}, not in review",
                    step.id,
                    step.status.as_str()
                )));
            }
            if step.approver_id != batch.approver_id
                && !self
                    .delegations()
                    .can_act_for(&batch.approver_id, &step.approver_id, now.date_naive())
                    .await?
            {
                return Err(WorkflowError::forbidden(
                    &batch.approver_id,
                    format!("step {} is assigned to {}", step.id, step.approver_id),
                ));
            }
            if !step.quiz_cleared() {
                return Err(WorkflowError::QuizRequired { step_id: step.id.0.clone() });
            }
        }

        let comment = batch.comment.clone();
        states::approve_step(&mut request, index, comment, now, batch.skip_validation)?;
        states::advance(&mut request, now)?;

        let request_id = request.id.clone();
        working.store(request);
        Ok(request_id)
    }
}
