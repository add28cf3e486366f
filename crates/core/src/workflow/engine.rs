use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approvals::quiz::{QuizGrade, QuizGrader, SubmittedAnswer, DEFAULT_PASSING_SCORE};
use crate::approvals::routing::{ApproverResolver, SubstituteRouter};
use crate::audit::AuditSink;
use crate::config::WorkflowConfig;
use crate::domain::request::{
    ApprovalStep, FormData, Priority, Request, RequestId, RequestStatus, StepId, StepStatus,
};
use crate::domain::template::{RequestTemplate, TemplateId};
use crate::domain::user::{LeaveType, UserId, VacationBalance};
use crate::errors::WorkflowError;
use crate::vacation::{FormFieldExtractor, LedgerAdjustment, VacationLedger};
use crate::workflow::ports::{
    DelegationLookup, NotificationKind, Notifier, RequestRepository, RoleGroupRepository,
    SubstituteLookup, TemplateRepository, UserRepository, VacationScheduler,
};
use crate::workflow::states::{self, Advancement};

/// Every collaborator the engine talks to.
#[derive(Clone)]
pub struct WorkflowPorts {
    pub requests: Arc<dyn RequestRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub users: Arc<dyn UserRepository>,
    pub groups: Arc<dyn RoleGroupRepository>,
    pub substitutes: Arc<dyn SubstituteLookup>,
    pub delegations: Arc<dyn DelegationLookup>,
    pub notifier: Arc<dyn Notifier>,
    pub scheduler: Arc<dyn VacationScheduler>,
    pub audit: Arc<dyn AuditSink>,
    pub forms: Arc<dyn FormFieldExtractor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub default_passing_score: u8,
    pub request_number_prefix: String,
    pub bulk_max_items: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            default_passing_score: DEFAULT_PASSING_SCORE,
            request_number_prefix: "REQ".to_string(),
            bulk_max_items: 100,
        }
    }
}

impl From<&WorkflowConfig> for WorkflowSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            default_passing_score: config.default_passing_score,
            request_number_prefix: config.request_number_prefix.clone(),
            bulk_max_items: usize::try_from(config.bulk_max_items).unwrap_or(usize::MAX),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub template_id: TemplateId,
    pub submitter_id: UserId,
    pub form_data: FormData,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuizOutcome {
    pub grade: QuizGrade,
    pub request: Request,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct WorkflowEngine {
    ports: WorkflowPorts,
    resolver: ApproverResolver,
    router: SubstituteRouter,
    grader: QuizGrader,
    settings: WorkflowSettings,
    clock: Clock,
}

impl WorkflowEngine {
    pub fn new(ports: WorkflowPorts, settings: WorkflowSettings) -> Self {
        Self {
            resolver: ApproverResolver::new(ports.users.clone(), ports.groups.clone()),
            router: SubstituteRouter::new(ports.substitutes.clone()),
            grader: QuizGrader::new(settings.default_passing_score),
            ports,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub(crate) fn requests(&self) -> &dyn RequestRepository {
        self.ports.requests.as_ref()
    }

    pub(crate) fn delegations(&self) -> &dyn DelegationLookup {
        self.ports.delegations.as_ref()
    }

    pub(crate) fn audit_sink(&self) -> &dyn AuditSink {
        self.ports.audit.as_ref()
    }

    pub async fn find_request(&self, request_id: &RequestId) -> Result<Request, WorkflowError> {
        self.ports
            .requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("request", request_id.0.clone()))
    }

    pub async fn submit(&self, input: SubmitRequest) -> Result<Request, WorkflowError> {
        let template = self.load_template(&input.template_id).await?;
        let submitter = self
            .ports
            .users
            .find_by_id(&input.submitter_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("user", input.submitter_id.0.clone()))?;

        let leave_type = if template.is_vacation_request {
            let leave_type = self.ports.forms.leave_type(&input.form_data).ok_or_else(|| {
                WorkflowError::Validation("vacation request is missing a leave type".into())
            })?;
            let period = self.ports.forms.leave_period(&input.form_data).ok_or_else(|| {
                WorkflowError::Validation("vacation request is missing a date range".into())
            })?;
            if period.start > period.end {
                return Err(WorkflowError::Validation(format!(
                    "vacation starts {} after it ends {}",
                    period.start, period.end
                )));
            }
            Some(leave_type)
        } else {
            None
        };

        let now = self.now();
        let count = self.ports.requests.count().await?;
        let prefix = &self.settings.request_number_prefix;
        let number = format!("{prefix}-{}-{}", now.year(), count + 1);

        let mut steps = Vec::new();
        if template.requires_approval {
            for step_template in template.ordered_steps() {
                let approver_id = self
                    .resolver
                    .resolve(&step_template.approver, &submitter, step_template.step_order)
                    .await??;
                steps.push(ApprovalStep {
                    id: StepId(Uuid::new_v4().to_string()),
                    step_order: step_template.step_order,
                    approver_id,
                    status: StepStatus::Pending,
                    started_at: None,
                    finished_at: None,
                    comment: None,
                    requires_quiz: step_template.requires_quiz,
                    passing_score: step_template.passing_score,
                    quiz_score: None,
                    quiz_passed: None,
                    quiz_answers: Vec::new(),
                });
            }
        }

        let mut request = Request {
            id: RequestId(Uuid::new_v4().to_string()),
            number,
            template_id: template.id.clone(),
            submitter_id: submitter.id.clone(),
            submitted_at: now,
            priority: input.priority,
            form_data: input.form_data,
            leave_type,
            status: RequestStatus::Draft,
            completed_at: None,
            steps,
            version: 0,
        };

        // An empty step list completes straight away.
        let advancement = states::advance(&mut request, now)?;
        let request = self.ports.requests.insert(request).await?;
        tracing::info!(
            event_name = "workflow.request.submitted",
            request_id = %request.id,
            request_number = %request.number,
            template_id = %request.template_id.0,
            submitter_id = %request.submitter_id,
            step_count = request.steps.len(),
            "request submitted"
        );

        match advancement {
            Advancement::Started { step_index } => {
                if let Some(step) = request.steps.get(step_index) {
                    self.notify_approver(&step.approver_id, &request).await;
                }
            }
            Advancement::Completed => self.on_approved(&request, Some(&template)).await,
            Advancement::Waiting => {}
        }
        Ok(request)
    }

    /// Checks a vacation submission against the submitter's remaining balance
    /// and the on-demand cap. `submit` itself never refuses on balance; callers
    /// that want the check run this first. Forms missing leave fields pass here
    /// and are refused by `submit`.
    pub async fn check_leave_capacity(
        &self,
        input: &SubmitRequest,
        on_demand_annual_cap: i32,
    ) -> Result<(), WorkflowError> {
        let template = self.load_template(&input.template_id).await?;
        if !template.is_vacation_request {
            return Ok(());
        }
        let (Some(leave_type), Some(period)) = (
            self.ports.forms.leave_type(&input.form_data),
            self.ports.forms.leave_period(&input.form_data),
        ) else {
            return Ok(());
        };
        let submitter = self
            .ports
            .users
            .find_by_id(&input.submitter_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("user", input.submitter_id.0.clone()))?;

        VacationLedger::check_capacity(
            &submitter.vacation,
            leave_type,
            period.business_days(),
            on_demand_annual_cap,
        )
        .map_err(|error| {
            tracing::info!(
                event_name = "workflow.vacation.capacity_exceeded",
                submitter_id = %input.submitter_id,
                leave_type = leave_type.as_str(),
                error = %error,
                "leave request exceeds available days"
            );
            WorkflowError::Validation(error.to_string())
        })
    }

    pub async fn approve_step(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        approver_id: &UserId,
        comment: Option<String>,
    ) -> Result<Request, WorkflowError> {
        let mut request = self.find_request(request_id).await?;
        let index = self.reviewable_step(&request, step_id, approver_id)?;
        let now = self.now();

        if !request.steps[index].quiz_cleared() {
            states::block_on_quiz(&mut request, index)?;
            self.ports.requests.save(request).await?;
            tracing::info!(
                event_name = "workflow.step.quiz_required",
                request_id = %request_id,
                step_id = %step_id,
                "approval blocked until the quiz is passed"
            );
            return Err(WorkflowError::QuizRequired { step_id: step_id.0.clone() });
        }

        states::approve_step(&mut request, index, comment, now, false)?;
        tracing::info!(
            event_name = "workflow.step.approved",
            request_id = %request_id,
            step_id = %step_id,
            approver_id = %approver_id,
            "step approved"
        );
        self.advance_and_save(request, now).await
    }

    pub async fn reject_step(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        approver_id: &UserId,
        reason: String,
    ) -> Result<Request, WorkflowError> {
        let mut request = self.find_request(request_id).await?;
        let index = self.reviewable_step(&request, step_id, approver_id)?;

        states::reject_step(&mut request, index, reason.clone(), self.now())?;
        let request = self.ports.requests.save(request).await?;
        tracing::info!(
            event_name = "workflow.step.rejected",
            request_id = %request_id,
            step_id = %step_id,
            approver_id = %approver_id,
            "step rejected"
        );

        let message = format!("Request {} was rejected: {reason}", request.number);
        self.notify_submitter(&request, &message, NotificationKind::Error).await;
        Ok(request)
    }

    pub async fn submit_quiz(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        actor_id: &UserId,
        answers: &[SubmittedAnswer],
    ) -> Result<QuizOutcome, WorkflowError> {
        let mut request = self.find_request(request_id).await?;
        let index = step_position(&request, step_id)?;
        if request.submitter_id != *actor_id {
            return Err(WorkflowError::forbidden(actor_id, "only the submitter may take the quiz"));
        }

        ensure_open(&request)?;
        let step = &request.steps[index];
        if !step.requires_quiz {
            return Err(WorkflowError::InvalidState(format!("step {step_id} has no quiz")));
        }
        if let Some(score) = step.quiz_score {
            return Err(WorkflowError::QuizAlreadySubmitted {
                score,
                passed: step.quiz_passed.unwrap_or(false),
            });
        }
        if !matches!(step.status, StepStatus::InReview | StepStatus::RequiresSurvey) {
            return Err(WorkflowError::InvalidState(format!(
                "step {step_id} is {} and cannot take a quiz",
                step.status.as_str()
            )));
        }

        let template = self.load_template(&request.template_id).await?;
        let step_template = template.step(step.step_order);
        let questions =
            step_template.map(|template| template.quiz_questions.as_slice()).unwrap_or(&[]);
        if questions.is_empty() {
            return Err(WorkflowError::InvalidState(format!(
                "step {step_id} requires a quiz but its template has no questions"
            )));
        }

        let required =
            self.grader.required_score(step, step_template, template.default_passing_score);
        let grade = self.grader.grade(questions, answers, required, self.now());
        states::record_quiz(&mut request, index, &grade)?;
        let request = self.ports.requests.save(request).await?;

        tracing::info!(
            event_name = "workflow.quiz.graded",
            request_id = %request_id,
            step_id = %step_id,
            score = grade.score,
            required_score = grade.required_score,
            passed = grade.passed,
            "quiz graded"
        );
        Ok(QuizOutcome { grade, request })
    }

    pub async fn cancel_request(
        &self,
        request_id: &RequestId,
        actor_id: &UserId,
    ) -> Result<Request, WorkflowError> {
        let mut request = self.find_request(request_id).await?;
        if request.submitter_id != *actor_id {
            return Err(WorkflowError::forbidden(actor_id, "only the submitter may cancel"));
        }
        if matches!(request.status, RequestStatus::Rejected | RequestStatus::Cancelled) {
            return Err(WorkflowError::InvalidState(format!(
                "request {} is already {}",
                request.number,
                request.status.as_str()
            )));
        }

        let was_approved = request.status == RequestStatus::Approved;
        states::cancel(&mut request, self.now());
        let request = self.ports.requests.save(request).await?;
        tracing::info!(
            event_name = "workflow.request.cancelled",
            request_id = %request_id,
            was_approved,
            "request cancelled"
        );

        if was_approved && self.is_vacation(&request).await {
            self.reverse_vacation(&request).await;
            if let Err(error) = self.ports.scheduler.remove_for_request(&request.id).await {
                tracing::warn!(
                    event_name = "workflow.vacation.schedule_remove_failed",
                    request_id = %request.id,
                    error = %error,
                    "failed to remove vacation schedule entry"
                );
            }
        }

        let message = format!("Request {} was cancelled", request.number);
        self.notify_submitter(&request, &message, NotificationKind::Info).await;
        Ok(request)
    }

    async fn advance_and_save(
        &self,
        mut request: Request,
        now: DateTime<Utc>,
    ) -> Result<Request, WorkflowError> {
        match states::advance(&mut request, now)? {
            Advancement::Started { step_index } => {
                let request_id = request.id.clone();
                let step = &mut request.steps[step_index];
                let routed = self.router.route(&step.approver_id, now.date_naive()).await;
                if let Some(note) = routed.annotation() {
                    tracing::info!(
                        event_name = "workflow.routing.substituted",
                        request_id = %request_id,
                        step_id = %step.id,
                        original_approver_id = %step.approver_id,
                        substitute_id = %routed.approver_id,
                        "step reassigned to substitute"
                    );
                    step.comment = Some(note);
                }
                step.approver_id = routed.approver_id;

                let approver_id = step.approver_id.clone();
                let request = self.ports.requests.save(request).await?;
                self.notify_approver(&approver_id, &request).await;
                Ok(request)
            }
            Advancement::Completed => {
                let request = self.ports.requests.save(request).await?;
                tracing::info!(
                    event_name = "workflow.request.approved",
                    request_id = %request.id,
                    "request approved"
                );
                let template = self.ports.templates.find_by_id(&request.template_id).await;
                match template {
                    Ok(template) => self.on_approved(&request, template.as_ref()).await,
                    Err(error) => {
                        tracing::warn!(
                            event_name = "workflow.vacation.reconcile_failed",
                            request_id = %request.id,
                            error = %error,
                            "could not load template for completion side effects"
                        );
                        self.on_approved(&request, None).await;
                    }
                }
                Ok(request)
            }
            Advancement::Waiting => Ok(self.ports.requests.save(request).await?),
        }
    }

    /// Completion side effects. Failures are logged, never returned.
    async fn on_approved(&self, request: &Request, template: Option<&RequestTemplate>) {
        if template.is_some_and(|template| template.is_vacation_request) {
            self.apply_vacation(request).await;
            if let Err(error) = self.ports.scheduler.create_from_approved_request(request).await {
                tracing::warn!(
                    event_name = "workflow.vacation.schedule_failed",
                    request_id = %request.id,
                    error = %error,
                    "failed to create vacation schedule entry"
                );
            }
        }

        let message = format!("Request {} was approved", request.number);
        self.notify_submitter(request, &message, NotificationKind::Success).await;
    }

    async fn apply_vacation(&self, request: &Request) {
        if let Err(reason) = self.adjust_balance(request, VacationLedger::apply_leave).await {
            tracing::warn!(
                event_name = "workflow.vacation.reconcile_failed",
                request_id = %request.id,
                reason = %reason,
                "vacation balance was not debited"
            );
        }
    }

    async fn reverse_vacation(&self, request: &Request) {
        if let Err(reason) = self.adjust_balance(request, VacationLedger::reverse_leave).await {
            tracing::warn!(
                event_name = "workflow.vacation.reverse_failed",
                request_id = %request.id,
                reason = %reason,
                "vacation balance was not credited back"
            );
        }
    }

    async fn adjust_balance(
        &self,
        request: &Request,
        adjust: fn(&mut VacationBalance, LeaveType, i32) -> Option<LedgerAdjustment>,
    ) -> Result<(), String> {
        let leave_type = request
            .leave_type
            .or_else(|| self.ports.forms.leave_type(&request.form_data))
            .ok_or("no leave type in form data")?;
        let period =
            self.ports.forms.leave_period(&request.form_data).ok_or("no date range in form data")?;
        let mut submitter = self
            .ports
            .users
            .find_by_id(&request.submitter_id)
            .await
            .map_err(|error| error.to_string())?
            .ok_or_else(|| format!("submitter {} not found", request.submitter_id))?;

        let days = period.business_days();
        let Some(adjustment) = adjust(&mut submitter.vacation, leave_type, days) else {
            return Ok(());
        };
        self.ports.users.save(submitter).await.map_err(|error| error.to_string())?;
        tracing::info!(
            event_name = "workflow.vacation.balance_adjusted",
            request_id = %request.id,
            leave_type = leave_type.as_str(),
            days = adjustment.days,
            vacation_days_used = adjustment.vacation_days_used,
            on_demand_vacation_days_used = adjustment.on_demand_vacation_days_used,
            "vacation balance adjusted"
        );
        Ok(())
    }

    async fn is_vacation(&self, request: &Request) -> bool {
        match self.ports.templates.find_by_id(&request.template_id).await {
            Ok(template) => template.is_some_and(|template| template.is_vacation_request),
            Err(error) => {
                tracing::warn!(
                    event_name = "workflow.vacation.reverse_failed",
                    request_id = %request.id,
                    error = %error,
                    "could not load template; leaving vacation balance untouched"
                );
                false
            }
        }
    }

    async fn notify_approver(&self, approver_id: &UserId, request: &Request) {
        if let Err(error) = self.ports.notifier.notify_approver(approver_id, request).await {
            tracing::warn!(
                event_name = "workflow.notify.approver_failed",
                request_id = %request.id,
                approver_id = %approver_id,
                error = %error,
                "approver notification failed"
            );
        }
    }

    async fn notify_submitter(&self, request: &Request, message: &str, kind: NotificationKind) {
        if let Err(error) = self.ports.notifier.notify_submitter(request, message, kind).await {
            tracing::warn!(
                event_name = "workflow.notify.submitter_failed",
                request_id = %request.id,
                error = %error,
                "submitter notification failed"
            );
        }
    }

    async fn load_template(&self, id: &TemplateId) -> Result<RequestTemplate, WorkflowError> {
        self.ports
            .templates
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("template", id.0.clone()))
    }

    /// Shared preconditions of approve and reject.
    fn reviewable_step(
        &self,
        request: &Request,
        step_id: &StepId,
        approver_id: &UserId,
    ) -> Result<usize, WorkflowError> {
        let index = step_position(request, step_id)?;
        ensure_open(request)?;
        let step = &request.steps[index];
        if step.approver_id != *approver_id {
            return Err(WorkflowError::forbidden(
                approver_id,
                format!("step {step_id} is assigned to {}", step.approver_id),
            ));
        }
        if step.status != StepStatus::InReview {
            return Err(WorkflowError::InvalidState(format!(
                "step {step_id} is {}, not in review",
                step.status.as_str()
            )));
        }
        Ok(index)
    }
}

pub(crate) fn ensure_open(request: &Request) -> Result<(), WorkflowError> {
    if request.status.is_terminal() {
        return Err(WorkflowError::InvalidState(format!(
            "request {} is already {}",
            request.number,
            request.status.as_str()
        )));
    }
    Ok(())
}

fn step_position(request: &Request, step_id: &StepId) -> Result<usize, WorkflowError> {
    request
        .steps
        .iter()
        .position(|step| &step.id == step_id)
        .ok_or_else(|| WorkflowError::not_found("approval step", step_id.0.clone()))
}
