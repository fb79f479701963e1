use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::workflow::{
    ApproverRole, StepCompletion, StepOutcome, WorkflowId, WorkflowInstance, WorkflowStatus,
    WorkflowStep,
};
use crate::errors::DomainError;
use crate::workflow::planner::{plan_workflow, PlanningInput, TimeoutClock, WorkflowPolicy};

const TIMEOUT_ACTOR: &str = "system:timeout";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAction {
    Approve,
    Reject { reason: String },
    RequestInfo,
    Delegate { to: String },
    Escalate,
    Cancel,
}

impl WorkflowAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject { .. } => "reject",
            Self::RequestInfo => "request_info",
            Self::Delegate { .. } => "delegate",
            Self::Escalate => "escalate",
            Self::Cancel => "cancel",
        }
    }

    fn needs_authority(&self) -> bool {
        !matches!(self, Self::RequestInfo | Self::Cancel)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Must name the current step. Ignored for `Cancel`.
    pub step_id: String,
    pub action: WorkflowAction,
    pub actor_id: String,
    pub actor_role: Option<ApproverRole>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl ActionRequest {
    pub fn new(
        step_id: impl Into<String>,
        action: WorkflowAction,
        actor_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            action,
            actor_id: actor_id.into(),
            actor_role: None,
            detail: None,
            at,
        }
    }

    pub fn with_role(mut self, role: ApproverRole) -> Self {
        self.actor_role = Some(role);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub workflow_id: WorkflowId,
    pub action: String,
    pub from_status: WorkflowStatus,
    pub to_status: WorkflowStatus,
    pub from_step: usize,
    pub to_step: usize,
    pub step_version: u32,
    pub summary: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutResolution {
    Escalated,
    MarkedError,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TimeoutCheck {
    NoOp,
    Updated { instance: WorkflowInstance, resolution: TimeoutResolution },
}

/// Applies one action to a copy of `instance`. On error the caller's instance is untouched.
pub fn apply_action(
    instance: &WorkflowInstance,
    request: &ActionRequest,
    policy: &WorkflowPolicy,
) -> Result<(WorkflowInstance, ActionOutcome), DomainError> {
    let action = request.action.name();
    if instance.is_terminal() {
        return Err(DomainError::InvalidTransition {
            workflow_id: instance.workflow_id.clone(),
            status: instance.status,
            action: action.to_owned(),
        });
    }

    let mut next = instance.clone();
    let from_status = instance.status;
    let from_step = instance.current_step;
    let at = request.at;

    let summary = if let WorkflowAction::Cancel = request.action {
        let comment = request.detail.clone();
        close_current(&mut next, StepOutcome::Cancelled, &request.actor_id, at, comment);
        next.status = WorkflowStatus::Cancelled;
        let reason = request.detail.clone().unwrap_or_else(|| "cancelled".to_owned());
        next.record("workflow.cancelled", &request.actor_id, at, reason);
        "workflow cancelled".to_owned()
    } else {
        let step = current_step(instance)?.clone();
        if step.step_id != request.step_id {
            return Err(DomainError::StepMismatch {
                expected: step.step_id,
                received: request.step_id.clone(),
            });
        }
        if request.action.needs_authority() {
            if let Some(actor_role) = request.actor_role {
                check_authority(actor_role, step.approver_role)?;
            }
        }

        apply_step_action(&mut next, &step, request, policy)?
    };

    if next.status == WorkflowStatus::Pending {
        next.status = WorkflowStatus::InProgress;
    }

    let outcome = ActionOutcome {
        workflow_id: next.workflow_id.clone(),
        action: action.to_owned(),
        from_status,
        to_status: next.status,
        from_step,
        to_step: next.current_step,
        step_version: next.steps.version(),
        summary,
    };

    tracing::info!(
        event_name = "workflow.action_applied",
        workflow_id = %next.workflow_id,
        invoice_id = %next.invoice_id,
        action,
        actor_id = %request.actor_id,
        from_step,
        to_step = next.current_step,
        status = ?next.status,
        "workflow action applied"
    );

    Ok((next, outcome))
}

fn apply_step_action(
    next: &mut WorkflowInstance,
    step: &WorkflowStep,
    request: &ActionRequest,
    policy: &WorkflowPolicy,
) -> Result<String, DomainError> {
    let at = request.at;
    let actor = request.actor_id.as_str();

    match &request.action {
        WorkflowAction::Approve => {
            close_current(next, StepOutcome::Approved, actor, at, request.detail.clone());
            next.record("step.approved", actor, at, step.name.clone());
            if next.current_step + 1 >= next.steps.len() {
                next.status = WorkflowStatus::Completed;
                next.completed_at = Some(at);
                next.approved_by = Some(actor.to_owned());
                Ok(format!("{} approved; workflow completed", step.name))
            } else {
                advance(next, at);
                Ok(format!("{} approved", step.name))
            }
        }
        WorkflowAction::Reject { reason } => {
            close_current(next, StepOutcome::Rejected, actor, at, Some(reason.clone()));
            next.status = WorkflowStatus::Rejected;
            next.rejection_reason = Some(reason.clone());
            next.record("step.rejected", actor, at, reason.clone());
            Ok(format!("{} rejected", step.name))
        }
        WorkflowAction::RequestInfo => {
            let detail =
                request.detail.clone().unwrap_or_else(|| "information requested".to_owned());
            next.record("step.info_requested", actor, at, detail);
            Ok(format!("information requested on {}", step.name))
        }
        WorkflowAction::Delegate { to } => {
            if !step.approver_role.is_human() {
                return Err(DomainError::UnsupportedStepAction {
                    role: step.approver_role,
                    action: "delegate".to_owned(),
                });
            }
            if let Some(current) = next.steps.get_mut(next.current_step) {
                current.assigned_to = Some(to.clone());
            }
            next.record("step.delegated", actor, at, format!("{} delegated to {to}", step.name));
            Ok(format!("{} delegated to {to}", step.name))
        }
        WorkflowAction::Escalate => {
            let role = escalate_current(next, step, policy, actor, at, StepOutcome::Escalated)?;
            Ok(format!("{} escalated to {}", step.name, role.display_name()))
        }
        WorkflowAction::Cancel => Err(DomainError::InvariantViolation(
            "cancel is handled before step dispatch".to_owned(),
        )),
    }
}

/// Inserts a review step for the next role after the current one and moves to it.
fn escalate_current(
    next: &mut WorkflowInstance,
    step: &WorkflowStep,
    policy: &WorkflowPolicy,
    actor: &str,
    at: DateTime<Utc>,
    outcome: StepOutcome,
) -> Result<ApproverRole, DomainError> {
    if !step.approver_role.is_human() {
        return Err(DomainError::UnsupportedStepAction {
            role: step.approver_role,
            action: "escalate".to_owned(),
        });
    }
    let role = step
        .approver_role
        .next_in_hierarchy()
        .ok_or(DomainError::EscalationExhausted { role: step.approver_role })?;

    next.steps.insert_after(
        next.current_step,
        WorkflowStep::new(
            format!("Escalated {} Review", role.display_name()),
            role,
            policy.escalation_timeout_hours,
        ),
    )?;
    close_current(next, outcome, actor, at, None);
    next.record(
        "step.escalated",
        actor,
        at,
        format!("{} -> {}", step.approver_role.as_str(), role.as_str()),
    );
    advance(next, at);
    Ok(role)
}

/// Checks the current step's deadline against `now`.
///
/// The step is overdue once `now` is more than `timeout_hours` past the policy's
/// clock start, which is the workflow's `created_at` unless the policy measures from
/// `step_started_at`. An overdue step is escalated when the policy allows and
/// escalation is possible; otherwise the workflow moves to `Error` with the reason
/// recorded.
pub fn check_timeout(
    instance: &WorkflowInstance,
    now: DateTime<Utc>,
    policy: &WorkflowPolicy,
) -> TimeoutCheck {
    let Some(step) = instance.current() else {
        return TimeoutCheck::NoOp;
    };
    let clock_start = match policy.timeout_clock {
        TimeoutClock::WorkflowCreated => instance.created_at,
        TimeoutClock::StepStarted => instance.step_started_at,
    };
    if now <= clock_start + Duration::hours(i64::from(step.timeout_hours)) {
        return TimeoutCheck::NoOp;
    }

    let step = step.clone();
    let overdue = format!(
        "{} exceeded its {}h timeout (measured from {})",
        step.name,
        step.timeout_hours,
        clock_start.to_rfc3339()
    );
    tracing::warn!(
        event_name = "workflow.timeout_detected",
        workflow_id = %instance.workflow_id,
        invoice_id = %instance.invoice_id,
        step_id = %step.step_id,
        timeout_hours = step.timeout_hours,
        auto_escalate = policy.auto_escalate_on_timeout,
        "workflow step timed out"
    );

    let mut next = instance.clone();
    next.record("step.timed_out", TIMEOUT_ACTOR, now, overdue.clone());

    if policy.auto_escalate_on_timeout {
        let escalated =
            escalate_current(&mut next, &step, policy, TIMEOUT_ACTOR, now, StepOutcome::TimedOut);
        match escalated {
            Ok(_) => {
                if next.status == WorkflowStatus::Pending {
                    next.status = WorkflowStatus::InProgress;
                }
                return TimeoutCheck::Updated {
                    instance: next,
                    resolution: TimeoutResolution::Escalated,
                };
            }
            Err(error) => {
                let reason = format!("{overdue}; escalation not possible: {error}");
                return TimeoutCheck::Updated {
                    instance: mark_error(next, now, reason),
                    resolution: TimeoutResolution::MarkedError,
                };
            }
        }
    }

    TimeoutCheck::Updated {
        instance: mark_error(next, now, overdue),
        resolution: TimeoutResolution::MarkedError,
    }
}

fn mark_error(mut next: WorkflowInstance, at: DateTime<Utc>, reason: String) -> WorkflowInstance {
    close_current(&mut next, StepOutcome::TimedOut, TIMEOUT_ACTOR, at, None);
    next.status = WorkflowStatus::Error;
    next.record("workflow.error", TIMEOUT_ACTOR, at, reason.clone());
    next.error_reason = Some(reason);
    next
}

fn current_step(instance: &WorkflowInstance) -> Result<&WorkflowStep, DomainError> {
    instance.current().ok_or_else(|| {
        DomainError::InvariantViolation(format!(
            "workflow `{}` has no step at index {}",
            instance.workflow_id, instance.current_step
        ))
    })
}

fn check_authority(
    actor_role: ApproverRole,
    required_role: ApproverRole,
) -> Result<(), DomainError> {
    let allowed = match (actor_role.rank(), required_role.rank()) {
        (Some(actor), Some(required)) => actor >= required,
        (None, None) => true,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(DomainError::InsufficientAuthority { actor_role, required_role })
    }
}

fn close_current(
    next: &mut WorkflowInstance,
    outcome: StepOutcome,
    actor: &str,
    at: DateTime<Utc>,
    comment: Option<String>,
) {
    let index = next.current_step;
    if let Some(step) = next.steps.get_mut(index) {
        if step.completion.is_none() {
            step.completion =
                Some(StepCompletion { outcome, actor: actor.to_owned(), at, comment });
        }
    }
}

fn advance(next: &mut WorkflowInstance, at: DateTime<Utc>) {
    next.current_step += 1;
    next.step_started_at = at;
}

/// Stateless facade over planning, actions and timeouts for one policy.
#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine {
    policy: WorkflowPolicy,
}

impl WorkflowEngine {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub fn plan(&self, input: PlanningInput<'_>) -> WorkflowInstance {
        plan_workflow(input, &self.policy)
    }

    pub fn apply(
        &self,
        instance: &WorkflowInstance,
        request: &ActionRequest,
    ) -> Result<(WorkflowInstance, ActionOutcome), DomainError> {
        apply_action(instance, request, &self.policy)
    }

    pub fn apply_with_audit<S>(
        &self,
        instance: &WorkflowInstance,
        request: &ActionRequest,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<(WorkflowInstance, ActionOutcome), DomainError>
    where
        S: AuditSink,
    {
        let result = self.apply(instance, request);
        match &result {
            Ok((_, outcome)) => sink.emit(
                AuditEvent::new(
                    audit,
                    "workflow.action_applied",
                    AuditCategory::Workflow,
                    AuditOutcome::Success,
                )
                .with_metadata("action", outcome.action.clone())
                .with_metadata("from_step", outcome.from_step.to_string())
                .with_metadata("to_step", outcome.to_step.to_string())
                .with_metadata("status", format!("{:?}", outcome.to_status)),
            ),
            Err(error) => sink.emit(
                AuditEvent::new(
                    audit,
                    "workflow.action_rejected",
                    AuditCategory::Workflow,
                    AuditOutcome::Rejected,
                )
                .with_metadata("action", request.action.name())
                .with_metadata("error", error.to_string()),
            ),
        }
        result
    }

    pub fn check_timeout(&self, instance: &WorkflowInstance, now: DateTime<Utc>) -> TimeoutCheck {
        check_timeout(instance, now, &self.policy)
    }
}
