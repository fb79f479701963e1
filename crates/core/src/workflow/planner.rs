use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::document::DocumentId;
use crate::domain::matching::MatchResult;
use crate::domain::workflow::{
    clamp_unit, ApproverRole, RiskLevel, StepList, WorkflowId, WorkflowInstance, WorkflowStatus,
    WorkflowStep,
};
use crate::thresholds::ApprovalThresholds;

pub const PREPARER_TIMEOUT_HOURS: u32 = 24;
pub const FINAL_PROCESSING_TIMEOUT_HOURS: u32 = 1;
pub const AUTO_APPROVAL_ACTOR: &str = "system:auto-approval";

const PLANNER_ACTOR: &str = "workflow-planner";

/// Reference point a step's `timeout_hours` is measured from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClock {
    /// Every step's deadline counts from when the workflow was opened.
    #[default]
    WorkflowCreated,
    /// Each step gets its full allowance from the moment it became current.
    StepStarted,
}

impl TimeoutClock {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowCreated => "workflow_created",
            Self::StepStarted => "step_started",
        }
    }
}

impl std::str::FromStr for TimeoutClock {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "workflow_created" => Ok(Self::WorkflowCreated),
            "step_started" => Ok(Self::StepStarted),
            other => Err(format!("unknown timeout clock `{other}`")),
        }
    }
}

/// Knobs for step planning and timeout handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPolicy {
    /// Risk score at or above which auto-approval is withheld.
    pub fraud_override_threshold: f64,
    pub default_timeout_hours: u32,
    pub cfo_timeout_hours: u32,
    pub escalation_timeout_hours: u32,
    /// Whether approval chains open with a preparer review step.
    pub preparer_review: bool,
    /// Escalate a timed-out step instead of failing the workflow.
    pub auto_escalate_on_timeout: bool,
    pub timeout_clock: TimeoutClock,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            fraud_override_threshold: 0.7,
            default_timeout_hours: 72,
            cfo_timeout_hours: 48,
            escalation_timeout_hours: 24,
            preparer_review: true,
            auto_escalate_on_timeout: false,
            timeout_clock: TimeoutClock::WorkflowCreated,
        }
    }
}

impl WorkflowPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.fraud_override_threshold) {
            return Err(format!(
                "fraud_override_threshold must be within [0, 1], got {}",
                self.fraud_override_threshold
            ));
        }
        for (name, hours) in [
            ("default_timeout_hours", self.default_timeout_hours),
            ("cfo_timeout_hours", self.cfo_timeout_hours),
            ("escalation_timeout_hours", self.escalation_timeout_hours),
        ] {
            if hours == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}

/// Everything the planner needs to open a workflow for one invoice.
#[derive(Clone, Debug)]
pub struct PlanningInput<'a> {
    pub invoice_id: DocumentId,
    pub company_id: String,
    pub invoice_amount: Decimal,
    pub thresholds: &'a ApprovalThresholds,
    pub match_result: &'a MatchResult,
    pub risk_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepPlan {
    pub steps: StepList,
    pub auto_approved: bool,
    pub risk_level: RiskLevel,
    /// Set when risk alone withheld auto-approval.
    pub override_reason: Option<String>,
}

/// Orders the approval steps for an invoice.
///
/// An auto-approved plan has no steps. Risk acts as an override only: a risky invoice
/// loses auto-approval and goes through the normal threshold chain, but risk never
/// adjusts the match confidence itself.
pub fn plan_steps(
    invoice_amount: Decimal,
    thresholds: &ApprovalThresholds,
    match_result: &MatchResult,
    risk_score: f64,
    policy: &WorkflowPolicy,
) -> StepPlan {
    let risk_score = clamp_unit(risk_score);
    let risk_level = RiskLevel::from_score(risk_score);
    let risk_override = risk_score >= policy.fraud_override_threshold || risk_level.is_elevated();

    if match_result.auto_approval_eligible && !risk_override {
        return StepPlan {
            steps: StepList::new(),
            auto_approved: true,
            risk_level,
            override_reason: None,
        };
    }

    let override_reason = (match_result.auto_approval_eligible && risk_override).then(|| {
        format!(
            "auto-approval withheld: risk score {risk_score:.2} ({risk_level:?}), \
             fraud threshold {:.2}",
            policy.fraud_override_threshold
        )
    });

    let mut steps = StepList::new();
    if policy.preparer_review {
        steps.push(WorkflowStep::new(
            "Preparer Review",
            ApproverRole::Preparer,
            PREPARER_TIMEOUT_HOURS,
        ));
    }
    steps.push(
        WorkflowStep::new("Manager Approval", ApproverRole::Manager, policy.default_timeout_hours)
            .with_threshold(thresholds.manager),
    );
    if invoice_amount >= thresholds.director {
        steps.push(
            WorkflowStep::new(
                "Director Approval",
                ApproverRole::Director,
                policy.default_timeout_hours,
            )
            .with_threshold(thresholds.director),
        );
    }
    if invoice_amount >= thresholds.executive {
        steps.push(
            WorkflowStep::new("CFO Approval", ApproverRole::Cfo, policy.cfo_timeout_hours)
                .with_threshold(thresholds.executive),
        );
    }
    steps.push(WorkflowStep::new(
        "Final Processing",
        ApproverRole::System,
        FINAL_PROCESSING_TIMEOUT_HOURS,
    ));

    StepPlan { steps, auto_approved: false, risk_level, override_reason }
}

/// Builds a new workflow instance. Auto-approved instances are created `Completed`.
pub fn plan_workflow(input: PlanningInput<'_>, policy: &WorkflowPolicy) -> WorkflowInstance {
    let plan = plan_steps(
        input.invoice_amount,
        input.thresholds,
        input.match_result,
        input.risk_score,
        policy,
    );
    let created_at = input.created_at;
    let auto_approved = plan.auto_approved;

    let mut instance = WorkflowInstance {
        workflow_id: WorkflowId(Uuid::new_v4().to_string()),
        invoice_id: input.invoice_id,
        company_id: input.company_id,
        match_id: Some(input.match_result.match_id.clone()),
        invoice_amount: input.invoice_amount,
        risk_score: clamp_unit(input.risk_score),
        status: if auto_approved { WorkflowStatus::Completed } else { WorkflowStatus::Pending },
        steps: plan.steps,
        current_step: 0,
        created_at,
        step_started_at: created_at,
        completed_at: auto_approved.then_some(created_at),
        approved_by: auto_approved.then(|| AUTO_APPROVAL_ACTOR.to_owned()),
        rejection_reason: None,
        error_reason: None,
        audit_trail: Vec::new(),
    };

    instance.record(
        "workflow.created",
        PLANNER_ACTOR,
        created_at,
        format!(
            "match {} status {} confidence {:.4}, risk {:?}",
            input.match_result.match_id.0,
            input.match_result.status.as_str(),
            input.match_result.confidence_score,
            plan.risk_level
        ),
    );
    if let Some(reason) = &plan.override_reason {
        instance.record("risk.override", PLANNER_ACTOR, created_at, reason.clone());
    }
    if auto_approved {
        instance.record(
            "workflow.auto_approved",
            AUTO_APPROVAL_ACTOR,
            created_at,
            "no approval steps required",
        );
    } else {
        let roles: Vec<&str> =
            instance.steps.iter().map(|step| step.approver_role.as_str()).collect();
        instance.record("workflow.steps_planned", PLANNER_ACTOR, created_at, roles.join(" > "));
    }

    tracing::info!(
        event_name = "workflow.planned",
        workflow_id = %instance.workflow_id,
        invoice_id = %instance.invoice_id,
        steps = instance.steps.len(),
        auto_approved,
        risk_override = plan.override_reason.is_some(),
        "workflow planned"
    );

    instance
}
