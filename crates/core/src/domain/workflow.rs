use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentId;
use crate::domain::matching::{AuditTrailEntry, MatchId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Rejected,
    Cancelled,
    Error,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled | Self::Error)
    }
}

/// Approver roles. Human roles are ordered `preparer < manager < director < cfo < ceo`;
/// `system` sits outside the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    Preparer,
    Manager,
    Director,
    Cfo,
    Ceo,
    System,
}

impl ApproverRole {
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Preparer => Some(1),
            Self::Manager => Some(2),
            Self::Director => Some(3),
            Self::Cfo => Some(4),
            Self::Ceo => Some(5),
            Self::System => None,
        }
    }

    pub fn next_in_hierarchy(self) -> Option<Self> {
        match self {
            Self::Preparer => Some(Self::Manager),
            Self::Manager => Some(Self::Director),
            Self::Director => Some(Self::Cfo),
            Self::Cfo => Some(Self::Ceo),
            Self::Ceo | Self::System => None,
        }
    }

    pub fn is_human(self) -> bool {
        self.rank().is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparer => "preparer",
            Self::Manager => "manager",
            Self::Director => "director",
            Self::Cfo => "cfo",
            Self::Ceo => "ceo",
            Self::System => "system",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Preparer => "Preparer",
            Self::Manager => "Manager",
            Self::Director => "Director",
            Self::Cfo => "CFO",
            Self::Ceo => "CEO",
            Self::System => "System",
        }
    }
}

impl std::str::FromStr for ApproverRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "preparer" => Ok(Self::Preparer),
            "manager" => Ok(Self::Manager),
            "director" => Ok(Self::Director),
            "cfo" | "executive" => Ok(Self::Cfo),
            "ceo" => Ok(Self::Ceo),
            "system" => Ok(Self::System),
            other => Err(DomainError::InvariantViolation(format!("unknown approver role `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Approved,
    Rejected,
    Escalated,
    Cancelled,
    TimedOut,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub outcome: StepOutcome,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    pub name: String,
    pub approver_role: ApproverRole,
    pub is_required: bool,
    pub timeout_hours: u32,
    pub auto_approve_threshold: Option<Decimal>,
    /// Person currently acting on the step; replaced on delegation.
    pub assigned_to: Option<String>,
    pub completion: Option<StepCompletion>,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, approver_role: ApproverRole, timeout_hours: u32) -> Self {
        Self {
            step_id: String::new(),
            name: name.into(),
            approver_role,
            is_required: true,
            timeout_hours,
            auto_approve_threshold: None,
            assigned_to: None,
            completion: None,
        }
    }

    pub fn with_threshold(mut self, threshold: Decimal) -> Self {
        self.auto_approve_threshold = Some(threshold);
        self
    }
}

/// Ordered, versioned step list. Every structural change bumps `version`; step ids are
/// assigned here and never reused.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepList {
    steps: Vec<WorkflowStep>,
    version: u32,
    next_sequence: u32,
}

impl StepList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: WorkflowStep) -> &WorkflowStep {
        let step = self.assign_id(step);
        self.steps.push(step);
        self.version = self.version.saturating_add(1);
        let last = self.steps.len() - 1;
        &self.steps[last]
    }

    /// Inserts `step` directly after `index` and returns the new version.
    pub fn insert_after(&mut self, index: usize, step: WorkflowStep) -> Result<u32, DomainError> {
        if index >= self.steps.len() {
            return Err(DomainError::InvariantViolation(format!(
                "cannot insert after step index {index} of {}",
                self.steps.len()
            )));
        }
        let step = self.assign_id(step);
        self.steps.insert(index + 1, step);
        self.version = self.version.saturating_add(1);
        Ok(self.version)
    }

    pub fn get(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut WorkflowStep> {
        self.steps.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowStep> {
        self.steps.iter()
    }

    pub fn roles(&self) -> Vec<ApproverRole> {
        self.steps.iter().map(|step| step.approver_role).collect()
    }

    fn assign_id(&mut self, mut step: WorkflowStep) -> WorkflowStep {
        self.next_sequence = self.next_sequence.saturating_add(1);
        step.step_id = format!("step-{}", self.next_sequence);
        step
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        let score = clamp_unit(score);
        if score >= 0.8 {
            Self::Critical
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn is_elevated(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 1.0;
    }
    value.clamp(0.0, 1.0)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_id: WorkflowId,
    pub invoice_id: DocumentId,
    pub company_id: String,
    pub match_id: Option<MatchId>,
    pub invoice_amount: Decimal,
    pub risk_score: f64,
    pub status: WorkflowStatus,
    pub steps: StepList,
    pub current_step: usize,
    pub created_at: DateTime<Utc>,
    /// When the current step became active. Timeouts count from here only under
    /// `TimeoutClock::StepStarted`.
    pub step_started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub error_reason: Option<String>,
    pub audit_trail: Vec<AuditTrailEntry>,
}

impl WorkflowInstance {
    pub fn current(&self) -> Option<&WorkflowStep> {
        if self.status.is_terminal() {
            return None;
        }
        self.steps.get(self.current_step)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_auto_approved(&self) -> bool {
        self.status == WorkflowStatus::Completed && self.steps.is_empty()
    }

    pub(crate) fn record(
        &mut self,
        action: impl Into<String>,
        actor: impl Into<String>,
        at: DateTime<Utc>,
        detail: impl Into<String>,
    ) {
        self.audit_trail.push(AuditTrailEntry::new(action, actor, at, detail));
    }
}
