use thiserror::Error;

use crate::domain::workflow::{ApproverRole, WorkflowId, WorkflowStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("workflow `{workflow_id}` is {status:?}; action `{action}` is not accepted")]
    InvalidTransition { workflow_id: WorkflowId, status: WorkflowStatus, action: String },
    #[error("action targets step `{received}` but the current step is `{expected}`")]
    StepMismatch { expected: String, received: String },
    #[error("action `{action}` is not supported on a {role:?} step")]
    UnsupportedStepAction { role: ApproverRole, action: String },
    #[error("cannot escalate beyond {role:?}: top of the approval hierarchy")]
    EscalationExhausted { role: ApproverRole },
    #[error("role {actor_role:?} cannot act on a step requiring {required_role:?}")]
    InsufficientAuthority { actor_role: ApproverRole, required_role: ApproverRole },
    #[error("invoice `{invoice_id}` already has an active workflow")]
    ActiveWorkflowExists { invoice_id: String },
    #[error("workflow `{0}` was not found")]
    WorkflowNotFound(WorkflowId),
    #[error("workflow `{0}` is already registered")]
    DuplicateWorkflow(WorkflowId),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKind {
    ToleranceProfile,
    ApprovalThresholds,
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToleranceProfile => f.write_str("tolerance profile"),
            Self::ApprovalThresholds => f.write_str("approval thresholds"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no {kind} configured for `{key}`")]
    ConfigurationMissing { kind: ConfigKind, key: String },
    #[error("document lookup failed: {0}")]
    Lookup(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Stable class name for operator-facing output.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::EscalationExhausted { .. }) => "escalation_exhausted",
            Self::Domain(DomainError::InvalidTransition { .. })
            | Self::Domain(DomainError::StepMismatch { .. })
            | Self::Domain(DomainError::UnsupportedStepAction { .. }) => "invalid_transition",
            Self::Domain(_) => "domain",
            Self::ConfigurationMissing { .. } | Self::Configuration(_) => "configuration",
            Self::Lookup(_) => "lookup",
        }
    }
}
