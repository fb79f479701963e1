pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod matching;
pub mod ports;
pub mod thresholds;
pub mod tolerance;
pub mod workflow;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use domain::document::{DocumentId, DocumentKind, LineItem, ReceiptDetails, SourceDocument};
pub use domain::matching::{
    ConfidenceBreakdown, MatchId, MatchResult, MatchStatus, MatchType, MultiShipmentAnalysis,
    ShipmentStrategy, VarianceRecord, VarianceType,
};
pub use domain::workflow::{
    ApproverRole, RiskLevel, StepList, WorkflowId, WorkflowInstance, WorkflowStatus, WorkflowStep,
};
pub use errors::{ApplicationError, DomainError};
pub use matching::{match_invoice, MatchEngine, MatchSettings};
pub use ports::{DocumentLookup, InMemoryDocumentStore, LookupError, RiskScoreProvider};
pub use thresholds::{ApprovalThresholds, ThresholdRegistry};
pub use tolerance::{ToleranceProfile, ToleranceRegistry};
pub use workflow::{
    apply_action, check_timeout, plan_workflow, ActionOutcome, ActionRequest, PlanningInput,
    TimeoutCheck, TimeoutClock, WorkflowAction, WorkflowEngine, WorkflowPolicy, WorkflowRegistry,
};
