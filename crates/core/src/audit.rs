use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::document::DocumentId;
use crate::domain::workflow::WorkflowId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Matching,
    Workflow,
    Configuration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// The request was refused by a business rule; nothing changed.
    Rejected,
    /// A collaborator or configuration failure stopped the operation.
    Failed,
}

/// Correlation fields shared by every event raised while serving one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub invoice_id: Option<DocumentId>,
    pub workflow_id: Option<WorkflowId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        invoice_id: Option<DocumentId>,
        workflow_id: Option<WorkflowId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { invoice_id, workflow_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    pub fn for_invoice(
        invoice_id: DocumentId,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self::new(Some(invoice_id), None, correlation_id, actor)
    }

    pub fn with_workflow(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub invoice_id: Option<DocumentId>,
    pub workflow_id: Option<WorkflowId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            invoice_id: context.invoice_id.clone(),
            workflow_id: context.workflow_id.clone(),
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AuditOutcome::Success
    }
}

/// Audit storage is external; this is the hand-off point.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn emit(&self, event: AuditEvent) {
        (**self).emit(event);
    }
}

/// Keeps events in memory, in emission order.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.snapshot(|_| true)
    }

    pub fn events_for_workflow(&self, workflow_id: &WorkflowId) -> Vec<AuditEvent> {
        self.snapshot(|event| event.workflow_id.as_ref() == Some(workflow_id))
    }

    pub fn events_in(&self, category: AuditCategory) -> Vec<AuditEvent> {
        self.snapshot(|event| event.category == category)
    }

    fn snapshot(&self, keep: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        let events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.iter().filter(|event| keep(event)).cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards audit events to the `tracing` subscriber as structured log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        let invoice_id = event.invoice_id.as_ref().map(DocumentId::as_str).unwrap_or("-");
        let workflow_id = event.workflow_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-");
        if event.is_success() {
            tracing::info!(
                event_name = %event.event_type,
                audit_event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                invoice_id,
                workflow_id,
                actor = %event.actor,
                category = ?event.category,
                metadata = %metadata,
                "audit event"
            );
        } else {
            tracing::warn!(
                event_name = %event.event_type,
                audit_event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                invoice_id,
                workflow_id,
                actor = %event.actor,
                category = ?event.category,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::audit::{
        AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
        TracingAuditSink,
    };
    use crate::domain::document::DocumentId;
    use crate::domain::workflow::WorkflowId;

    fn context() -> AuditContext {
        AuditContext::for_invoice(DocumentId("INV-2026-0042".to_owned()), "req-123", "ap-clerk")
            .with_workflow(WorkflowId("WF-1".to_owned()))
    }

    #[test]
    fn events_carry_invoice_and_workflow_correlation() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                &context(),
                "workflow.action_applied",
                AuditCategory::Workflow,
                AuditOutcome::Success,
            )
            .with_metadata("from_step", "0")
            .with_metadata("to_step", "1"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].actor, "ap-clerk");
        assert_eq!(events[0].workflow_id.as_ref().map(|id| id.0.as_str()), Some("WF-1"));
        assert_eq!(events[0].invoice_id.as_ref().map(DocumentId::as_str), Some("INV-2026-0042"));
        assert_eq!(events[0].metadata.get("to_step").map(String::as_str), Some("1"));
    }

    #[test]
    fn sink_filters_by_workflow_and_category() {
        let sink = Arc::new(InMemoryAuditSink::default());
        let other = AuditContext::for_invoice(DocumentId("INV-7".to_owned()), "req-9", "system")
            .with_workflow(WorkflowId("WF-2".to_owned()));

        sink.emit(AuditEvent::new(
            &context(),
            "matching.completed",
            AuditCategory::Matching,
            AuditOutcome::Success,
        ));
        sink.emit(AuditEvent::new(
            &other,
            "workflow.action_rejected",
            AuditCategory::Workflow,
            AuditOutcome::Rejected,
        ));

        let wf2 = sink.events_for_workflow(&WorkflowId("WF-2".to_owned()));
        assert_eq!(wf2.len(), 1);
        assert!(!wf2[0].is_success());
        assert_eq!(sink.events_in(AuditCategory::Matching).len(), 1);
        assert!(sink.events_in(AuditCategory::Configuration).is_empty());
    }

    #[test]
    fn outcome_serializes_in_snake_case() {
        let event = AuditEvent::new(
            &context(),
            "matching.failed",
            AuditCategory::Matching,
            AuditOutcome::Failed,
        );
        let json = serde_json::to_value(&event).expect("serialize");

        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["category"], "matching");
        TracingAuditSink.emit(event);
    }
}
