use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::domain::workflow::{WorkflowId, WorkflowInstance};
use crate::errors::DomainError;
use crate::workflow::engine::{
    apply_action, check_timeout, ActionOutcome, ActionRequest, TimeoutCheck, TimeoutResolution,
};
use crate::workflow::planner::WorkflowPolicy;

type Slot = Arc<Mutex<WorkflowInstance>>;

/// Live workflow instances. Transitions on one workflow are serialised by its own
/// mutex; different workflows proceed independently.
#[derive(Default)]
pub struct WorkflowRegistry {
    policy: WorkflowPolicy,
    slots: RwLock<HashMap<WorkflowId, Slot>>,
}

impl WorkflowRegistry {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy, slots: RwLock::new(HashMap::new()) }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Registers a planned instance. Fails if its workflow id is already registered
    /// or the invoice already has a non-terminal workflow.
    pub fn insert(&self, instance: WorkflowInstance) -> Result<WorkflowId, DomainError> {
        let mut slots = self.write_slots();

        if slots.contains_key(&instance.workflow_id) {
            return Err(DomainError::DuplicateWorkflow(instance.workflow_id));
        }
        let duplicate = slots.values().any(|slot| {
            let existing = lock(slot);
            existing.invoice_id == instance.invoice_id && !existing.is_terminal()
        });
        if duplicate && !instance.is_terminal() {
            return Err(DomainError::ActiveWorkflowExists {
                invoice_id: instance.invoice_id.as_str().to_owned(),
            });
        }

        let workflow_id = instance.workflow_id.clone();
        slots.insert(workflow_id.clone(), Arc::new(Mutex::new(instance)));
        Ok(workflow_id)
    }

    /// Drops a workflow and returns its last state.
    pub fn remove(&self, workflow_id: &WorkflowId) -> Result<WorkflowInstance, DomainError> {
        let slot = self
            .write_slots()
            .remove(workflow_id)
            .ok_or_else(|| DomainError::WorkflowNotFound(workflow_id.clone()))?;
        let instance = lock(&slot).clone();
        Ok(instance)
    }

    /// Removes every completed, rejected, cancelled or failed workflow and returns them
    /// ordered by id.
    pub fn evict_terminal(&self) -> Vec<WorkflowInstance> {
        let mut slots = self.write_slots();
        let finished: Vec<WorkflowId> = slots
            .iter()
            .filter(|(_, slot)| lock(slot).is_terminal())
            .map(|(workflow_id, _)| workflow_id.clone())
            .collect();

        let mut evicted: Vec<WorkflowInstance> = finished
            .iter()
            .filter_map(|workflow_id| slots.remove(workflow_id))
            .map(|slot| lock(&slot).clone())
            .collect();
        evicted.sort_by(|left, right| left.workflow_id.cmp(&right.workflow_id));
        if !evicted.is_empty() {
            tracing::debug!(
                event_name = "workflow.registry_evicted",
                evicted = evicted.len(),
                remaining = slots.len(),
                "terminal workflows evicted"
            );
        }
        evicted
    }

    pub fn get(&self, workflow_id: &WorkflowId) -> Result<WorkflowInstance, DomainError> {
        let slot = self.slot(workflow_id)?;
        let instance = lock(&slot).clone();
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        self.read_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies an action while holding the workflow's lock, storing the result on success.
    pub fn apply(
        &self,
        workflow_id: &WorkflowId,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, DomainError> {
        let slot = self.slot(workflow_id)?;
        let mut current = lock(&slot);
        let (next, outcome) = apply_action(&current, request, &self.policy)?;
        *current = next;
        Ok(outcome)
    }

    /// Runs the timeout check over every live workflow and returns the ones it changed.
    pub fn check_timeouts(&self, now: DateTime<Utc>) -> Vec<(WorkflowId, TimeoutResolution)> {
        let slots: Vec<(WorkflowId, Slot)> = self
            .read_slots()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut changed = Vec::new();
        for (workflow_id, slot) in slots {
            let mut current = lock(&slot);
            if let TimeoutCheck::Updated { instance, resolution } =
                check_timeout(&current, now, &self.policy)
            {
                *current = instance;
                changed.push((workflow_id, resolution));
            }
        }
        changed.sort_by(|left, right| left.0.cmp(&right.0));
        changed
    }

    fn slot(&self, workflow_id: &WorkflowId) -> Result<Slot, DomainError> {
        self.read_slots()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| DomainError::WorkflowNotFound(workflow_id.clone()))
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, HashMap<WorkflowId, Slot>> {
        match self.slots.read() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, HashMap<WorkflowId, Slot>> {
        match self.slots.write() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, WorkflowInstance> {
    match slot.lock() {
        Ok(instance) => instance,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::WorkflowRegistry;
    use crate::domain::document::DocumentId;
    use crate::domain::workflow::{
        ApproverRole, StepList, WorkflowId, WorkflowInstance, WorkflowStatus, WorkflowStep,
    };
    use crate::errors::DomainError;
    use crate::workflow::engine::{ActionRequest, TimeoutResolution, WorkflowAction};
    use crate::workflow::planner::WorkflowPolicy;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).single().unwrap_or_default()
    }

    fn instance(workflow_id: &str, invoice_id: &str) -> WorkflowInstance {
        let mut steps = StepList::new();
        steps.push(WorkflowStep::new("Manager Approval", ApproverRole::Manager, 72));
        steps.push(WorkflowStep::new("Final Processing", ApproverRole::System, 1));
        WorkflowInstance {
            workflow_id: WorkflowId(workflow_id.to_owned()),
            invoice_id: DocumentId(invoice_id.to_owned()),
            company_id: "acme".to_owned(),
            match_id: None,
            invoice_amount: Decimal::from(2_000),
            risk_score: 0.0,
            status: WorkflowStatus::Pending,
            steps,
            current_step: 0,
            created_at: start(),
            step_started_at: start(),
            completed_at: None,
            approved_by: None,
            rejection_reason: None,
            error_reason: None,
            audit_trail: Vec::new(),
        }
    }

    #[test]
    fn one_active_workflow_per_invoice() {
        let registry = WorkflowRegistry::default();
        registry.insert(instance("WF-1", "INV-1")).expect("first");

        let error = registry.insert(instance("WF-2", "INV-1")).expect_err("duplicate");
        assert_eq!(error, DomainError::ActiveWorkflowExists { invoice_id: "INV-1".to_owned() });

        registry
            .apply(
                &WorkflowId("WF-1".to_owned()),
                &ActionRequest::new("", WorkflowAction::Cancel, "ap-lead", start()),
            )
            .expect("cancel");
        registry.insert(instance("WF-2", "INV-1")).expect("replacement after cancel");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reused_workflow_id_keeps_the_live_instance() {
        let registry = WorkflowRegistry::default();
        let workflow_id = registry.insert(instance("WF-1", "INV-1")).expect("insert");
        registry
            .apply(
                &workflow_id,
                &ActionRequest::new("step-1", WorkflowAction::Approve, "jordan", start()),
            )
            .expect("approve");

        let error = registry.insert(instance("WF-1", "INV-2")).expect_err("id already taken");

        assert_eq!(error, DomainError::DuplicateWorkflow(workflow_id.clone()));
        let kept = registry.get(&workflow_id).expect("stored");
        assert_eq!(kept.invoice_id, DocumentId("INV-1".to_owned()));
        assert_eq!(kept.current_step, 1);
    }

    #[test]
    fn terminal_workflows_can_be_evicted_or_removed() {
        let registry = WorkflowRegistry::default();
        registry.insert(instance("WF-1", "INV-1")).expect("insert");
        registry.insert(instance("WF-2", "INV-2")).expect("insert");
        registry.insert(instance("WF-3", "INV-3")).expect("insert");
        for cancelled in ["WF-1", "WF-3"] {
            registry
                .apply(
                    &WorkflowId(cancelled.to_owned()),
                    &ActionRequest::new("", WorkflowAction::Cancel, "ap-lead", start()),
                )
                .expect("cancel");
        }

        let evicted = registry.evict_terminal();

        let ids: Vec<&str> = evicted.iter().map(|wf| wf.workflow_id.0.as_str()).collect();
        assert_eq!(ids, ["WF-1", "WF-3"]);
        assert!(evicted.iter().all(|wf| wf.status == WorkflowStatus::Cancelled));
        assert_eq!(registry.len(), 1);
        assert!(registry.evict_terminal().is_empty());

        let removed = registry.remove(&WorkflowId("WF-2".to_owned())).expect("remove live");
        assert_eq!(removed.status, WorkflowStatus::Pending);
        assert!(registry.is_empty());
        assert_eq!(
            registry.remove(&WorkflowId("WF-2".to_owned())),
            Err(DomainError::WorkflowNotFound(WorkflowId("WF-2".to_owned())))
        );
    }

    #[test]
    fn unknown_workflow_is_reported() {
        let registry = WorkflowRegistry::default();
        let missing = WorkflowId("WF-404".to_owned());

        assert_eq!(registry.get(&missing), Err(DomainError::WorkflowNotFound(missing.clone())));
    }

    #[test]
    fn concurrent_approvals_advance_exactly_once() {
        let registry = Arc::new(WorkflowRegistry::default());
        let workflow_id = registry.insert(instance("WF-1", "INV-1")).expect("insert");

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                let workflow_id = workflow_id.clone();
                thread::spawn(move || {
                    registry.apply(
                        &workflow_id,
                        &ActionRequest::new(
                            "step-1",
                            WorkflowAction::Approve,
                            format!("approver-{worker}"),
                            start(),
                        ),
                    )
                })
            })
            .collect();

        let succeeded = handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .filter(Result::is_ok)
            .count();

        assert_eq!(succeeded, 1);
        assert_eq!(registry.get(&workflow_id).expect("stored").current_step, 1);
    }

    #[test]
    fn check_timeouts_updates_overdue_instances_only() {
        let registry = WorkflowRegistry::new(WorkflowPolicy::default());
        registry.insert(instance("WF-1", "INV-1")).expect("insert");
        let mut fresh = instance("WF-2", "INV-2");
        fresh.created_at = start() + Duration::hours(70);
        fresh.step_started_at = fresh.created_at;
        registry.insert(fresh).expect("insert");

        let changed = registry.check_timeouts(start() + Duration::hours(100));

        assert_eq!(
            changed,
            vec![(WorkflowId("WF-1".to_owned()), TimeoutResolution::MarkedError)]
        );
        let failed = registry.get(&WorkflowId("WF-1".to_owned())).expect("stored");
        assert_eq!(failed.status, WorkflowStatus::Error);
    }
}
