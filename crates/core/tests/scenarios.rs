use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use matchgate_core::domain::matching::ShipmentStrategy;
use matchgate_core::errors::DomainError;
use matchgate_core::{
    apply_action, check_timeout, plan_workflow, ActionRequest, ApprovalThresholds,
    ApproverRole, InMemoryDocumentStore, LineItem, MatchEngine, MatchResult, MatchStatus,
    MatchType, PlanningInput, SourceDocument, ThresholdRegistry, TimeoutCheck, ToleranceRegistry,
    VarianceType, WorkflowAction, WorkflowInstance, WorkflowPolicy, WorkflowStatus,
};
use rust_decimal::Decimal;

fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

fn created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
}

fn received_on(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, day).expect("valid date")
}

fn basic_thresholds() -> ApprovalThresholds {
    ThresholdRegistry::builtin().resolve("basic").expect("basic tier")
}

fn invoice(id: &str, po: &str, lines: Vec<LineItem>) -> SourceDocument {
    SourceDocument::invoice(id, "Northwind Traders", "USD", lines).with_po_number(po)
}

fn purchase_order(id: &str, lines: Vec<LineItem>) -> SourceDocument {
    SourceDocument::purchase_order(id, "Northwind Traders", "USD", lines)
}

fn run_match(
    invoice: &SourceDocument,
    documents: Vec<SourceDocument>,
    profile: &str,
    match_type: MatchType,
) -> MatchResult {
    let tolerance = ToleranceRegistry::builtin().resolve(profile).expect("profile");
    let engine = MatchEngine::with_defaults(InMemoryDocumentStore::with_documents(documents));
    engine.run(invoice, &tolerance, match_type).expect("match")
}

fn plan(
    invoice: &SourceDocument,
    match_result: &MatchResult,
    risk_score: f64,
    policy: &WorkflowPolicy,
) -> WorkflowInstance {
    let thresholds = basic_thresholds();
    plan_workflow(
        PlanningInput {
            invoice_id: invoice.id.clone(),
            company_id: "northwind".to_owned(),
            invoice_amount: invoice.total_amount,
            thresholds: &thresholds,
            match_result,
            risk_score,
            created_at: created_at(),
        },
        policy,
    )
}

fn act(instance: &WorkflowInstance, action: WorkflowAction, hours: i64) -> ActionRequest {
    let step_id = instance.current().map(|step| step.step_id.clone()).unwrap_or_default();
    ActionRequest::new(step_id, action, "approver-7", created_at() + Duration::hours(hours))
}

fn chairs_invoice(total_per_unit: i64) -> SourceDocument {
    invoice(
        "INV-A",
        "PO-A",
        vec![LineItem::priced("Ergonomic office chair", dec(5), dec(total_per_unit))],
    )
}

fn listed_chairs() -> LineItem {
    LineItem::priced("Ergonomic office chair", dec(5), dec(100))
}

fn large_invoice(amount: i64) -> (SourceDocument, MatchResult) {
    let lines = vec![LineItem::priced("Server rack installation", dec(1), dec(amount))];
    let invoice = invoice("INV-L", "PO-L", lines.clone());
    let result =
        run_match(&invoice, vec![purchase_order("PO-L", lines)], "basic", MatchType::TwoWay);
    (invoice, result)
}

#[test]
fn clean_small_invoice_is_matched_perfectly_and_auto_approved() {
    let invoice = chairs_invoice(100);
    let po = purchase_order("PO-A", invoice.lines.clone());

    let result = run_match(&invoice, vec![po], "basic", MatchType::TwoWay);
    assert_eq!(result.status, MatchStatus::PerfectMatch);
    assert_eq!(result.confidence_score, 1.0);
    assert!(result.variances.is_empty());
    assert!(result.auto_approval_eligible);

    let workflow = plan(&invoice, &result, 0.1, &WorkflowPolicy::default());
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert!(workflow.steps.is_empty());
    assert_eq!(workflow.approved_by.as_deref(), Some("system:auto-approval"));
    assert!(workflow.completed_at.is_some());
}

#[test]
fn price_overbilling_beyond_tolerance_blocks_auto_approval() {
    let invoice =
        invoice("INV-B", "PO-B", vec![LineItem::priced("Laser toner", dec(1), dec(1250))]);
    let po = purchase_order("PO-B", vec![LineItem::priced("Laser toner", dec(1), dec(1200))]);

    let result = run_match(&invoice, vec![po], "basic", MatchType::TwoWay);

    let price = result
        .variances
        .iter()
        .find(|record| record.variance_type == VarianceType::Price)
        .expect("price variance record");
    assert!(!price.within_tolerance);
    assert_eq!(price.variance_percentage.round_dp(2), Decimal::new(417, 2));
    assert!(!matches!(
        result.status,
        MatchStatus::PerfectMatch | MatchStatus::ExcellentMatch | MatchStatus::GoodMatch
    ));
    assert!(!result.auto_approval_eligible);
}

#[test]
fn three_shipments_summing_to_invoice_reconcile_cumulatively() {
    let widgets = |quantity: i64| LineItem::priced("Steel widgets", dec(quantity), dec(25));
    let invoice = invoice("INV-C", "PO-C", vec![widgets(50)]);
    let po = purchase_order("PO-C", vec![widgets(50)]);
    let receipt = |id: &str, day: u32, quantity: i64| {
        SourceDocument::receipt(
            id,
            "Northwind Traders",
            "USD",
            "PO-C",
            received_on(day),
            vec![widgets(quantity)],
        )
    };
    let receipts = vec![receipt("GR-1", 3, 20), receipt("GR-2", 10, 20), receipt("GR-3", 17, 10)];
    let mut documents = vec![po];
    documents.extend(receipts);

    let result = run_match(&invoice, documents, "basic", MatchType::ThreeWay);

    let analysis = result.multi_shipment.as_ref().expect("multi-shipment analysis");
    assert_eq!(analysis.shipment_count, 3);
    assert_eq!(analysis.total_received, dec(1250));
    assert_eq!(analysis.strategy, ShipmentStrategy::CumulativeMatch);
    assert_eq!(analysis.cumulative_variance, Decimal::ZERO);
    assert_eq!(result.shipments.len(), 3);
    assert!(matches!(
        result.status,
        MatchStatus::PerfectMatch | MatchStatus::ExcellentMatch | MatchStatus::GoodMatch
    ));
}

#[test]
fn missing_purchase_order_is_a_status_not_an_error() {
    let invoice =
        invoice("INV-404", "PO-404", vec![LineItem::priced("Cabling", dec(8), dec(10))]);

    let result = run_match(&invoice, Vec::new(), "basic", MatchType::ThreeWay);

    assert_eq!(result.status, MatchStatus::PoNotFound);
    assert_eq!(result.confidence_score, 0.0);
    assert!(result.shipments.is_empty());
    assert!(result.multi_shipment.is_none());
    assert!(!result.auto_approval_eligible);
}

#[test]
fn director_threshold_adds_director_step() {
    let (invoice, result) = large_invoice(15_000);
    assert!(!result.auto_approval_eligible, "15000 exceeds the basic auto-approval limit");

    let without_preparer = WorkflowPolicy { preparer_review: false, ..WorkflowPolicy::default() };
    let workflow = plan(&invoice, &result, 0.1, &without_preparer);
    assert_eq!(
        workflow.steps.roles(),
        vec![ApproverRole::Manager, ApproverRole::Director, ApproverRole::System]
    );
    assert_eq!(workflow.status, WorkflowStatus::Pending);

    let workflow = plan(&invoice, &result, 0.1, &WorkflowPolicy::default());
    assert_eq!(
        workflow.steps.roles(),
        vec![
            ApproverRole::Preparer,
            ApproverRole::Manager,
            ApproverRole::Director,
            ApproverRole::System
        ]
    );
}

#[test]
fn high_risk_withholds_auto_approval_and_records_reason() {
    let invoice = chairs_invoice(100);
    let result = run_match(
        &invoice,
        vec![purchase_order("PO-A", invoice.lines.clone())],
        "basic",
        MatchType::TwoWay,
    );
    assert!(result.auto_approval_eligible);

    let workflow = plan(&invoice, &result, 0.75, &WorkflowPolicy::default());

    assert_eq!(workflow.status, WorkflowStatus::Pending);
    assert!(workflow.steps.roles().contains(&ApproverRole::Manager));
    assert!(workflow.audit_trail.iter().any(|entry| entry.action == "risk.override"));
    assert_eq!(result.confidence_score, 1.0, "risk never rewrites match confidence");
}

#[test]
fn confidence_stays_in_unit_interval_and_perfect_means_no_records() {
    let po_lines = vec![
        LineItem::priced("Copier paper A4", dec(40), dec(5)),
        LineItem::priced("Stapler heavy duty", dec(4), dec(30)),
    ];
    let variants: Vec<Vec<LineItem>> = vec![
        po_lines.clone(),
        vec![LineItem::priced("Copier paper A4", dec(40), dec(6)), po_lines[1].clone()],
        vec![LineItem::priced("Copier paper A4", dec(80), dec(5)), po_lines[1].clone()],
        vec![LineItem::priced("Copier paper A4", dec(40), dec(5))],
        vec![LineItem::priced("Unrelated consulting hours", dec(10), dec(900))],
        vec![
            LineItem::priced("Copier paper A4", dec(41), dec(5)),
            LineItem::priced("Stapler heavy duty", dec(4), dec(31)),
            LineItem::priced("Delivery surcharge", dec(1), dec(15)),
        ],
    ];

    for (index, lines) in variants.into_iter().enumerate() {
        let invoice = invoice(&format!("INV-P{index}"), "PO-P", lines);
        for match_type in [MatchType::TwoWay, MatchType::ThreeWay] {
            let result = run_match(
                &invoice,
                vec![
                    purchase_order("PO-P", po_lines.clone()),
                    SourceDocument::receipt(
                        "GR-P",
                        "Northwind Traders",
                        "USD",
                        "PO-P",
                        received_on(20),
                        po_lines.clone(),
                    ),
                ],
                "professional",
                match_type,
            );

            assert!(
                (0.0..=1.0).contains(&result.confidence_score),
                "variant {index}: confidence {} out of range",
                result.confidence_score
            );
            if result.status == MatchStatus::PerfectMatch {
                assert!(result.variances.is_empty(), "variant {index}: perfect with records");
            }
            if result.has_out_of_tolerance_variance() {
                assert_ne!(result.status, MatchStatus::PerfectMatch, "variant {index}");
            }
            assert!(
                result.variances.iter().all(|record| record.variance_percentage >= Decimal::ZERO),
                "variant {index}: negative variance percentage"
            );
        }
    }
}

#[test]
fn auto_approval_requires_confidence_and_limit() {
    let registry = ToleranceRegistry::builtin();
    let basic = registry.resolve("basic").expect("basic");

    let (_, over_limit) = large_invoice(1_500);
    assert_eq!(over_limit.status, MatchStatus::PerfectMatch);
    assert!(over_limit.invoice_total > basic.auto_approval_limit);
    assert!(!over_limit.auto_approval_eligible);

    let invoice = chairs_invoice(101);
    let drifted = run_match(
        &invoice,
        vec![purchase_order("PO-A", vec![listed_chairs()])],
        "basic",
        MatchType::TwoWay,
    );
    // 1% price drift sits inside the basic profile's 2%: one tolerated record.
    assert_eq!(drifted.status, MatchStatus::ExcellentMatch);
    assert_eq!(drifted.confidence_score, 0.98);
    assert_eq!(drifted.variances.len(), 1);
    assert!(drifted.variances[0].within_tolerance);
    assert!(drifted.invoice_total <= basic.auto_approval_limit);
    assert!(drifted.auto_approval_eligible);

    let overpriced = chairs_invoice(103);
    let beyond = run_match(
        &overpriced,
        vec![purchase_order("PO-A", vec![listed_chairs()])],
        "basic",
        MatchType::TwoWay,
    );
    assert_eq!(beyond.status, MatchStatus::PriceVariance);
    assert!(!beyond.auto_approval_eligible);

    let clean = chairs_invoice(100);
    let eligible = run_match(
        &clean,
        vec![purchase_order("PO-A", clean.lines.clone())],
        "basic",
        MatchType::TwoWay,
    );
    assert!(eligible.auto_approval_eligible);
    assert!(eligible.confidence_score >= 0.95);
    assert!(eligible.invoice_total <= basic.auto_approval_limit);
}

#[test]
fn n_consecutive_approvals_complete_an_n_step_workflow() {
    let (invoice, result) = large_invoice(60_000);
    let policy = WorkflowPolicy::default();
    let mut workflow = plan(&invoice, &result, 0.2, &policy);
    let step_count = workflow.steps.len();
    assert_eq!(step_count, 5, "preparer, manager, director, cfo, final processing");

    for approval in 0..step_count {
        assert!(!workflow.is_terminal(), "terminal after {approval} approvals");
        let request = act(&workflow, WorkflowAction::Approve, approval as i64 + 1);
        workflow = apply_action(&workflow, &request, &policy).expect("approve").0;
    }

    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.approved_by.as_deref(), Some("approver-7"));

    let late = act(&workflow, WorkflowAction::Approve, 24);
    let error = apply_action(&workflow, &late, &policy).expect_err("terminal workflow");
    assert!(matches!(error, DomainError::InvalidTransition { .. }));
}

#[test]
fn a_single_rejection_ends_the_workflow_at_any_position() {
    let (invoice, result) = large_invoice(60_000);
    let policy = WorkflowPolicy::default();
    let planned = plan(&invoice, &result, 0.2, &policy);

    for position in 0..planned.steps.len() {
        let mut workflow = planned.clone();
        for hour in 0..position {
            let request = act(&workflow, WorkflowAction::Approve, hour as i64 + 1);
            workflow = apply_action(&workflow, &request, &policy).expect("approve").0;
        }

        let reject = act(
            &workflow,
            WorkflowAction::Reject { reason: "duplicate billing".to_owned() },
            12,
        );
        let (rejected, _) = apply_action(&workflow, &reject, &policy).expect("reject");

        assert_eq!(rejected.status, WorkflowStatus::Rejected, "position {position}");
        assert_eq!(rejected.rejection_reason.as_deref(), Some("duplicate billing"));
        assert_eq!(rejected.current_step, position);
    }
}

#[test]
fn escalation_climbs_the_hierarchy_and_stops_at_ceo() {
    let (invoice, result) = large_invoice(2_000);
    let policy = WorkflowPolicy::default();
    let mut workflow = plan(&invoice, &result, 0.2, &policy);
    let mut rank = workflow.current().and_then(|step| step.approver_role.rank()).expect("rank");

    for hour in 1..=4 {
        let request = act(&workflow, WorkflowAction::Escalate, hour);
        workflow = apply_action(&workflow, &request, &policy).expect("escalate").0;
        let next_rank =
            workflow.current().and_then(|step| step.approver_role.rank()).expect("rank");
        assert!(next_rank > rank, "escalation must raise the acting role");
        rank = next_rank;
    }
    assert_eq!(workflow.current().map(|step| step.approver_role), Some(ApproverRole::Ceo));

    let before = workflow.clone();
    let error = apply_action(&workflow, &act(&workflow, WorkflowAction::Escalate, 8), &policy)
        .expect_err("no role above ceo");
    assert_eq!(error, DomainError::EscalationExhausted { role: ApproverRole::Ceo });
    assert_eq!(workflow, before);
}

#[test]
fn overdue_step_errors_or_escalates_per_policy() {
    let (invoice, result) = large_invoice(2_000);
    let strict = WorkflowPolicy { preparer_review: false, ..WorkflowPolicy::default() };
    let workflow = plan(&invoice, &result, 0.2, &strict);
    let overdue = created_at() + Duration::hours(i64::from(strict.default_timeout_hours) + 1);

    assert_eq!(
        check_timeout(&workflow, created_at() + Duration::hours(2), &strict),
        TimeoutCheck::NoOp
    );
    match check_timeout(&workflow, overdue, &strict) {
        TimeoutCheck::Updated { instance, .. } => {
            assert_eq!(instance.status, WorkflowStatus::Error);
            assert!(instance.error_reason.is_some());
        }
        TimeoutCheck::NoOp => panic!("manager step should be overdue"),
    }

    let escalating = WorkflowPolicy { auto_escalate_on_timeout: true, ..strict };
    match check_timeout(&workflow, overdue, &escalating) {
        TimeoutCheck::Updated { instance, .. } => {
            assert_eq!(instance.status, WorkflowStatus::InProgress);
            assert_eq!(
                instance.current().map(|step| step.approver_role),
                Some(ApproverRole::Director)
            );
        }
        TimeoutCheck::NoOp => panic!("manager step should be overdue"),
    }
}

#[test]
fn later_steps_share_the_workflow_deadline_clock() {
    let (invoice, result) = large_invoice(20_000);
    let policy = WorkflowPolicy { preparer_review: false, ..WorkflowPolicy::default() };
    let workflow = plan(&invoice, &result, 0.2, &policy);
    let approved = apply_action(&workflow, &act(&workflow, WorkflowAction::Approve, 70), &policy)
        .expect("manager approves at 70h")
        .0;
    let director = approved.current().expect("director step");
    assert_eq!(director.approver_role, ApproverRole::Director);
    let timeout_hours = director.timeout_hours;
    let past_deadline = created_at() + Duration::hours(i64::from(timeout_hours) + 1);

    match check_timeout(&approved, past_deadline, &policy) {
        TimeoutCheck::Updated { instance, .. } => {
            assert_eq!(instance.status, WorkflowStatus::Error);
        }
        TimeoutCheck::NoOp => panic!("deadline counts from workflow creation"),
    }
}
