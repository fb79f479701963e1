use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::document::{DocumentId, LineItem, SourceDocument};
use crate::domain::matching::{
    AuditTrailEntry, ConfidenceBreakdown, MatchId, MatchResult, MatchStatus, MatchType,
    MultiShipmentAnalysis, ShipmentSummary, VarianceRecord, VarianceType,
};
use crate::errors::ApplicationError;
use crate::matching::amounts::{divergence_pct, percent_of, saturating_sum};
use crate::matching::line_matcher::{LineMatcher, DEFAULT_MIN_LINE_SCORE};
use crate::matching::shipments::{aggregate_receipt_lines, analyze_shipments};
use crate::matching::variance::{ReferenceSide, VarianceAnalyzer};
use crate::ports::DocumentLookup;
use crate::tolerance::ToleranceProfile;

const ACTOR: &str = "match-engine";

const PO_WEIGHT: f64 = 0.40;
const SHIPMENT_WEIGHT: f64 = 0.40;
const CONSISTENCY_WEIGHT: f64 = 0.15;
const MULTI_SHIPMENT_WEIGHT: f64 = 0.05;

/// Penalty for a recorded variance that is still inside tolerance.
const IN_TOLERANCE_PENALTY: f64 = 0.02;
/// Base penalty for an out-of-tolerance variance, before its percentage is added.
const OUT_OF_TOLERANCE_BASE_PENALTY: f64 = 0.20;

pub const PERFECT_THRESHOLD: f64 = 0.98;
pub const EXCELLENT_THRESHOLD: f64 = 0.95;
pub const GOOD_THRESHOLD: f64 = 0.85;
pub const PARTIAL_THRESHOLD: f64 = 0.70;
pub const AUTO_APPROVAL_MIN_CONFIDENCE: f64 = 0.95;

#[derive(Clone, Debug, PartialEq)]
pub struct MatchSettings {
    /// Half-width of the vendor PO search window, as a percentage of the invoice total.
    pub po_search_window_pct: Decimal,
    pub min_line_score: f64,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self { po_search_window_pct: Decimal::from(20), min_line_score: DEFAULT_MIN_LINE_SCORE }
    }
}

enum PoResolution {
    Found(SourceDocument),
    NotFound(String),
    Ambiguous(Vec<DocumentId>),
}

struct LineOutcome {
    reference_index: Option<usize>,
    records: Vec<VarianceRecord>,
}

struct LineComparison {
    lines: Vec<LineOutcome>,
}

impl LineComparison {
    fn matched_count(&self) -> usize {
        self.lines.iter().filter(|line| line.reference_index.is_some()).count()
    }

    fn records(&self) -> impl Iterator<Item = &VarianceRecord> {
        self.lines.iter().flat_map(|line| line.records.iter())
    }

    /// `1 - mean(line penalty)`; an unmatched line costs the full 1.0.
    fn score(&self) -> f64 {
        if self.lines.is_empty() {
            return 0.0;
        }
        let penalty: f64 = self
            .lines
            .iter()
            .map(|line| match line.reference_index {
                None => 1.0,
                Some(_) => line.records.iter().map(record_penalty).sum::<f64>().min(1.0),
            })
            .sum();
        (1.0 - penalty / self.lines.len() as f64).clamp(0.0, 1.0)
    }
}

fn record_penalty(record: &VarianceRecord) -> f64 {
    if record.within_tolerance {
        return IN_TOLERANCE_PENALTY;
    }
    let pct = record.variance_percentage.to_f64().unwrap_or(100.0) / 100.0;
    OUT_OF_TOLERANCE_BASE_PENALTY + pct.clamp(0.0, 0.8)
}

/// Runs 2-way and 3-way matching against documents resolved through `L`.
pub struct MatchEngine<L> {
    lookup: L,
    settings: MatchSettings,
}

impl<L> MatchEngine<L>
where
    L: DocumentLookup,
{
    pub fn new(lookup: L, settings: MatchSettings) -> Self {
        Self { lookup, settings }
    }

    pub fn with_defaults(lookup: L) -> Self {
        Self::new(lookup, MatchSettings::default())
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Matches `invoice` and returns an immutable result.
    ///
    /// Missing documents and malformed input are reported through the result status;
    /// only collaborator failures are returned as errors.
    pub fn run(
        &self,
        invoice: &SourceDocument,
        tolerance: &ToleranceProfile,
        match_type: MatchType,
    ) -> Result<MatchResult, ApplicationError> {
        let mut run = MatchRun::start(invoice, match_type);

        if let Some(reason) = malformed_reason(invoice) {
            return Ok(run.finish_early(MatchStatus::NoMatch, None, reason));
        }

        let po = match self.resolve_po(invoice)? {
            PoResolution::Found(po) => po,
            PoResolution::NotFound(detail) => {
                return Ok(run.finish_early(MatchStatus::PoNotFound, None, detail));
            }
            PoResolution::Ambiguous(candidates) => {
                let listed: Vec<&str> = candidates.iter().map(DocumentId::as_str).collect();
                return Ok(run.finish_early(
                    MatchStatus::MultipleMatches,
                    None,
                    format!("vendor search returned equally close POs: {}", listed.join(", ")),
                ));
            }
        };
        run.trail("po.resolved", format!("purchase order {} total {}", po.id, po.total_amount));
        tracing::debug!(
            event_name = "matching.po_resolved",
            invoice_id = %invoice.id,
            po_id = %po.id,
            "purchase order resolved"
        );

        if !po.currency.trim().eq_ignore_ascii_case(invoice.currency.trim()) {
            return Ok(run.finish_early(
                MatchStatus::NoMatch,
                Some(po.id.clone()),
                format!("currency mismatch: invoice {} vs PO {}", invoice.currency, po.currency),
            ));
        }

        let matcher = LineMatcher::new(self.settings.min_line_score);
        let analyzer = VarianceAnalyzer::new(tolerance);
        let po_side =
            compare_lines(&matcher, &analyzer, invoice, &po.lines, ReferenceSide::PurchaseOrder);
        if po_side.matched_count() == 0 {
            return Ok(run.finish_early(
                MatchStatus::NoMatch,
                Some(po.id.clone()),
                "no invoice line pairs with any purchase order line".to_owned(),
            ));
        }

        let po_match = po_side.score();
        let mut breakdown = ConfidenceBreakdown { po_match, ..ConfidenceBreakdown::default() };
        let mut records: Vec<VarianceRecord> = po_side.records().cloned().collect();
        let gl_accounts = suggested_gl_accounts(invoice, &po.lines, &po_side);

        let confidence = match match_type {
            MatchType::TwoWay => po_match,
            MatchType::ThreeWay => {
                let receipts = self.lookup.receipts_for_po(po.id.as_str())?;
                if receipts.is_empty() {
                    run.breakdown = breakdown;
                    return Ok(run.finish_early(
                        MatchStatus::ReceiptNotFound,
                        Some(po.id.clone()),
                        format!("no goods receipts recorded against {}", po.id),
                    ));
                }
                run.trail("receipts.resolved", format!("{} shipment(s)", receipts.len()));
                run.shipments = receipts
                    .iter()
                    .map(|receipt| ShipmentSummary {
                        receipt_id: receipt.id.clone(),
                        receipt_date: receipt.receipt.as_ref().map(|details| details.receipt_date),
                        total_amount: receipt.total_amount,
                    })
                    .collect();

                let received_lines = aggregate_receipt_lines(&receipts);
                let shipment_side = compare_lines(
                    &matcher,
                    &analyzer,
                    invoice,
                    &received_lines,
                    ReferenceSide::Receipt,
                );
                let shipment_match = shipment_side.score();
                records.extend(shipment_side.records().cloned());

                let (consistency, consistency_detail) = consistency_score(&po, &receipts, tolerance);
                if let Some(detail) = consistency_detail {
                    run.trail("consistency.diverged", detail);
                }

                let analysis = analyze_shipments(invoice.total_amount, &receipts);
                let multi_shipment = analysis.as_ref().map_or(1.0, |analysis| analysis.confidence);
                if let Some(analysis) = &analysis {
                    run.trail(
                        "shipments.reconciled",
                        format!(
                            "strategy {:?}, received {}, cumulative variance {}",
                            analysis.strategy, analysis.total_received, analysis.cumulative_variance
                        ),
                    );
                }
                run.multi_shipment = analysis;

                breakdown.shipment_match = Some(shipment_match);
                breakdown.consistency = Some(consistency);
                breakdown.multi_shipment = Some(multi_shipment);

                PO_WEIGHT * po_match
                    + SHIPMENT_WEIGHT * shipment_match
                    + CONSISTENCY_WEIGHT * consistency
                    + MULTI_SHIPMENT_WEIGHT * multi_shipment
            }
        };

        let confidence_score = round_score(confidence);
        let total_variance = saturating_sum(records.iter().map(VarianceRecord::magnitude));
        let variance_percentage = percent_of(total_variance, invoice.total_amount);
        let status = derive_status(confidence_score, &records);
        let auto_approval_eligible = confidence_score >= AUTO_APPROVAL_MIN_CONFIDENCE
            && variance_percentage <= tolerance.price_tolerance_pct
            && invoice.total_amount <= tolerance.auto_approval_limit
            && !records.iter().any(|record| record.requires_approval);

        run.trail(
            "match.completed",
            format!(
                "status {}, confidence {confidence_score:.4}, {} variance record(s)",
                status.as_str(),
                records.len()
            ),
        );
        tracing::info!(
            event_name = "matching.completed",
            invoice_id = %invoice.id,
            po_id = %po.id,
            status = status.as_str(),
            confidence = confidence_score,
            auto_approval_eligible,
            "invoice matched"
        );

        Ok(MatchResult {
            match_id: run.match_id,
            match_type,
            status,
            confidence_score,
            breakdown,
            invoice_id: invoice.id.clone(),
            invoice_total: invoice.total_amount,
            po_id: Some(po.id),
            shipments: run.shipments,
            multi_shipment: run.multi_shipment,
            variances: records,
            total_variance,
            variance_percentage,
            auto_approval_eligible,
            suggested_gl_accounts: gl_accounts,
            audit_trail: run.audit_trail,
        })
    }

    pub fn run_with_audit<S>(
        &self,
        invoice: &SourceDocument,
        tolerance: &ToleranceProfile,
        match_type: MatchType,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<MatchResult, ApplicationError>
    where
        S: AuditSink,
    {
        let result = self.run(invoice, tolerance, match_type);
        match &result {
            Ok(outcome) => sink.emit(
                AuditEvent::new(
                    audit,
                    "matching.completed",
                    AuditCategory::Matching,
                    AuditOutcome::Success,
                )
                .with_metadata("match_id", outcome.match_id.0.clone())
                .with_metadata("status", outcome.status.as_str())
                .with_metadata("confidence", format!("{:.4}", outcome.confidence_score))
                .with_metadata("auto_approval_eligible", outcome.auto_approval_eligible.to_string()),
            ),
            Err(error) => sink.emit(
                AuditEvent::new(audit, "matching.failed", AuditCategory::Matching, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            ),
        }
        result
    }

    fn resolve_po(&self, invoice: &SourceDocument) -> Result<PoResolution, ApplicationError> {
        if let Some(po_number) = invoice.po_number.as_deref().filter(|value| !value.trim().is_empty()) {
            return Ok(match self.lookup.purchase_order(po_number)? {
                Some(po) => PoResolution::Found(po),
                None => PoResolution::NotFound(format!("purchase order {po_number} not found")),
            });
        }

        let window = (invoice.total_amount.abs() / Decimal::ONE_HUNDRED)
            .saturating_mul(self.settings.po_search_window_pct);
        let mut candidates: Vec<(Decimal, SourceDocument)> = self
            .lookup
            .purchase_orders_for_vendor(&invoice.vendor_name)?
            .into_iter()
            .map(|po| (po.total_amount.saturating_sub(invoice.total_amount).abs(), po))
            .filter(|(distance, _)| *distance <= window)
            .collect();

        if candidates.is_empty() {
            return Ok(PoResolution::NotFound(format!(
                "no purchase order for vendor `{}` within {}% of {}",
                invoice.vendor_name, self.settings.po_search_window_pct, invoice.total_amount
            )));
        }

        // Stable sort keeps lookup order among equal distances.
        candidates.sort_by(|left, right| left.0.cmp(&right.0));
        let closest = candidates[0].0;
        let tied: Vec<DocumentId> = candidates
            .iter()
            .take_while(|(distance, _)| *distance == closest)
            .map(|(_, po)| po.id.clone())
            .collect();
        let distinct = tied.iter().any(|id| *id != tied[0]);
        if distinct {
            return Ok(PoResolution::Ambiguous(tied));
        }

        Ok(PoResolution::Found(candidates.swap_remove(0).1))
    }
}

/// Convenience wrapper for a single match with default settings.
pub fn match_invoice<L>(
    invoice: &SourceDocument,
    lookup: L,
    tolerance: &ToleranceProfile,
    match_type: MatchType,
) -> Result<MatchResult, ApplicationError>
where
    L: DocumentLookup,
{
    MatchEngine::with_defaults(lookup).run(invoice, tolerance, match_type)
}

struct MatchRun<'a> {
    invoice: &'a SourceDocument,
    match_id: MatchId,
    match_type: MatchType,
    breakdown: ConfidenceBreakdown,
    shipments: Vec<ShipmentSummary>,
    multi_shipment: Option<MultiShipmentAnalysis>,
    audit_trail: Vec<AuditTrailEntry>,
}

impl<'a> MatchRun<'a> {
    fn start(invoice: &'a SourceDocument, match_type: MatchType) -> Self {
        let mut run = Self {
            invoice,
            match_id: MatchId(Uuid::new_v4().to_string()),
            match_type,
            breakdown: ConfidenceBreakdown::default(),
            shipments: Vec::new(),
            multi_shipment: None,
            audit_trail: Vec::new(),
        };
        run.trail(
            "match.started",
            format!("{match_type:?} match for invoice {} total {}", invoice.id, invoice.total_amount),
        );
        run
    }

    fn trail(&mut self, action: &str, detail: impl Into<String>) {
        self.audit_trail.push(AuditTrailEntry::new(action, ACTOR, Utc::now(), detail));
    }

    /// Terminal result with zero confidence and no auto-approval.
    fn finish_early(
        mut self,
        status: MatchStatus,
        po_id: Option<DocumentId>,
        detail: String,
    ) -> MatchResult {
        tracing::info!(
            event_name = "matching.completed",
            invoice_id = %self.invoice.id,
            status = status.as_str(),
            detail = %detail,
            "invoice match ended early"
        );
        self.trail("match.completed", format!("status {}: {detail}", status.as_str()));

        MatchResult {
            match_id: self.match_id,
            match_type: self.match_type,
            status,
            confidence_score: 0.0,
            breakdown: self.breakdown,
            invoice_id: self.invoice.id.clone(),
            invoice_total: self.invoice.total_amount,
            po_id,
            shipments: self.shipments,
            multi_shipment: None,
            variances: Vec::new(),
            total_variance: Decimal::ZERO,
            variance_percentage: Decimal::ZERO,
            auto_approval_eligible: false,
            suggested_gl_accounts: BTreeMap::new(),
            audit_trail: self.audit_trail,
        }
    }
}

fn malformed_reason(invoice: &SourceDocument) -> Option<String> {
    if invoice.lines.is_empty() {
        return Some("invoice has no line items".to_owned());
    }
    if invoice.total_amount <= Decimal::ZERO {
        return Some(format!("invoice total {} is not positive", invoice.total_amount));
    }
    None
}

fn compare_lines(
    matcher: &LineMatcher,
    analyzer: &VarianceAnalyzer<'_>,
    invoice: &SourceDocument,
    reference_lines: &[LineItem],
    side: ReferenceSide,
) -> LineComparison {
    let lines = invoice
        .lines
        .iter()
        .enumerate()
        .map(|(index, line)| match matcher.best_match(line, reference_lines) {
            Some(found) => LineOutcome {
                reference_index: Some(found.candidate_index),
                records: analyzer.analyze(
                    index,
                    line,
                    &reference_lines[found.candidate_index],
                    side,
                ),
            },
            None => LineOutcome {
                reference_index: None,
                records: vec![analyzer.unmatched(index, line, side)],
            },
        })
        .collect();
    LineComparison { lines }
}

/// Agreement between what was ordered and what was received across all shipments.
fn consistency_score(
    po: &SourceDocument,
    receipts: &[SourceDocument],
    tolerance: &ToleranceProfile,
) -> (f64, Option<String>) {
    let ordered_quantity = po.ordered_quantity();
    let received_quantity = saturating_sum(receipts.iter().map(SourceDocument::ordered_quantity));
    let received_amount = saturating_sum(receipts.iter().map(|receipt| receipt.total_amount));

    let mut worst_pct: Option<Decimal> = None;
    let mut details = Vec::new();

    let quantity_pct = divergence_pct(received_quantity, ordered_quantity);
    if quantity_pct > tolerance.quantity_tolerance_pct {
        details.push(format!(
            "received quantity {received_quantity} vs ordered {ordered_quantity} ({quantity_pct}%)"
        ));
        worst_pct = Some(quantity_pct);
    }

    // Receipts often carry no prices; only compare amounts when they do.
    if !received_amount.is_zero() {
        let amount_gap = received_amount.saturating_sub(po.total_amount).abs();
        let amount_pct = divergence_pct(received_amount, po.total_amount);
        let within = amount_gap <= tolerance.amount_tolerance_abs
            || amount_pct <= tolerance.price_tolerance_pct;
        if !within {
            details.push(format!(
                "received amount {received_amount} vs ordered {} ({amount_pct}%)",
                po.total_amount
            ));
            worst_pct = Some(worst_pct.map_or(amount_pct, |current| current.max(amount_pct)));
        }
    }

    match worst_pct {
        None => (1.0, None),
        Some(pct) => {
            let ratio = (pct / Decimal::ONE_HUNDRED).to_f64().unwrap_or(1.0);
            let score = 1.0 - (OUT_OF_TOLERANCE_BASE_PENALTY + ratio).min(1.0);
            (score.clamp(0.0, 1.0), Some(details.join("; ")))
        }
    }
}

/// Status from confidence, after checking whether one out-of-tolerance variance type
/// accounts for the majority of the total variance.
pub fn derive_status(confidence: f64, records: &[VarianceRecord]) -> MatchStatus {
    if let Some(dominant) = dominant_out_of_tolerance_type(records) {
        return match dominant {
            VarianceType::Price => MatchStatus::PriceVariance,
            VarianceType::Quantity => MatchStatus::QuantityVariance,
            _ => MatchStatus::ToleranceExceeded,
        };
    }

    if confidence >= PERFECT_THRESHOLD && records.is_empty() {
        MatchStatus::PerfectMatch
    } else if confidence >= EXCELLENT_THRESHOLD {
        MatchStatus::ExcellentMatch
    } else if confidence >= GOOD_THRESHOLD {
        MatchStatus::GoodMatch
    } else if confidence >= PARTIAL_THRESHOLD {
        MatchStatus::PartialMatch
    } else {
        MatchStatus::ToleranceExceeded
    }
}

fn dominant_out_of_tolerance_type(records: &[VarianceRecord]) -> Option<VarianceType> {
    let total = saturating_sum(records.iter().map(VarianceRecord::magnitude));
    if total.is_zero() {
        return None;
    }

    let mut by_type: BTreeMap<VarianceType, (Decimal, bool)> = BTreeMap::new();
    for record in records {
        let entry = by_type.entry(record.variance_type).or_insert((Decimal::ZERO, false));
        entry.0 = entry.0.saturating_add(record.magnitude());
        entry.1 |= !record.within_tolerance;
    }

    by_type
        .into_iter()
        .find(|(_, (sum, out_of_tolerance))| *out_of_tolerance && sum.saturating_mul(Decimal::TWO) > total)
        .map(|(variance_type, _)| variance_type)
}

fn suggested_gl_accounts(
    invoice: &SourceDocument,
    po_lines: &[LineItem],
    comparison: &LineComparison,
) -> BTreeMap<usize, String> {
    invoice
        .lines
        .iter()
        .zip(comparison.lines.iter())
        .enumerate()
        .filter_map(|(index, (line, outcome))| {
            line.gl_account
                .clone()
                .or_else(|| {
                    outcome
                        .reference_index
                        .and_then(|po_index| po_lines.get(po_index))
                        .and_then(|po_line| po_line.gl_account.clone())
                })
                .map(|account| (index, account))
        })
        .collect()
}

fn round_score(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    ((value * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
}
