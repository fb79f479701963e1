use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::document::{LineItem, SourceDocument};
use crate::domain::matching::{MultiShipmentAnalysis, ShipmentStrategy, ShipmentVariance};
use crate::matching::amounts::{divergence_pct, saturating_sum};

/// Share of the invoice total that must be received for a cumulative match.
fn cumulative_match_ratio() -> Decimal {
    Decimal::new(95, 2)
}

const PARTIAL_BILLING_MIN_SHIPMENTS: usize = 4;
const NEUTRAL_SHIPMENT_COUNT: usize = 3;
const COUNT_PENALTY_PER_SHIPMENT: f64 = 0.05;
const MAX_COUNT_PENALTY: f64 = 0.25;
const MAX_VARIANCE_PENALTY: f64 = 0.25;

/// Reconciles an invoice against several shipments of one PO. Returns `None` for a
/// single shipment, where the component is neutral.
pub fn analyze_shipments(
    invoice_total: Decimal,
    receipts: &[SourceDocument],
) -> Option<MultiShipmentAnalysis> {
    if receipts.len() < 2 {
        return None;
    }

    let shipment_count = receipts.len();
    let total_received = saturating_sum(receipts.iter().map(|receipt| receipt.total_amount));

    let strategy = if total_received >= cumulative_match_ratio() * invoice_total {
        ShipmentStrategy::CumulativeMatch
    } else if shipment_count >= PARTIAL_BILLING_MIN_SHIPMENTS {
        ShipmentStrategy::PartialBilling
    } else {
        ShipmentStrategy::ProgressiveDelivery
    };

    let shipment_variances: Vec<ShipmentVariance> = receipts
        .iter()
        .map(|receipt| ShipmentVariance {
            receipt_id: receipt.id.clone(),
            variance: invoice_total.saturating_sub(receipt.total_amount).abs(),
        })
        .collect();

    let mut best: Option<&ShipmentVariance> = None;
    for candidate in &shipment_variances {
        if best.map_or(true, |current| candidate.variance < current.variance) {
            best = Some(candidate);
        }
    }
    let best_matching_shipment = best.map(|found| found.receipt_id.clone());

    let cumulative_variance = cumulative_variance(total_received, invoice_total);
    let confidence =
        multi_shipment_confidence(shipment_count, cumulative_variance.to_f64().unwrap_or(1.0));

    Some(MultiShipmentAnalysis {
        shipment_count,
        total_received,
        strategy,
        cumulative_variance,
        shipment_variances,
        best_matching_shipment,
        confidence,
    })
}

/// Ratio, not percentage: 0.1 means received is 10% off the invoice.
fn cumulative_variance(total_received: Decimal, invoice_total: Decimal) -> Decimal {
    divergence_pct(total_received, invoice_total) / Decimal::ONE_HUNDRED
}

/// Confidence for the multi-shipment component.
///
/// `1.0 - count_penalty - variance_penalty`, where the count penalty is 0.05 per
/// shipment beyond three (capped at 0.25) and the variance penalty is half the
/// cumulative variance ratio (capped at 0.25). The result lies in `[0.5, 1.0]` and is
/// non-increasing in both the shipment count and the cumulative variance.
pub fn multi_shipment_confidence(shipment_count: usize, cumulative_variance: f64) -> f64 {
    let extra_shipments = shipment_count.saturating_sub(NEUTRAL_SHIPMENT_COUNT) as f64;
    let count_penalty = (extra_shipments * COUNT_PENALTY_PER_SHIPMENT).min(MAX_COUNT_PENALTY);
    let variance = if cumulative_variance.is_finite() { cumulative_variance.max(0.0) } else { 1.0 };
    let variance_penalty = (variance / 2.0).min(MAX_VARIANCE_PENALTY);
    (1.0 - count_penalty - variance_penalty).clamp(0.5, 1.0)
}

/// Merges receipt lines across shipments by normalised description, keeping
/// first-seen order. Unit price is recomputed as total / quantity.
pub fn aggregate_receipt_lines(receipts: &[SourceDocument]) -> Vec<LineItem> {
    let mut keys: Vec<String> = Vec::new();
    let mut merged: Vec<LineItem> = Vec::new();

    for line in receipts.iter().flat_map(|receipt| receipt.lines.iter()) {
        let key = normalize_description(&line.description);
        match keys.iter().position(|existing| *existing == key) {
            Some(index) => {
                let target = &mut merged[index];
                target.quantity = target.quantity.saturating_add(line.quantity);
                target.total = target.total.saturating_add(line.total);
                target.tax_amount = add_optional(target.tax_amount, line.tax_amount);
                target.discount_amount = add_optional(target.discount_amount, line.discount_amount);
                target.shipping_amount = add_optional(target.shipping_amount, line.shipping_amount);
                if target.gl_account.is_none() {
                    target.gl_account = line.gl_account.clone();
                }
            }
            None => {
                keys.push(key);
                merged.push(line.clone());
            }
        }
    }

    // Undefined (zero or overflowing) unit prices become zero, which skips the price check.
    for line in &mut merged {
        line.unit_price = line.total.checked_div(line.quantity).unwrap_or(Decimal::ZERO);
    }
    merged
}

fn add_optional(left: Option<Decimal>, right: Option<Decimal>) -> Option<Decimal> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left.saturating_add(right)),
        (Some(value), None) | (None, Some(value)) => Some(value),
        (None, None) => None,
    }
}

fn normalize_description(description: &str) -> String {
    description.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}
