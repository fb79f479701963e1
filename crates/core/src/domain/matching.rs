use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    TwoWay,
    ThreeWay,
}

/// Outcome of one match invocation. Exactly one per [`MatchResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    PerfectMatch,
    ExcellentMatch,
    GoodMatch,
    PartialMatch,
    PriceVariance,
    QuantityVariance,
    ToleranceExceeded,
    PoNotFound,
    ReceiptNotFound,
    MultipleMatches,
    NoMatch,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerfectMatch => "perfect_match",
            Self::ExcellentMatch => "excellent_match",
            Self::GoodMatch => "good_match",
            Self::PartialMatch => "partial_match",
            Self::PriceVariance => "price_variance",
            Self::QuantityVariance => "quantity_variance",
            Self::ToleranceExceeded => "tolerance_exceeded",
            Self::PoNotFound => "po_not_found",
            Self::ReceiptNotFound => "receipt_not_found",
            Self::MultipleMatches => "multiple_matches",
            Self::NoMatch => "no_match",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceType {
    Price,
    Quantity,
    Tax,
    Description,
    Discount,
    Shipping,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReference {
    pub line_index: usize,
    pub description: String,
}

/// One detected discrepancy on a matched (or unmatched) invoice line.
///
/// `variance_percentage` is always non-negative; records are never produced when the
/// reference value is zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarianceRecord {
    pub variance_type: VarianceType,
    pub line: LineReference,
    pub invoice_value: Decimal,
    pub po_value: Option<Decimal>,
    pub receipt_value: Option<Decimal>,
    pub variance_amount: Decimal,
    pub variance_percentage: Decimal,
    pub within_tolerance: bool,
    pub requires_approval: bool,
    pub explanation: String,
    pub suggested_action: String,
}

impl VarianceRecord {
    pub fn magnitude(&self) -> Decimal {
        self.variance_amount.abs()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrailEntry {
    pub action: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl AuditTrailEntry {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            timestamp,
            detail: detail.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStrategy {
    CumulativeMatch,
    PartialBilling,
    ProgressiveDelivery,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentSummary {
    pub receipt_id: DocumentId,
    pub receipt_date: Option<NaiveDate>,
    pub total_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentVariance {
    pub receipt_id: DocumentId,
    pub variance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiShipmentAnalysis {
    pub shipment_count: usize,
    pub total_received: Decimal,
    pub strategy: ShipmentStrategy,
    /// `|total_received - invoice_total| / invoice_total`, as a ratio.
    pub cumulative_variance: Decimal,
    pub shipment_variances: Vec<ShipmentVariance>,
    /// Operator guidance only; never feeds status derivation.
    pub best_matching_shipment: Option<DocumentId>,
    pub confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub po_match: f64,
    pub shipment_match: Option<f64>,
    pub consistency: Option<f64>,
    pub multi_shipment: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: MatchId,
    pub match_type: MatchType,
    pub status: MatchStatus,
    pub confidence_score: f64,
    pub breakdown: ConfidenceBreakdown,
    pub invoice_id: DocumentId,
    pub invoice_total: Decimal,
    pub po_id: Option<DocumentId>,
    pub shipments: Vec<ShipmentSummary>,
    pub multi_shipment: Option<MultiShipmentAnalysis>,
    pub variances: Vec<VarianceRecord>,
    pub total_variance: Decimal,
    pub variance_percentage: Decimal,
    pub auto_approval_eligible: bool,
    /// Invoice line index to suggested GL account.
    pub suggested_gl_accounts: BTreeMap<usize, String>,
    pub audit_trail: Vec<AuditTrailEntry>,
}

impl MatchResult {
    pub fn has_out_of_tolerance_variance(&self) -> bool {
        self.variances.iter().any(|record| !record.within_tolerance)
    }
}
