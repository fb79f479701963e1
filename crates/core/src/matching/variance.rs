use rust_decimal::Decimal;

use crate::domain::document::LineItem;
use crate::domain::matching::{LineReference, VarianceRecord, VarianceType};
use crate::matching::amounts::percent_of;
use crate::tolerance::ToleranceProfile;

/// Which document the invoice line is being compared against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceSide {
    PurchaseOrder,
    Receipt,
}

impl ReferenceSide {
    fn label(self) -> &'static str {
        match self {
            Self::PurchaseOrder => "PO",
            Self::Receipt => "receipt",
        }
    }
}

/// Differences below one cent are rounding noise.
pub fn noise_floor() -> Decimal {
    Decimal::new(1, 2)
}

pub struct VarianceAnalyzer<'a> {
    tolerance: &'a ToleranceProfile,
}

struct Comparison {
    variance_type: VarianceType,
    invoice_value: Decimal,
    reference_value: Decimal,
    tolerance_pct: Decimal,
    absolute_allowance: Option<Decimal>,
}

impl<'a> VarianceAnalyzer<'a> {
    pub fn new(tolerance: &'a ToleranceProfile) -> Self {
        Self { tolerance }
    }

    /// Compares a paired invoice line against its reference line.
    pub fn analyze(
        &self,
        line_index: usize,
        invoice_line: &LineItem,
        reference_line: &LineItem,
        side: ReferenceSide,
    ) -> Vec<VarianceRecord> {
        let mut comparisons = vec![
            Comparison {
                variance_type: VarianceType::Price,
                invoice_value: invoice_line.unit_price,
                reference_value: reference_line.unit_price,
                tolerance_pct: self.tolerance.price_tolerance_pct,
                absolute_allowance: None,
            },
            Comparison {
                variance_type: VarianceType::Quantity,
                invoice_value: invoice_line.quantity,
                reference_value: reference_line.quantity,
                tolerance_pct: self.tolerance.quantity_tolerance_pct,
                absolute_allowance: None,
            },
        ];

        let optional_amounts = [
            (VarianceType::Tax, invoice_line.tax_amount, reference_line.tax_amount),
            (VarianceType::Discount, invoice_line.discount_amount, reference_line.discount_amount),
            (VarianceType::Shipping, invoice_line.shipping_amount, reference_line.shipping_amount),
        ];
        for (variance_type, invoice_value, reference_value) in optional_amounts {
            if let (Some(invoice_value), Some(reference_value)) = (invoice_value, reference_value) {
                comparisons.push(Comparison {
                    variance_type,
                    invoice_value,
                    reference_value,
                    tolerance_pct: self.tolerance.price_tolerance_pct,
                    absolute_allowance: Some(self.tolerance.amount_tolerance_abs),
                });
            }
        }

        let line = LineReference { line_index, description: invoice_line.description.clone() };
        comparisons
            .into_iter()
            .filter_map(|comparison| self.compare(&line, comparison, side))
            .collect()
    }

    /// Record for an invoice line that has no counterpart on the reference side.
    pub fn unmatched(
        &self,
        line_index: usize,
        invoice_line: &LineItem,
        side: ReferenceSide,
    ) -> VarianceRecord {
        VarianceRecord {
            variance_type: VarianceType::Description,
            line: LineReference { line_index, description: invoice_line.description.clone() },
            invoice_value: invoice_line.total,
            po_value: None,
            receipt_value: None,
            variance_amount: invoice_line.total,
            variance_percentage: Decimal::ONE_HUNDRED,
            within_tolerance: false,
            requires_approval: true,
            explanation: format!(
                "Invoice line `{}` has no matching {} line",
                invoice_line.description,
                side.label()
            ),
            suggested_action: format!(
                "Identify the {} line for `{}` or remove it from the invoice",
                side.label(),
                invoice_line.description
            ),
        }
    }

    fn compare(
        &self,
        line: &LineReference,
        comparison: Comparison,
        side: ReferenceSide,
    ) -> Option<VarianceRecord> {
        // Percentage is undefined against a zero reference.
        if comparison.reference_value.is_zero() {
            return None;
        }

        let variance_amount = comparison.invoice_value.saturating_sub(comparison.reference_value);
        let variance_percentage = percent_of(variance_amount, comparison.reference_value);
        let within_pct = variance_percentage <= comparison.tolerance_pct;
        let within_abs = comparison
            .absolute_allowance
            .is_some_and(|allowance| variance_amount.abs() <= allowance);
        let within_tolerance = within_pct || within_abs;

        if within_tolerance && variance_amount.abs() <= noise_floor() {
            return None;
        }

        let (po_value, receipt_value) = match side {
            ReferenceSide::PurchaseOrder => (Some(comparison.reference_value), None),
            ReferenceSide::Receipt => (None, Some(comparison.reference_value)),
        };

        Some(VarianceRecord {
            variance_type: comparison.variance_type,
            line: line.clone(),
            invoice_value: comparison.invoice_value,
            po_value,
            receipt_value,
            variance_amount,
            variance_percentage,
            within_tolerance,
            requires_approval: !within_tolerance,
            explanation: format!(
                "{} on `{}`: invoice {} vs {} {} ({}{}%, tolerance {}%)",
                type_label(comparison.variance_type),
                line.description,
                comparison.invoice_value,
                side.label(),
                comparison.reference_value,
                if variance_amount.is_sign_negative() { "-" } else { "+" },
                variance_percentage,
                comparison.tolerance_pct
            ),
            suggested_action: suggested_action(comparison.variance_type, within_tolerance, side)
                .to_owned(),
        })
    }
}

fn type_label(variance_type: VarianceType) -> &'static str {
    match variance_type {
        VarianceType::Price => "Price variance",
        VarianceType::Quantity => "Quantity variance",
        VarianceType::Tax => "Tax variance",
        VarianceType::Description => "Description mismatch",
        VarianceType::Discount => "Discount variance",
        VarianceType::Shipping => "Shipping variance",
    }
}

fn suggested_action(
    variance_type: VarianceType,
    within_tolerance: bool,
    side: ReferenceSide,
) -> &'static str {
    if within_tolerance {
        return "Accept: within configured tolerance";
    }
    match (variance_type, side) {
        (VarianceType::Price, _) => "Confirm unit price with the vendor or request a credit note",
        (VarianceType::Quantity, ReferenceSide::Receipt) => {
            "Hold payment until the remaining quantity is received"
        }
        (VarianceType::Quantity, ReferenceSide::PurchaseOrder) => {
            "Verify billed quantity against the purchase order"
        }
        (VarianceType::Tax, _) => "Review tax calculation and jurisdiction",
        (VarianceType::Discount, _) => "Confirm negotiated discount terms",
        (VarianceType::Shipping, _) => "Verify freight charges against shipping terms",
        (VarianceType::Description, _) => "Confirm the billed item with the requester",
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{ReferenceSide, VarianceAnalyzer};
    use crate::matching::amounts::variance_pct_cap;
    use crate::domain::document::LineItem;
    use crate::domain::matching::VarianceType;
    use crate::tolerance::ToleranceProfile;

    fn line(quantity: i64, unit_price: Decimal) -> LineItem {
        LineItem::priced("Industrial widgets", Decimal::from(quantity), unit_price)
    }

    #[test]
    fn exact_match_produces_no_records() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            0,
            &line(10, Decimal::from(50)),
            &line(10, Decimal::from(50)),
            ReferenceSide::PurchaseOrder,
        );

        assert!(records.is_empty());
    }

    #[test]
    fn price_over_tolerance_requires_approval() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            0,
            &line(1, Decimal::from(1_250)),
            &line(1, Decimal::from(1_200)),
            ReferenceSide::PurchaseOrder,
        );

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.variance_type, VarianceType::Price);
        assert_eq!(record.variance_amount, Decimal::from(50));
        assert_eq!(record.variance_percentage, Decimal::new(41_667, 4));
        assert_eq!(record.po_value, Some(Decimal::from(1_200)));
        assert!(!record.within_tolerance);
        assert!(record.requires_approval);
    }

    #[test]
    fn small_variance_within_tolerance_is_recorded_without_approval() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            2,
            &line(1, Decimal::new(10_100, 2)),
            &line(1, Decimal::from(100)),
            ReferenceSide::PurchaseOrder,
        );

        assert_eq!(records.len(), 1);
        assert!(records[0].within_tolerance);
        assert!(!records[0].requires_approval);
        assert_eq!(records[0].line.line_index, 2);
    }

    #[test]
    fn zero_reference_price_is_skipped() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            0,
            &line(5, Decimal::from(20)),
            &line(5, Decimal::ZERO),
            ReferenceSide::Receipt,
        );

        assert!(records.is_empty());
    }

    #[test]
    fn short_receipt_quantity_is_flagged_against_receipt() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            0,
            &line(10, Decimal::from(5)),
            &line(8, Decimal::from(5)),
            ReferenceSide::Receipt,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].variance_type, VarianceType::Quantity);
        assert_eq!(records[0].receipt_value, Some(Decimal::from(8)));
        assert_eq!(records[0].po_value, None);
        assert_eq!(records[0].variance_percentage, Decimal::from(25));
    }

    #[test]
    fn tax_compared_only_when_both_sides_carry_it() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let invoice = line(1, Decimal::from(100)).with_tax(Decimal::from(30));

        let missing = analyzer.analyze(
            0,
            &invoice,
            &line(1, Decimal::from(100)),
            ReferenceSide::PurchaseOrder,
        );
        assert!(missing.is_empty());

        let present = analyzer.analyze(
            0,
            &invoice,
            &line(1, Decimal::from(100)).with_tax(Decimal::from(8)),
            ReferenceSide::PurchaseOrder,
        );
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].variance_type, VarianceType::Tax);
        assert!(!present[0].within_tolerance);
    }

    #[test]
    fn shipping_within_absolute_allowance_is_tolerated() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            0,
            &line(1, Decimal::from(100)).with_shipping(Decimal::from(25)),
            &line(1, Decimal::from(100)).with_shipping(Decimal::from(20)),
            ReferenceSide::PurchaseOrder,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].variance_type, VarianceType::Shipping);
        assert!(records[0].within_tolerance, "5.00 is inside the 10.00 absolute allowance");
    }

    #[test]
    fn extreme_price_ratio_is_capped_out_of_tolerance() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            0,
            &line(1, Decimal::from_i128_with_scale(10_i128.pow(20), 0)),
            &line(1, Decimal::new(1, 10)),
            ReferenceSide::PurchaseOrder,
        );

        let price = records
            .iter()
            .find(|record| record.variance_type == VarianceType::Price)
            .expect("price record");
        assert_eq!(price.variance_percentage, variance_pct_cap());
        assert!(!price.within_tolerance);
        assert!(price.requires_approval);
    }

    #[test]
    fn discount_gap_beyond_allowance_is_flagged() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let records = analyzer.analyze(
            1,
            &line(4, Decimal::from(250)).with_discount(Decimal::from(40)),
            &line(4, Decimal::from(250)).with_discount(Decimal::from(100)),
            ReferenceSide::PurchaseOrder,
        );

        assert_eq!(records.len(), 1);
        let discount = &records[0];
        assert_eq!(discount.variance_type, VarianceType::Discount);
        assert_eq!(discount.variance_amount, Decimal::from(-60));
        assert_eq!(discount.variance_percentage, Decimal::from(60));
        assert!(!discount.within_tolerance);
        assert_eq!(discount.suggested_action, "Confirm negotiated discount terms");
    }

    #[test]
    fn unmatched_line_is_full_variance() {
        let profile = ToleranceProfile::default();
        let analyzer = VarianceAnalyzer::new(&profile);
        let record =
            analyzer.unmatched(3, &line(2, Decimal::from(40)), ReferenceSide::PurchaseOrder);

        assert_eq!(record.variance_type, VarianceType::Description);
        assert_eq!(record.variance_amount, Decimal::from(80));
        assert_eq!(record.variance_percentage, Decimal::ONE_HUNDRED);
        assert!(record.requires_approval);
    }
}
