use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::matching::amounts::saturating_sum;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    PurchaseOrder,
    Receipt,
}

/// A single captured line. Immutable once read from its source document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total: Decimal,
    #[serde(default)]
    pub gl_account: Option<String>,
    #[serde(default)]
    pub tax_amount: Option<Decimal>,
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
    #[serde(default)]
    pub shipping_amount: Option<Decimal>,
}

impl LineItem {
    pub fn new(
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        total: Decimal,
    ) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            total,
            gl_account: None,
            tax_amount: None,
            discount_amount: None,
            shipping_amount: None,
        }
    }

    pub fn priced(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self::new(description, quantity, unit_price, quantity.saturating_mul(unit_price))
    }

    pub fn with_gl_account(mut self, gl_account: impl Into<String>) -> Self {
        self.gl_account = Some(gl_account.into());
        self
    }

    pub fn with_tax(mut self, tax_amount: Decimal) -> Self {
        self.tax_amount = Some(tax_amount);
        self
    }

    pub fn with_discount(mut self, discount_amount: Decimal) -> Self {
        self.discount_amount = Some(discount_amount);
        self
    }

    pub fn with_shipping(mut self, shipping_amount: Decimal) -> Self {
        self.shipping_amount = Some(shipping_amount);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDetails {
    pub po_number: String,
    pub receipt_date: NaiveDate,
}

/// An invoice, purchase order or goods receipt as handed over by the document layer.
///
/// `total_amount` is assumed to equal the sum of line totals within rounding; this is
/// not enforced here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub kind: DocumentKind,
    pub vendor_name: String,
    pub currency: String,
    pub total_amount: Decimal,
    pub lines: Vec<LineItem>,
    /// Purchase order number quoted on an invoice, if any.
    #[serde(default)]
    pub po_number: Option<String>,
    #[serde(default)]
    pub receipt: Option<ReceiptDetails>,
}

impl SourceDocument {
    pub fn invoice(
        id: impl Into<String>,
        vendor_name: impl Into<String>,
        currency: impl Into<String>,
        lines: Vec<LineItem>,
    ) -> Self {
        Self::with_kind(DocumentKind::Invoice, id, vendor_name, currency, lines)
    }

    pub fn purchase_order(
        id: impl Into<String>,
        vendor_name: impl Into<String>,
        currency: impl Into<String>,
        lines: Vec<LineItem>,
    ) -> Self {
        Self::with_kind(DocumentKind::PurchaseOrder, id, vendor_name, currency, lines)
    }

    pub fn receipt(
        id: impl Into<String>,
        vendor_name: impl Into<String>,
        currency: impl Into<String>,
        po_number: impl Into<String>,
        receipt_date: NaiveDate,
        lines: Vec<LineItem>,
    ) -> Self {
        let mut document =
            Self::with_kind(DocumentKind::Receipt, id, vendor_name, currency, lines);
        document.receipt =
            Some(ReceiptDetails { po_number: po_number.into(), receipt_date });
        document
    }

    fn with_kind(
        kind: DocumentKind,
        id: impl Into<String>,
        vendor_name: impl Into<String>,
        currency: impl Into<String>,
        lines: Vec<LineItem>,
    ) -> Self {
        let total_amount = saturating_sum(lines.iter().map(|line| line.total));
        Self {
            id: DocumentId(id.into()),
            kind,
            vendor_name: vendor_name.into(),
            currency: currency.into(),
            total_amount,
            lines,
            po_number: None,
            receipt: None,
        }
    }

    pub fn with_po_number(mut self, po_number: impl Into<String>) -> Self {
        self.po_number = Some(po_number.into());
        self
    }

    pub fn ordered_quantity(&self) -> Decimal {
        saturating_sum(self.lines.iter().map(|line| line.quantity))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{DocumentKind, LineItem, SourceDocument};

    #[test]
    fn constructors_derive_total_from_lines() {
        let invoice = SourceDocument::invoice(
            "INV-1",
            "Acme Supply",
            "USD",
            vec![
                LineItem::priced("Widget", Decimal::from(2), Decimal::new(2_500, 2)),
                LineItem::priced("Gadget", Decimal::from(1), Decimal::new(1_000, 2)),
            ],
        );

        assert_eq!(invoice.kind, DocumentKind::Invoice);
        assert_eq!(invoice.total_amount, Decimal::new(6_000, 2));
        assert_eq!(invoice.ordered_quantity(), Decimal::from(3));
    }

    #[test]
    fn receipt_carries_po_reference() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap_or_default();
        let receipt = SourceDocument::receipt("GR-1", "Acme Supply", "USD", "PO-9", date, vec![]);

        let details = receipt.receipt.expect("receipt details");
        assert_eq!(details.po_number, "PO-9");
        assert_eq!(details.receipt_date, date);
        assert_eq!(receipt.total_amount, Decimal::ZERO);
    }
}
