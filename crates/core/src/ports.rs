use thiserror::Error;

use crate::domain::document::{DocumentKind, SourceDocument};
use crate::errors::ApplicationError;
use crate::tolerance::normalize_key;

/// Failure raised by an external collaborator. Never retried here.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct LookupError(pub String);

impl From<LookupError> for ApplicationError {
    fn from(value: LookupError) -> Self {
        Self::Lookup(value.0)
    }
}

/// Document storage boundary used by the match engine.
pub trait DocumentLookup {
    fn purchase_order(&self, po_number: &str) -> Result<Option<SourceDocument>, LookupError>;
    fn purchase_orders_for_vendor(
        &self,
        vendor_name: &str,
    ) -> Result<Vec<SourceDocument>, LookupError>;
    fn receipts_for_po(&self, po_number: &str) -> Result<Vec<SourceDocument>, LookupError>;
}

impl<T> DocumentLookup for &T
where
    T: DocumentLookup + ?Sized,
{
    fn purchase_order(&self, po_number: &str) -> Result<Option<SourceDocument>, LookupError> {
        (**self).purchase_order(po_number)
    }

    fn purchase_orders_for_vendor(
        &self,
        vendor_name: &str,
    ) -> Result<Vec<SourceDocument>, LookupError> {
        (**self).purchase_orders_for_vendor(vendor_name)
    }

    fn receipts_for_po(&self, po_number: &str) -> Result<Vec<SourceDocument>, LookupError> {
        (**self).receipts_for_po(po_number)
    }
}

/// Fraud/risk probability for an invoice, computed outside this crate.
pub trait RiskScoreProvider {
    fn risk_score(&self, invoice: &SourceDocument) -> Result<f64, LookupError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FixedRiskScore(pub f64);

impl RiskScoreProvider for FixedRiskScore {
    fn risk_score(&self, _invoice: &SourceDocument) -> Result<f64, LookupError> {
        Ok(self.0)
    }
}

/// Document lookup over an in-memory set of POs and receipts.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentStore {
    purchase_orders: Vec<SourceDocument>,
    receipts: Vec<SourceDocument>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<SourceDocument>) -> Self {
        let mut store = Self::default();
        for document in documents {
            store.insert(document);
        }
        store
    }

    /// Invoices are ignored; they are never looked up.
    pub fn insert(&mut self, document: SourceDocument) {
        match document.kind {
            DocumentKind::PurchaseOrder => self.purchase_orders.push(document),
            DocumentKind::Receipt => self.receipts.push(document),
            DocumentKind::Invoice => {}
        }
    }
}

impl DocumentLookup for InMemoryDocumentStore {
    fn purchase_order(&self, po_number: &str) -> Result<Option<SourceDocument>, LookupError> {
        let wanted = normalize_key(po_number);
        Ok(self.purchase_orders.iter().find(|po| normalize_key(po.id.as_str()) == wanted).cloned())
    }

    fn purchase_orders_for_vendor(
        &self,
        vendor_name: &str,
    ) -> Result<Vec<SourceDocument>, LookupError> {
        let wanted = normalize_key(vendor_name);
        Ok(self
            .purchase_orders
            .iter()
            .filter(|po| normalize_key(&po.vendor_name) == wanted)
            .cloned()
            .collect())
    }

    fn receipts_for_po(&self, po_number: &str) -> Result<Vec<SourceDocument>, LookupError> {
        let wanted = normalize_key(po_number);
        Ok(self
            .receipts
            .iter()
            .filter(|receipt| {
                receipt
                    .receipt
                    .as_ref()
                    .is_some_and(|details| normalize_key(&details.po_number) == wanted)
            })
            .cloned()
            .collect())
    }
}

/// Lookup whose every call fails; used to exercise collaborator error paths.
#[derive(Clone, Debug)]
pub struct FailingDocumentLookup(pub String);

impl DocumentLookup for FailingDocumentLookup {
    fn purchase_order(&self, _po_number: &str) -> Result<Option<SourceDocument>, LookupError> {
        Err(LookupError(self.0.clone()))
    }

    fn purchase_orders_for_vendor(
        &self,
        _vendor_name: &str,
    ) -> Result<Vec<SourceDocument>, LookupError> {
        Err(LookupError(self.0.clone()))
    }

    fn receipts_for_po(&self, _po_number: &str) -> Result<Vec<SourceDocument>, LookupError> {
        Err(LookupError(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DocumentLookup, InMemoryDocumentStore};
    use crate::domain::document::SourceDocument;

    #[test]
    fn store_indexes_documents_by_kind() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap_or_default();
        let store = InMemoryDocumentStore::with_documents(vec![
            SourceDocument::purchase_order("PO-7", "Acme Supply", "USD", vec![]),
            SourceDocument::receipt("GR-1", "Acme Supply", "USD", "po-7", date, vec![]),
            SourceDocument::invoice("INV-1", "Acme Supply", "USD", vec![]),
        ]);

        assert!(store.purchase_order("po-7").expect("lookup").is_some());
        assert_eq!(store.purchase_orders_for_vendor("ACME SUPPLY").expect("lookup").len(), 1);
        assert_eq!(store.receipts_for_po("PO-7").expect("lookup").len(), 1);
        assert!(store.purchase_order("INV-1").expect("lookup").is_none());
    }
}
