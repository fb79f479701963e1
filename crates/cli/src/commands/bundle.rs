use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use matchgate_core::{DocumentKind, InMemoryDocumentStore, SourceDocument};
use serde::Deserialize;

/// Documents for one matching run, as exported by the capture layer.
#[derive(Clone, Debug, Deserialize)]
pub struct DocumentBundle {
    pub invoice: SourceDocument,
    #[serde(default)]
    pub purchase_orders: Vec<SourceDocument>,
    #[serde(default)]
    pub receipts: Vec<SourceDocument>,
    /// ERP or company key used to pick a tolerance profile when none is given.
    #[serde(default)]
    pub erp: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
}

impl DocumentBundle {
    pub fn from_json(raw: &str) -> Result<Self> {
        let bundle: Self = serde_json::from_str(raw).context("bundle is not valid JSON")?;
        bundle.check_kinds()?;
        Ok(bundle)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read bundle `{}`", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid bundle `{}`", path.display()))
    }

    pub fn store(&self) -> InMemoryDocumentStore {
        InMemoryDocumentStore::with_documents(
            self.purchase_orders.iter().chain(self.receipts.iter()).cloned().collect(),
        )
    }

    /// Profile key precedence: explicit flag, then bundle ERP, then company id.
    pub fn profile_key<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .or(self.erp.as_deref())
            .or(self.company_id.as_deref())
            .unwrap_or("default")
    }

    fn check_kinds(&self) -> Result<()> {
        if self.invoice.kind != DocumentKind::Invoice {
            bail!("`invoice` has kind {:?}", self.invoice.kind);
        }
        if let Some(po) =
            self.purchase_orders.iter().find(|po| po.kind != DocumentKind::PurchaseOrder)
        {
            bail!("`purchase_orders` contains {} of kind {:?}", po.id, po.kind);
        }
        if let Some(receipt) =
            self.receipts.iter().find(|receipt| receipt.kind != DocumentKind::Receipt)
        {
            bail!("`receipts` contains {} of kind {:?}", receipt.id, receipt.kind);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentBundle;

    #[test]
    fn rejects_misfiled_documents() {
        let raw = r#"{
            "invoice": {"id": "PO-1", "kind": "purchase_order", "vendor_name": "Acme",
                        "currency": "USD", "total_amount": "10", "lines": []}
        }"#;

        let error = DocumentBundle::from_json(raw).expect_err("wrong kind");
        assert!(error.to_string().contains("invoice"));
    }

    #[test]
    fn profile_key_prefers_explicit_flag() {
        let raw = r#"{
            "invoice": {"id": "INV-1", "kind": "invoice", "vendor_name": "Acme",
                        "currency": "USD", "total_amount": "10", "lines": []},
            "erp": "sap",
            "company_id": "acme"
        }"#;
        let bundle = DocumentBundle::from_json(raw).expect("bundle");

        assert_eq!(bundle.profile_key(Some("oracle")), "oracle");
        assert_eq!(bundle.profile_key(None), "sap");
    }
}
