use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{ApplicationError, ConfigKind};

/// Numeric limits applied to one match operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceProfile {
    pub price_tolerance_pct: Decimal,
    pub quantity_tolerance_pct: Decimal,
    pub amount_tolerance_abs: Decimal,
    pub auto_approval_limit: Decimal,
}

impl ToleranceProfile {
    pub fn new(
        price_tolerance_pct: Decimal,
        quantity_tolerance_pct: Decimal,
        amount_tolerance_abs: Decimal,
        auto_approval_limit: Decimal,
    ) -> Self {
        Self { price_tolerance_pct, quantity_tolerance_pct, amount_tolerance_abs, auto_approval_limit }
    }

    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("price_tolerance_pct", self.price_tolerance_pct),
            ("quantity_tolerance_pct", self.quantity_tolerance_pct),
            ("amount_tolerance_abs", self.amount_tolerance_abs),
            ("auto_approval_limit", self.auto_approval_limit),
        ];
        for (name, value) in fields {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(format!("{name} must be non-negative, got {value}"));
            }
        }
        Ok(())
    }
}

impl Default for ToleranceProfile {
    fn default() -> Self {
        pct_profile(2, 5, 10, 1_000)
    }
}

fn pct_profile(price: i64, quantity: i64, amount_abs: i64, auto_limit: i64) -> ToleranceProfile {
    ToleranceProfile::new(
        Decimal::from(price),
        Decimal::from(quantity),
        Decimal::from(amount_abs),
        Decimal::from(auto_limit),
    )
}

/// Per-ERP and per-company tolerance profiles, passed explicitly to whoever needs one.
#[derive(Clone, Debug)]
pub struct ToleranceRegistry {
    profiles: HashMap<String, ToleranceProfile>,
    default_key: Option<String>,
}

impl ToleranceRegistry {
    pub fn new(profiles: Vec<(String, ToleranceProfile)>, default_key: Option<String>) -> Self {
        let profiles =
            profiles.into_iter().map(|(key, profile)| (normalize_key(&key), profile)).collect();
        Self { profiles, default_key: default_key.map(|key| normalize_key(&key)) }
    }

    pub fn builtin() -> Self {
        let profiles = vec![
            ("basic".to_owned(), pct_profile(2, 5, 10, 1_000)),
            ("professional".to_owned(), pct_profile(3, 5, 25, 5_000)),
            ("enterprise".to_owned(), pct_profile(5, 10, 100, 25_000)),
            ("sap".to_owned(), pct_profile(1, 2, 5, 10_000)),
            ("oracle".to_owned(), pct_profile(2, 3, 10, 10_000)),
            ("netsuite".to_owned(), pct_profile(3, 5, 10, 5_000)),
            ("quickbooks".to_owned(), pct_profile(5, 5, 5, 1_000)),
            (
                "dynamics".to_owned(),
                ToleranceProfile::new(
                    Decimal::new(25, 1),
                    Decimal::from(5),
                    Decimal::from(10),
                    Decimal::from(5_000),
                ),
            ),
        ];
        Self::new(profiles, Some("basic".to_owned()))
    }

    pub fn insert(&mut self, key: &str, profile: ToleranceProfile) {
        self.profiles.insert(normalize_key(key), profile);
    }

    pub fn set_default_key(&mut self, key: Option<String>) {
        self.default_key = key.map(|key| normalize_key(&key));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.profiles.contains_key(&normalize_key(key))
    }

    /// Looks up `key`, falling back to the registry default when one is configured.
    pub fn resolve(&self, key: &str) -> Result<ToleranceProfile, ApplicationError> {
        let normalized = normalize_key(key);
        if let Some(profile) = self.profiles.get(&normalized) {
            return Ok(profile.clone());
        }

        if let Some(profile) = self.default_key.as_ref().and_then(|key| self.profiles.get(key)) {
            tracing::debug!(
                event_name = "config.tolerance_default_used",
                requested = %normalized,
                "tolerance profile not found, using registry default"
            );
            return Ok(profile.clone());
        }

        Err(ApplicationError::ConfigurationMissing {
            kind: ConfigKind::ToleranceProfile,
            key: key.to_owned(),
        })
    }
}

impl Default for ToleranceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{ToleranceProfile, ToleranceRegistry};
    use crate::errors::ApplicationError;

    #[test]
    fn resolves_builtin_profiles_case_insensitively() {
        let registry = ToleranceRegistry::builtin();
        let sap = registry.resolve(" SAP ").expect("sap profile");

        assert_eq!(sap.price_tolerance_pct, Decimal::ONE);
        assert_eq!(sap.auto_approval_limit, Decimal::from(10_000));
    }

    #[test]
    fn unknown_key_falls_back_to_default_profile() {
        let registry = ToleranceRegistry::builtin();
        let profile = registry.resolve("acme-corp").expect("fallback profile");

        assert_eq!(profile, registry.resolve("basic").expect("basic profile"));
    }

    #[test]
    fn unknown_key_without_default_is_configuration_missing() {
        let registry = ToleranceRegistry::new(
            vec![("sap".to_owned(), ToleranceProfile::default())],
            None,
        );

        let error = registry.resolve("acme-corp").expect_err("no default configured");
        assert!(matches!(error, ApplicationError::ConfigurationMissing { .. }));
    }

    #[test]
    fn negative_limits_fail_validation() {
        let mut profile = ToleranceProfile::default();
        profile.amount_tolerance_abs = Decimal::new(-1, 0);

        let message = profile.validate().expect_err("negative amount tolerance");
        assert!(message.contains("amount_tolerance_abs"));
        assert!(ToleranceProfile::default().validate().is_ok());
    }
}
