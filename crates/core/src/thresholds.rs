use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{ApplicationError, ConfigKind};
use crate::tolerance::normalize_key;

/// Monetary approval thresholds for one company tier, ascending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalThresholds {
    pub manager: Decimal,
    pub director: Decimal,
    pub executive: Decimal,
}

impl ApprovalThresholds {
    pub fn new(manager: Decimal, director: Decimal, executive: Decimal) -> Self {
        Self { manager, director, executive }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.manager.is_sign_negative() && !self.manager.is_zero() {
            return Err(format!("manager threshold must be non-negative, got {}", self.manager));
        }
        if self.manager > self.director || self.director > self.executive {
            return Err(format!(
                "thresholds must ascend manager <= director <= executive, got {} / {} / {}",
                self.manager, self.director, self.executive
            ));
        }
        Ok(())
    }
}

fn thresholds(manager: i64, director: i64, executive: i64) -> ApprovalThresholds {
    ApprovalThresholds::new(Decimal::from(manager), Decimal::from(director), Decimal::from(executive))
}

#[derive(Clone, Debug)]
pub struct ThresholdRegistry {
    tiers: HashMap<String, ApprovalThresholds>,
}

impl ThresholdRegistry {
    pub fn new(tiers: Vec<(String, ApprovalThresholds)>) -> Self {
        Self { tiers: tiers.into_iter().map(|(tier, value)| (normalize_key(&tier), value)).collect() }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ("basic".to_owned(), thresholds(1_000, 10_000, 50_000)),
            ("professional".to_owned(), thresholds(5_000, 25_000, 100_000)),
            ("enterprise".to_owned(), thresholds(10_000, 50_000, 250_000)),
        ])
    }

    pub fn insert(&mut self, tier: &str, value: ApprovalThresholds) {
        self.tiers.insert(normalize_key(tier), value);
    }

    pub fn resolve(&self, tier: &str) -> Result<ApprovalThresholds, ApplicationError> {
        self.tiers.get(&normalize_key(tier)).cloned().ok_or_else(|| {
            ApplicationError::ConfigurationMissing {
                kind: ConfigKind::ApprovalThresholds,
                key: tier.to_owned(),
            }
        })
    }
}

impl Default for ThresholdRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
