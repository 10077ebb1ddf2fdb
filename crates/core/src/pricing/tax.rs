use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::estimate::RawEstimate;

/// A branch whose name contains `pattern` (case-insensitive) is taxed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxedBranch {
    pub pattern: String,
    pub statutory_rate: Decimal,
}

/// 10.1%, the combined rate observed for the taxed branches.
pub fn default_statutory_rate() -> Decimal {
    Decimal::new(101, 3)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxPolicy {
    pub branches: Vec<TaxedBranch>,
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self {
            branches: ["kent", "everett"]
                .into_iter()
                .map(|pattern| TaxedBranch {
                    pattern: pattern.to_string(),
                    statutory_rate: default_statutory_rate(),
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaxClass<'a> {
    Taxed(&'a TaxedBranch),
    Untaxed,
}

impl TaxPolicy {
    /// First configured branch whose pattern occurs in the branch name.
    pub fn classify(&self, branch_name: Option<&str>) -> TaxClass<'_> {
        let Some(name) = branch_name else {
            return TaxClass::Untaxed;
        };
        let name = name.to_lowercase();

        self.branches
            .iter()
            .find(|branch| {
                let pattern = branch.pattern.trim().to_lowercase();
                !pattern.is_empty() && name.contains(&pattern)
            })
            .map_or(TaxClass::Untaxed, TaxClass::Taxed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxBasis {
    /// Taxed branch; the recorded after-tax price was used verbatim.
    RecordedAfterTax,
    /// Taxed branch without a recorded after-tax price.
    StatutoryRate,
    Untaxed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxAdjustment {
    pub adjusted_price: Option<Decimal>,
    pub basis: TaxBasis,
    pub statutory_rate: Option<Decimal>,
    pub matched_pattern: Option<String>,
}

pub trait TaxAdjuster: Send + Sync {
    fn adjust(&self, estimate: &RawEstimate) -> TaxAdjustment;
}

#[derive(Clone, Debug, Default)]
pub struct BranchTaxAdjuster {
    policy: TaxPolicy,
}

impl BranchTaxAdjuster {
    pub fn new(policy: TaxPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TaxPolicy {
        &self.policy
    }
}

impl TaxAdjuster for BranchTaxAdjuster {
    fn adjust(&self, estimate: &RawEstimate) -> TaxAdjustment {
        adjust_price(
            &self.policy,
            estimate.final_price,
            estimate.branch_name(),
            estimate.recorded_price_after_taxes(),
        )
    }
}

/// Normalizes a recorded sale price for branch taxation.
///
/// Recorded after-tax figures win over the statutory rate because they can
/// carry fees and rounding that a flat rate does not reproduce.
pub fn adjust_price(
    policy: &TaxPolicy,
    final_price: Option<Decimal>,
    branch_name: Option<&str>,
    recorded_after_tax: Option<Decimal>,
) -> TaxAdjustment {
    let branch = match policy.classify(branch_name) {
        TaxClass::Taxed(branch) => branch,
        TaxClass::Untaxed => {
            return TaxAdjustment {
                adjusted_price: final_price,
                basis: TaxBasis::Untaxed,
                statutory_rate: None,
                matched_pattern: None,
            };
        }
    };

    match recorded_after_tax {
        Some(recorded) => TaxAdjustment {
            adjusted_price: Some(recorded),
            basis: TaxBasis::RecordedAfterTax,
            statutory_rate: Some(branch.statutory_rate),
            matched_pattern: Some(branch.pattern.clone()),
        },
        None => TaxAdjustment {
            adjusted_price: final_price
                .and_then(|price| price.checked_mul(Decimal::ONE + branch.statutory_rate)),
            basis: TaxBasis::StatutoryRate,
            statutory_rate: Some(branch.statutory_rate),
            matched_pattern: Some(branch.pattern.clone()),
        },
    }
}
