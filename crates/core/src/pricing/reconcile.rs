use std::fmt;

use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::domain::estimate::RawEstimate;
use crate::domain::lenient::decimal_from_value;
use crate::pricing::tax::TaxAdjustment;

pub const NOT_APPLICABLE: &str = "N/A";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Unknown,
}

impl ErrorSeverity {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage deviation of the recorded price from the expected price, or
/// `N/A` when there is nothing meaningful to compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorPercentage {
    Value(Decimal),
    NotApplicable,
}

impl ErrorPercentage {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            Self::Value(value) => Some(*value),
            Self::NotApplicable => None,
        }
    }
}

impl fmt::Display for ErrorPercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{:.2}%", value),
            Self::NotApplicable => f.write_str(NOT_APPLICABLE),
        }
    }
}

/// Percentages go out as JSON numbers so consumers can tell them from `N/A`.
impl Serialize for ErrorPercentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(value) => rust_decimal::serde::float::serialize(value, serializer),
            Self::NotApplicable => serializer.serialize_str(NOT_APPLICABLE),
        }
    }
}

impl<'de> Deserialize<'de> for ErrorPercentage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.as_str() == Some(NOT_APPLICABLE) {
            return Ok(Self::NotApplicable);
        }
        decimal_from_value(&value)
            .map(Self::Value)
            .ok_or_else(|| D::Error::custom(format!("invalid error percentage `{value}`")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    /// Deviations up to and including this percentage are `Low`.
    pub low_max_pct: Decimal,
    /// Deviations up to and including this percentage are `Medium`.
    pub medium_max_pct: Decimal,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self { low_max_pct: Decimal::new(5, 0), medium_max_pct: Decimal::new(10, 0) }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, percentage: ErrorPercentage) -> ErrorSeverity {
        match percentage {
            ErrorPercentage::NotApplicable => ErrorSeverity::Unknown,
            ErrorPercentage::Value(value) if value <= self.low_max_pct => ErrorSeverity::Low,
            ErrorPercentage::Value(value) if value <= self.medium_max_pct => ErrorSeverity::Medium,
            ErrorPercentage::Value(_) => ErrorSeverity::High,
        }
    }
}

/// Which recorded price the expected price is compared against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceBasis {
    #[default]
    FinalPrice,
    AdjustedPrice,
}

impl std::str::FromStr for PriceBasis {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "final_price" => Ok(Self::FinalPrice),
            "adjusted_price" => Ok(Self::AdjustedPrice),
            other => Err(format!(
                "unsupported price basis `{other}` (expected final_price|adjusted_price)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcileInput {
    pub multiplier: Option<Decimal>,
    pub true_cost: Decimal,
    pub discount_pct: Decimal,
    pub price: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub price_basis: PriceBasis,
    pub compared_price: Option<Decimal>,
    pub expected_price: Option<Decimal>,
    pub expected_price_after_discount: Option<Decimal>,
    pub absolute_error: Option<Decimal>,
    pub error_percentage: ErrorPercentage,
    pub error_severity: ErrorSeverity,
    /// Display only; never feeds back into the error percentage.
    pub discount_adjusted_multiplier: Option<Decimal>,
}

pub trait Reconciler: Send + Sync {
    fn reconcile(
        &self,
        estimate: &RawEstimate,
        multiplier: Option<Decimal>,
        tax: &TaxAdjustment,
    ) -> Reconciliation;
}

#[derive(Clone, Debug, Default)]
pub struct DiscountAwareReconciler {
    thresholds: SeverityThresholds,
    price_basis: PriceBasis,
}

impl DiscountAwareReconciler {
    pub fn new(thresholds: SeverityThresholds, price_basis: PriceBasis) -> Self {
        Self { thresholds, price_basis }
    }
}

impl Reconciler for DiscountAwareReconciler {
    fn reconcile(
        &self,
        estimate: &RawEstimate,
        multiplier: Option<Decimal>,
        tax: &TaxAdjustment,
    ) -> Reconciliation {
        let price = match self.price_basis {
            PriceBasis::FinalPrice => estimate.final_price,
            PriceBasis::AdjustedPrice => tax.adjusted_price,
        };
        let input = ReconcileInput {
            multiplier,
            true_cost: estimate.true_cost.unwrap_or(Decimal::ZERO),
            discount_pct: estimate.discount_pct(),
            price,
        };

        let mut reconciliation = reconcile(&input, &self.thresholds);
        reconciliation.price_basis = self.price_basis;
        reconciliation
    }
}

/// Compares the price the multiplier should have produced with the recorded
/// price. Arithmetic overflow on absurd inputs degrades to `N/A`.
pub fn reconcile(input: &ReconcileInput, thresholds: &SeverityThresholds) -> Reconciliation {
    let discount_factor = (input.discount_pct > Decimal::ZERO)
        .then(|| Decimal::ONE - input.discount_pct / Decimal::ONE_HUNDRED);
    let apply_discount = |value: Decimal| match discount_factor {
        Some(factor) => value.checked_mul(factor),
        None => Some(value),
    };

    let expected_price = input.multiplier.and_then(|m| input.true_cost.checked_mul(m));
    let expected_price_after_discount = expected_price.and_then(apply_discount);
    let discount_adjusted_multiplier = input.multiplier.and_then(apply_discount);

    let absolute_error = expected_price_after_discount
        .zip(input.price)
        .and_then(|(expected, price)| expected.checked_sub(price))
        .map(|difference| difference.abs());

    let error_percentage = match (absolute_error, input.price) {
        (Some(error), Some(price)) if price > Decimal::ZERO => error
            .checked_div(price)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .map_or(ErrorPercentage::NotApplicable, |pct| ErrorPercentage::Value(pct.normalize())),
        _ => ErrorPercentage::NotApplicable,
    };

    Reconciliation {
        price_basis: PriceBasis::default(),
        compared_price: input.price,
        expected_price,
        expected_price_after_discount,
        absolute_error,
        error_percentage,
        error_severity: thresholds.classify(error_percentage),
        discount_adjusted_multiplier,
    }
}
