pub mod aggregate;
pub mod reconcile;
pub mod resolver;
pub mod snapshot;
pub mod split;
pub mod tax;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;
use crate::domain::branch::BranchKey;
use crate::domain::estimate::RawEstimate;

use self::{
    reconcile::{
        DiscountAwareReconciler, ErrorPercentage, ErrorSeverity, Reconciler, Reconciliation,
    },
    resolver::{MultiplierResolution, MultiplierResolver, MultiplierSource, ResolutionContext},
    snapshot::{global_info_index, parse_snapshot},
    split::{split_costs, CostSplit},
    tax::{BranchTaxAdjuster, TaxAdjuster, TaxAdjustment},
};

/// One estimate after every pricing stage has run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEstimate {
    pub estimate: RawEstimate,
    pub fingerprint: String,
    pub costs: CostSplit,
    pub resolution: MultiplierResolution,
    pub tax: TaxAdjustment,
    pub reconciliation: Reconciliation,
}

impl ResolvedEstimate {
    pub fn multiplier(&self) -> Option<Decimal> {
        self.resolution.multiplier
    }

    pub fn source(&self) -> MultiplierSource {
        self.resolution.source
    }

    pub fn base_cost(&self) -> Decimal {
        self.costs.base_cost
    }

    pub fn adjusted_price(&self) -> Option<Decimal> {
        self.tax.adjusted_price
    }

    pub fn error_percentage(&self) -> ErrorPercentage {
        self.reconciliation.error_percentage
    }

    pub fn error_severity(&self) -> ErrorSeverity {
        self.reconciliation.error_severity
    }

    pub fn branch_key(&self) -> BranchKey {
        self.estimate.branch_key()
    }
}

pub trait MultiplierEngine: Send + Sync {
    fn resolve(&self, context: &ResolutionContext<'_>) -> MultiplierResolution;
}

impl MultiplierEngine for MultiplierResolver {
    fn resolve(&self, context: &ResolutionContext<'_>) -> MultiplierResolution {
        MultiplierResolver::resolve(self, context)
    }
}

pub trait EstimateRuntime: Send + Sync {
    fn resolve_estimate(&self, estimate: &RawEstimate) -> ResolvedEstimate;
}

pub struct DeterministicEstimateRuntime<R, T, C> {
    multiplier_engine: R,
    tax_adjuster: T,
    reconciler: C,
}

impl<R, T, C> DeterministicEstimateRuntime<R, T, C> {
    pub fn new(multiplier_engine: R, tax_adjuster: T, reconciler: C) -> Self {
        Self { multiplier_engine, tax_adjuster, reconciler }
    }
}

impl DeterministicEstimateRuntime<MultiplierResolver, BranchTaxAdjuster, DiscountAwareReconciler> {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            MultiplierResolver::from_policy(&config.resolver),
            BranchTaxAdjuster::new(config.tax.policy()),
            DiscountAwareReconciler::new(
                config.reconciliation.thresholds(),
                config.reconciliation.price_basis,
            ),
        )
    }
}

impl Default
    for DeterministicEstimateRuntime<MultiplierResolver, BranchTaxAdjuster, DiscountAwareReconciler>
{
    fn default() -> Self {
        Self::new(
            MultiplierResolver::default(),
            BranchTaxAdjuster::default(),
            DiscountAwareReconciler::default(),
        )
    }
}

impl<R, T, C> EstimateRuntime for DeterministicEstimateRuntime<R, T, C>
where
    R: MultiplierEngine,
    T: TaxAdjuster,
    C: Reconciler,
{
    fn resolve_estimate(&self, estimate: &RawEstimate) -> ResolvedEstimate {
        let costs = split_costs(estimate.true_cost, estimate.sub_services_retail_cost);
        let ranges = parse_snapshot(estimate.estimate_snapshot.as_ref());
        let resolution = self.multiplier_engine.resolve(&ResolutionContext {
            estimate,
            costs,
            ranges: ranges.as_deref(),
            global_index: global_info_index(estimate.global_info.as_ref()),
        });
        let tax = self.tax_adjuster.adjust(estimate);
        let reconciliation = self.reconciler.reconcile(estimate, resolution.multiplier, &tax);

        debug!(
            event_name = "pricing.estimate.resolved",
            estimate_id = %estimate.id,
            source = %resolution.source,
            multiplier = ?resolution.multiplier,
            error_severity = %reconciliation.error_severity,
            "estimate resolved"
        );

        ResolvedEstimate {
            fingerprint: estimate.content_hash(),
            estimate: estimate.clone(),
            costs,
            resolution,
            tax,
            reconciliation,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::{
        config::AppConfig,
        domain::estimate::{BranchRef, RawEstimate, TaxDetails},
        pricing::{
            reconcile::{ErrorPercentage, ErrorSeverity, PriceBasis},
            resolver::{MultiplierResolution, MultiplierSource, ResolutionContext},
            tax::{BranchTaxAdjuster, TaxBasis},
            DeterministicEstimateRuntime, EstimateRuntime, MultiplierEngine,
        },
    };

    fn dec(value: &str) -> Decimal {
        value.parse().expect("test decimal should parse")
    }

    fn estimate(value: serde_json::Value) -> RawEstimate {
        serde_json::from_value(value).expect("fixture should decode")
    }

    #[test]
    fn plain_estimate_runs_through_every_stage() {
        let runtime = DeterministicEstimateRuntime::default();
        let resolved = runtime.resolve_estimate(&estimate(json!({
            "id": "E-100",
            "branch": {"name": "Tacoma"},
            "true_cost": 5000,
            "sub_services_retail_cost": 0,
            "final_price": 12500
        })));

        assert_eq!(resolved.base_cost(), dec("5000"));
        assert_eq!(resolved.multiplier(), Some(dec("2.5")));
        assert_eq!(resolved.source(), MultiplierSource::StandardBracket);
        assert_eq!(resolved.adjusted_price(), Some(dec("12500")));
        assert_eq!(resolved.tax.basis, TaxBasis::Untaxed);
        assert_eq!(resolved.error_percentage(), ErrorPercentage::Value(Decimal::ZERO));
        assert_eq!(resolved.error_severity(), ErrorSeverity::Low);
        assert_eq!(resolved.fingerprint.len(), 64);
    }

    #[test]
    fn discounted_snapshot_estimate_in_taxed_branch() {
        let runtime = DeterministicEstimateRuntime::default();
        let resolved = runtime.resolve_estimate(&estimate(json!({
            "id": "E-101",
            "branch": {"name": "Kent -WA"},
            "true_cost": 4000,
            "final_price": 9000,
            "discount_provided": 10,
            "estimateSnapshot": {"snapshotData": {"multiplierRanges": [
                {"minCost": 0, "maxCost": 3000, "lowestMultiple": 2.9},
                {"minCost": 3000.01, "maxCost": 8000, "lowestMultiple": 2.5}
            ]}}
        })));

        assert_eq!(resolved.source(), MultiplierSource::SnapshotRange);
        assert_eq!(resolved.reconciliation.expected_price, Some(dec("10000")));
        assert_eq!(resolved.reconciliation.expected_price_after_discount, Some(dec("9000")));
        assert_eq!(resolved.error_severity(), ErrorSeverity::Low);
        assert_eq!(resolved.adjusted_price(), Some(dec("9909")));
        assert_eq!(resolved.tax.basis, TaxBasis::StatutoryRate);
    }

    #[test]
    fn recorded_after_tax_price_passes_through() {
        let subject = RawEstimate {
            branch: Some(BranchRef { name: Some("everett".to_string()) }),
            true_cost: Some(dec("400")),
            final_price: Some(dec("1000")),
            tax_details: Some(TaxDetails { final_price_after_taxes: Some(dec("1050")) }),
            ..RawEstimate::default()
        };

        let resolved = DeterministicEstimateRuntime::default().resolve_estimate(&subject);

        assert_eq!(resolved.adjusted_price(), Some(dec("1050")));
        assert_eq!(resolved.tax.basis, TaxBasis::RecordedAfterTax);
    }

    #[test]
    fn unresolved_estimate_keeps_sentinels() {
        let resolved = DeterministicEstimateRuntime::default().resolve_estimate(&estimate(json!({
            "id": "E-102",
            "true_cost": 1000,
            "sub_services_retail_cost": 1000,
            "final_price": 2750,
            "multiplierOverride": 2.75
        })));

        assert_eq!(resolved.multiplier(), None);
        assert_eq!(resolved.source(), MultiplierSource::Unresolved);
        assert_eq!(resolved.error_percentage(), ErrorPercentage::NotApplicable);
        assert_eq!(resolved.error_severity(), ErrorSeverity::Unknown);
    }

    #[test]
    fn resolving_twice_is_identical() {
        let runtime = DeterministicEstimateRuntime::default();
        let subject = estimate(json!({
            "id": 7,
            "true_cost": "8000",
            "sub_services_retail_cost": "2000",
            "final_price": "20000",
            "global_info": [null, null, 0]
        }));

        let first = runtime.resolve_estimate(&subject);
        let second = runtime.resolve_estimate(&subject);

        assert_eq!(first, second);
        assert_eq!(first.source(), MultiplierSource::SubcontractedStandardBracket);
        assert_eq!(first.multiplier(), Some(dec("2.5")));
    }

    #[test]
    fn runtime_built_from_config_honors_policy_switches() {
        let mut config = AppConfig::default();
        config.reconciliation.price_basis = PriceBasis::AdjustedPrice;
        config.tax.default_rate = dec("0.2");
        config.tax.branches.retain(|branch| branch.pattern == "kent");

        let runtime = DeterministicEstimateRuntime::from_config(&config);
        let kent = runtime.resolve_estimate(&estimate(json!({
            "branch": "Kent", "true_cost": 1000, "final_price": 2500
        })));
        let everett = runtime.resolve_estimate(&estimate(json!({
            "branch": "Everett", "true_cost": 1000, "final_price": 2750
        })));

        assert_eq!(kent.adjusted_price(), Some(dec("3000")));
        assert_eq!(kent.reconciliation.compared_price, Some(dec("3000")));
        assert_eq!(everett.tax.basis, TaxBasis::Untaxed);
        assert_eq!(everett.error_severity(), ErrorSeverity::Low);
    }

    #[test]
    fn runtime_accepts_custom_stage_implementations() {
        struct FixedMultiplier;

        impl MultiplierEngine for FixedMultiplier {
            fn resolve(&self, _context: &ResolutionContext<'_>) -> MultiplierResolution {
                MultiplierResolution {
                    multiplier: Some(Decimal::TWO),
                    source: MultiplierSource::Override,
                    matched_range: None,
                    trace: Vec::new(),
                }
            }
        }

        let runtime = DeterministicEstimateRuntime::new(
            FixedMultiplier,
            BranchTaxAdjuster::default(),
            crate::pricing::reconcile::DiscountAwareReconciler::default(),
        );
        let resolved = runtime.resolve_estimate(&estimate(json!({
            "true_cost": 100, "final_price": 250
        })));

        assert_eq!(resolved.multiplier(), Some(Decimal::TWO));
        assert_eq!(resolved.error_percentage(), ErrorPercentage::Value(dec("20")));
        assert_eq!(resolved.error_severity(), ErrorSeverity::High);
    }
}
