use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSplit {
    pub true_cost: Decimal,
    pub sub_cost: Decimal,
    pub base_cost: Decimal,
}

impl CostSplit {
    pub fn has_sub_cost(&self) -> bool {
        self.sub_cost > Decimal::ZERO
    }
}

/// Separates direct cost from subcontracted cost.
///
/// Missing figures count as zero. The base cost is never clamped: malformed
/// records can yield a zero or negative base cost, which bracket matching
/// later turns into an unresolved multiplier.
pub fn split_costs(true_cost: Option<Decimal>, sub_services_cost: Option<Decimal>) -> CostSplit {
    let true_cost = true_cost.unwrap_or(Decimal::ZERO);
    let sub_cost = sub_services_cost.unwrap_or(Decimal::ZERO);

    CostSplit { true_cost, sub_cost, base_cost: true_cost.saturating_sub(sub_cost) }
}
