//! Rate-table snapshots embedded in each estimate.
//!
//! An estimate may carry `estimateSnapshot.snapshotData.multiplierRanges`, the
//! cost brackets that were in force when it was priced. Ranges are returned in
//! source order: resolution depends on first match in that order, and on
//! positional indices stored in `global_info`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::lenient::{decimal_from_value, index_from_value};

/// Key in `global_info` that may hold a fallback range index.
pub const GLOBAL_INFO_RANGE_INDEX_KEY: &str = "2";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierRange {
    /// `None` when the lower bound, or a present upper bound, is unreadable;
    /// such a range never matches by cost.
    pub min_cost: Option<Decimal>,
    /// `None` means open-ended.
    pub max_cost: Option<Decimal>,
    pub lowest_multiple: Option<Decimal>,
}

impl MultiplierRange {
    /// Inclusive on both ends.
    pub fn contains(&self, cost: Decimal) -> bool {
        let Some(min_cost) = self.min_cost else {
            return false;
        };
        cost >= min_cost && self.max_cost.map_or(true, |max_cost| cost <= max_cost)
    }

    fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).filter(|field| !field.is_null());

        let min_cost = field("minCost").and_then(decimal_from_value);
        let (max_cost, max_readable) = match field("maxCost") {
            Some(raw) => {
                let parsed = decimal_from_value(raw);
                (parsed, parsed.is_some())
            }
            None => (None, true),
        };

        Self {
            min_cost: min_cost.filter(|_| max_readable),
            max_cost,
            lowest_multiple: field("lowestMultiple").and_then(decimal_from_value),
        }
    }
}

/// Extracts the ordered range list from an estimate snapshot.
///
/// Returns `None` when the snapshot, its data, or the range list is missing,
/// not the expected shape, or empty. Entries that are individually malformed
/// stay in place so positional indices keep pointing at the same range.
pub fn parse_snapshot(snapshot: Option<&Value>) -> Option<Vec<MultiplierRange>> {
    let ranges = snapshot?.get("snapshotData")?.get("multiplierRanges")?.as_array()?;
    if ranges.is_empty() {
        return None;
    }

    Some(ranges.iter().map(MultiplierRange::from_value).collect())
}

/// Reads the fallback range index from `global_info`, which upstream stores
/// either as a sparse object keyed by position or as a plain array.
pub fn global_info_index(global_info: Option<&Value>) -> Option<usize> {
    let entry = match global_info? {
        Value::Object(map) => map.get(GLOBAL_INFO_RANGE_INDEX_KEY),
        Value::Array(items) => items.get(2),
        _ => None,
    }?;
    index_from_value(entry)
}
