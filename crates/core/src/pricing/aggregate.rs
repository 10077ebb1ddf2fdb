//! Per-branch roll-up of resolved estimates.
//!
//! Accumulators are plain values: fold them sequentially, or build one map
//! per shard and merge the maps afterwards. Both paths give the same result.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::branch::{BranchKey, DEFAULT_UNKNOWN_BRANCH_LABEL};
use crate::pricing::reconcile::ErrorSeverity;
use crate::pricing::resolver::MultiplierSource;
use crate::pricing::ResolvedEstimate;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub branch: BranchKey,
    pub branch_name: String,
    pub estimate_count: usize,
    pub resolved_count: usize,
    pub total_adjusted_value: Decimal,
    /// Mean over resolved multipliers only; zero when none resolved.
    pub average_multiplier: Decimal,
    pub source_counts: BTreeMap<MultiplierSource, usize>,
    pub severity_counts: BTreeMap<ErrorSeverity, usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BranchAccumulator {
    estimate_count: usize,
    resolved_count: usize,
    total_adjusted_value: Decimal,
    multiplier_sum: Decimal,
    source_counts: BTreeMap<MultiplierSource, usize>,
    severity_counts: BTreeMap<ErrorSeverity, usize>,
}

impl BranchAccumulator {
    pub fn record(&mut self, resolved: &ResolvedEstimate) {
        self.estimate_count += 1;
        self.total_adjusted_value = self
            .total_adjusted_value
            .saturating_add(resolved.adjusted_price().unwrap_or(Decimal::ZERO));

        if let Some(multiplier) = resolved.multiplier() {
            self.resolved_count += 1;
            self.multiplier_sum = self.multiplier_sum.saturating_add(multiplier);
        }

        *self.source_counts.entry(resolved.source()).or_default() += 1;
        *self.severity_counts.entry(resolved.error_severity()).or_default() += 1;
    }

    pub fn merge(&mut self, other: Self) {
        self.estimate_count += other.estimate_count;
        self.resolved_count += other.resolved_count;
        self.total_adjusted_value =
            self.total_adjusted_value.saturating_add(other.total_adjusted_value);
        self.multiplier_sum = self.multiplier_sum.saturating_add(other.multiplier_sum);
        for (source, count) in other.source_counts {
            *self.source_counts.entry(source).or_default() += count;
        }
        for (severity, count) in other.severity_counts {
            *self.severity_counts.entry(severity).or_default() += count;
        }
    }

    pub fn average_multiplier(&self) -> Decimal {
        if self.resolved_count == 0 {
            return Decimal::ZERO;
        }
        self.multiplier_sum.checked_div(Decimal::from(self.resolved_count)).unwrap_or(Decimal::ZERO)
    }

    pub fn finish(self, branch: BranchKey, unknown_label: &str) -> BranchSummary {
        let average_multiplier = self.average_multiplier();
        BranchSummary {
            branch_name: branch.label(unknown_label).to_string(),
            branch,
            estimate_count: self.estimate_count,
            resolved_count: self.resolved_count,
            total_adjusted_value: self.total_adjusted_value,
            average_multiplier,
            source_counts: self.source_counts,
            severity_counts: self.severity_counts,
        }
    }
}

pub type BranchShard = BTreeMap<BranchKey, BranchAccumulator>;

#[derive(Clone, Debug)]
pub struct BranchAggregator {
    unknown_label: String,
}

impl Default for BranchAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_UNKNOWN_BRANCH_LABEL)
    }
}

impl BranchAggregator {
    pub fn new(unknown_label: impl Into<String>) -> Self {
        Self { unknown_label: unknown_label.into() }
    }

    pub fn unknown_label(&self) -> &str {
        &self.unknown_label
    }

    pub fn accumulate<'a, I>(&self, estimates: I) -> BranchShard
    where
        I: IntoIterator<Item = &'a ResolvedEstimate>,
    {
        estimates.into_iter().fold(BranchShard::new(), |mut shard, resolved| {
            shard.entry(resolved.branch_key()).or_default().record(resolved);
            shard
        })
    }

    pub fn merge_shards<I>(&self, shards: I) -> BranchShard
    where
        I: IntoIterator<Item = BranchShard>,
    {
        shards.into_iter().fold(BranchShard::new(), |mut merged, shard| {
            for (branch, accumulator) in shard {
                merged.entry(branch).or_default().merge(accumulator);
            }
            merged
        })
    }

    /// Summaries ordered by branch name, the unknown bucket last.
    pub fn summarize(&self, shard: BranchShard) -> Vec<BranchSummary> {
        shard
            .into_iter()
            .map(|(branch, accumulator)| accumulator.finish(branch, &self.unknown_label))
            .collect()
    }

    pub fn aggregate<'a, I>(&self, estimates: I) -> Vec<BranchSummary>
    where
        I: IntoIterator<Item = &'a ResolvedEstimate>,
    {
        self.summarize(self.accumulate(estimates))
    }
}
