//! Multiplier resolution.
//!
//! The upstream system never records which multiplier priced an estimate, so
//! it is reconstructed from an ordered chain of rules. Each rule either skips,
//! resolves (first resolution wins), or halts the chain as unresolved. Every
//! evaluated rule is recorded in the trace so the outcome can be audited.
//!
//! Default order:
//!
//! 1. subcontracted standard bracket (estimates with subcontracted cost never
//!    honor overrides or snapshots)
//! 2. explicit override
//! 3. snapshot range match
//! 4. global-info index fallback
//! 5. first-range fallback
//! 6. standard bracket (only when no snapshot exists)
//! 7. unresolved

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::estimate::RawEstimate;
use crate::pricing::snapshot::MultiplierRange;
use crate::pricing::split::CostSplit;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiplierSource {
    Override,
    SnapshotRange,
    GlobalInfoIndex,
    FirstRangeFallback,
    StandardBracket,
    SubcontractedStandardBracket,
    Unresolved,
}

impl MultiplierSource {
    pub const ALL: [Self; 7] = [
        Self::Override,
        Self::SnapshotRange,
        Self::GlobalInfoIndex,
        Self::FirstRangeFallback,
        Self::StandardBracket,
        Self::SubcontractedStandardBracket,
        Self::Unresolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::SnapshotRange => "snapshot_range",
            Self::GlobalInfoIndex => "global_info_index",
            Self::FirstRangeFallback => "first_range_fallback",
            Self::StandardBracket => "standard_bracket",
            Self::SubcontractedStandardBracket => "subcontracted_standard_bracket",
            Self::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for MultiplierSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed cost bracket: any cost strictly above `above` maps to `multiplier`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardBracket {
    pub above: Decimal,
    pub multiplier: Decimal,
}

pub fn default_brackets() -> Vec<StandardBracket> {
    vec![
        StandardBracket { above: Decimal::new(6000, 0), multiplier: Decimal::new(225, 2) },
        StandardBracket { above: Decimal::new(1700, 0), multiplier: Decimal::new(25, 1) },
        StandardBracket { above: Decimal::ZERO, multiplier: Decimal::new(275, 2) },
    ]
}

/// First bracket (in order) whose threshold the cost strictly exceeds.
pub fn bracket_multiplier(brackets: &[StandardBracket], cost: Decimal) -> Option<Decimal> {
    brackets.iter().find(|bracket| cost > bracket.above).map(|bracket| bracket.multiplier)
}

/// Where the subcontracted bracket rule sits in the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubcontractedRulePlacement {
    /// Subcontracted estimates ignore overrides and snapshots.
    #[default]
    BeforeOverride,
    /// Subcontracted estimates honor an explicit override, nothing else.
    AfterOverride,
    /// Subcontracted estimates go through the ordinary chain.
    Disabled,
}

impl std::str::FromStr for SubcontractedRulePlacement {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "before_override" => Ok(Self::BeforeOverride),
            "after_override" => Ok(Self::AfterOverride),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!(
                "unsupported subcontracted rule placement `{other}` (expected before_override|after_override|disabled)"
            )),
        }
    }
}

/// Cost figure the final standard-bracket fallback keys on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostBasis {
    #[default]
    BaseCost,
    TrueCost,
}

impl CostBasis {
    pub fn pick(&self, costs: &CostSplit) -> Decimal {
        match self {
            Self::BaseCost => costs.base_cost,
            Self::TrueCost => costs.true_cost,
        }
    }
}

impl std::str::FromStr for CostBasis {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "base_cost" => Ok(Self::BaseCost),
            "true_cost" => Ok(Self::TrueCost),
            other => {
                Err(format!("unsupported cost basis `{other}` (expected base_cost|true_cost)"))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverPolicy {
    pub brackets: Vec<StandardBracket>,
    pub subcontracted_rule: SubcontractedRulePlacement,
    pub fallback_cost_basis: CostBasis,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            brackets: default_brackets(),
            subcontracted_rule: SubcontractedRulePlacement::default(),
            fallback_cost_basis: CostBasis::default(),
        }
    }
}

/// Everything a rule may look at for one estimate.
#[derive(Clone, Copy, Debug)]
pub struct ResolutionContext<'a> {
    pub estimate: &'a RawEstimate,
    pub costs: CostSplit,
    pub ranges: Option<&'a [MultiplierRange]>,
    pub global_index: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRange {
    pub index: usize,
    pub min_cost: Option<Decimal>,
    pub max_cost: Option<Decimal>,
}

impl MatchedRange {
    fn at(index: usize, range: &MultiplierRange) -> Self {
        Self { index, min_cost: range.min_cost, max_cost: range.max_cost }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleOutcome {
    Skip(String),
    Resolve { multiplier: Decimal, matched_range: Option<MatchedRange>, detail: String },
    Halt(String),
}

pub trait ResolutionRule: Send + Sync {
    /// Source label attached to multipliers this rule produces.
    fn source(&self) -> MultiplierSource;
    fn evaluate(&self, context: &ResolutionContext<'_>) -> RuleOutcome;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Skipped,
    Resolved,
    Halted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTrace {
    pub rule: MultiplierSource,
    pub outcome: TraceOutcome,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierResolution {
    #[serde(with = "rust_decimal::serde::float_option")]
    pub multiplier: Option<Decimal>,
    pub source: MultiplierSource,
    pub matched_range: Option<MatchedRange>,
    pub trace: Vec<RuleTrace>,
}

impl MultiplierResolution {
    pub fn is_resolved(&self) -> bool {
        self.multiplier.is_some()
    }
}

pub struct SubcontractedBracketRule {
    brackets: Vec<StandardBracket>,
}

impl SubcontractedBracketRule {
    pub fn new(brackets: Vec<StandardBracket>) -> Self {
        Self { brackets }
    }
}

impl ResolutionRule for SubcontractedBracketRule {
    fn source(&self) -> MultiplierSource {
        MultiplierSource::SubcontractedStandardBracket
    }

    fn evaluate(&self, context: &ResolutionContext<'_>) -> RuleOutcome {
        let costs = &context.costs;
        if !costs.has_sub_cost() {
            return RuleOutcome::Skip("no subcontracted cost".to_string());
        }

        match bracket_multiplier(&self.brackets, costs.base_cost) {
            Some(multiplier) => RuleOutcome::Resolve {
                multiplier,
                matched_range: None,
                detail: format!(
                    "subcontracted cost {} present; base cost {} bracketed to {multiplier}",
                    costs.sub_cost, costs.base_cost
                ),
            },
            None => RuleOutcome::Halt(format!(
                "subcontracted cost {} present; base cost {} is not above any bracket",
                costs.sub_cost, costs.base_cost
            )),
        }
    }
}

pub struct OverrideRule;

impl ResolutionRule for OverrideRule {
    fn source(&self) -> MultiplierSource {
        MultiplierSource::Override
    }

    fn evaluate(&self, context: &ResolutionContext<'_>) -> RuleOutcome {
        match context.estimate.explicit_override() {
            Some(multiplier) => RuleOutcome::Resolve {
                multiplier,
                matched_range: None,
                detail: format!("explicit override {multiplier}"),
            },
            None => RuleOutcome::Skip("no explicit override".to_string()),
        }
    }
}

pub struct SnapshotRangeRule;

impl ResolutionRule for SnapshotRangeRule {
    fn source(&self) -> MultiplierSource {
        MultiplierSource::SnapshotRange
    }

    fn evaluate(&self, context: &ResolutionContext<'_>) -> RuleOutcome {
        let Some(ranges) = context.ranges else {
            return RuleOutcome::Skip("no snapshot ranges".to_string());
        };
        let base_cost = context.costs.base_cost;

        // The first containing range decides, even when its multiple is unreadable.
        let Some((index, range)) =
            ranges.iter().enumerate().find(|(_, range)| range.contains(base_cost))
        else {
            return RuleOutcome::Skip(format!("base cost {base_cost} matched no snapshot range"));
        };

        match range.lowest_multiple {
            Some(multiplier) => RuleOutcome::Resolve {
                multiplier,
                matched_range: Some(MatchedRange::at(index, range)),
                detail: format!("base cost {base_cost} matched range #{index}"),
            },
            None => RuleOutcome::Skip(format!(
                "base cost {base_cost} matched range #{index} but its lowestMultiple is unreadable"
            )),
        }
    }
}

pub struct GlobalInfoIndexRule;

impl ResolutionRule for GlobalInfoIndexRule {
    fn source(&self) -> MultiplierSource {
        MultiplierSource::GlobalInfoIndex
    }

    fn evaluate(&self, context: &ResolutionContext<'_>) -> RuleOutcome {
        let Some(ranges) = context.ranges else {
            return RuleOutcome::Skip("no snapshot ranges".to_string());
        };
        let Some(index) = context.global_index else {
            return RuleOutcome::Skip("global_info holds no range index".to_string());
        };

        match ranges.get(index).and_then(|range| range.lowest_multiple.map(|m| (range, m))) {
            Some((range, multiplier)) => RuleOutcome::Resolve {
                multiplier,
                matched_range: Some(MatchedRange::at(index, range)),
                detail: format!("global_info range index {index}"),
            },
            None => RuleOutcome::Skip(format!(
                "global_info range index {index} is not usable ({} ranges)",
                ranges.len()
            )),
        }
    }
}

pub struct FirstRangeRule;

impl ResolutionRule for FirstRangeRule {
    fn source(&self) -> MultiplierSource {
        MultiplierSource::FirstRangeFallback
    }

    fn evaluate(&self, context: &ResolutionContext<'_>) -> RuleOutcome {
        let first = context.ranges.and_then(|ranges| ranges.first());
        match first.and_then(|range| range.lowest_multiple.map(|m| (range, m))) {
            Some((range, multiplier)) => RuleOutcome::Resolve {
                multiplier,
                matched_range: Some(MatchedRange::at(0, range)),
                detail: "fell back to first snapshot range".to_string(),
            },
            None => RuleOutcome::Skip("no usable first snapshot range".to_string()),
        }
    }
}

pub struct StandardBracketRule {
    brackets: Vec<StandardBracket>,
    basis: CostBasis,
}

impl StandardBracketRule {
    pub fn new(brackets: Vec<StandardBracket>, basis: CostBasis) -> Self {
        Self { brackets, basis }
    }
}

impl ResolutionRule for StandardBracketRule {
    fn source(&self) -> MultiplierSource {
        MultiplierSource::StandardBracket
    }

    fn evaluate(&self, context: &ResolutionContext<'_>) -> RuleOutcome {
        if context.ranges.is_some() {
            return RuleOutcome::Skip("snapshot present".to_string());
        }

        let cost = self.basis.pick(&context.costs);
        match bracket_multiplier(&self.brackets, cost) {
            Some(multiplier) => RuleOutcome::Resolve {
                multiplier,
                matched_range: None,
                detail: format!("{cost} bracketed to {multiplier}"),
            },
            None => RuleOutcome::Skip(format!("{cost} is not above any bracket")),
        }
    }
}

/// Ordered rule chain; the first rule to resolve or halt decides.
pub struct MultiplierResolver {
    rules: Vec<Box<dyn ResolutionRule>>,
}

impl MultiplierResolver {
    pub fn with_rules(rules: Vec<Box<dyn ResolutionRule>>) -> Self {
        Self { rules }
    }

    pub fn from_policy(policy: &ResolverPolicy) -> Self {
        let subcontracted = || -> Box<dyn ResolutionRule> {
            Box::new(SubcontractedBracketRule::new(policy.brackets.clone()))
        };

        let mut rules: Vec<Box<dyn ResolutionRule>> = Vec::with_capacity(6);
        match policy.subcontracted_rule {
            SubcontractedRulePlacement::BeforeOverride => {
                rules.push(subcontracted());
                rules.push(Box::new(OverrideRule));
            }
            SubcontractedRulePlacement::AfterOverride => {
                rules.push(Box::new(OverrideRule));
                rules.push(subcontracted());
            }
            SubcontractedRulePlacement::Disabled => rules.push(Box::new(OverrideRule)),
        }
        rules.push(Box::new(SnapshotRangeRule));
        rules.push(Box::new(GlobalInfoIndexRule));
        rules.push(Box::new(FirstRangeRule));
        rules.push(Box::new(StandardBracketRule::new(
            policy.brackets.clone(),
            policy.fallback_cost_basis,
        )));

        Self::with_rules(rules)
    }

    pub fn rule_order(&self) -> Vec<MultiplierSource> {
        self.rules.iter().map(|rule| rule.source()).collect()
    }

    pub fn resolve(&self, context: &ResolutionContext<'_>) -> MultiplierResolution {
        let mut trace = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            let source = rule.source();
            match rule.evaluate(context) {
                RuleOutcome::Skip(detail) => {
                    trace.push(RuleTrace { rule: source, outcome: TraceOutcome::Skipped, detail });
                }
                RuleOutcome::Resolve { multiplier, matched_range, detail } => {
                    trace.push(RuleTrace { rule: source, outcome: TraceOutcome::Resolved, detail });
                    return MultiplierResolution {
                        multiplier: Some(multiplier),
                        source,
                        matched_range,
                        trace,
                    };
                }
                RuleOutcome::Halt(detail) => {
                    trace.push(RuleTrace { rule: source, outcome: TraceOutcome::Halted, detail });
                    break;
                }
            }
        }

        MultiplierResolution {
            multiplier: None,
            source: MultiplierSource::Unresolved,
            matched_range: None,
            trace,
        }
    }
}

impl Default for MultiplierResolver {
    fn default() -> Self {
        Self::from_policy(&ResolverPolicy::default())
    }
}

impl fmt::Debug for MultiplierResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplierResolver").field("rules", &self.rule_order()).finish()
    }
}
