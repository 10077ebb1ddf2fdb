use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::branch::DEFAULT_UNKNOWN_BRANCH_LABEL;
use crate::domain::estimate::EstimateStatus;
use crate::pricing::reconcile::{PriceBasis, SeverityThresholds};
use crate::pricing::resolver::{
    CostBasis, ResolverPolicy, StandardBracket, SubcontractedRulePlacement,
};
use crate::pricing::tax::{default_statutory_rate, TaxPolicy, TaxedBranch};

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["markup.toml", "config/markup.toml"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub resolver: ResolverPolicy,
    pub tax: TaxConfig,
    pub reconciliation: ReconciliationConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaxConfig {
    /// Applied to taxed branches that carry no rate of their own.
    pub default_rate: Decimal,
    pub branches: Vec<TaxBranchConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBranchConfig {
    pub pattern: String,
    #[serde(default)]
    pub statutory_rate: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationConfig {
    pub low_max_pct: Decimal,
    pub medium_max_pct: Decimal,
    pub price_basis: PriceBasis,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Statuses to keep; empty keeps every estimate.
    pub statuses: Vec<EstimateStatus>,
    pub unknown_branch_label: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub statuses: Option<Vec<EstimateStatus>>,
    pub price_basis: Option<PriceBasis>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            default_rate: default_statutory_rate(),
            branches: ["kent", "everett"]
                .into_iter()
                .map(|pattern| TaxBranchConfig {
                    pattern: pattern.to_string(),
                    statutory_rate: None,
                })
                .collect(),
        }
    }
}

impl TaxConfig {
    pub fn policy(&self) -> TaxPolicy {
        TaxPolicy {
            branches: self
                .branches
                .iter()
                .map(|branch| TaxedBranch {
                    pattern: branch.pattern.clone(),
                    statutory_rate: branch.statutory_rate.unwrap_or(self.default_rate),
                })
                .collect(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        let thresholds = SeverityThresholds::default();
        Self {
            low_max_pct: thresholds.low_max_pct,
            medium_max_pct: thresholds.medium_max_pct,
            price_basis: PriceBasis::default(),
        }
    }
}

impl ReconciliationConfig {
    pub fn thresholds(&self) -> SeverityThresholds {
        SeverityThresholds { low_max_pct: self.low_max_pct, medium_max_pct: self.medium_max_pct }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            unknown_branch_label: DEFAULT_UNKNOWN_BRANCH_LABEL.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(resolver) = patch.resolver {
            if let Some(brackets) = resolver.brackets {
                self.resolver.brackets = brackets;
            }
            if let Some(subcontracted_rule) = resolver.subcontracted_rule {
                self.resolver.subcontracted_rule = subcontracted_rule;
            }
            if let Some(fallback_cost_basis) = resolver.fallback_cost_basis {
                self.resolver.fallback_cost_basis = fallback_cost_basis;
            }
        }

        if let Some(tax) = patch.tax {
            if let Some(default_rate) = tax.default_rate {
                self.tax.default_rate = default_rate;
            }
            if let Some(branches) = tax.branches {
                self.tax.branches = branches;
            }
        }

        if let Some(reconciliation) = patch.reconciliation {
            if let Some(low_max_pct) = reconciliation.low_max_pct {
                self.reconciliation.low_max_pct = low_max_pct;
            }
            if let Some(medium_max_pct) = reconciliation.medium_max_pct {
                self.reconciliation.medium_max_pct = medium_max_pct;
            }
            if let Some(price_basis) = reconciliation.price_basis {
                self.reconciliation.price_basis = price_basis;
            }
        }

        if let Some(batch) = patch.batch {
            if let Some(statuses) = batch.statuses {
                self.batch.statuses = statuses;
            }
            if let Some(unknown_branch_label) = batch.unknown_branch_label {
                self.batch.unknown_branch_label = unknown_branch_label;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MARKUP_RESOLVER_SUBCONTRACTED_RULE") {
            self.resolver.subcontracted_rule =
                parse_setting("MARKUP_RESOLVER_SUBCONTRACTED_RULE", &value)?;
        }
        if let Some(value) = read_env("MARKUP_RESOLVER_FALLBACK_COST_BASIS") {
            self.resolver.fallback_cost_basis =
                parse_setting("MARKUP_RESOLVER_FALLBACK_COST_BASIS", &value)?;
        }

        if let Some(value) = read_env("MARKUP_TAX_DEFAULT_RATE") {
            self.tax.default_rate = parse_setting("MARKUP_TAX_DEFAULT_RATE", &value)?;
        }
        if let Some(value) = read_env("MARKUP_TAX_BRANCHES") {
            self.tax.branches = parse_tax_branches("MARKUP_TAX_BRANCHES", &value)?;
        }

        if let Some(value) = read_env("MARKUP_RECONCILIATION_LOW_MAX_PCT") {
            self.reconciliation.low_max_pct =
                parse_setting("MARKUP_RECONCILIATION_LOW_MAX_PCT", &value)?;
        }
        if let Some(value) = read_env("MARKUP_RECONCILIATION_MEDIUM_MAX_PCT") {
            self.reconciliation.medium_max_pct =
                parse_setting("MARKUP_RECONCILIATION_MEDIUM_MAX_PCT", &value)?;
        }
        if let Some(value) = read_env("MARKUP_RECONCILIATION_PRICE_BASIS") {
            self.reconciliation.price_basis =
                parse_setting("MARKUP_RECONCILIATION_PRICE_BASIS", &value)?;
        }

        if let Some(value) = read_env("MARKUP_BATCH_STATUSES") {
            self.batch.statuses = parse_statuses(&value);
        }
        if let Some(value) = read_env("MARKUP_BATCH_UNKNOWN_BRANCH_LABEL") {
            self.batch.unknown_branch_label = value;
        }

        let log_level = read_env("MARKUP_LOGGING_LEVEL").or_else(|| read_env("MARKUP_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MARKUP_LOGGING_FORMAT").or_else(|| read_env("MARKUP_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(statuses) = overrides.statuses {
            self.batch.statuses = statuses;
        }
        if let Some(price_basis) = overrides.price_basis {
            self.reconciliation.price_basis = price_basis;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_resolver(&self.resolver)?;
        validate_tax(&self.tax)?;
        validate_reconciliation(&self.reconciliation)?;
        validate_batch(&self.batch)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// First config file that exists: the explicit path, else the default locations.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_resolver(resolver: &ResolverPolicy) -> Result<(), ConfigError> {
    if resolver.brackets.is_empty() {
        return Err(ConfigError::Validation(
            "resolver.brackets must contain at least one bracket".to_string(),
        ));
    }

    if resolver.brackets.iter().any(|bracket| bracket.multiplier <= Decimal::ZERO) {
        return Err(ConfigError::Validation(
            "resolver.brackets multipliers must be greater than zero".to_string(),
        ));
    }

    let descending = resolver.brackets.windows(2).all(|pair| pair[0].above > pair[1].above);
    if !descending {
        return Err(ConfigError::Validation(
            "resolver.brackets thresholds must be strictly descending".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate(rate: Decimal, key: &str) -> Result<(), ConfigError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ConfigError::Validation(format!("{key} must be a fraction in range 0..=1")));
    }
    Ok(())
}

fn validate_tax(tax: &TaxConfig) -> Result<(), ConfigError> {
    validate_rate(tax.default_rate, "tax.default_rate")?;

    for branch in &tax.branches {
        if branch.pattern.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tax.branches patterns must not be blank".to_string(),
            ));
        }
        if let Some(rate) = branch.statutory_rate {
            validate_rate(rate, "tax.branches statutory_rate")?;
        }
    }

    Ok(())
}

fn validate_reconciliation(reconciliation: &ReconciliationConfig) -> Result<(), ConfigError> {
    if reconciliation.low_max_pct < Decimal::ZERO {
        return Err(ConfigError::Validation(
            "reconciliation.low_max_pct must not be negative".to_string(),
        ));
    }

    if reconciliation.low_max_pct > reconciliation.medium_max_pct {
        return Err(ConfigError::Validation(
            "reconciliation.low_max_pct must not exceed reconciliation.medium_max_pct".to_string(),
        ));
    }

    Ok(())
}

fn validate_batch(batch: &BatchConfig) -> Result<(), ConfigError> {
    if batch.unknown_branch_label.trim().is_empty() {
        return Err(ConfigError::Validation(
            "batch.unknown_branch_label must not be blank".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

/// Reads a `MARKUP_*` variable; blank values count as unset.
pub fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_setting<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// `kent=0.101,everett`: comma-separated patterns, each with an optional rate.
fn parse_tax_branches(key: &str, value: &str) -> Result<Vec<TaxBranchConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((pattern, rate)) => Ok(TaxBranchConfig {
                pattern: pattern.trim().to_string(),
                statutory_rate: Some(parse_setting(key, rate)?),
            }),
            None => Ok(TaxBranchConfig { pattern: entry.to_string(), statutory_rate: None }),
        })
        .collect()
}

fn parse_statuses(value: &str) -> Vec<EstimateStatus> {
    value
        .split(',')
        .map(str::trim)
        .filter(|status| !status.is_empty())
        .map(EstimateStatus::from_raw)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    resolver: Option<ResolverPatch>,
    tax: Option<TaxPatch>,
    reconciliation: Option<ReconciliationPatch>,
    batch: Option<BatchPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolverPatch {
    brackets: Option<Vec<StandardBracket>>,
    subcontracted_rule: Option<SubcontractedRulePlacement>,
    fallback_cost_basis: Option<CostBasis>,
}

#[derive(Debug, Default, Deserialize)]
struct TaxPatch {
    default_rate: Option<Decimal>,
    branches: Option<Vec<TaxBranchConfig>>,
}

#[derive(Debug, Default, Deserialize)]
struct ReconciliationPatch {
    low_max_pct: Option<Decimal>,
    medium_max_pct: Option<Decimal>,
    price_basis: Option<PriceBasis>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchPatch {
    statuses: Option<Vec<EstimateStatus>>,
    unknown_branch_label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
