use std::path::PathBuf;

use markup_core::config::AppConfig;
use markup_core::domain::estimate::EstimateId;
use markup_core::errors::{ApplicationError, DomainError};
use markup_core::ingest::read_estimates;
use markup_core::pricing::resolver::{MultiplierResolver, MultiplierSource};
use markup_core::pricing::{DeterministicEstimateRuntime, EstimateRuntime, ResolvedEstimate};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Debug)]
pub struct ExplainArgs {
    pub input: PathBuf,
    pub id: String,
}

#[derive(Debug, Serialize)]
struct Explanation<'a> {
    rule_order: Vec<MultiplierSource>,
    #[serde(flatten)]
    resolved: &'a ResolvedEstimate,
}

/// Resolves one estimate from the export, ignoring batch filters.
pub fn run(args: &ExplainArgs, config: &AppConfig) -> CommandResult {
    match execute(args, config) {
        Ok(output) => CommandResult::ok(output),
        Err(error) => CommandResult::failure("explain", error),
    }
}

fn execute(args: &ExplainArgs, config: &AppConfig) -> Result<String, ApplicationError> {
    let input = read_estimates(&args.input)?;

    let id = EstimateId(args.id.trim().to_string());
    let estimate = input
        .estimates
        .iter()
        .find(|estimate| estimate.id == id)
        .ok_or_else(|| DomainError::EstimateNotFound(id.clone()))?;

    let resolved = DeterministicEstimateRuntime::from_config(config).resolve_estimate(estimate);
    let explanation = Explanation {
        rule_order: MultiplierResolver::from_policy(&config.resolver).rule_order(),
        resolved: &resolved,
    };

    Ok(serde_json::to_string_pretty(&explanation)?)
}
