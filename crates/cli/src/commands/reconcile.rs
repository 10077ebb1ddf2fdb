use std::path::PathBuf;

use markup_core::audit::TracingAuditSink;
use markup_core::batch::{run_batch, BatchOptions, BatchReport};
use markup_core::config::AppConfig;
use markup_core::errors::ApplicationError;
use markup_core::ingest::read_estimates;
use markup_core::pricing::reconcile::ErrorSeverity;
use markup_core::pricing::resolver::MultiplierSource;
use markup_core::pricing::DeterministicEstimateRuntime;

use crate::commands::CommandResult;

#[derive(Clone, Debug)]
pub struct ReconcileArgs {
    pub input: PathBuf,
    pub json: bool,
    pub branch: Option<String>,
}

pub fn run(args: &ReconcileArgs, config: &AppConfig) -> CommandResult {
    match execute(args, config) {
        Ok(output) => CommandResult::ok(output),
        Err(error) => CommandResult::failure("reconcile", error),
    }
}

fn execute(args: &ReconcileArgs, config: &AppConfig) -> Result<String, ApplicationError> {
    let input = read_estimates(&args.input)?;

    let runtime = DeterministicEstimateRuntime::from_config(config);
    let batch_options =
        BatchOptions::from_config(&config.batch).with_branch_filter(args.branch.clone());
    let report = run_batch(&runtime, &input, &batch_options, &TracingAuditSink);

    if args.json {
        return Ok(serde_json::to_string_pretty(&report)?);
    }
    Ok(render_human(&report))
}

fn render_human(report: &BatchReport) -> String {
    let admitted = report.input_count - report.filtered_out;
    let mut lines = vec![format!(
        "reconcile: {admitted} estimates across {} branches ({} filtered out, {} unreadable records)",
        report.summaries.len(),
        report.filtered_out,
        report.skipped_records.len(),
    )];

    for summary in &report.summaries {
        lines.push(format!(
            "- {}: {} estimates, {} resolved, avg multiplier {:.2}, adjusted total {:.2}",
            summary.branch_name,
            summary.estimate_count,
            summary.resolved_count,
            summary.average_multiplier,
            summary.total_adjusted_value,
        ));

        let severities: Vec<String> = ErrorSeverity::ALL
            .iter()
            .filter_map(|severity| {
                summary.severity_counts.get(severity).map(|count| format!("{severity}={count}"))
            })
            .collect();
        lines.push(format!("    severity: {}", severities.join(" ")));
    }

    let flagged: Vec<String> = report
        .estimates()
        .filter(|resolved| {
            resolved.source() == MultiplierSource::Unresolved
                || resolved.error_severity() == ErrorSeverity::High
        })
        .map(|resolved| {
            format!(
                "- [{}] {} ({}): {} via {}",
                resolved.error_severity(),
                resolved.estimate.id,
                resolved.estimate.name.as_deref().unwrap_or("unnamed"),
                resolved.error_percentage(),
                resolved.source(),
            )
        })
        .collect();

    if flagged.is_empty() {
        lines.push("no flagged estimates".to_string());
    } else {
        lines.push(format!("flagged estimates ({}):", flagged.len()));
        lines.extend(flagged);
    }

    lines.join("\n")
}
