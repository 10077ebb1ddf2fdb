//! Batch pipeline: filter, resolve, group and summarize an estimate export.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::config::BatchConfig;
use crate::domain::branch::{BranchKey, DEFAULT_UNKNOWN_BRANCH_LABEL};
use crate::domain::estimate::{EstimateId, EstimateStatus, RawEstimate};
use crate::ingest::{IngestOutcome, SkippedRecord};
use crate::pricing::aggregate::{BranchAggregator, BranchSummary};
use crate::pricing::reconcile::ErrorSeverity;
use crate::pricing::resolver::{MultiplierSource, TraceOutcome};
use crate::pricing::tax::TaxBasis;
use crate::pricing::{EstimateRuntime, ResolvedEstimate};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOptions {
    /// Statuses to keep; empty keeps every estimate.
    pub statuses: Vec<EstimateStatus>,
    /// Case-insensitive substring of the branch label.
    pub branch_filter: Option<String>,
    pub unknown_branch_label: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            branch_filter: None,
            unknown_branch_label: DEFAULT_UNKNOWN_BRANCH_LABEL.to_string(),
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            statuses: config.statuses.clone(),
            branch_filter: None,
            unknown_branch_label: config.unknown_branch_label.clone(),
        }
    }

    pub fn with_branch_filter(mut self, branch_filter: Option<String>) -> Self {
        self.branch_filter = branch_filter.filter(|filter| !filter.trim().is_empty());
        self
    }

    pub fn admits(&self, estimate: &RawEstimate) -> bool {
        let status_ok = self.statuses.is_empty()
            || estimate.status.as_ref().is_some_and(|status| self.statuses.contains(status));
        if !status_ok {
            return false;
        }

        match &self.branch_filter {
            Some(filter) => {
                let key = estimate.branch_key();
                let label = key.label(&self.unknown_branch_label).to_lowercase();
                label.contains(&filter.trim().to_lowercase())
            }
            None => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchGroup {
    pub branch: BranchKey,
    pub branch_name: String,
    pub estimates: Vec<ResolvedEstimate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub input_count: usize,
    pub filtered_out: usize,
    pub resolved_count: usize,
    pub unresolved_count: usize,
    pub high_severity_count: usize,
    pub skipped_records: Vec<SkippedRecord>,
    pub groups: Vec<BranchGroup>,
    pub summaries: Vec<BranchSummary>,
}

impl BatchReport {
    pub fn estimates(&self) -> impl Iterator<Item = &ResolvedEstimate> {
        self.groups.iter().flat_map(|group| group.estimates.iter())
    }

    pub fn find(&self, id: &EstimateId) -> Option<&ResolvedEstimate> {
        self.estimates().find(|resolved| &resolved.estimate.id == id)
    }
}

pub fn run_batch<R>(
    runtime: &R,
    input: &IngestOutcome,
    options: &BatchOptions,
    sink: &dyn AuditSink,
) -> BatchReport
where
    R: EstimateRuntime + ?Sized,
{
    let run_id = Uuid::new_v4();
    let run_label = run_id.to_string();
    info!(
        event_name = "batch.run.start",
        run_id = %run_label,
        input_count = input.estimates.len(),
        skipped_records = input.skipped.len(),
        "starting estimate batch"
    );

    for skipped in &input.skipped {
        sink.emit(
            AuditEvent::new(
                &run_label,
                None,
                "ingest.record_skipped",
                AuditCategory::Ingest,
                AuditOutcome::Skipped,
            )
            .with_metadata("position", skipped.position.to_string())
            .with_metadata("reason", skipped.reason.clone()),
        );
    }

    let resolved: Vec<ResolvedEstimate> = input
        .estimates
        .iter()
        .filter(|estimate| options.admits(estimate))
        .map(|estimate| runtime.resolve_estimate(estimate))
        .collect();

    for estimate in &resolved {
        emit_findings(&run_label, estimate, sink);
    }

    let resolved_count = resolved.iter().filter(|estimate| estimate.multiplier().is_some()).count();
    let high_severity_count =
        resolved.iter().filter(|estimate| estimate.error_severity() == ErrorSeverity::High).count();
    let aggregator = BranchAggregator::new(options.unknown_branch_label.clone());
    let summaries = aggregator.aggregate(&resolved);
    let admitted = resolved.len();
    let groups = group_by_branch(resolved, &options.unknown_branch_label);

    let report = BatchReport {
        run_id,
        generated_at: Utc::now(),
        input_count: input.estimates.len(),
        filtered_out: input.estimates.len() - admitted,
        resolved_count,
        unresolved_count: admitted - resolved_count,
        high_severity_count,
        skipped_records: input.skipped.clone(),
        groups,
        summaries,
    };

    sink.emit(
        AuditEvent::new(
            &run_label,
            None,
            "batch.completed",
            AuditCategory::Batch,
            AuditOutcome::Success,
        )
        .with_metadata("admitted", admitted.to_string())
        .with_metadata("branches", report.groups.len().to_string()),
    );
    info!(
        event_name = "batch.run.completed",
        run_id = %run_label,
        admitted,
        filtered_out = report.filtered_out,
        unresolved = report.unresolved_count,
        high_severity = report.high_severity_count,
        branches = report.groups.len(),
        "estimate batch completed"
    );

    report
}

fn group_by_branch(resolved: Vec<ResolvedEstimate>, unknown_label: &str) -> Vec<BranchGroup> {
    let mut grouped: BTreeMap<BranchKey, Vec<ResolvedEstimate>> = BTreeMap::new();
    for estimate in resolved {
        grouped.entry(estimate.branch_key()).or_default().push(estimate);
    }

    grouped
        .into_iter()
        .map(|(branch, estimates)| BranchGroup {
            branch_name: branch.label(unknown_label).to_string(),
            branch,
            estimates,
        })
        .collect()
}

fn emit_findings(run_id: &str, resolved: &ResolvedEstimate, sink: &dyn AuditSink) {
    let estimate_id = Some(resolved.estimate.id.clone());

    if resolved.source() == MultiplierSource::Unresolved {
        let reason = resolved
            .resolution
            .trace
            .iter()
            .rev()
            .find(|step| step.outcome == TraceOutcome::Halted)
            .or_else(|| resolved.resolution.trace.last())
            .map_or_else(|| "no rules configured".to_string(), |step| step.detail.clone());
        sink.emit(
            AuditEvent::new(
                run_id,
                estimate_id.clone(),
                "resolution.unresolved",
                AuditCategory::Resolution,
                AuditOutcome::Flagged,
            )
            .with_metadata("base_cost", resolved.base_cost().to_string())
            .with_metadata("reason", reason),
        );
    }

    // The subcontracted rule drops the override whether it resolves or halts.
    let decided_by_subcontracted_rule = resolved.resolution.trace.iter().any(|step| {
        step.rule == MultiplierSource::SubcontractedStandardBracket
            && matches!(step.outcome, TraceOutcome::Resolved | TraceOutcome::Halted)
    });
    if decided_by_subcontracted_rule {
        if let Some(ignored) = resolved.estimate.explicit_override() {
            sink.emit(
                AuditEvent::new(
                    run_id,
                    estimate_id.clone(),
                    "resolution.override_ignored",
                    AuditCategory::Resolution,
                    AuditOutcome::Flagged,
                )
                .with_metadata("override", ignored.to_string())
                .with_metadata("sub_cost", resolved.costs.sub_cost.to_string()),
            );
        }
    }

    if resolved.tax.basis == TaxBasis::StatutoryRate {
        let rate = resolved.tax.statutory_rate.map(|rate| rate.to_string()).unwrap_or_default();
        sink.emit(
            AuditEvent::new(
                run_id,
                estimate_id.clone(),
                "tax.statutory_rate_applied",
                AuditCategory::Tax,
                AuditOutcome::Success,
            )
            .with_metadata("statutory_rate", rate),
        );
    }

    if resolved.error_severity() == ErrorSeverity::High {
        sink.emit(
            AuditEvent::new(
                run_id,
                estimate_id,
                "reconciliation.high_deviation",
                AuditCategory::Reconciliation,
                AuditOutcome::Flagged,
            )
            .with_metadata("error_percentage", resolved.error_percentage().to_string())
            .with_metadata("source", resolved.source().as_str()),
        );
    }
}
