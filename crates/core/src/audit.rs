use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::estimate::EstimateId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Ingest,
    Resolution,
    Tax,
    Reconciliation,
    Batch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Flagged,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub run_id: String,
    pub estimate_id: Option<EstimateId>,
    pub event_type: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        run_id: impl Into<String>,
        estimate_id: Option<EstimateId>,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            estimate_id,
            event_type: event_type.into(),
            category,
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards audit events to the tracing subscriber; flagged events at warn.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let estimate_id = event.estimate_id.as_ref().map_or("unknown", |id| id.0.as_str());
        let metadata = format!("{:?}", event.metadata);
        match event.outcome {
            AuditOutcome::Flagged => warn!(
                event_name = %event.event_type,
                run_id = %event.run_id,
                estimate_id,
                category = ?event.category,
                metadata = %metadata,
                "audit finding"
            ),
            AuditOutcome::Success | AuditOutcome::Skipped => info!(
                event_name = %event.event_type,
                run_id = %event.run_id,
                estimate_id,
                category = ?event.category,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audit::{
            AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
            TracingAuditSink,
        },
        domain::estimate::EstimateId,
    };

    #[test]
    fn in_memory_sink_records_events_with_run_fields() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                "run-123",
                Some(EstimateId("E-2026-0042".to_owned())),
                "reconciliation.high_deviation",
                AuditCategory::Reconciliation,
                AuditOutcome::Flagged,
            )
            .with_metadata("error_percentage", "18.40")
            .with_metadata("branch", "Tacoma"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_id, "run-123");
        assert_eq!(events[0].estimate_id.as_ref().map(|id| id.0.as_str()), Some("E-2026-0042"));
        assert_eq!(events[0].metadata.get("branch").map(String::as_str), Some("Tacoma"));
    }

    #[test]
    fn clones_share_the_same_event_log() {
        let sink = InMemoryAuditSink::default();
        let clone = sink.clone();
        clone.emit(AuditEvent::new(
            "run-1",
            None,
            "batch.completed",
            AuditCategory::Batch,
            AuditOutcome::Success,
        ));

        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn tracing_sink_accepts_every_outcome() {
        for outcome in [AuditOutcome::Success, AuditOutcome::Flagged, AuditOutcome::Skipped] {
            TracingAuditSink.emit(AuditEvent::new(
                "run-1",
                None,
                "ingest.record_skipped",
                AuditCategory::Ingest,
                outcome,
            ));
        }
    }
}
