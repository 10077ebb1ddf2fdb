pub mod audit;
pub mod batch;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ingest;
pub mod pricing;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use batch::{run_batch, BatchOptions, BatchReport, BranchGroup};
pub use domain::branch::BranchKey;
pub use domain::estimate::{EstimateId, EstimateStatus, RawEstimate};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ingest::{decode_estimates, read_estimates, IngestError, IngestOutcome};
pub use pricing::aggregate::{BranchAggregator, BranchSummary};
pub use pricing::reconcile::{ErrorPercentage, ErrorSeverity};
pub use pricing::resolver::{MultiplierResolver, MultiplierSource};
pub use pricing::{DeterministicEstimateRuntime, EstimateRuntime, ResolvedEstimate};
