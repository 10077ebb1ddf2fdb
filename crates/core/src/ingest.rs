//! Decoding of estimate exports.
//!
//! An export is either a bare JSON array of estimate records or an object
//! wrapping that array under one of [`ENVELOPE_KEYS`]. Records that are not
//! JSON objects are skipped and reported; object records always decode,
//! because every estimate field is read leniently.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::estimate::RawEstimate;

pub const ENVELOPE_KEYS: [&str; 4] = ["data", "estimates", "results", "items"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("could not read estimate export `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("estimate export is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("estimate export holds no estimate array (expected a top-level array or one of: data, estimates, results, items)")]
    MissingEstimates,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Zero-based position in the source array.
    pub position: usize,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestOutcome {
    pub estimates: Vec<RawEstimate>,
    pub skipped: Vec<SkippedRecord>,
}

pub fn read_estimates(path: &Path) -> Result<IngestOutcome, IngestError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| IngestError::ReadFile { path: path.to_path_buf(), source })?;
    decode_estimates(&raw)
}

pub fn decode_estimates(raw: &str) -> Result<IngestOutcome, IngestError> {
    let document: Value = serde_json::from_str(raw)?;
    let records = match document {
        Value::Array(records) => records,
        Value::Object(mut envelope) => ENVELOPE_KEYS
            .iter()
            .find_map(|key| match envelope.remove(*key) {
                Some(Value::Array(records)) => Some(records),
                _ => None,
            })
            .ok_or(IngestError::MissingEstimates)?,
        _ => return Err(IngestError::MissingEstimates),
    };

    let mut outcome = IngestOutcome::default();
    for (position, record) in records.into_iter().enumerate() {
        if !record.is_object() {
            outcome.skipped.push(SkippedRecord {
                position,
                reason: format!("expected an object, found {}", value_kind(&record)),
            });
            continue;
        }

        match serde_json::from_value::<RawEstimate>(record) {
            Ok(estimate) => outcome.estimates.push(estimate),
            Err(error) => {
                outcome.skipped.push(SkippedRecord { position, reason: error.to_string() })
            }
        }
    }

    for skipped in &outcome.skipped {
        warn!(
            event_name = "ingest.record.skipped",
            position = skipped.position,
            reason = %skipped.reason,
            "skipping unreadable estimate record"
        );
    }

    Ok(outcome)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
