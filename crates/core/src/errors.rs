use thiserror::Error;

use crate::{config::ConfigError, domain::estimate::EstimateId, ingest::IngestError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("estimate `{0}` was not found in the input")]
    EstimateNotFound(EstimateId),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("ingest failure: {0}")]
    Ingest(String),
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<IngestError> for ApplicationError {
    fn from(value: IngestError) -> Self {
        Self::Ingest(value.to_string())
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl ApplicationError {
    /// Stable machine-readable class used in structured command output.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::EstimateNotFound(_)) => "not_found",
            Self::Configuration(_) => "config_validation",
            Self::Ingest(_) => "ingest",
            Self::Serialization(_) => "serialization",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Serialization(_) => 1,
            Self::Configuration(_) => 2,
            Self::Ingest(_) => 3,
            Self::Domain(_) => 4,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The input could not be processed. Check the file, flags, and configuration."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::Configuration(message) | ApplicationError::Ingest(message) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Serialization(message) => Self::Internal { message, correlation_id },
        }
    }
}
