//! Error kinds raised by the flow pipeline.
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    /// A date flag that is not `yyyy-mm-dd`.
    #[error("invalid date '{input}': expected yyyy-mm-dd")]
    InvalidDateFormat { input: String },

    #[error("start {start} must be before end {end}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("max records must be greater than zero")]
    InvalidMaxRecords,

    #[error("split threshold must be greater than zero")]
    InvalidThreshold,

    #[error("every policy decision is excluded; nothing to query")]
    NoPolicyVerdicts,

    #[error("{0} does not exist as an app label")]
    UnknownGroup(String),

    #[error("malformed service exclusion input at line {line}: {reason}")]
    MalformedServiceExclusionInput { line: u64, reason: String },

    /// Network or authentication failure talking to the flow source. Fatal
    /// to the whole command.
    #[error("flow source request failed: {0}")]
    TransportFailure(String),
}

impl FlowError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        FlowError::TransportFailure(err.to_string())
    }
}
