//! Error taxonomy for the retrieval core.

use thiserror::Error;

/// Errors surfaced by the retrieval pipeline.
///
/// An empty result set is not an error; a query matching nothing returns
/// `Ok` with no entries.
#[derive(Debug, Error)]
pub enum RecallError {
    /// Malformed or out-of-range request input.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Weight/threshold configuration invariant violated. Fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Vector or lexical search could not be reached.
    #[error("retrieval unavailable ({source_kind}): {message}")]
    RetrievalUnavailable {
        source_kind: &'static str,
        message: String,
    },

    /// A sub-query exceeded the request deadline.
    #[error("retrieval timed out ({source_kind}) after {timeout_ms} ms")]
    RetrievalTimeout {
        source_kind: &'static str,
        timeout_ms: u64,
    },

    /// A stage received input that breaks a pipeline invariant.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

impl RecallError {
    /// Short machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            RecallError::InvalidParameter(_) => "bad_request",
            RecallError::InvalidConfig(_) => "internal",
            RecallError::RetrievalUnavailable { .. } => "unavailable",
            RecallError::RetrievalTimeout { .. } => "timeout",
            RecallError::InternalInvariantViolation(_) => "internal",
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        RecallError::InternalInvariantViolation(message.into())
    }

    pub(crate) fn invalid_param(message: impl Into<String>) -> Self {
        RecallError::InvalidParameter(message.into())
    }
}
