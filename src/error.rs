use std::io;
use thiserror::Error;

/// Failures raised by the dispatch components before an outcome exists.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid value for '{param}': {reason}")]
    InvalidInput { param: String, reason: String },

    #[error("unknown operation '{name}'")]
    UnknownOperation { name: String },

    #[error("operation timed out after {timeout_ms}ms")]
    OperationTimeout { timeout_ms: u64 },

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl DispatchError {
    pub fn invalid(param: impl Into<String>, reason: impl Into<String>) -> Self {
        DispatchError::InvalidInput {
            param: param.into(),
            reason: reason.into(),
        }
    }
}
