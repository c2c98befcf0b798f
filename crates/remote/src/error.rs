//! Collaborator-level error type.

use thiserror::Error;

/// Errors returned by a remote collaborator.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: the request is re-sent with exponential back-off.
/// - `Fatal`: the collaborator answered with an error; no retry.
/// - `Channel`: the push channel could not be opened or broke down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transient failure (connection refused, timeout); safe to re-send.
    #[error("transient remote error: {0}")]
    Retryable(String),

    /// The remote side rejected the request.
    #[error("{0}")]
    Fatal(String),

    /// Push channel failure.
    #[error("push channel error: {0}")]
    Channel(String),
}

impl RemoteError {
    /// Whether re-sending the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
