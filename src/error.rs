use thiserror::Error;

/// Errors surfaced by [`crate::Client`].
///
/// Classification happens once, at the transport boundary; the retry loop
/// only consults [`ClientError::is_retryable`] and never re-interprets raw
/// transport failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request was rejected before any network call was made.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The configured deadline elapsed before the provider responded.
    #[error("request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// Connectivity, DNS, or socket-layer failure.
    #[error("network error: {0}")]
    Network(String),
    /// Any other transport-level failure, surfaced as-is.
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-2xx response from the provider.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retryable: bool,
    },
    /// 2xx response whose body is not a JSON document.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    /// Terminal wrapper: the retry budget is spent or the last error was
    /// not retryable. Carries the total attempts made and the root cause.
    #[error("request failed after {attempts} attempt(s): {source}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether the retry loop may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout { .. } | ClientError::Network(_) => true,
            ClientError::Http { retryable, .. } => *retryable,
            ClientError::Validation(_)
            | ClientError::Transport(_)
            | ClientError::MalformedResponse(_)
            | ClientError::AttemptsExhausted { .. } => false,
        }
    }
}

/// Whether an HTTP status is worth retrying.
pub(crate) fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429) || status >= 500
}
