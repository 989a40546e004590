//! Provider errors

/// Transport-level provider failure
///
/// Unusable model output is not an error; it becomes a degraded
/// [`Assessment`](crate::Assessment).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Request could not be sent or the response body could not be read
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// Response envelope did not contain generated text
    #[error("unexpected response envelope: {0}")]
    Envelope(String),

    /// Call exceeded its time bound
    #[error("provider call timed out after {0}s")]
    Timeout(u64),

    /// Misconfiguration
    #[error("provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same call might succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Timeout(_) => true,
            Self::Envelope(_) | Self::Config(_) => false,
        }
    }
}
