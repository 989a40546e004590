//! Error types for the audit trail

/// Audit trail errors
///
/// Any of these, raised while appending, must abort the mutation being
/// audited.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Durable sink failed
    #[error("audit sink unavailable: {0}")]
    SinkUnavailable(String),

    /// I/O failure in a file-backed sink
    #[error("audit i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be encoded or decoded
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hash chain broken at the given sequence number
    #[error("audit chain integrity violation at sequence {sequence}")]
    IntegrityViolation {
        /// First sequence number that fails verification
        sequence: u64,
    },

    /// Query parameters out of range
    #[error("invalid audit query: {0}")]
    InvalidQuery(String),
}

impl AuditError {
    /// Whether the chain itself is compromised
    #[inline]
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::IntegrityViolation { .. })
    }
}
