//! Store errors

use specmatrix_audit::AuditError;

/// Store error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row absent or soft-deleted
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Identifier
        id: String,
    },

    /// Uniqueness constraint violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transaction mutated state without recording any audit entry
    #[error("transaction mutated {mutations} row(s) without an audit record")]
    UnauditedMutation {
        /// Number of mutations attempted
        mutations: usize,
    },

    /// Audit ledger rejected the batch; the transaction was rolled back
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether this is a uniqueness conflict
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
