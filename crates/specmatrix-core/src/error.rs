//! Error types for the engine
//!
//! [`EngineError`] is what callers see. Its variants carry enough structure
//! to tell "not found" from "denied" from "password required" without
//! revealing more about a project than a password challenge already does.

use specmatrix_audit::AuditError;
use specmatrix_model::{DocumentId, ProjectId};
use specmatrix_store::StoreError;

/// Engine error
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Entity absent or soft-deleted
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Identifier
        id: String,
    },

    /// Role or ownership does not permit the action
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Project is password protected and the principal has not verified
    #[error("project {project_id} requires password verification")]
    PasswordRequired {
        /// The protected project
        project_id: ProjectId,
    },

    /// Uniqueness violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Entity not in a state that allows the operation
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Extraction failed on every allowed attempt
    #[error("extraction of document {document_id} failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        /// Document left in `failed`
        document_id: DocumentId,
        /// Attempts made
        attempts: u32,
        /// Last recorded error
        last_error: String,
    },

    /// Malformed input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Store failure other than not-found or conflict
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// Audit failure
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// Configuration failure
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other),
        }
    }
}

impl EngineError {
    /// Shorthand for [`EngineError::NotFound`]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether this is an authorization outcome the caller should render
    #[inline]
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::AccessDenied(_) | Self::PasswordRequired { .. }
        )
    }

    /// Whether retrying the same call might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Store(_) | Self::Audit(_))
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// Config path
        path: String,
        /// Cause
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override had a bad value
    #[error("invalid value for {key}: {value}")]
    Env {
        /// Variable name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// Semantically invalid setting
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Extraction failure for one attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// No extractor handles this MIME type
    #[error("unsupported content type: {0}")]
    UnsupportedMime(String),

    /// Bytes could not be interpreted
    #[error("malformed content: {0}")]
    Malformed(String),

    /// Stored bytes are missing
    #[error("stored content is missing")]
    BlobMissing,

    /// Stored bytes do not match the recorded digest
    #[error("stored content does not match its digest")]
    DigestMismatch,

    /// Extraction exceeded its time bound
    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    /// Extractor crashed
    #[error("extractor crashed: {0}")]
    Crashed(String),

    /// The attempt ran but its outcome could not be committed
    #[error("extraction result could not be recorded: {0}")]
    Unrecorded(String),

    /// An earlier delivery claimed the document and never settled it
    #[error("extraction was interrupted before its result was recorded")]
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let err: EngineError = StoreError::not_found("requirement", "r1").into();
        assert!(matches!(err, EngineError::NotFound { kind: "requirement", .. }));
        let err: EngineError = StoreError::Conflict("dup".into()).into();
        assert!(matches!(err, EngineError::Conflict(_)));
        let err: EngineError = StoreError::UnauditedMutation { mutations: 1 }.into();
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn denials_are_distinguishable() {
        assert!(EngineError::PasswordRequired {
            project_id: ProjectId::new()
        }
        .is_denial());
        assert!(!EngineError::PreconditionFailed("x".into()).is_denial());
        assert!(EngineError::Conflict("x".into()).is_retryable());
    }
}
