//! Audit entries
//!
//! [`AuditRecord`] is what callers describe; [`AuditEntry`] is what the
//! ledger stores after assigning sequence, timestamp and chain hashes.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use specmatrix_model::{AuditId, FieldChange, FieldSet, RequestContext, UserId};
use std::fmt;

/// Action verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// Project created
    ProjectCreated,
    /// One project field changed
    ProjectUpdated,
    /// Project soft-deleted
    ProjectDeleted,
    /// Project physically removed by retention purge
    ProjectPurged,
    /// Project password accepted
    ProjectPasswordVerified,
    /// Project password rejected
    ProjectPasswordVerifyFailed,
    /// Document uploaded (pending extraction)
    DocumentUploaded,
    /// Document soft-deleted
    DocumentDeleted,
    /// Extraction attempt claimed the document
    ExtractionStarted,
    /// Extraction stored a payload
    ExtractionCompleted,
    /// Extraction attempt failed
    ExtractionFailed,
    /// Requirement created
    RequirementCreated,
    /// One requirement field changed
    RequirementUpdated,
    /// Requirement soft-deleted
    RequirementDeleted,
    /// Matrix entry generated
    MatrixEntryGenerated,
    /// One matrix entry field changed
    MatrixEntryUpdated,
    /// Matrix entry soft-deleted
    MatrixEntryDeleted,
    /// Review state changed
    MatrixEntryReviewed,
}

impl AuditAction {
    /// Wire label ("MATRIX_ENTRY_GENERATED")
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "PROJECT_CREATED",
            Self::ProjectUpdated => "PROJECT_UPDATED",
            Self::ProjectDeleted => "PROJECT_DELETED",
            Self::ProjectPurged => "PROJECT_PURGED",
            Self::ProjectPasswordVerified => "PROJECT_PASSWORD_VERIFIED",
            Self::ProjectPasswordVerifyFailed => "PROJECT_PASSWORD_VERIFY_FAILED",
            Self::DocumentUploaded => "DOCUMENT_UPLOADED",
            Self::DocumentDeleted => "DOCUMENT_DELETED",
            Self::ExtractionStarted => "EXTRACTION_STARTED",
            Self::ExtractionCompleted => "EXTRACTION_COMPLETED",
            Self::ExtractionFailed => "EXTRACTION_FAILED",
            Self::RequirementCreated => "REQUIREMENT_CREATED",
            Self::RequirementUpdated => "REQUIREMENT_UPDATED",
            Self::RequirementDeleted => "REQUIREMENT_DELETED",
            Self::MatrixEntryGenerated => "MATRIX_ENTRY_GENERATED",
            Self::MatrixEntryUpdated => "MATRIX_ENTRY_UPDATED",
            Self::MatrixEntryDeleted => "MATRIX_ENTRY_DELETED",
            Self::MatrixEntryReviewed => "MATRIX_ENTRY_REVIEWED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Old and new value of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    /// Before
    pub old: Value,
    /// After
    pub new: Value,
}

/// An audit row as described by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Acting user; `None` for system actions
    pub actor: Option<UserId>,
    /// Verb
    pub action: AuditAction,
    /// Subject type ("matrix_entry")
    pub subject_type: String,
    /// Subject id
    pub subject_id: String,
    /// Field-level changes, for updates
    pub changes: Option<IndexMap<String, ValueChange>>,
    /// Client metadata
    pub context: RequestContext,
    /// Free-form details
    pub details: Value,
}

impl AuditRecord {
    /// New record with no actor, changes or details
    #[must_use]
    pub fn new(
        action: AuditAction,
        subject_type: impl Into<String>,
        subject_id: impl ToString,
    ) -> Self {
        Self {
            actor: None,
            action,
            subject_type: subject_type.into(),
            subject_id: subject_id.to_string(),
            changes: None,
            context: RequestContext::default(),
            details: Value::Null,
        }
    }

    /// Record about an entity, subject type taken from its [`FieldSet`]
    #[must_use]
    pub fn about<T: FieldSet>(action: AuditAction, subject_id: impl ToString) -> Self {
        Self::new(action, T::SUBJECT_TYPE, subject_id)
    }

    /// One record per changed field
    #[must_use]
    pub fn per_field<T: FieldSet>(
        action: AuditAction,
        subject_id: impl ToString,
        changes: Vec<FieldChange>,
    ) -> Vec<Self> {
        let subject_id = subject_id.to_string();
        changes
            .into_iter()
            .map(|change| {
                let mut map = IndexMap::with_capacity(1);
                map.insert(
                    change.field,
                    ValueChange {
                        old: change.old,
                        new: change.new,
                    },
                );
                Self {
                    changes: Some(map),
                    ..Self::about::<T>(action, &subject_id)
                }
            })
            .collect()
    }

    /// With acting user
    #[inline]
    #[must_use]
    pub fn actor(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    /// With client metadata
    #[inline]
    #[must_use]
    pub fn context(mut self, context: &RequestContext) -> Self {
        self.context = context.clone();
        self
    }

    /// With details
    #[inline]
    #[must_use]
    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// SHA-256 link in the audit chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChainHash(pub [u8; 32]);

impl ChainHash {
    /// Hash preceding the first entry
    pub const GENESIS: ChainHash = ChainHash([0u8; 32]);
}

impl fmt::Display for ChainHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for ChainHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ChainHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("chain hash must be 32 bytes"))?;
        Ok(Self(arr))
    }
}

/// A sealed, immutable audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Identity
    pub id: AuditId,
    /// Position in the chain, starting at 1
    pub sequence: u64,
    /// When the row was sealed
    pub timestamp: DateTime<Utc>,
    /// Acting user; `None` for system actions
    pub actor: Option<UserId>,
    /// Verb
    pub action: AuditAction,
    /// Subject type
    pub subject_type: String,
    /// Subject id
    pub subject_id: String,
    /// Field-level changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<IndexMap<String, ValueChange>>,
    /// Client metadata
    #[serde(default)]
    pub context: RequestContext,
    /// Free-form details
    #[serde(default)]
    pub details: Value,
    /// Hash of the previous entry
    pub prev_hash: ChainHash,
    /// Hash of this entry
    pub hash: ChainHash,
}

impl AuditEntry {
    pub(crate) fn seal(
        record: AuditRecord,
        sequence: u64,
        timestamp: DateTime<Utc>,
        prev_hash: ChainHash,
    ) -> Self {
        let mut entry = Self {
            id: AuditId::new(),
            sequence,
            timestamp,
            actor: record.actor,
            action: record.action,
            subject_type: record.subject_type,
            subject_id: record.subject_id,
            changes: record.changes,
            context: record.context,
            details: record.details,
            prev_hash,
            hash: ChainHash::GENESIS,
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// Recompute this entry's hash from its content and `prev_hash`
    #[must_use]
    pub fn compute_hash(&self) -> ChainHash {
        let mut hasher = Sha256::new();
        hasher.update(self.id.to_string().as_bytes());
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update([0]);
        if let Some(actor) = self.actor {
            hasher.update(actor.to_string().as_bytes());
        }
        hasher.update([0]);
        hasher.update(self.action.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.subject_type.as_bytes());
        hasher.update([0]);
        hasher.update(self.subject_id.as_bytes());
        hasher.update([0]);
        hasher.update(canonical(&self.changes));
        hasher.update([0]);
        hasher.update(canonical(&self.context));
        hasher.update([0]);
        hasher.update(canonical(&self.details));
        hasher.update([0]);
        hasher.update(self.prev_hash.0);
        ChainHash(hasher.finalize().into())
    }

    /// Whether this row was written by a system process
    #[inline]
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.actor.is_none()
    }
}

fn canonical<T: Serialize>(value: &T) -> Vec<u8> {
    // Serializing plain data into a Vec cannot fail; an empty slot still
    // changes the hash input relative to real content.
    serde_json::to_vec(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use specmatrix_model::MatrixEntry;

    #[test]
    fn action_serializes_screaming_snake() {
        let json = serde_json::to_string(&AuditAction::MatrixEntryGenerated).unwrap();
        assert_eq!(json, "\"MATRIX_ENTRY_GENERATED\"");
        assert_eq!(AuditAction::ProjectPurged.to_string(), "PROJECT_PURGED");
    }

    #[test]
    fn per_field_emits_one_record_per_change() {
        let changes = vec![
            FieldChange {
                field: "comments".into(),
                old: Value::Null,
                new: json!("ok"),
            },
            FieldChange {
                field: "risk_assessment".into(),
                old: json!("Low"),
                new: json!("High"),
            },
        ];
        let records = AuditRecord::per_field::<MatrixEntry>(AuditAction::MatrixEntryUpdated, "e1", changes);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.subject_type == "matrix_entry"));
        assert_eq!(records[1].changes.as_ref().unwrap()["risk_assessment"].new, json!("High"));
    }

    #[test]
    fn sealed_hash_covers_details() {
        let record = AuditRecord::new(AuditAction::ProjectCreated, "project", "p1")
            .details(json!({"name": "a"}));
        let mut entry = AuditEntry::seal(record, 1, Utc::now(), ChainHash::GENESIS);
        assert_eq!(entry.hash, entry.compute_hash());
        entry.details = json!({"name": "b"});
        assert_ne!(entry.hash, entry.compute_hash());
    }

    #[test]
    fn chain_hash_serde_is_hex() {
        let h = ChainHash([0xab; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json.len(), 64 + 2);
        let back: ChainHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
