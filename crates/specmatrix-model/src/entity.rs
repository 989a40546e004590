//! Domain entities
//!
//! Plain data. Invariants that span entities (uniqueness, visibility,
//! audit coupling) are enforced by the store and the engine, not here.

use crate::diff::FieldSet;
use crate::digest::ContentDigest;
use crate::id::{DocumentId, MatrixEntryId, ProjectId, RequirementId, UserId};
use crate::lifecycle::{Lifecycle, SoftDelete};
use crate::payload::SpecificationPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

macro_rules! impl_soft_delete {
    ($($ty:ty),+) => {
        $(
            impl SoftDelete for $ty {
                fn lifecycle(&self) -> &Lifecycle {
                    &self.lifecycle
                }

                fn lifecycle_mut(&mut self) -> &mut Lifecycle {
                    &mut self.lifecycle
                }
            }
        )+
    };
}

/// Project workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// In progress
    #[default]
    Active,
    /// Finished, kept for reference
    Completed,
    /// Frozen
    Archived,
}

/// A validation project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Identity
    pub id: ProjectId,
    /// Display name
    pub name: String,
    /// Free-text description
    pub description: Option<String>,
    /// Owner; governs default listing only
    pub owner_id: UserId,
    /// Password digest; presence means collaborative protection
    pub password_digest: Option<String>,
    /// Workflow status
    pub status: ProjectStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete state
    pub lifecycle: Lifecycle,
}

impl Project {
    /// Create an unprotected, active project
    #[must_use]
    pub fn new(name: impl Into<String>, owner_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description: None,
            owner_id,
            password_digest: None,
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        }
    }

    /// With description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With password digest
    #[must_use]
    pub fn with_password_digest(mut self, digest: impl Into<String>) -> Self {
        self.password_digest = Some(digest.into());
        self
    }

    /// Whether the project is password protected
    #[inline]
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.password_digest.is_some()
    }

    /// Whether `user` owns this project
    #[inline]
    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner_id == user
    }
}

impl FieldSet for Project {
    const SUBJECT_TYPE: &'static str = "project";

    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", json!(self.name)),
            ("description", json!(self.description)),
            ("owner_id", json!(self.owner_id)),
            ("has_password", json!(self.is_protected())),
            ("status", json!(self.status)),
        ]
    }
}

/// A verified password grant for a protected project
///
/// A capability cache: one row per (user, project), created after a successful
/// password check and never expired by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAccess {
    /// Grantee
    pub user_id: UserId,
    /// Project
    pub project_id: ProjectId,
    /// When the password was verified
    pub verified_at: DateTime<Utc>,
}

impl ProjectAccess {
    /// Grant created now
    #[must_use]
    pub fn new(user_id: UserId, project_id: ProjectId) -> Self {
        Self {
            user_id,
            project_id,
            verified_at: Utc::now(),
        }
    }
}

/// Extraction state of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Uploaded, waiting for a worker
    #[default]
    Pending,
    /// Claimed by a worker
    Processing,
    /// Payload available
    Completed,
    /// Last attempt failed
    Failed,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An uploaded supplier specification document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identity
    pub id: DocumentId,
    /// Owning project
    pub project_id: ProjectId,
    /// Filename supplied by the uploader
    pub original_filename: String,
    /// MIME type supplied by the uploader
    pub mime_type: String,
    /// Size of the raw upload
    pub size_bytes: u64,
    /// SHA-256 of the raw upload; also its blob locator
    pub digest: ContentDigest,
    /// Extraction state
    pub extraction_status: ExtractionStatus,
    /// Structured content, once extracted
    pub extraction_payload: Option<SpecificationPayload>,
    /// Truncated error of the last failed attempt
    pub extraction_error: Option<String>,
    /// Number of extraction attempts started
    pub extraction_attempts: u32,
    /// Extractor that produced the payload
    pub extraction_model: Option<String>,
    /// When extraction completed
    pub extracted_at: Option<DateTime<Utc>>,
    /// Uploader
    pub uploaded_by: UserId,
    /// Upload time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete state
    pub lifecycle: Lifecycle,
}

impl Document {
    /// New pending document
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        original_filename: impl Into<String>,
        mime_type: impl Into<String>,
        digest: ContentDigest,
        size_bytes: u64,
        uploaded_by: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            project_id,
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
            size_bytes,
            digest,
            extraction_status: ExtractionStatus::Pending,
            extraction_payload: None,
            extraction_error: None,
            extraction_attempts: 0,
            extraction_model: None,
            extracted_at: None,
            uploaded_by,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        }
    }

    /// Completed with a payload: the only state generation accepts
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.extraction_status == ExtractionStatus::Completed && self.extraction_payload.is_some()
    }
}

impl FieldSet for Document {
    const SUBJECT_TYPE: &'static str = "document";

    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("original_filename", json!(self.original_filename)),
            ("mime_type", json!(self.mime_type)),
            ("size_bytes", json!(self.size_bytes)),
            ("digest", json!(self.digest)),
            ("extraction_status", json!(self.extraction_status)),
            ("extraction_error", json!(self.extraction_error)),
            ("extraction_attempts", json!(self.extraction_attempts)),
            ("extraction_model", json!(self.extraction_model)),
        ]
    }
}

/// Requirement priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// High
    High,
    /// Medium
    #[default]
    Medium,
    /// Low
    Low,
}

/// Requirement workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    /// Not yet traced
    #[default]
    Pending,
    /// Being traced
    InProgress,
    /// Traced
    Completed,
}

/// A user requirement to be traced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Identity
    pub id: RequirementId,
    /// Owning project
    pub project_id: ProjectId,
    /// User-facing identifier ("URS-001"), unique within the project
    pub code: String,
    /// Requirement text
    pub description: String,
    /// Category ("Functional", "Security", ...)
    pub category: Option<String>,
    /// Priority
    pub priority: Priority,
    /// Workflow status
    pub status: RequirementStatus,
    /// Author
    pub created_by: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete state
    pub lifecycle: Lifecycle,
}

impl Requirement {
    /// New pending requirement
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        code: impl Into<String>,
        description: impl Into<String>,
        created_by: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RequirementId::new(),
            project_id,
            code: code.into(),
            description: description.into(),
            category: None,
            priority: Priority::Medium,
            status: RequirementStatus::Pending,
            created_by,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        }
    }

    /// With category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// With priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Category, or "General" when unset
    #[must_use]
    pub fn category_or_default(&self) -> &str {
        self.category.as_deref().unwrap_or("General")
    }
}

impl FieldSet for Requirement {
    const SUBJECT_TYPE: &'static str = "requirement";

    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("code", json!(self.code)),
            ("description", json!(self.description)),
            ("category", json!(self.category)),
            ("priority", json!(self.priority)),
            ("status", json!(self.status)),
        ]
    }
}

/// Compliance classification of an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ComplianceStatus {
    /// Fully addressed
    Compliant,
    /// Contradicted by the supplier documentation
    #[serde(rename = "Non-Compliant")]
    NonCompliant,
    /// Partly addressed
    Partial,
    /// Not found, unclear, or the assessment could not be produced
    #[default]
    #[serde(rename = "Requires Clarification")]
    RequiresClarification,
}

impl ComplianceStatus {
    /// Every classification, in declaration order
    pub const ALL: [ComplianceStatus; 4] = [
        Self::Compliant,
        Self::NonCompliant,
        Self::Partial,
        Self::RequiresClarification,
    ];

    /// Wire label
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "Compliant",
            Self::NonCompliant => "Non-Compliant",
            Self::Partial => "Partial",
            Self::RequiresClarification => "Requires Clarification",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human review state of a matrix entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Freshly generated
    #[default]
    Pending,
    /// Checked by an engineer
    Reviewed,
    /// Signed off; terminal
    Approved,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
        };
        f.write_str(s)
    }
}

/// One row of the traceability matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Identity
    pub id: MatrixEntryId,
    /// Requirement being traced
    pub requirement_id: RequirementId,
    /// Document the assessment was generated from
    pub document_id: DocumentId,
    /// Section reference in the supplier document
    pub spec_reference: String,
    /// Verbatim supplier text
    pub supplier_response: String,
    /// Why the classification holds
    pub justification: String,
    /// Classification
    pub compliance_status: ComplianceStatus,
    /// Assessment confidence, 0..=100
    pub confidence_score: u8,
    /// Suggested verification approach
    pub test_reference: Option<String>,
    /// Risk note
    pub risk_assessment: Option<String>,
    /// Free-text comments
    pub comments: Option<String>,
    /// Model that produced the assessment
    pub generation_model: String,
    /// When the assessment was produced
    pub generated_at: DateTime<Utc>,
    /// Opaque generation metadata
    pub generation_metadata: Value,
    /// Review state
    pub review_status: ReviewStatus,
    /// Reviewer comments
    pub reviewer_comments: Option<String>,
    /// Approval time
    pub approved_at: Option<DateTime<Utc>>,
    /// Approver
    pub approved_by: Option<UserId>,
    /// Creator
    pub created_by: UserId,
    /// Last modifier
    pub last_modified_by: Option<UserId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Soft-delete state
    pub lifecycle: Lifecycle,
}

impl MatrixEntry {
    /// Empty pending entry for (requirement, document)
    #[must_use]
    pub fn new(requirement_id: RequirementId, document_id: DocumentId, created_by: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: MatrixEntryId::new(),
            requirement_id,
            document_id,
            spec_reference: String::new(),
            supplier_response: String::new(),
            justification: String::new(),
            compliance_status: ComplianceStatus::RequiresClarification,
            confidence_score: 0,
            test_reference: None,
            risk_assessment: None,
            comments: None,
            generation_model: String::new(),
            generated_at: now,
            generation_metadata: Value::Null,
            review_status: ReviewStatus::Pending,
            reviewer_comments: None,
            approved_at: None,
            approved_by: None,
            created_by,
            last_modified_by: None,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        }
    }

    /// Key of the one-active-entry-per-pair constraint
    #[inline]
    #[must_use]
    pub fn pair(&self) -> (RequirementId, DocumentId) {
        (self.requirement_id, self.document_id)
    }
}

impl FieldSet for MatrixEntry {
    const SUBJECT_TYPE: &'static str = "matrix_entry";

    fn fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("requirement_id", json!(self.requirement_id)),
            ("document_id", json!(self.document_id)),
            ("spec_reference", json!(self.spec_reference)),
            ("supplier_response", json!(self.supplier_response)),
            ("justification", json!(self.justification)),
            ("compliance_status", json!(self.compliance_status)),
            ("confidence_score", json!(self.confidence_score)),
            ("test_reference", json!(self.test_reference)),
            ("risk_assessment", json!(self.risk_assessment)),
            ("comments", json!(self.comments)),
            ("generation_model", json!(self.generation_model)),
            ("review_status", json!(self.review_status)),
            ("reviewer_comments", json!(self.reviewer_comments)),
        ]
    }
}

impl_soft_delete!(Project, Document, Requirement, MatrixEntry);
