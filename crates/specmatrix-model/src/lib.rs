//! SpecMatrix Model
//!
//! Shared vocabulary for every SpecMatrix crate:
//! - Strongly-typed identifiers (ULID, sortable by creation time)
//! - Entities: projects, access grants, documents, requirements, matrix entries
//! - First-class soft-delete lifecycle and the single visibility predicate
//! - Principals, roles and request context used for authorization and audit
//! - Generic field-by-field diffing for change tracking
//!
//! # Example
//!
//! ```rust
//! use specmatrix_model::{Project, SoftDelete, UserId};
//!
//! let owner = UserId::new();
//! let project = Project::new("LIMS upgrade", owner);
//! assert!(project.is_visible());
//! assert!(!project.is_protected());
//! ```

#![warn(unreachable_pub)]

pub mod context;
pub mod diff;
pub mod digest;
pub mod entity;
pub mod id;
pub mod lifecycle;
pub mod payload;
pub mod principal;

pub use context::RequestContext;
pub use diff::{diff, FieldChange, FieldSet};
pub use digest::{ContentDigest, DigestError};
pub use entity::{
    ComplianceStatus, Document, ExtractionStatus, MatrixEntry, Priority, Project, ProjectAccess,
    ProjectStatus, Requirement, RequirementStatus, ReviewStatus,
};
pub use id::{AuditId, DocumentId, MatrixEntryId, ProjectId, RequirementId, UserId};
pub use lifecycle::{Lifecycle, SoftDelete};
pub use payload::{DocumentInfo, Section, SpecificationPayload, Table};
pub use principal::{Principal, Role, Scope};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
