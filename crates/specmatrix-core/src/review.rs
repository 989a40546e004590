//! Review workflow
//!
//! Human sign-off on generated entries: `pending → reviewed → approved`.
//! Approval is terminal and freezes the entry's assessment fields.

use crate::access::WriteGrant;
use crate::error::EngineError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use specmatrix_audit::{AuditAction, AuditRecord, ValueChange};
use specmatrix_model::{
    diff, ComplianceStatus, MatrixEntry, MatrixEntryId, RequestContext, ReviewStatus,
};
use specmatrix_store::{Database, Tables};

/// Valid targets from `from`
#[must_use]
pub fn allowed_review_transitions(from: ReviewStatus) -> &'static [ReviewStatus] {
    match from {
        ReviewStatus::Pending => &[ReviewStatus::Reviewed],
        ReviewStatus::Reviewed => &[ReviewStatus::Approved],
        ReviewStatus::Approved => &[],
    }
}

/// Check a review transition
///
/// # Errors
/// `PreconditionFailed` for anything outside the table, including
/// re-submitting the current status.
pub fn validate_review_transition(from: ReviewStatus, to: ReviewStatus) -> Result<(), EngineError> {
    if allowed_review_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(EngineError::PreconditionFailed(format!(
            "cannot move review status from {from} to {to}"
        )))
    }
}

/// Editable assessment fields; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPatch {
    /// Specification reference
    pub spec_reference: Option<String>,
    /// Supplier response quote
    pub supplier_response: Option<String>,
    /// Justification
    pub justification: Option<String>,
    /// Classification
    pub compliance_status: Option<ComplianceStatus>,
    /// Confidence, clamped to 100
    pub confidence_score: Option<u8>,
    /// Test reference
    pub test_reference: Option<String>,
    /// Risk note
    pub risk_assessment: Option<String>,
    /// Free-text comments
    pub comments: Option<String>,
}

impl EntryPatch {
    fn apply(self, entry: &mut MatrixEntry) {
        if let Some(v) = self.spec_reference {
            entry.spec_reference = v;
        }
        if let Some(v) = self.supplier_response {
            entry.supplier_response = v;
        }
        if let Some(v) = self.justification {
            entry.justification = v;
        }
        if let Some(v) = self.compliance_status {
            entry.compliance_status = v;
        }
        if let Some(v) = self.confidence_score {
            entry.confidence_score = v.min(100);
        }
        if let Some(v) = self.test_reference {
            entry.test_reference = Some(v);
        }
        if let Some(v) = self.risk_assessment {
            entry.risk_assessment = Some(v);
        }
        if let Some(v) = self.comments {
            entry.comments = Some(v);
        }
    }
}

/// Entry visible inside the granted project
fn entry_in_project(
    tables: &Tables,
    grant: &WriteGrant,
    entry_id: MatrixEntryId,
) -> Result<MatrixEntry, EngineError> {
    tables
        .entry(entry_id)
        .filter(|e| {
            tables
                .requirement(e.requirement_id)
                .is_some_and(|r| r.project_id == grant.project_id())
        })
        .cloned()
        .ok_or_else(|| EngineError::not_found("matrix_entry", entry_id))
}

/// Move an entry to `target`, returning the updated entry
///
/// # Errors
/// `NotFound` outside the granted project, `PreconditionFailed` for an
/// invalid transition.
pub fn transition(
    db: &Database,
    grant: &WriteGrant,
    entry_id: MatrixEntryId,
    target: ReviewStatus,
    comments: Option<String>,
    ctx: &RequestContext,
) -> Result<MatrixEntry, EngineError> {
    let reviewer = grant.principal().user_id;

    let entry = db.transaction(|tx| {
        let mut entry = entry_in_project(tx, grant, entry_id)?;
        let old_status = entry.review_status;
        validate_review_transition(old_status, target)?;

        let now = Utc::now();
        entry.review_status = target;
        if comments.is_some() {
            entry.reviewer_comments.clone_from(&comments);
        }
        entry.last_modified_by = Some(reviewer);
        entry.updated_at = now;
        if target == ReviewStatus::Approved {
            entry.approved_at = Some(now);
            entry.approved_by = Some(reviewer);
        }
        tx.update_entry(entry.clone())?;

        let mut record =
            AuditRecord::about::<MatrixEntry>(AuditAction::MatrixEntryReviewed, entry_id)
                .actor(Some(reviewer))
                .context(ctx)
                .details(json!({
                    "old_status": old_status,
                    "new_status": target,
                    "comments": comments,
                    "approved_by": entry.approved_by,
                }));
        record.changes = Some(
            [(
                "review_status".to_string(),
                ValueChange {
                    old: json!(old_status),
                    new: json!(target),
                },
            )]
            .into_iter()
            .collect(),
        );
        tx.audit(record);
        Ok::<_, EngineError>(entry)
    })?;

    tracing::info!(entry = %entry_id, status = %target, reviewer = %reviewer, "review transition");
    Ok(entry)
}

/// Edit assessment fields, one audit row per changed field
///
/// A patch that changes nothing writes nothing.
///
/// # Errors
/// `NotFound` outside the granted project, `PreconditionFailed` if the entry
/// is approved.
pub fn update_entry(
    db: &Database,
    grant: &WriteGrant,
    entry_id: MatrixEntryId,
    patch: EntryPatch,
    ctx: &RequestContext,
) -> Result<MatrixEntry, EngineError> {
    let editor = grant.principal().user_id;

    db.transaction(|tx| {
        let before = entry_in_project(tx, grant, entry_id)?;
        if before.review_status == ReviewStatus::Approved {
            return Err(EngineError::PreconditionFailed(format!(
                "matrix entry {entry_id} is approved and cannot be edited"
            )));
        }

        let mut after = before.clone();
        patch.apply(&mut after);
        let changes = diff(&before, &after);
        if changes.is_empty() {
            return Ok(before);
        }

        after.last_modified_by = Some(editor);
        after.updated_at = Utc::now();
        tracing::debug!(entry = %entry_id, fields = changes.len(), "matrix entry edited");
        tx.update_entry(after.clone())?;
        tx.audit_all(
            AuditRecord::per_field::<MatrixEntry>(AuditAction::MatrixEntryUpdated, entry_id, changes)
                .into_iter()
                .map(|r| r.actor(Some(editor)).context(ctx)),
        );
        Ok(after)
    })
}
