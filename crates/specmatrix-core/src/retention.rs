//! Retention purge
//!
//! Physically removes projects soft-deleted longer ago than the retention
//! window, together with everything that belongs to them. Each project is
//! purged in its own transaction whose audit row is written before the rows
//! disappear. Stored bytes no remaining document points at are released
//! after the commit. Only the background job runs this.

use crate::blob::BlobStore;
use crate::error::EngineError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use specmatrix_audit::{AuditAction, AuditRecord};
use specmatrix_model::{ContentDigest, Project, ProjectId, RequestContext};
use specmatrix_store::{Database, PurgeCounts};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of one purge run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Projects removed
    pub purged: Vec<ProjectId>,
    /// Rows removed across all tables
    pub rows: usize,
    /// Stored uploads released
    pub blobs: usize,
    /// Projects whose purge failed and will be retried next run
    pub failed: Vec<ProjectId>,
}

/// Periodic hard-delete of expired projects
pub(crate) struct RetentionPurger {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    retention_days: u32,
}

impl RetentionPurger {
    pub(crate) fn new(db: Arc<Database>, blobs: Arc<dyn BlobStore>, retention_days: u32) -> Self {
        Self {
            db,
            blobs,
            retention_days,
        }
    }

    /// Purge everything soft-deleted before `now - retention_days`
    pub(crate) fn run(&self, now: DateTime<Utc>) -> PurgeReport {
        let cutoff = now - Duration::days(i64::from(self.retention_days));
        let expired: Vec<Project> = self
            .db
            .read()
            .projects_deleted_before(cutoff)
            .cloned()
            .collect();

        let mut report = PurgeReport::default();
        for project in expired {
            match self.purge_one(&project, cutoff) {
                Ok((counts, digests)) => {
                    let released = self.release(&digests);
                    tracing::info!(project = %project.id, rows = counts.total(), blobs = released, "project purged");
                    report.rows += counts.total();
                    report.blobs += released;
                    report.purged.push(project.id);
                }
                Err(err) => {
                    tracing::error!(project = %project.id, error = %err, "project purge failed");
                    report.failed.push(project.id);
                }
            }
        }
        if !report.purged.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                purged = report.purged.len(),
                failed = report.failed.len(),
                rows = report.rows,
                blobs = report.blobs,
                "retention purge finished"
            );
        }
        report
    }

    fn purge_one(
        &self,
        project: &Project,
        cutoff: DateTime<Utc>,
    ) -> Result<(PurgeCounts, BTreeSet<ContentDigest>), EngineError> {
        self.db.transaction(|tx| {
            let digests = tx.digests_of(project.id);
            let documents = tx.documents_in(project.id).count();
            let requirements = tx.requirements_in(project.id).count();
            tx.audit(
                AuditRecord::new(AuditAction::ProjectPurged, "project", project.id)
                    .actor(None)
                    .context(&RequestContext::system())
                    .details(json!({
                        "project_name": project.name,
                        "owner_id": project.owner_id,
                        "deleted_at": project.lifecycle.deleted_at(),
                        "cutoff": cutoff,
                        "retention_days": self.retention_days,
                        "visible_documents": documents,
                        "visible_requirements": requirements,
                    })),
            );
            Ok((tx.purge_project(project.id)?, digests))
        })
    }

    /// Delete bytes whose last referencing document is gone
    fn release(&self, digests: &BTreeSet<ContentDigest>) -> usize {
        let snapshot = self.db.read();
        digests
            .iter()
            .filter(|digest| !snapshot.digest_in_use(digest))
            .filter(|digest| self.blobs.delete(digest))
            .count()
    }
}
