use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use specmatrix_audit::{AuditAction, AuditEntry, AuditError, AuditLedger, AuditRecord, AuditSink};
use specmatrix_model::{
    ContentDigest, Document, FieldSet, MatrixEntry, Project, ProjectAccess, Requirement, UserId,
};
use specmatrix_store::{Database, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SwitchableSink {
    broken: AtomicBool,
}

impl AuditSink for SwitchableSink {
    fn persist(&self, _entries: &[AuditEntry]) -> Result<(), AuditError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(AuditError::SinkUnavailable("disk full".into()))
        } else {
            Ok(())
        }
    }
}

fn created<T: FieldSet>(action: AuditAction, id: impl ToString, row: &T) -> AuditRecord {
    AuditRecord::about::<T>(action, id).details(row.snapshot())
}

fn seeded() -> (Database, Project, Requirement, Document) {
    let db = Database::new(Arc::new(AuditLedger::default()));
    let owner = UserId::new();
    let project = Project::new("Bioreactor", owner);
    let requirement = Requirement::new(project.id, "URS-001", "Log every change", owner);
    let document = Document::new(
        project.id,
        "spec.md",
        "text/markdown",
        ContentDigest::compute(b"spec"),
        4,
        owner,
    );
    db.transaction(|tx| {
        tx.insert_project(project.clone())?;
        tx.insert_requirement(requirement.clone())?;
        tx.insert_document(document.clone())?;
        tx.audit(created(AuditAction::ProjectCreated, project.id, &project));
        tx.audit(created(AuditAction::RequirementCreated, requirement.id, &requirement));
        tx.audit(created(AuditAction::DocumentUploaded, document.id, &document));
        Ok::<_, StoreError>(())
    })
    .unwrap();
    (db, project, requirement, document)
}

#[test]
fn commit_makes_rows_and_audit_visible_together() {
    let (db, project, requirement, _) = seeded();
    let snap = db.read();
    assert!(snap.project(project.id).is_some());
    assert_eq!(snap.requirement_by_code(project.id, "URS-001").map(|r| r.id), Some(requirement.id));
    assert_eq!(db.ledger().len(), 3);
}

#[test]
fn unaudited_mutation_is_rejected() {
    let db = Database::new(Arc::new(AuditLedger::default()));
    let project = Project::new("P", UserId::new());
    let err = db
        .transaction(|tx| tx.insert_project(project.clone()))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnauditedMutation { mutations: 1 }));
    assert!(db.read().project(project.id).is_none());
}

#[test]
fn audit_failure_rolls_back_the_mutation() {
    let sink = Arc::new(SwitchableSink::default());
    let db = Database::new(Arc::new(AuditLedger::new(sink.clone())));
    sink.broken.store(true, Ordering::SeqCst);

    let project = Project::new("P", UserId::new());
    let err = db
        .transaction(|tx| {
            tx.insert_project(project.clone())?;
            tx.audit(created(AuditAction::ProjectCreated, project.id, &project));
            Ok::<_, StoreError>(())
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Audit(_)));
    assert!(db.read().project_any(project.id).is_none());
    assert!(db.ledger().is_empty());
}

#[test]
fn closure_error_discards_partial_writes() {
    let (db, project, _, _) = seeded();
    let dup = Requirement::new(project.id, "URS-001", "again", UserId::new());
    let other = Requirement::new(project.id, "URS-002", "fresh", UserId::new());
    let err = db
        .transaction(|tx| {
            tx.insert_requirement(other.clone())?;
            tx.insert_requirement(dup.clone())?;
            tx.audit(created(AuditAction::RequirementCreated, other.id, &other));
            Ok::<_, StoreError>(())
        })
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(db.read().requirement(other.id).is_none());
}

#[test]
fn deleted_requirement_releases_its_code() {
    let (db, project, requirement, _) = seeded();
    db.transaction(|tx| {
        let deleted = tx.soft_delete_requirement(requirement.id, Utc::now())?;
        tx.audit(created(AuditAction::RequirementDeleted, deleted.id, &deleted));
        let again = Requirement::new(project.id, "URS-001", "replacement", UserId::new());
        tx.audit(created(AuditAction::RequirementCreated, again.id, &again));
        tx.insert_requirement(again)
    })
    .unwrap();
    let snap = db.read();
    assert!(snap.requirement(requirement.id).is_none());
    assert_eq!(snap.requirements_in(project.id).count(), 1);
}

#[test]
fn one_active_entry_per_pair() {
    let (db, _, requirement, document) = seeded();
    let creator = UserId::new();
    let first = MatrixEntry::new(requirement.id, document.id, creator);
    db.transaction(|tx| {
        tx.audit(created(AuditAction::MatrixEntryGenerated, first.id, &first));
        tx.insert_entry(first.clone())
    })
    .unwrap();

    let second = MatrixEntry::new(requirement.id, document.id, creator);
    let err = db
        .transaction(|tx| {
            tx.audit(created(AuditAction::MatrixEntryGenerated, second.id, &second));
            tx.insert_entry(second.clone())
        })
        .unwrap_err();
    assert!(err.is_conflict());

    db.transaction(|tx| {
        let old = tx.soft_delete_entry(first.id, Utc::now())?;
        tx.audit(created(AuditAction::MatrixEntryDeleted, old.id, &old));
        tx.audit(created(AuditAction::MatrixEntryGenerated, second.id, &second));
        tx.insert_entry(second.clone())
    })
    .unwrap();

    let snap = db.read();
    assert_eq!(snap.active_entry(requirement.id, document.id).map(|e| e.id), Some(second.id));
    assert_eq!(snap.count_active_for(requirement.id, document.id), 1);

    let err = db
        .transaction(|tx| {
            tx.audit(AuditRecord::new(AuditAction::MatrixEntryDeleted, "matrix_entry", first.id));
            tx.soft_delete_entry(first.id, Utc::now())
        })
        .unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn purge_removes_project_and_dependents() {
    let (db, project, requirement, document) = seeded();
    let other = Project::new("Keep", UserId::new());
    let viewer = UserId::new();
    let entry = MatrixEntry::new(requirement.id, document.id, viewer);
    db.transaction(|tx| {
        tx.insert_project(other.clone())?;
        tx.grant_access(ProjectAccess::new(viewer, project.id));
        tx.insert_entry(entry.clone())?;
        tx.soft_delete_project(project.id, Utc::now() - Duration::days(40))?;
        tx.audit(AuditRecord::new(AuditAction::ProjectDeleted, "project", project.id));
        Ok::<_, StoreError>(())
    })
    .unwrap();

    let cutoff = Utc::now() - Duration::days(30);
    let due: Vec<_> = db.read().projects_deleted_before(cutoff).map(|p| p.id).collect();
    assert_eq!(due, vec![project.id]);

    let counts = db
        .transaction(|tx| {
            tx.audit(AuditRecord::new(AuditAction::ProjectPurged, "project", project.id));
            tx.purge_project(project.id)
        })
        .unwrap();
    assert_eq!(counts.total(), 5);

    let snap = db.read();
    assert!(snap.project_any(project.id).is_none());
    assert!(snap.document_any(document.id).is_none());
    assert!(snap.entry_any(entry.id).is_none());
    assert!(snap.access(viewer, project.id).is_none());
    assert!(snap.project(other.id).is_some());
}

#[test]
fn subjects_include_deleted_rows() {
    let (db, project, requirement, document) = seeded();
    db.transaction(|tx| {
        tx.soft_delete_document(document.id, Utc::now())?;
        tx.audit(AuditRecord::new(AuditAction::DocumentDeleted, "document", document.id));
        Ok::<_, StoreError>(())
    })
    .unwrap();
    let subjects = db.read().subjects_of(project.id);
    assert!(subjects.contains(&document.id.to_string()));
    assert!(subjects.contains(&requirement.id.to_string()));
    assert!(subjects.contains(&project.id.to_string()));
}

#[test]
fn digests_track_documents_until_purged() {
    let (db, project, _, document) = seeded();
    let shared = Project::new("Sibling", UserId::new());
    let copy = Document::new(shared.id, "copy.md", "text/markdown", document.digest, 4, shared.owner_id);
    db.transaction(|tx| {
        tx.insert_project(shared.clone())?;
        tx.insert_document(copy.clone())?;
        tx.soft_delete_document(document.id, Utc::now())?;
        tx.audit(created(AuditAction::DocumentUploaded, copy.id, &copy));
        Ok::<_, StoreError>(())
    })
    .unwrap();

    let snap = db.read();
    assert_eq!(snap.digests_of(project.id).into_iter().collect::<Vec<_>>(), vec![document.digest]);
    assert!(snap.digest_in_use(&document.digest));

    db.transaction(|tx| {
        tx.soft_delete_project(project.id, Utc::now())?;
        tx.audit(AuditRecord::new(AuditAction::ProjectPurged, "project", project.id));
        tx.purge_project(project.id)
    })
    .unwrap();
    assert!(db.read().digests_of(project.id).is_empty());
    assert!(db.read().digest_in_use(&document.digest), "sibling copy still points at the bytes");

    db.transaction(|tx| {
        tx.soft_delete_project(shared.id, Utc::now())?;
        tx.audit(AuditRecord::new(AuditAction::ProjectPurged, "project", shared.id));
        tx.purge_project(shared.id)
    })
    .unwrap();
    assert!(!db.read().digest_in_use(&document.digest));
}
