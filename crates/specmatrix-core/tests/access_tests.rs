use pretty_assertions::assert_eq;
use specmatrix_audit::{AuditAction, AuditQuery};
use specmatrix_core::{Decision, DocumentSelector, EngineError, Intent, NewRequirement};
use specmatrix_model::{Principal, Scope};
use specmatrix_test_utils::{TestBed, SAMPLE_SPEC};

#[tokio::test]
async fn administrators_read_but_never_write() {
    let bed = TestBed::new().await;
    let project = bed.protected_project("Locked", "s3cret");
    let admin = Principal::admin("auditor");

    assert_eq!(
        bed.engine.check_access(&admin, project.id, Intent::Read).unwrap(),
        Decision::Allowed
    );
    assert_eq!(
        bed.engine.check_access(&admin, project.id, Intent::Write).unwrap(),
        Decision::Denied
    );
    assert!(bed.engine.matrix(&admin, project.id).is_ok());

    let err = bed
        .engine
        .generate_batch(&admin, project.id, &[], DocumentSelector::AllExtracted, None, false, &bed.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied(_)), "{err}");

    let err = bed
        .engine
        .create_project(&admin, "Mine", None, None, &bed.ctx)
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied(_)));
}

#[tokio::test]
async fn open_projects_admit_any_engineer() {
    let bed = TestBed::new().await;
    let project = bed.project("Open");
    let stranger = Principal::engineer("stranger");

    assert_eq!(
        bed.engine.check_access(&stranger, project.id, Intent::Write).unwrap(),
        Decision::Allowed
    );
    let requirement = bed
        .engine
        .create_requirement(
            &stranger,
            project.id,
            NewRequirement {
                code: "R9".into(),
                description: "Anyone may add this".into(),
                ..NewRequirement::default()
            },
            &bed.ctx,
        )
        .unwrap();
    assert_eq!(requirement.created_by, stranger.user_id);
}

#[tokio::test]
async fn password_flow_gates_protected_projects() {
    let bed = TestBed::new().await;
    let project = bed.protected_project("Locked", "s3cret");
    let colleague = Principal::engineer("colleague");

    let err = bed.engine.matrix(&colleague, project.id).unwrap_err();
    assert!(matches!(err, EngineError::PasswordRequired { project_id } if project_id == project.id));

    let err = bed
        .engine
        .verify_project_password(&colleague, project.id, "guess", &bed.ctx)
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied(_)));
    assert!(matches!(
        bed.engine.matrix(&colleague, project.id),
        Err(EngineError::PasswordRequired { .. })
    ));

    bed.engine
        .verify_project_password(&colleague, project.id, "s3cret", &bed.ctx)
        .unwrap();
    assert!(bed.engine.matrix(&colleague, project.id).unwrap().is_empty());
    assert_eq!(
        bed.engine.check_access(&colleague, project.id, Intent::Write).unwrap(),
        Decision::Allowed
    );

    let failed = bed
        .engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::ProjectPasswordVerifyFailed));
    let verified = bed
        .engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::ProjectPasswordVerified));
    assert_eq!(failed.total, 1);
    assert_eq!(verified.total, 1);
    assert_eq!(verified.entries[0].actor, Some(colleague.user_id));
}

#[tokio::test]
async fn owner_needs_no_password() {
    let bed = TestBed::new().await;
    let project = bed.protected_project("Locked", "s3cret");
    assert!(bed.engine.matrix(&bed.owner, project.id).is_ok());
    assert!(!bed.engine.ledger().entries().iter().any(|e| e.details.to_string().contains("s3cret")));
}

#[tokio::test]
async fn administrators_cannot_verify_passwords() {
    let bed = TestBed::new().await;
    let project = bed.protected_project("Locked", "s3cret");
    let err = bed
        .engine
        .verify_project_password(&Principal::admin("root"), project.id, "s3cret", &bed.ctx)
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied(_)));

    let open = bed.project("Open");
    let err = bed
        .engine
        .verify_project_password(&bed.owner, open.id, "anything", &bed.ctx)
        .unwrap_err();
    assert!(matches!(err, EngineError::PreconditionFailed(_)));
}

#[tokio::test]
async fn only_the_owner_deletes_a_project() {
    let bed = TestBed::new().await;
    let project = bed.project("Mine");

    let err = bed
        .engine
        .delete_project(&Principal::engineer("other"), project.id, &bed.ctx)
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied(_)));

    bed.engine.delete_project(&bed.owner, project.id, &bed.ctx).unwrap();
    let err = bed.engine.matrix(&bed.owner, project.id).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "project", .. }));
}

#[tokio::test]
async fn audit_queries_are_scoped() {
    let bed = TestBed::new().await;
    let project = bed.project("P");
    let other = bed.project("Q");
    let document = bed.extracted_document(&project, SAMPLE_SPEC).await;
    bed.requirement(&project, "R1", "Changes shall be logged");
    bed.requirement(&other, "R1", "Changes shall be logged");

    let err = bed
        .engine
        .query_audit(&bed.owner, &AuditQuery::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied(_)));

    let auditor = Principal::engineer("qa").with_scope(Scope::Audit);
    let everything = bed.engine.query_audit(&auditor, &AuditQuery::new()).unwrap();
    let scoped = bed
        .engine
        .query_project_audit(&bed.owner, project.id, AuditQuery::new())
        .unwrap();
    assert!(scoped.total < everything.total);
    assert!(scoped
        .entries
        .iter()
        .any(|e| e.subject_id == document.id.to_string()));

    let err = bed
        .engine
        .query_project_audit(&bed.owner, project.id, AuditQuery::new().page(501, 0))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    let err = bed
        .engine
        .query_audit(&auditor, &AuditQuery::new().page(1001, 0))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}
