use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use specmatrix_audit::{AuditAction, AuditQuery};
use specmatrix_core::{
    DeferredTaskRunner, Engine, EngineError, EntryPatch, GenerationOutcome, TaskRunner,
};
use specmatrix_model::{ComplianceStatus, MatrixEntryId, Principal, RequestContext, ReviewStatus};
use specmatrix_provider::{
    Assessment, AssessmentProvider, AssessmentRequest, GeneratedAssessment, ProviderDescriptor,
    ProviderError, ProviderKind,
};
use specmatrix_test_utils::{fast_config, TestBed, SAMPLE_SPEC};
use std::sync::Arc;

mock! {
    Provider {}

    #[async_trait]
    impl AssessmentProvider for Provider {
        fn descriptor(&self) -> ProviderDescriptor;
        async fn assess(&self, request: &AssessmentRequest) -> Result<GeneratedAssessment, ProviderError>;
    }
}

fn partial() -> GeneratedAssessment {
    GeneratedAssessment::ok(
        Assessment {
            spec_reference: "Section 1.1".into(),
            supplier_response: "Changes are recorded".into(),
            justification: "Reason for change is not mentioned".into(),
            compliance_status: ComplianceStatus::Partial,
            confidence_score: 70,
            test_reference: None,
            risk_assessment: Some("Medium".into()),
            comments: None,
        },
        "mock-model",
    )
}

async fn engine_with_entry() -> (Engine, Arc<DeferredTaskRunner>, Principal, MatrixEntryId) {
    let mut provider = MockProvider::new();
    provider.expect_descriptor().returning(|| ProviderDescriptor {
        kind: ProviderKind::Remote,
        model: "mock-model".into(),
    });
    provider
        .expect_assess()
        .withf(|request| request.category == "Data Integrity" && !request.bundle.is_empty())
        .times(1)
        .returning(|_| Ok(partial()));

    let runner = Arc::new(DeferredTaskRunner::new());
    let engine = Engine::builder(fast_config())
        .provider(Arc::new(provider))
        .runner(Arc::clone(&runner) as Arc<dyn TaskRunner>)
        .build()
        .await
        .unwrap();

    let owner = Principal::engineer("owner");
    let ctx = RequestContext::new();
    let project = engine.create_project(&owner, "P", None, None, &ctx).unwrap();
    let requirement = engine
        .create_requirement(
            &owner,
            project.id,
            specmatrix_core::NewRequirement {
                code: "R1".into(),
                description: "Changes shall be logged with a reason".into(),
                category: Some("Data Integrity".into()),
                ..Default::default()
            },
            &ctx,
        )
        .unwrap();
    let document = engine
        .upload_document(&owner, project.id, "spec.md", "text/markdown", SAMPLE_SPEC.as_bytes(), &ctx)
        .await
        .unwrap();
    let jobs = engine.jobs();
    runner.drain(jobs.as_ref()).await;

    let outcome = engine
        .generate_one(&owner, requirement.id, document.id, false, &ctx)
        .await
        .unwrap();
    let GenerationOutcome::Created { entry_id, compliance_status, .. } = outcome else {
        panic!("expected created, got {outcome:?}");
    };
    assert_eq!(compliance_status, ComplianceStatus::Partial);
    (engine, runner, owner, entry_id)
}

#[tokio::test]
async fn generation_metadata_records_the_provider() {
    let (engine, _runner, owner, entry_id) = engine_with_entry().await;
    let entry = engine.database().read().entry(entry_id).cloned().unwrap();

    assert_eq!(entry.generation_model, "mock-model");
    assert_eq!(entry.generation_metadata["provider"], "remote");
    assert_eq!(entry.generation_metadata["prompt_version"], "v1.0");
    assert_eq!(entry.generation_metadata["degraded"], false);
    assert_eq!(entry.created_by, owner.user_id);
}

#[tokio::test]
async fn review_walks_forward_to_approval() {
    let (engine, _runner, owner, entry_id) = engine_with_entry().await;
    let ctx = RequestContext::new();

    let reviewed = engine
        .review(&owner, entry_id, ReviewStatus::Reviewed, Some("checked".into()), &ctx)
        .unwrap();
    assert_eq!(reviewed.review_status, ReviewStatus::Reviewed);
    assert!(reviewed.approved_at.is_none());

    let approved = engine
        .review(&owner, entry_id, ReviewStatus::Approved, None, &ctx)
        .unwrap();
    assert_eq!(approved.review_status, ReviewStatus::Approved);
    assert_eq!(approved.approved_by, Some(owner.user_id));
    assert!(approved.approved_at.is_some());
    assert_eq!(approved.reviewer_comments.as_deref(), Some("checked"));

    let trail = engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::MatrixEntryReviewed));
    assert_eq!(trail.total, 2);
    // newest first
    assert_eq!(trail.entries[0].details["old_status"], "reviewed");
    assert_eq!(trail.entries[0].details["new_status"], "approved");
    assert_eq!(trail.entries[1].details["comments"], "checked");
}

#[tokio::test]
async fn approval_is_terminal_and_freezes_the_entry() {
    let (engine, _runner, owner, entry_id) = engine_with_entry().await;
    let ctx = RequestContext::new();

    let err = engine
        .review(&owner, entry_id, ReviewStatus::Approved, None, &ctx)
        .unwrap_err();
    assert!(matches!(err, EngineError::PreconditionFailed(_)));

    engine.review(&owner, entry_id, ReviewStatus::Reviewed, None, &ctx).unwrap();
    engine.review(&owner, entry_id, ReviewStatus::Approved, None, &ctx).unwrap();

    for target in [ReviewStatus::Pending, ReviewStatus::Reviewed, ReviewStatus::Approved] {
        assert!(engine.review(&owner, entry_id, target, None, &ctx).is_err());
    }
    let err = engine
        .update_entry(
            &owner,
            entry_id,
            EntryPatch {
                comments: Some("late edit".into()),
                ..EntryPatch::default()
            },
            &ctx,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::PreconditionFailed(_)));
}

#[tokio::test]
async fn administrators_cannot_review() {
    let (engine, _runner, _owner, entry_id) = engine_with_entry().await;
    let err = engine
        .review(
            &Principal::admin("root"),
            entry_id,
            ReviewStatus::Reviewed,
            None,
            &RequestContext::new(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::AccessDenied(_)));
}

#[tokio::test]
async fn edits_are_audited_per_field() {
    let (engine, _runner, owner, entry_id) = engine_with_entry().await;
    let ctx = RequestContext::new().with_ip("10.0.0.7");

    let edited = engine
        .update_entry(
            &owner,
            entry_id,
            EntryPatch {
                compliance_status: Some(ComplianceStatus::Compliant),
                confidence_score: Some(95),
                justification: Some("Reason field confirmed in section 1.1".into()),
                ..EntryPatch::default()
            },
            &ctx,
        )
        .unwrap();
    assert_eq!(edited.compliance_status, ComplianceStatus::Compliant);
    assert_eq!(edited.last_modified_by, Some(owner.user_id));

    let updates = engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::MatrixEntryUpdated));
    assert_eq!(updates.total, 3);
    assert!(updates
        .entries
        .iter()
        .all(|e| e.context.ip_address.as_deref() == Some("10.0.0.7")));
    let status_change = updates
        .entries
        .iter()
        .find_map(|e| e.changes.as_ref().and_then(|c| c.get("compliance_status")))
        .unwrap();
    assert_eq!(status_change.old, "Partial");
    assert_eq!(status_change.new, "Compliant");

    let unchanged = engine
        .update_entry(
            &owner,
            entry_id,
            EntryPatch {
                confidence_score: Some(95),
                ..EntryPatch::default()
            },
            &ctx,
        )
        .unwrap();
    assert_eq!(unchanged, edited);
    assert_eq!(
        engine
            .ledger()
            .query(&AuditQuery::new().action(AuditAction::MatrixEntryUpdated))
            .total,
        3
    );
}

#[tokio::test]
async fn retired_entries_cannot_be_reviewed() {
    let bed = TestBed::new().await;
    let project = bed.project("P");
    let document = bed.extracted_document(&project, SAMPLE_SPEC).await;
    let requirement = bed.requirement(&project, "R1", "Changes shall be logged");
    let entry_id = bed
        .engine
        .generate_one(&bed.owner, requirement.id, document.id, false, &bed.ctx)
        .await
        .unwrap()
        .entry_id();

    bed.engine.delete_document(&bed.owner, document.id, &bed.ctx).unwrap();
    let err = bed
        .engine
        .review(&bed.owner, entry_id, ReviewStatus::Reviewed, None, &bed.ctx)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "matrix_entry", .. }));
}
