use async_trait::async_trait;
use pretty_assertions::assert_eq;
use specmatrix_audit::{AuditAction, AuditQuery};
use specmatrix_core::{
    Engine, EngineError, Extractor, ExtractorRegistry, Job, TaskRunner, TaskVerdict,
};
use specmatrix_model::{ExtractionStatus, Principal, RequestContext};
use specmatrix_provider::AssessmentProvider;
use specmatrix_test_utils::{
    fast_config, FlakyExtractor, ScriptedProvider, TestBed, TestBedOptions, SAMPLE_SPEC,
};
use std::sync::Arc;
use std::time::Duration;

async fn bed_with(flaky: &Arc<FlakyExtractor>) -> TestBed {
    TestBed::with(TestBedOptions {
        extractors: Some(ExtractorRegistry::default().with(Arc::clone(flaky) as Arc<dyn Extractor>)),
        ..TestBedOptions::default()
    })
    .await
}

fn count(bed: &TestBed, action: AuditAction) -> usize {
    bed.engine.ledger().query(&AuditQuery::new().action(action)).total
}

#[tokio::test]
async fn upload_returns_pending_and_queues_extraction() {
    let bed = TestBed::new().await;
    let project = bed.project("P");
    let document = bed
        .engine
        .upload_document(&bed.owner, project.id, "spec.md", "text/markdown", SAMPLE_SPEC.as_bytes(), &bed.ctx)
        .await
        .unwrap();

    assert_eq!(document.extraction_status, ExtractionStatus::Pending);
    let pending = bed.runner.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, format!("extract-{}", document.id));

    bed.drain().await;
    let document = bed.engine.document(&bed.owner, document.id).unwrap();
    assert_eq!(document.extraction_status, ExtractionStatus::Completed);
    assert_eq!(document.extraction_attempts, 1);
    assert_eq!(document.extraction_model.as_deref(), Some("markdown"));
    assert_eq!(document.extraction_payload.unwrap().section_count(), 3);
}

#[tokio::test]
async fn persistent_failure_settles_in_failed_after_three_attempts() {
    let flaky = Arc::new(FlakyExtractor::new(3));
    let bed = bed_with(&flaky).await;
    let project = bed.project("P");
    let document = bed
        .engine
        .upload_document(&bed.owner, project.id, "spec.md", "text/markdown", SAMPLE_SPEC.as_bytes(), &bed.ctx)
        .await
        .unwrap();

    let log = bed.drain().await;
    let attempts: Vec<u32> = log.iter().map(|(task, _)| task.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(matches!(log[2].1, TaskVerdict::Failed(_)));

    let document = bed.engine.document(&bed.owner, document.id).unwrap();
    assert_eq!(document.extraction_status, ExtractionStatus::Failed);
    assert_eq!(document.extraction_attempts, 3);
    assert!(document
        .extraction_error
        .as_deref()
        .is_some_and(|e| e.contains("simulated parser failure")));
    assert_eq!(flaky.calls(), 3);
    assert_eq!(count(&bed, AuditAction::ExtractionStarted), 3);
    assert_eq!(count(&bed, AuditAction::ExtractionFailed), 3);

    let started = bed
        .engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::ExtractionStarted));
    assert!(started.entries.iter().all(|e| e.is_system()));
}

#[tokio::test]
async fn one_failure_then_success_completes() {
    let flaky = Arc::new(FlakyExtractor::new(1));
    let bed = bed_with(&flaky).await;
    let project = bed.project("P");
    let document = bed.extracted_document(&project, SAMPLE_SPEC).await;

    assert_eq!(document.extraction_status, ExtractionStatus::Completed);
    assert_eq!(document.extraction_attempts, 2);
    assert!(document.extraction_error.is_none());
    assert_eq!(count(&bed, AuditAction::ExtractionFailed), 1);
    assert_eq!(count(&bed, AuditAction::ExtractionCompleted), 1);
}

#[tokio::test]
async fn run_to_completion_reports_exhaustion() {
    let flaky = Arc::new(FlakyExtractor::new(5));
    let bed = bed_with(&flaky).await;
    let project = bed.project("P");
    let document = bed
        .engine
        .upload_document(&bed.owner, project.id, "spec.md", "text/markdown", SAMPLE_SPEC.as_bytes(), &bed.ctx)
        .await
        .unwrap();

    let err = bed
        .engine
        .extraction()
        .run_to_completion(document.id)
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::RetryExhausted { attempts: 3, document_id, .. } if document_id == document.id),
        "{err}"
    );

    // the queued task finds the budget spent and leaves the document alone
    bed.drain().await;
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test]
async fn unsupported_mime_fails_like_any_other_error() {
    let bed = TestBed::new().await;
    let project = bed.project("P");
    let document = bed
        .engine
        .upload_document(&bed.owner, project.id, "spec.pdf", "application/pdf", b"%PDF-1.7", &bed.ctx)
        .await
        .unwrap();
    bed.drain().await;

    let document = bed.engine.document(&bed.owner, document.id).unwrap();
    assert_eq!(document.extraction_status, ExtractionStatus::Failed);
    assert_eq!(document.extraction_attempts, 3);
    assert!(document
        .extraction_error
        .as_deref()
        .is_some_and(|e| e.contains("application/pdf")));
}

#[tokio::test]
async fn deleted_document_is_not_extracted() {
    let bed = TestBed::new().await;
    let project = bed.project("P");
    let document = bed
        .engine
        .upload_document(&bed.owner, project.id, "spec.md", "text/markdown", SAMPLE_SPEC.as_bytes(), &bed.ctx)
        .await
        .unwrap();
    bed.engine.delete_document(&bed.owner, document.id, &bed.ctx).unwrap();

    let log = bed.drain().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, TaskVerdict::Done);
    assert_eq!(count(&bed, AuditAction::ExtractionStarted), 0);
}

async fn upload(bed: &TestBed) -> specmatrix_model::Document {
    let project = bed.project("P");
    bed.engine
        .upload_document(&bed.owner, project.id, "spec.md", "text/markdown", SAMPLE_SPEC.as_bytes(), &bed.ctx)
        .await
        .unwrap()
}

#[tokio::test]
async fn unrecorded_result_fails_the_attempt_and_retries() {
    let bed = TestBed::new().await;
    let document = upload(&bed).await;
    bed.sink.reject_next(AuditAction::ExtractionCompleted);

    let log = bed.drain().await;
    let verdicts: Vec<TaskVerdict> = log.into_iter().map(|(_, verdict)| verdict).collect();
    assert_eq!(verdicts, vec![TaskVerdict::RetryAfter(Duration::ZERO), TaskVerdict::Done]);

    let document = bed.engine.document(&bed.owner, document.id).unwrap();
    assert_eq!(document.extraction_status, ExtractionStatus::Completed);
    assert_eq!(document.extraction_attempts, 2);

    let failed = bed
        .engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::ExtractionFailed));
    assert_eq!(failed.total, 1);
    assert!(failed.entries[0].details["error"]
        .as_str()
        .is_some_and(|e| e.contains("could not be recorded")));
    bed.engine.ledger().verify_integrity().unwrap();
}

#[tokio::test]
async fn document_left_processing_is_reclaimed_on_redelivery() {
    let bed = TestBed::new().await;
    let document = upload(&bed).await;
    bed.sink.reject_next(AuditAction::ExtractionCompleted);
    bed.sink.reject_next(AuditAction::ExtractionFailed);

    let log = bed.drain().await;
    let attempts: Vec<u32> = log.iter().map(|(task, _)| task.attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(log[1].1, TaskVerdict::Done);

    let document = bed.engine.document(&bed.owner, document.id).unwrap();
    assert_eq!(document.extraction_status, ExtractionStatus::Completed);
    assert_eq!(document.extraction_attempts, 2);
    assert_eq!(count(&bed, AuditAction::ExtractionStarted), 2);
    assert_eq!(count(&bed, AuditAction::ExtractionFailed), 0);

    let started = bed
        .engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::ExtractionStarted));
    assert_eq!(started.entries[0].details["interrupted"], serde_json::json!(true));
}

#[tokio::test]
async fn interrupted_extraction_without_budget_settles_failed() {
    let bed = TestBed::with(TestBedOptions {
        config: Some(fast_config().with_extraction_retries(1, 0)),
        ..TestBedOptions::default()
    })
    .await;
    let document = upload(&bed).await;
    bed.sink.reject_next(AuditAction::ExtractionCompleted);
    bed.sink.reject_next(AuditAction::ExtractionFailed);

    let log = bed.drain().await;
    assert_eq!(log.len(), 2);
    assert!(matches!(&log[1].1, TaskVerdict::Failed(msg) if msg.contains("interrupted")), "{:?}", log[1].1);

    let document = bed.engine.document(&bed.owner, document.id).unwrap();
    assert_eq!(document.extraction_status, ExtractionStatus::Failed);
    assert_eq!(document.extraction_attempts, 1);
    assert_eq!(
        document.extraction_error.as_deref(),
        Some("extraction was interrupted before its result was recorded")
    );
}

#[derive(Debug)]
struct ClosedRunner;

#[async_trait]
impl TaskRunner for ClosedRunner {
    async fn enqueue(&self, _task_id: String, _job: Job) -> Result<(), EngineError> {
        Err(EngineError::Internal("task queue closed".into()))
    }

    async fn schedule(&self, _periodic_id: String, _interval: Duration, _job: Job) -> Result<(), EngineError> {
        Ok(())
    }
}

#[tokio::test]
async fn upload_is_withdrawn_when_extraction_cannot_be_queued() {
    let provider: Arc<dyn AssessmentProvider> = Arc::new(ScriptedProvider::new());
    let engine = Engine::builder(fast_config())
        .provider(provider)
        .runner(Arc::new(ClosedRunner) as Arc<dyn TaskRunner>)
        .build()
        .await
        .unwrap();
    let owner = Principal::engineer("owner");
    let ctx = RequestContext::new();
    let project = engine.create_project(&owner, "P", None, None, &ctx).unwrap();

    let err = engine
        .upload_document(&owner, project.id, "spec.md", "text/markdown", SAMPLE_SPEC.as_bytes(), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)), "{err}");
    assert_eq!(engine.database().read().documents_in(project.id).count(), 0);

    let withdrawn = engine
        .ledger()
        .query(&AuditQuery::new().action(AuditAction::DocumentDeleted));
    assert_eq!(withdrawn.total, 1);
    assert_eq!(withdrawn.entries[0].details["reason"], "extraction_not_queued");
}
