//! Testing utilities for the SpecMatrix workspace
//!
//! Shared fixtures: a seeded engine on a deferred runner, a scripted
//! provider, a flaky extractor and a switchable failing audit sink.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use parking_lot::Mutex;
use specmatrix_audit::{AuditAction, AuditEntry, AuditError, AuditSink};
use specmatrix_core::extraction::MarkdownExtractor;
use specmatrix_core::{
    DeferredTaskRunner, Engine, EngineConfig, ExtractionError, Extractor, ExtractorRegistry,
    NewRequirement, Task, TaskVerdict,
};
use specmatrix_model::{
    ComplianceStatus, Document, Principal, Project, RequestContext, Requirement,
    SpecificationPayload,
};
use specmatrix_provider::{
    Assessment, AssessmentProvider, AssessmentRequest, GeneratedAssessment, ProviderDescriptor,
    ProviderError, ProviderKind,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Two-section specification used across tests
pub const SAMPLE_SPEC: &str = "\
# LIMS Supplier Specification

## Audit Trail

The system records every change with user, timestamp and reason.

## Electronic Signatures

- Signatures are bound to their records
- Two components are required
";

/// What the scripted provider does for a requirement
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer with this classification
    Answer(ComplianceStatus),
    /// Transport failure
    Fail,
    /// Usable but degraded output
    Degrade(String),
    /// Never answer within any reasonable bound
    Hang,
    /// Panic inside the provider
    Panic,
}

/// Provider answering from a script keyed by requirement text
#[derive(Debug)]
pub struct ScriptedProvider {
    rules: Mutex<Vec<(String, Script)>>,
    fallback: ComplianceStatus,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    delay: Duration,
}

/// Counts an `assess` call until its future completes or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback: ComplianceStatus::Compliant,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Apply `script` to requirements whose text contains `needle`
    #[must_use]
    pub fn when(self, needle: &str, script: Script) -> Self {
        self.rules.lock().push((needle.to_string(), script));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls started but neither finished nor cancelled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn script_for(&self, requirement: &str) -> Script {
        self.rules
            .lock()
            .iter()
            .find(|(needle, _)| requirement.contains(needle.as_str()))
            .map_or(Script::Answer(self.fallback), |(_, script)| script.clone())
    }
}

#[async_trait]
impl AssessmentProvider for ScriptedProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: ProviderKind::Local,
            model: "scripted".to_string(),
        }
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<GeneratedAssessment, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.in_flight);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.script_for(&request.requirement) {
            Script::Answer(status) => Ok(GeneratedAssessment::ok(
                Assessment {
                    spec_reference: "Section 1.1".to_string(),
                    supplier_response: "The system records every change".to_string(),
                    justification: format!("{} sections reviewed", request.bundle.section_count()),
                    compliance_status: status,
                    confidence_score: 90,
                    test_reference: None,
                    risk_assessment: None,
                    comments: None,
                },
                "scripted",
            )),
            Script::Fail => Err(ProviderError::Status {
                status: 503,
                body: "overloaded".to_string(),
            }),
            Script::Degrade(reason) => Ok(GeneratedAssessment::degraded(reason, "scripted")),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout(3600))
            }
            Script::Panic => panic!("scripted provider panic"),
        }
    }
}

/// Markdown extractor that fails its first `failures` calls
#[derive(Debug)]
pub struct FlakyExtractor {
    remaining: AtomicU32,
    calls: AtomicU32,
}

impl FlakyExtractor {
    pub fn new(failures: u32) -> Self {
        Self {
            remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for FlakyExtractor {
    fn name(&self) -> &str {
        "flaky-markdown"
    }

    fn supports(&self, mime: &str) -> bool {
        mime == "text/markdown"
    }

    fn extract(&self, bytes: &[u8]) -> Result<SpecificationPayload, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.remaining.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining.store(left - 1, Ordering::SeqCst);
            return Err(ExtractionError::Malformed("simulated parser failure".into()));
        }
        MarkdownExtractor.extract(bytes)
    }
}

/// Audit sink that rejects every batch while armed, or selected batches
#[derive(Debug, Default)]
pub struct FailingSink {
    armed: AtomicBool,
    rejections: Mutex<Vec<AuditAction>>,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Reject the next batch that contains `action`, once per call
    pub fn reject_next(&self, action: AuditAction) {
        self.rejections.lock().push(action);
    }
}

impl AuditSink for FailingSink {
    fn persist(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        if self.armed.load(Ordering::SeqCst) {
            return Err(AuditError::SinkUnavailable("audit store offline".into()));
        }
        let mut rejections = self.rejections.lock();
        if let Some(index) = rejections
            .iter()
            .position(|action| entries.iter().any(|e| e.action == *action))
        {
            let action = rejections.remove(index);
            return Err(AuditError::SinkUnavailable(format!("rejected {action:?} batch")));
        }
        Ok(())
    }
}

/// Config with no waiting anywhere
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_batch_pause(Duration::ZERO)
        .with_extraction_retries(3, 0)
        .with_provider_timeout(5)
}

/// Engine on a deferred runner with scripted collaborators
pub struct TestBed {
    pub engine: Engine,
    pub runner: Arc<DeferredTaskRunner>,
    pub provider: Arc<ScriptedProvider>,
    pub sink: Arc<FailingSink>,
    pub owner: Principal,
    pub ctx: RequestContext,
}

/// Options for [`TestBed::with`]
#[derive(Default)]
pub struct TestBedOptions {
    pub config: Option<EngineConfig>,
    pub provider: Option<ScriptedProvider>,
    pub extractors: Option<ExtractorRegistry>,
}

impl TestBed {
    pub async fn new() -> Self {
        Self::with(TestBedOptions::default()).await
    }

    pub async fn with(options: TestBedOptions) -> Self {
        let runner = Arc::new(DeferredTaskRunner::new());
        let provider = Arc::new(options.provider.unwrap_or_default());
        let sink = Arc::new(FailingSink::new());
        let mut builder = Engine::builder(options.config.unwrap_or_else(fast_config))
            .provider(Arc::clone(&provider) as Arc<dyn AssessmentProvider>)
            .audit_sink(Arc::clone(&sink) as Arc<dyn AuditSink>)
            .runner(Arc::clone(&runner) as Arc<dyn specmatrix_core::TaskRunner>);
        if let Some(extractors) = options.extractors {
            builder = builder.extractors(extractors);
        }
        let engine = builder.build().await.expect("test engine");
        Self {
            engine,
            runner,
            provider,
            sink,
            owner: Principal::engineer("owner"),
            ctx: RequestContext::new().with_ip("127.0.0.1"),
        }
    }

    /// Run queued background tasks to completion
    pub async fn drain(&self) -> Vec<(Task, TaskVerdict)> {
        let jobs = self.engine.jobs();
        self.runner.drain(jobs.as_ref()).await
    }

    pub fn project(&self, name: &str) -> Project {
        self.engine
            .create_project(&self.owner, name, None, None, &self.ctx)
            .expect("project")
    }

    pub fn protected_project(&self, name: &str, password: &str) -> Project {
        self.engine
            .create_project(&self.owner, name, None, Some(password), &self.ctx)
            .expect("protected project")
    }

    pub fn requirement(&self, project: &Project, code: &str, text: &str) -> Requirement {
        self.engine
            .create_requirement(
                &self.owner,
                project.id,
                NewRequirement {
                    code: code.to_string(),
                    description: text.to_string(),
                    category: Some("Data Integrity".to_string()),
                    ..NewRequirement::default()
                },
                &self.ctx,
            )
            .expect("requirement")
    }

    /// Upload markdown and run extraction
    pub async fn extracted_document(&self, project: &Project, markdown: &str) -> Document {
        let document = self
            .engine
            .upload_document(&self.owner, project.id, "spec.md", "text/markdown", markdown.as_bytes(), &self.ctx)
            .await
            .expect("upload");
        self.drain().await;
        self.engine
            .document(&self.owner, document.id)
            .expect("document")
    }
}
