//! Engine facade
//!
//! Every caller-facing operation enters here, resolves a grant through the
//! access gate and then delegates to the owning component. All mutations
//! commit through [`Database::transaction`] together with their audit rows.

use crate::access::{self, Decision, Intent, ReadGrant, WriteGrant};
use crate::blob::{BlobStore, MemoryBlobStore};
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError};
use crate::extraction::{ExtractionWorker, ExtractorRegistry};
use crate::orchestrator::{BatchReport, DocumentSelector, GenerationOutcome, Orchestrator};
use crate::password::{Argon2Hasher, SecretHasher};
use crate::retention::RetentionPurger;
use crate::review::{self, EntryPatch};
use crate::runner::{BackgroundJobs, Job, TaskHandler, TaskRunner, TokioTaskRunner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use specmatrix_audit::{
    read_journal, AuditAction, AuditError, AuditLedger, AuditPage, AuditQuery, AuditRecord,
    AuditSink, JsonlSink, VolatileSink,
};
use specmatrix_model::{
    diff, Document, DocumentId, FieldSet, MatrixEntry, MatrixEntryId, Principal, Priority,
    Project, ProjectAccess, ProjectId, RequestContext, Requirement, RequirementId,
    RequirementStatus, ReviewStatus, Scope, SoftDelete, UserId,
};
use specmatrix_provider::{build_provider, AssessmentProvider};
use specmatrix_store::{Database, Tx};
use std::sync::Arc;
use std::time::Duration;

/// Largest page for the global audit query
pub const GLOBAL_AUDIT_LIMIT: usize = 1000;
/// Largest page for the project audit query
pub const PROJECT_AUDIT_LIMIT: usize = 500;

const QUEUE_CAPACITY: usize = 256;
const PURGE_SCHEDULE_ID: &str = "retention-purge";

/// Fields of a new requirement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequirement {
    /// Identifier, unique among the project's visible requirements
    pub code: String,
    /// Requirement text
    pub description: String,
    /// Category
    pub category: Option<String>,
    /// Priority
    pub priority: Priority,
}

/// Requirement edit; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementPatch {
    /// Identifier
    pub code: Option<String>,
    /// Requirement text
    pub description: Option<String>,
    /// Category
    pub category: Option<String>,
    /// Priority
    pub priority: Option<Priority>,
    /// Workflow status
    pub status: Option<RequirementStatus>,
}

/// Builder for [`Engine`]
#[must_use]
pub struct EngineBuilder {
    config: EngineConfig,
    provider: Option<Arc<dyn AssessmentProvider>>,
    hasher: Option<Arc<dyn SecretHasher>>,
    blobs: Option<Arc<dyn BlobStore>>,
    extractors: Option<ExtractorRegistry>,
    sink: Option<Arc<dyn AuditSink>>,
    runner: Option<Arc<dyn TaskRunner>>,
}

impl EngineBuilder {
    /// Use this provider instead of building one from configuration
    pub fn provider(mut self, provider: Arc<dyn AssessmentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use this password hasher
    pub fn hasher(mut self, hasher: Arc<dyn SecretHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Use this blob store
    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Use these extractors
    pub fn extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = Some(extractors);
        self
    }

    /// Persist audit entries through this sink instead of the configured journal
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Hand jobs to this runner instead of starting a worker pool
    pub fn runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    fn ledger(&mut self) -> Result<AuditLedger, EngineError> {
        if let Some(sink) = self.sink.take() {
            return Ok(AuditLedger::new(sink));
        }
        match &self.config.audit.journal_path {
            Some(path) => {
                let history = if path.exists() {
                    read_journal(path)?
                } else {
                    Vec::new()
                };
                let sink: Arc<dyn AuditSink> = Arc::new(JsonlSink::open(path)?);
                tracing::info!(path = %path.display(), entries = history.len(), "audit journal opened");
                Ok(AuditLedger::with_history(sink, history)?)
            }
            None => Ok(AuditLedger::new(Arc::new(VolatileSink))),
        }
    }

    /// Assemble the engine and register the retention schedule
    ///
    /// Starts a tokio worker pool unless a runner was supplied, so it must be
    /// awaited inside a tokio runtime.
    ///
    /// # Errors
    /// `Config` for invalid configuration or an unbuildable provider, `Audit`
    /// if the journal cannot be opened or fails verification.
    pub async fn build(mut self) -> Result<Engine, EngineError> {
        if self.provider.is_none() {
            self.config.validate()?;
        }
        let config = self.config.clone();
        let provider = match self.provider.take() {
            Some(provider) => provider,
            None => build_provider(&config.provider)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
        };

        let db = Arc::new(Database::new(Arc::new(self.ledger()?)));
        let blobs = self
            .blobs
            .take()
            .unwrap_or_else(|| Arc::new(MemoryBlobStore::new()));
        let worker = Arc::new(ExtractionWorker::new(
            Arc::clone(&db),
            Arc::clone(&blobs),
            self.extractors.take().unwrap_or_default(),
            config.extraction.clone(),
        ));
        let jobs = Arc::new(BackgroundJobs::new(
            Arc::clone(&worker),
            RetentionPurger::new(Arc::clone(&db), Arc::clone(&blobs), config.retention.retention_days),
        ));

        let (runner, pool) = match self.runner.take() {
            Some(runner) => (runner, None),
            None => {
                let handler: Arc<dyn TaskHandler> = Arc::clone(&jobs) as Arc<dyn TaskHandler>;
                let pool = TokioTaskRunner::start(handler, config.extraction.workers, QUEUE_CAPACITY);
                (Arc::clone(&pool) as Arc<dyn TaskRunner>, Some(pool))
            }
        };
        runner
            .schedule(
                PURGE_SCHEDULE_ID.to_string(),
                Duration::from_secs(config.retention.purge_interval_secs),
                Job::PurgeExpired,
            )
            .await?;

        let descriptor = provider.descriptor();
        tracing::info!(provider = %descriptor.kind, model = %descriptor.model, "engine started");

        Ok(Engine {
            orchestrator: Orchestrator::new(
                Arc::clone(&db),
                provider,
                config.provider.timeout(),
                config.generation.batch_size,
                config.batch_pause(),
            ),
            hasher: self
                .hasher
                .take()
                .unwrap_or_else(|| Arc::new(Argon2Hasher::default())),
            config,
            db,
            blobs,
            worker,
            jobs,
            runner,
            pool,
        })
    }
}

/// The compliance-gated traceability engine
pub struct Engine {
    config: EngineConfig,
    db: Arc<Database>,
    hasher: Arc<dyn SecretHasher>,
    blobs: Arc<dyn BlobStore>,
    orchestrator: Orchestrator,
    worker: Arc<ExtractionWorker>,
    jobs: Arc<BackgroundJobs>,
    runner: Arc<dyn TaskRunner>,
    pool: Option<Arc<TokioTaskRunner>>,
}

impl Engine {
    /// Start building an engine
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            provider: None,
            hasher: None,
            blobs: None,
            extractors: None,
            sink: None,
            runner: None,
        }
    }

    /// Resolved configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying store
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Audit ledger
    #[must_use]
    pub fn ledger(&self) -> &Arc<AuditLedger> {
        self.db.ledger()
    }

    /// Handler for the engine's background jobs
    #[must_use]
    pub fn jobs(&self) -> Arc<BackgroundJobs> {
        Arc::clone(&self.jobs)
    }

    /// Raw file store
    #[must_use]
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Extraction worker
    #[must_use]
    pub fn extraction(&self) -> &Arc<ExtractionWorker> {
        &self.worker
    }

    /// Stop the worker pool, if the engine started one
    pub fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
            tracing::info!("engine stopped");
        }
    }

    // ---- access -----------------------------------------------------------

    /// Evaluate the access table without side effects
    ///
    /// # Errors
    /// `NotFound` if the project is absent or deleted.
    pub fn check_access(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        intent: Intent,
    ) -> Result<Decision, EngineError> {
        access::check(&self.db.read(), principal, project_id, intent)
    }

    /// Read grant for a project
    ///
    /// # Errors
    /// `NotFound`, `AccessDenied` or `PasswordRequired`.
    pub fn authorize_read(&self, principal: &Principal, project_id: ProjectId) -> Result<ReadGrant, EngineError> {
        access::authorize_read(&self.db.read(), principal, project_id)
    }

    /// Write grant for a project
    ///
    /// # Errors
    /// `NotFound`, `AccessDenied` or `PasswordRequired`.
    pub fn authorize_write(&self, principal: &Principal, project_id: ProjectId) -> Result<WriteGrant, EngineError> {
        access::authorize_write(&self.db.read(), principal, project_id)
    }

    // ---- projects ---------------------------------------------------------

    /// Create a project owned by `principal`, optionally password protected
    ///
    /// # Errors
    /// `AccessDenied` for administrators, `InvalidInput` for an empty name or
    /// password.
    pub fn create_project(
        &self,
        principal: &Principal,
        name: &str,
        description: Option<&str>,
        password: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Project, EngineError> {
        if principal.is_admin() {
            return Err(EngineError::AccessDenied(
                "administrators have read-only access".into(),
            ));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("project name must not be empty".into()));
        }

        let mut project = Project::new(name, principal.user_id);
        if let Some(description) = description {
            project = project.with_description(description);
        }
        if let Some(password) = password {
            if password.is_empty() {
                return Err(EngineError::InvalidInput("project password must not be empty".into()));
            }
            let digest = self.hasher.hash(password).map_err(EngineError::Internal)?;
            project = project.with_password_digest(digest);
        }

        self.db.transaction(|tx| {
            tx.insert_project(project.clone())?;
            tx.audit(
                AuditRecord::about::<Project>(AuditAction::ProjectCreated, project.id)
                    .actor(Some(principal.user_id))
                    .context(ctx)
                    .details(project.snapshot()),
            );
            Ok::<_, EngineError>(())
        })?;
        tracing::info!(project = %project.id, protected = project.is_protected(), "project created");
        Ok(project)
    }

    /// Soft-delete a project; only its owner may
    ///
    /// # Errors
    /// `NotFound`, or `AccessDenied` for anyone but the owner.
    pub fn delete_project(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        ctx: &RequestContext,
    ) -> Result<Project, EngineError> {
        let project = self.db.transaction(|tx| {
            let project = tx
                .project(project_id)
                .ok_or_else(|| EngineError::not_found("project", project_id))?;
            if principal.is_admin() || !project.is_owned_by(principal.user_id) {
                return Err(EngineError::AccessDenied(
                    "only the owner may delete a project".into(),
                ));
            }
            let deleted = tx.soft_delete_project(project_id, Utc::now())?;
            tx.audit(
                AuditRecord::about::<Project>(AuditAction::ProjectDeleted, project_id)
                    .actor(Some(principal.user_id))
                    .context(ctx)
                    .details(json!({
                        "project": deleted.snapshot(),
                        "deleted_at": deleted.lifecycle().deleted_at(),
                    })),
            );
            Ok(deleted)
        })?;
        tracing::info!(project = %project_id, "project deleted");
        Ok(project)
    }

    /// Check a project password and remember success for `principal`
    ///
    /// Both outcomes are audited.
    ///
    /// # Errors
    /// `NotFound`, `AccessDenied` for administrators or a wrong password,
    /// `PreconditionFailed` if the project has no password.
    pub fn verify_project_password(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        password: &str,
        ctx: &RequestContext,
    ) -> Result<(), EngineError> {
        let project = self
            .db
            .read()
            .project(project_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("project", project_id))?;
        if principal.is_admin() {
            return Err(EngineError::AccessDenied(
                "administrators do not use project passwords".into(),
            ));
        }
        let Some(digest) = project.password_digest.as_deref() else {
            return Err(EngineError::PreconditionFailed(format!(
                "project {project_id} is not password protected"
            )));
        };

        let verified = self.hasher.verify(password, digest);
        let user = principal.user_id;
        self.db.transaction(|tx| {
            if verified {
                let first = tx.grant_access(ProjectAccess::new(user, project_id));
                tx.audit(
                    AuditRecord::about::<Project>(AuditAction::ProjectPasswordVerified, project_id)
                        .actor(Some(user))
                        .context(ctx)
                        .details(json!({ "first_verification": first })),
                );
            } else {
                tx.audit(
                    AuditRecord::about::<Project>(AuditAction::ProjectPasswordVerifyFailed, project_id)
                        .actor(Some(user))
                        .context(ctx),
                );
            }
            Ok::<_, EngineError>(())
        })?;

        if verified {
            tracing::info!(project = %project_id, user = %user, "project password verified");
            Ok(())
        } else {
            tracing::warn!(project = %project_id, user = %user, "project password rejected");
            Err(EngineError::AccessDenied("incorrect project password".into()))
        }
    }

    /// Visible projects
    #[must_use]
    pub fn list_projects(&self) -> Vec<Project> {
        self.db.read().projects().cloned().collect()
    }

    // ---- requirements -----------------------------------------------------

    /// Add a requirement to a project
    ///
    /// # Errors
    /// Access errors, `InvalidInput` for an empty code or text, `Conflict`
    /// if the code is taken.
    pub fn create_requirement(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        new: NewRequirement,
        ctx: &RequestContext,
    ) -> Result<Requirement, EngineError> {
        let grant = self.authorize_write(principal, project_id)?;
        let code = new.code.trim();
        if code.is_empty() || new.description.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "requirement code and description must not be empty".into(),
            ));
        }
        let mut requirement = Requirement::new(project_id, code, new.description, principal.user_id)
            .with_priority(new.priority);
        if let Some(category) = new.category {
            requirement = requirement.with_category(category);
        }

        self.db.transaction(|tx| {
            tx.insert_requirement(requirement.clone())?;
            tx.audit(
                AuditRecord::about::<Requirement>(AuditAction::RequirementCreated, requirement.id)
                    .actor(Some(grant.principal().user_id))
                    .context(ctx)
                    .details(requirement.snapshot()),
            );
            Ok::<_, EngineError>(())
        })?;
        Ok(requirement)
    }

    /// Edit a requirement, one audit row per changed field
    ///
    /// # Errors
    /// Access errors, `NotFound`, `Conflict` if the new code is taken.
    pub fn update_requirement(
        &self,
        principal: &Principal,
        requirement_id: RequirementId,
        patch: RequirementPatch,
        ctx: &RequestContext,
    ) -> Result<Requirement, EngineError> {
        let grant = self.grant_for_requirement(principal, requirement_id)?;
        self.db.transaction(|tx| {
            let before = tx
                .requirement(requirement_id)
                .cloned()
                .ok_or_else(|| EngineError::not_found("requirement", requirement_id))?;
            let mut after = before.clone();
            if let Some(code) = patch.code {
                after.code = code.trim().to_string();
                if after.code.is_empty() {
                    return Err(EngineError::InvalidInput("requirement code must not be empty".into()));
                }
            }
            if let Some(description) = patch.description {
                after.description = description;
            }
            if let Some(category) = patch.category {
                after.category = Some(category);
            }
            if let Some(priority) = patch.priority {
                after.priority = priority;
            }
            if let Some(status) = patch.status {
                after.status = status;
            }

            let changes = diff(&before, &after);
            if changes.is_empty() {
                return Ok(before);
            }
            after.updated_at = Utc::now();
            tx.update_requirement(after.clone())?;
            tx.audit_all(
                AuditRecord::per_field::<Requirement>(AuditAction::RequirementUpdated, requirement_id, changes)
                    .into_iter()
                    .map(|r| r.actor(Some(grant.principal().user_id)).context(ctx)),
            );
            Ok(after)
        })
    }

    /// Soft-delete a requirement and retire its active entries
    ///
    /// # Errors
    /// Access errors or `NotFound`.
    pub fn delete_requirement(
        &self,
        principal: &Principal,
        requirement_id: RequirementId,
        ctx: &RequestContext,
    ) -> Result<(), EngineError> {
        let grant = self.grant_for_requirement(principal, requirement_id)?;
        let actor = Some(grant.principal().user_id);
        self.db.transaction(|tx| {
            let now = Utc::now();
            let deleted = tx.soft_delete_requirement(requirement_id, now)?;
            tx.audit(
                AuditRecord::about::<Requirement>(AuditAction::RequirementDeleted, requirement_id)
                    .actor(actor)
                    .context(ctx)
                    .details(deleted.snapshot()),
            );
            retire_entries(tx, grant.project_id(), now, actor, ctx, "requirement_deleted", |e| {
                e.requirement_id == requirement_id
            })
        })
    }

    fn grant_for_requirement(
        &self,
        principal: &Principal,
        requirement_id: RequirementId,
    ) -> Result<WriteGrant, EngineError> {
        let snapshot = self.db.read();
        let project_id = snapshot
            .requirement(requirement_id)
            .map(|r| r.project_id)
            .ok_or_else(|| EngineError::not_found("requirement", requirement_id))?;
        access::authorize_write(&snapshot, principal, project_id)
    }

    /// Visible requirements of a project
    ///
    /// # Errors
    /// Access errors.
    pub fn requirements(&self, principal: &Principal, project_id: ProjectId) -> Result<Vec<Requirement>, EngineError> {
        let snapshot = self.db.read();
        let grant = access::authorize_read(&snapshot, principal, project_id)?;
        Ok(snapshot.requirements_in(grant.project_id()).cloned().collect())
    }

    // ---- documents --------------------------------------------------------

    /// Store an upload and queue its extraction
    ///
    /// Returns the `pending` document before extraction runs. An upload whose
    /// extraction cannot be queued is withdrawn and the queue error returned.
    ///
    /// # Errors
    /// Access errors, `InvalidInput` for an empty upload, or the runner's
    /// error when the extraction job is not accepted.
    pub async fn upload_document(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
        ctx: &RequestContext,
    ) -> Result<Document, EngineError> {
        let grant = self.authorize_write(principal, project_id)?;
        if bytes.is_empty() {
            return Err(EngineError::InvalidInput("uploaded file is empty".into()));
        }

        let digest = self.blobs.save(bytes);
        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        let document = Document::new(project_id, filename, mime_type, digest, size, grant.principal().user_id);
        self.db.transaction(|tx| {
            tx.insert_document(document.clone())?;
            tx.audit(
                AuditRecord::about::<Document>(AuditAction::DocumentUploaded, document.id)
                    .actor(Some(grant.principal().user_id))
                    .context(ctx)
                    .details(json!({
                        "project_id": project_id,
                        "filename": document.original_filename,
                        "mime_type": document.mime_type,
                        "size_bytes": document.size_bytes,
                        "digest": document.digest,
                    })),
            );
            Ok::<_, EngineError>(())
        })?;
        tracing::info!(document = %document.id, project = %project_id, size, "document uploaded");

        let task_id = format!("extract-{}", document.id);
        if let Err(err) = self
            .runner
            .enqueue(task_id, Job::Extract { document_id: document.id })
            .await
        {
            tracing::error!(document = %document.id, error = %err, "extraction could not be queued, withdrawing upload");
            self.withdraw_upload(&document, principal.user_id, &err, ctx)?;
            return Err(err);
        }
        Ok(document)
    }

    /// Soft-delete an upload whose extraction was never queued
    fn withdraw_upload(
        &self,
        document: &Document,
        user: UserId,
        cause: &EngineError,
        ctx: &RequestContext,
    ) -> Result<(), EngineError> {
        self.db.transaction(|tx| {
            tx.soft_delete_document(document.id, Utc::now())?;
            tx.audit(
                AuditRecord::about::<Document>(AuditAction::DocumentDeleted, document.id)
                    .actor(Some(user))
                    .context(ctx)
                    .details(json!({
                        "reason": "extraction_not_queued",
                        "error": cause.to_string(),
                        "filename": document.original_filename,
                    })),
            );
            Ok::<_, EngineError>(())
        })
    }

    /// Soft-delete a document and retire its active entries
    ///
    /// # Errors
    /// Access errors or `NotFound`.
    pub fn delete_document(
        &self,
        principal: &Principal,
        document_id: DocumentId,
        ctx: &RequestContext,
    ) -> Result<(), EngineError> {
        let snapshot = self.db.read();
        let project_id = snapshot
            .document(document_id)
            .map(|d| d.project_id)
            .ok_or_else(|| EngineError::not_found("document", document_id))?;
        let grant = access::authorize_write(&snapshot, principal, project_id)?;
        drop(snapshot);

        let actor = Some(grant.principal().user_id);
        self.db.transaction(|tx| {
            let now = Utc::now();
            let deleted = tx.soft_delete_document(document_id, now)?;
            tx.audit(
                AuditRecord::about::<Document>(AuditAction::DocumentDeleted, document_id)
                    .actor(actor)
                    .context(ctx)
                    .details(json!({
                        "filename": deleted.original_filename,
                        "extraction_status": deleted.extraction_status,
                    })),
            );
            retire_entries(tx, project_id, now, actor, ctx, "document_deleted", |e| e.document_id == document_id)
        })
    }

    /// A visible document
    ///
    /// # Errors
    /// `NotFound` or access errors.
    pub fn document(&self, principal: &Principal, document_id: DocumentId) -> Result<Document, EngineError> {
        let snapshot = self.db.read();
        let document = snapshot
            .document(document_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("document", document_id))?;
        access::authorize_read(&snapshot, principal, document.project_id)?;
        Ok(document)
    }

    // ---- generation -------------------------------------------------------

    /// Generate one matrix entry
    ///
    /// # Errors
    /// Access errors plus those of [`Orchestrator::generate`].
    pub async fn generate_one(
        &self,
        principal: &Principal,
        requirement_id: RequirementId,
        document_id: DocumentId,
        force: bool,
        ctx: &RequestContext,
    ) -> Result<GenerationOutcome, EngineError> {
        let grant = self.grant_for_requirement(principal, requirement_id)?;
        self.orchestrator
            .generate(&grant, requirement_id, document_id, force, ctx)
            .await
    }

    /// Generate entries for a project in bounded batches
    ///
    /// # Errors
    /// Access errors plus those of [`Orchestrator::generate_for_project`].
    #[allow(clippy::too_many_arguments)]
    pub async fn generate_batch(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        requirements: &[RequirementId],
        selector: DocumentSelector,
        batch_size: Option<usize>,
        force: bool,
        ctx: &RequestContext,
    ) -> Result<BatchReport, EngineError> {
        let grant = self.authorize_write(principal, project_id)?;
        self.orchestrator
            .generate_for_project(&grant, requirements, selector, batch_size, force, ctx)
            .await
    }

    // ---- review -----------------------------------------------------------

    fn grant_for_entry(&self, principal: &Principal, entry_id: MatrixEntryId) -> Result<WriteGrant, EngineError> {
        let snapshot = self.db.read();
        let project_id = snapshot
            .entry(entry_id)
            .and_then(|e| snapshot.requirement(e.requirement_id))
            .map(|r| r.project_id)
            .ok_or_else(|| EngineError::not_found("matrix_entry", entry_id))?;
        access::authorize_write(&snapshot, principal, project_id)
    }

    /// Move an entry through the review workflow
    ///
    /// # Errors
    /// Access errors, `NotFound`, `PreconditionFailed` for an invalid step.
    pub fn review(
        &self,
        principal: &Principal,
        entry_id: MatrixEntryId,
        target: ReviewStatus,
        comments: Option<String>,
        ctx: &RequestContext,
    ) -> Result<MatrixEntry, EngineError> {
        let grant = self.grant_for_entry(principal, entry_id)?;
        review::transition(&self.db, &grant, entry_id, target, comments, ctx)
    }

    /// Edit an entry's assessment fields
    ///
    /// # Errors
    /// Access errors, `NotFound`, `PreconditionFailed` if approved.
    pub fn update_entry(
        &self,
        principal: &Principal,
        entry_id: MatrixEntryId,
        patch: EntryPatch,
        ctx: &RequestContext,
    ) -> Result<MatrixEntry, EngineError> {
        let grant = self.grant_for_entry(principal, entry_id)?;
        review::update_entry(&self.db, &grant, entry_id, patch, ctx)
    }

    /// Active entries of a project
    ///
    /// # Errors
    /// Access errors.
    pub fn matrix(&self, principal: &Principal, project_id: ProjectId) -> Result<Vec<MatrixEntry>, EngineError> {
        let snapshot = self.db.read();
        let grant = access::authorize_read(&snapshot, principal, project_id)?;
        Ok(snapshot.entries_in(grant.project_id()).cloned().collect())
    }

    // ---- audit ------------------------------------------------------------

    /// Query the whole trail
    ///
    /// # Errors
    /// `AccessDenied` without the administrator role or `audit` scope,
    /// `InvalidInput` for a bad page or window.
    pub fn query_audit(&self, principal: &Principal, query: &AuditQuery) -> Result<AuditPage, EngineError> {
        if !(principal.is_admin() || principal.has_scope(Scope::Audit)) {
            return Err(EngineError::AccessDenied(
                "audit log access requires the audit scope".into(),
            ));
        }
        query.validate(GLOBAL_AUDIT_LIMIT).map_err(invalid_query)?;
        Ok(self.ledger().query(query))
    }

    /// Query the trail of one project and everything in it
    ///
    /// # Errors
    /// Access errors, `InvalidInput` for a bad page or window.
    pub fn query_project_audit(
        &self,
        principal: &Principal,
        project_id: ProjectId,
        query: AuditQuery,
    ) -> Result<AuditPage, EngineError> {
        query.validate(PROJECT_AUDIT_LIMIT).map_err(invalid_query)?;
        let snapshot = self.db.read();
        access::authorize_read(&snapshot, principal, project_id)?;
        let scoped = query.within(snapshot.subjects_of(project_id));
        Ok(self.ledger().query(&scoped))
    }

    /// Entries affecting `user` as actor, newest first
    ///
    /// # Errors
    /// As [`Engine::query_audit`].
    pub fn audit_by_actor(
        &self,
        principal: &Principal,
        user: UserId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<AuditPage, EngineError> {
        self.query_audit(principal, &AuditQuery::new().actor(user).between(from, to))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn invalid_query(err: AuditError) -> EngineError {
    match err {
        AuditError::InvalidQuery(msg) => EngineError::InvalidInput(msg),
        other => EngineError::Audit(other),
    }
}

/// Soft-delete every active entry matching `select`, auditing each
fn retire_entries(
    tx: &mut Tx,
    project_id: ProjectId,
    at: DateTime<Utc>,
    actor: Option<UserId>,
    ctx: &RequestContext,
    reason: &str,
    select: impl Fn(&MatrixEntry) -> bool,
) -> Result<(), EngineError> {
    let ids: Vec<MatrixEntryId> = tx
        .entries_in(project_id)
        .filter(|e| select(e))
        .map(|e| e.id)
        .collect();
    for id in ids {
        tx.soft_delete_entry(id, at)?;
        tx.audit(
            AuditRecord::about::<MatrixEntry>(AuditAction::MatrixEntryDeleted, id)
                .actor(actor)
                .context(ctx)
                .details(json!({ "reason": reason })),
        );
    }
    Ok(())
}
