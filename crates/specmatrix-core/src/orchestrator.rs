//! Generation orchestrator
//!
//! Produces matrix entries for (requirement, document) pairs:
//!
//! 1. preconditions: document extracted, same project
//! 2. idempotency: an active entry is kept unless `force`
//! 3. the provider is called with a [`SpecBundle`] under a time bound;
//!    any failure becomes a degraded entry, never an error
//! 4. replacement (if forced) and creation commit in one audited transaction
//!
//! Batches run `batch_size` items concurrently and pause between batches.
//! One item's failure never affects its siblings.

use crate::access::WriteGrant;
use crate::error::EngineError;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use specmatrix_audit::{AuditAction, AuditRecord};
use specmatrix_model::{
    ComplianceStatus, Document, DocumentId, FieldSet, MatrixEntry, MatrixEntryId, Project,
    RequestContext, Requirement, RequirementId, SoftDelete,
};
use specmatrix_provider::{
    AssessmentProvider, AssessmentRequest, GeneratedAssessment, SpecBundle, PROMPT_VERSION,
};
use specmatrix_store::Database;
use std::sync::Arc;
use std::time::Duration;

/// Audit reason recorded when an entry is replaced by a forced regeneration
pub const FORCE_REGENERATE: &str = "force_regenerate";

/// Outcome of one generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    /// New entry from usable provider output
    Created {
        /// New entry
        entry_id: MatrixEntryId,
        /// Classification
        compliance_status: ComplianceStatus,
        /// Entry soft-deleted by a forced regeneration
        replaced: Option<MatrixEntryId>,
    },
    /// New entry holding the canonical degraded record
    Degraded {
        /// New entry
        entry_id: MatrixEntryId,
        /// Why the provider output was unusable
        reason: String,
        /// Entry soft-deleted by a forced regeneration
        replaced: Option<MatrixEntryId>,
    },
    /// An active entry already existed and `force` was false
    Skipped {
        /// Existing entry
        entry_id: MatrixEntryId,
    },
}

impl GenerationOutcome {
    /// Entry the outcome refers to
    #[must_use]
    pub fn entry_id(&self) -> MatrixEntryId {
        match self {
            Self::Created { entry_id, .. }
            | Self::Degraded { entry_id, .. }
            | Self::Skipped { entry_id } => *entry_id,
        }
    }
}

/// Which documents a batch covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSelector {
    /// One document
    One(DocumentId),
    /// Every extracted document of the project
    AllExtracted,
}

/// Per-item batch result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemResult {
    /// Entry created
    Generated {
        /// New entry
        entry_id: MatrixEntryId,
        /// Classification
        compliance_status: ComplianceStatus,
    },
    /// Active entry kept
    Skipped {
        /// Existing entry
        entry_id: MatrixEntryId,
    },
    /// Degraded entry persisted
    Degraded {
        /// New entry
        entry_id: MatrixEntryId,
        /// Provider failure
        reason: String,
    },
    /// Nothing persisted
    Failed {
        /// Error text
        error: String,
    },
}

/// One work item of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Requirement
    pub requirement_id: RequirementId,
    /// Document
    pub document_id: DocumentId,
    /// What happened
    #[serde(flatten)]
    pub result: ItemResult,
}

/// Aggregated batch result
///
/// Degraded items count as `failed` and are also tallied in `degraded`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Work items
    pub total: usize,
    /// Entries created from usable output
    pub generated: usize,
    /// Items with an active entry already
    pub skipped: usize,
    /// Degraded or errored items
    pub failed: usize,
    /// Of `failed`, those that persisted a degraded entry
    pub degraded: usize,
    /// Per-item outcomes, in work order
    pub items: Vec<ItemOutcome>,
}

impl BatchReport {
    fn record(&mut self, item: ItemOutcome) {
        match &item.result {
            ItemResult::Generated { .. } => self.generated += 1,
            ItemResult::Skipped { .. } => self.skipped += 1,
            ItemResult::Degraded { .. } => {
                self.failed += 1;
                self.degraded += 1;
            }
            ItemResult::Failed { .. } => self.failed += 1,
        }
        self.items.push(item);
    }
}

/// Generation orchestrator
pub struct Orchestrator {
    db: Arc<Database>,
    provider: Arc<dyn AssessmentProvider>,
    timeout: Duration,
    batch_size: usize,
    batch_pause: Duration,
}

impl Orchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn AssessmentProvider>,
        timeout: Duration,
        batch_size: usize,
        batch_pause: Duration,
    ) -> Self {
        Self {
            db,
            provider,
            timeout,
            batch_size,
            batch_pause,
        }
    }

    /// Generate one entry
    ///
    /// # Errors
    /// `NotFound` if either row is absent or outside the granted project,
    /// `PreconditionFailed` if the document is not extracted or belongs to
    /// another project, `Conflict` if a concurrent call won the pair.
    pub async fn generate(
        &self,
        grant: &WriteGrant,
        requirement_id: RequirementId,
        document_id: DocumentId,
        force: bool,
        ctx: &RequestContext,
    ) -> Result<GenerationOutcome, EngineError> {
        let snapshot = self.db.read();
        let requirement = snapshot
            .requirement(requirement_id)
            .filter(|r| r.project_id == grant.project_id())
            .cloned()
            .ok_or_else(|| EngineError::not_found("requirement", requirement_id))?;
        let document = snapshot
            .document(document_id)
            .filter(|d| d.project_id == grant.project_id())
            .cloned()
            .ok_or_else(|| EngineError::not_found("document", document_id))?;
        if requirement.project_id != document.project_id {
            return Err(EngineError::PreconditionFailed(
                "requirement and document belong to different projects".into(),
            ));
        }
        if !document.is_ready() {
            return Err(EngineError::PreconditionFailed(format!(
                "document {document_id} is not ready (extraction {})",
                document.extraction_status
            )));
        }

        let existing = snapshot.active_entry(requirement_id, document_id).map(|e| e.id);
        if let (Some(entry_id), false) = (existing, force) {
            tracing::debug!(requirement = %requirement.code, document = %document_id, "skipped, entry exists");
            return Ok(GenerationOutcome::Skipped { entry_id });
        }
        let project = snapshot.project(grant.project_id()).cloned();
        drop(snapshot);

        let generated = self.assess(&requirement, &document, project.as_ref()).await;
        let entry = self.build_entry(grant, &requirement, &document, &generated);
        self.persist(grant, entry, existing, &generated, ctx)
    }

    async fn assess(
        &self,
        requirement: &Requirement,
        document: &Document,
        project: Option<&Project>,
    ) -> GeneratedAssessment {
        let model = self.provider.descriptor().model;
        let request = AssessmentRequest {
            requirement: requirement.description.clone(),
            category: requirement.category_or_default().to_string(),
            bundle: SpecBundle::from_documents([document]),
            project_context: project.map(|p| {
                json!({
                    "project_name": p.name,
                    "description": p.description,
                })
            }),
        };

        let provider = Arc::clone(&self.provider);
        let mut call = tokio::spawn(async move { provider.assess(&request).await });
        let generated = match tokio::time::timeout(self.timeout, &mut call).await {
            Ok(Ok(Ok(generated))) => generated,
            Ok(Ok(Err(err))) => GeneratedAssessment::degraded(err.to_string(), model),
            Ok(Err(join)) => GeneratedAssessment::degraded(format!("provider crashed: {join}"), model),
            Err(_) => {
                call.abort();
                GeneratedAssessment::degraded(
                    format!("provider call timed out after {}s", self.timeout.as_secs()),
                    model,
                )
            }
        };
        if let Some(reason) = &generated.degraded {
            tracing::warn!(requirement = %requirement.code, %reason, "degraded assessment");
        }
        generated
    }

    fn build_entry(
        &self,
        grant: &WriteGrant,
        requirement: &Requirement,
        document: &Document,
        generated: &GeneratedAssessment,
    ) -> MatrixEntry {
        let descriptor = self.provider.descriptor();
        let a = &generated.assessment;
        let mut entry = MatrixEntry::new(requirement.id, document.id, grant.principal().user_id);
        entry.spec_reference = a.spec_reference.clone();
        entry.supplier_response = a.supplier_response.clone();
        entry.justification = a.justification.clone();
        entry.compliance_status = a.compliance_status;
        entry.confidence_score = a.confidence_score;
        entry.test_reference = a.test_reference.clone();
        entry.risk_assessment = a.risk_assessment.clone();
        entry.comments = a.comments.clone();
        entry.generation_model = generated.model.clone();
        entry.generation_metadata = json!({
            "model": generated.model,
            "provider": descriptor.kind,
            "requirement": requirement.description,
            "requirement_code": requirement.code,
            "category": requirement.category_or_default(),
            "prompt_version": PROMPT_VERSION,
            "degraded": generated.is_degraded(),
            "degraded_reason": generated.degraded,
        });
        entry
    }

    fn persist(
        &self,
        grant: &WriteGrant,
        entry: MatrixEntry,
        replace: Option<MatrixEntryId>,
        generated: &GeneratedAssessment,
        ctx: &RequestContext,
    ) -> Result<GenerationOutcome, EngineError> {
        let actor = Some(grant.principal().user_id);
        let entry_id = entry.id;
        let compliance_status = entry.compliance_status;

        self.db.transaction(|tx| {
            if tx.requirement(entry.requirement_id).is_none() {
                return Err(EngineError::not_found("requirement", entry.requirement_id));
            }
            if tx.document(entry.document_id).is_none() {
                return Err(EngineError::not_found("document", entry.document_id));
            }

            if let Some(old_id) = replace {
                let old = tx.soft_delete_entry(old_id, Utc::now())?;
                tx.audit(
                    AuditRecord::about::<MatrixEntry>(AuditAction::MatrixEntryDeleted, old_id)
                        .actor(actor)
                        .context(ctx)
                        .details(json!({
                            "reason": FORCE_REGENERATE,
                            "replaced_by": entry_id,
                            "entry": old.snapshot(),
                            "deleted_at": old.lifecycle().deleted_at(),
                        })),
                );
            }

            tx.audit(
                AuditRecord::about::<MatrixEntry>(AuditAction::MatrixEntryGenerated, entry_id)
                    .actor(actor)
                    .context(ctx)
                    .details(json!({
                        "compliance_status": compliance_status,
                        "confidence_score": entry.confidence_score,
                        "generation_model": entry.generation_model,
                        "degraded": generated.is_degraded(),
                        "force": replace.is_some(),
                        "entry": entry.snapshot(),
                    })),
            );
            tx.insert_entry(entry)?;
            Ok(())
        })?;

        tracing::info!(entry = %entry_id, status = %compliance_status, replaced = ?replace, "matrix entry generated");
        Ok(match &generated.degraded {
            Some(reason) => GenerationOutcome::Degraded {
                entry_id,
                reason: reason.clone(),
                replaced: replace,
            },
            None => GenerationOutcome::Created {
                entry_id,
                compliance_status,
                replaced: replace,
            },
        })
    }

    /// Generate entries for requirements × selected documents in bounded batches
    ///
    /// An empty `requirements` slice means every visible requirement of the
    /// project. `batch_size` defaults to the configured size.
    ///
    /// # Errors
    /// Only for problems that affect the whole batch: `InvalidInput` for a
    /// zero batch size, `NotFound`/`PreconditionFailed` for the selected
    /// documents. Per-item problems are reported in the [`BatchReport`].
    pub async fn generate_for_project(
        &self,
        grant: &WriteGrant,
        requirements: &[RequirementId],
        selector: DocumentSelector,
        batch_size: Option<usize>,
        force: bool,
        ctx: &RequestContext,
    ) -> Result<BatchReport, EngineError> {
        let batch_size = batch_size.unwrap_or(self.batch_size);
        if batch_size == 0 {
            return Err(EngineError::InvalidInput("batch size must be at least 1".into()));
        }

        let snapshot = self.db.read();
        let project_id = grant.project_id();
        let documents: Vec<DocumentId> = match selector {
            DocumentSelector::One(id) => {
                let document = snapshot
                    .document(id)
                    .filter(|d| d.project_id == project_id)
                    .ok_or_else(|| EngineError::not_found("document", id))?;
                if !document.is_ready() {
                    return Err(EngineError::PreconditionFailed(format!(
                        "document {id} is not ready (extraction {})",
                        document.extraction_status
                    )));
                }
                vec![id]
            }
            DocumentSelector::AllExtracted => {
                let ready: Vec<DocumentId> = snapshot
                    .documents_in(project_id)
                    .filter(|d| d.is_ready())
                    .map(|d| d.id)
                    .collect();
                if ready.is_empty() {
                    return Err(EngineError::PreconditionFailed(
                        "project has no extracted documents".into(),
                    ));
                }
                ready
            }
        };
        let requirements: Vec<RequirementId> = if requirements.is_empty() {
            snapshot.requirements_in(project_id).map(|r| r.id).collect()
        } else {
            requirements.to_vec()
        };
        drop(snapshot);

        let work: Vec<(RequirementId, DocumentId)> = requirements
            .iter()
            .flat_map(|r| documents.iter().map(move |d| (*r, *d)))
            .collect();

        let mut report = BatchReport {
            total: work.len(),
            ..BatchReport::default()
        };
        tracing::info!(project = %project_id, items = work.len(), batch_size, force, "batch generation started");

        let batches = work.chunks(batch_size).count();
        for (index, chunk) in work.chunks(batch_size).enumerate() {
            let results = join_all(
                chunk
                    .iter()
                    .map(|(r, d)| self.generate(grant, *r, *d, force, ctx)),
            )
            .await;

            for ((requirement_id, document_id), result) in chunk.iter().zip(results) {
                let result = match result {
                    Ok(GenerationOutcome::Created {
                        entry_id,
                        compliance_status,
                        ..
                    }) => ItemResult::Generated {
                        entry_id,
                        compliance_status,
                    },
                    Ok(GenerationOutcome::Degraded {
                        entry_id, reason, ..
                    }) => ItemResult::Degraded { entry_id, reason },
                    Ok(GenerationOutcome::Skipped { entry_id }) => ItemResult::Skipped { entry_id },
                    Err(err) => {
                        tracing::warn!(requirement = %requirement_id, document = %document_id, error = %err, "batch item failed");
                        ItemResult::Failed {
                            error: err.to_string(),
                        }
                    }
                };
                report.record(ItemOutcome {
                    requirement_id: *requirement_id,
                    document_id: *document_id,
                    result,
                });
            }

            if index + 1 < batches && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        tracing::info!(
            project = %project_id,
            total = report.total,
            generated = report.generated,
            skipped = report.skipped,
            failed = report.failed,
            degraded = report.degraded,
            "batch generation finished"
        );
        Ok(report)
    }

    /// Active provider
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn AssessmentProvider> {
        &self.provider
    }
}
