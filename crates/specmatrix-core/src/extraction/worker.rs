//! Extraction worker

use super::{truncate_error, validate_transition, ExtractorRegistry};
use crate::blob::BlobStore;
use crate::config::ExtractionConfig;
use crate::error::{EngineError, ExtractionError};
use chrono::Utc;
use serde_json::json;
use specmatrix_audit::{AuditAction, AuditRecord};
use specmatrix_model::{
    Document, DocumentId, ExtractionStatus, RequestContext, SpecificationPayload,
};
use specmatrix_store::Database;
use std::sync::Arc;

/// Result of one extraction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Payload stored
    Completed {
        /// Attempts used so far
        attempts: u32,
        /// Sections extracted, nested ones included
        sections: usize,
    },
    /// Attempt failed and was recorded
    Failed {
        /// Attempts used so far
        attempts: u32,
        /// Stored (truncated) error text
        error: String,
        /// Whether the budget allows another attempt
        will_retry: bool,
    },
    /// Nothing to do: document deleted, settled, or claimed elsewhere
    Skipped {
        /// Status found
        status: ExtractionStatus,
    },
}

enum Claim {
    Claimed(Document),
    Skip(ExtractionStatus),
    Exhausted { attempts: u32, error: String },
}

/// Drives documents through the extraction state machine
pub struct ExtractionWorker {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    extractors: ExtractorRegistry,
    config: ExtractionConfig,
}

impl ExtractionWorker {
    /// Create a worker
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        extractors: ExtractorRegistry,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            db,
            blobs,
            extractors,
            config,
        }
    }

    /// Retry policy in force
    #[must_use]
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Claim the document, extract once and record the result
    ///
    /// # Errors
    /// Store or audit failures while recording.
    pub async fn attempt(&self, document_id: DocumentId) -> Result<AttemptOutcome, EngineError> {
        self.run(document_id, None).await
    }

    /// [`attempt`](Self::attempt) for the `delivery`-th hand-off of one job
    ///
    /// A document still `processing` with fewer attempts than `delivery` was
    /// claimed by an earlier delivery that never settled it. It is claimed
    /// again while the budget allows and failed otherwise.
    ///
    /// # Errors
    /// Store or audit failures while recording.
    pub async fn redeliver(&self, document_id: DocumentId, delivery: u32) -> Result<AttemptOutcome, EngineError> {
        self.run(document_id, Some(delivery)).await
    }

    async fn run(&self, document_id: DocumentId, delivery: Option<u32>) -> Result<AttemptOutcome, EngineError> {
        let ctx = RequestContext::system();
        let document = match self.claim(document_id, delivery, &ctx)? {
            Claim::Claimed(document) => document,
            Claim::Skip(status) => {
                tracing::debug!(document = %document_id, %status, "extraction skipped");
                return Ok(AttemptOutcome::Skipped { status });
            }
            Claim::Exhausted { attempts, error } => {
                return Ok(AttemptOutcome::Failed {
                    attempts,
                    error,
                    will_retry: false,
                })
            }
        };
        let attempt = document.extraction_attempts;
        tracing::info!(document = %document_id, attempt, "extraction started");

        let result = self.extract(&document).await;
        match self.settle(document_id, attempt, result, &ctx) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(document = %document_id, attempt, error = %err, "extraction result not recorded");
                let cause = ExtractionError::Unrecorded(err.to_string());
                self.settle(document_id, attempt, Err(cause), &ctx).map_err(|_| err)
            }
        }
    }

    fn claim(
        &self,
        document_id: DocumentId,
        delivery: Option<u32>,
        ctx: &RequestContext,
    ) -> Result<Claim, EngineError> {
        let max_attempts = self.config.max_attempts;
        let max_chars = self.config.error_max_chars;

        self.db.transaction(|tx| {
            let Some(current) = tx.document(document_id).cloned() else {
                return Ok::<_, EngineError>(Claim::Skip(
                    tx.document_any(document_id)
                        .map_or(ExtractionStatus::Pending, |d| d.extraction_status),
                ));
            };
            let interrupted = current.extraction_status == ExtractionStatus::Processing
                && delivery.is_some_and(|d| current.extraction_attempts < d);

            if interrupted && current.extraction_attempts >= max_attempts {
                let attempts = current.extraction_attempts;
                let error = truncate_error(&ExtractionError::Interrupted.to_string(), max_chars);
                let mut failed = current;
                failed.extraction_status = ExtractionStatus::Failed;
                failed.extraction_error = Some(error.clone());
                failed.updated_at = Utc::now();
                tx.update_document(failed)?;
                tx.audit(
                    AuditRecord::about::<Document>(AuditAction::ExtractionFailed, document_id)
                        .context(ctx)
                        .details(json!({
                            "attempt": attempts,
                            "error": error,
                            "will_retry": false,
                        })),
                );
                tracing::error!(document = %document_id, attempts, "interrupted extraction has no attempts left");
                return Ok(Claim::Exhausted { attempts, error });
            }
            if !interrupted
                && validate_transition(
                    current.extraction_status,
                    ExtractionStatus::Processing,
                    current.extraction_attempts,
                    max_attempts,
                )
                .is_err()
            {
                return Ok(Claim::Skip(current.extraction_status));
            }

            let mut claimed = current.clone();
            claimed.extraction_status = ExtractionStatus::Processing;
            claimed.extraction_attempts += 1;
            claimed.extraction_error = None;
            claimed.updated_at = Utc::now();
            tx.update_document(claimed.clone())?;
            tx.audit(
                AuditRecord::about::<Document>(AuditAction::ExtractionStarted, document_id)
                    .context(ctx)
                    .details(json!({
                        "attempt": claimed.extraction_attempts,
                        "max_attempts": max_attempts,
                        "previous_status": current.extraction_status,
                        "interrupted": interrupted,
                    })),
            );
            if interrupted {
                tracing::warn!(document = %document_id, attempt = claimed.extraction_attempts, "reclaimed interrupted extraction");
            }
            Ok(Claim::Claimed(claimed))
        })
    }

    async fn extract(&self, document: &Document) -> Result<(SpecificationPayload, String), ExtractionError> {
        let bytes = self
            .blobs
            .read(&document.digest)
            .ok_or(ExtractionError::BlobMissing)?;
        if !document.digest.matches(&bytes) {
            return Err(ExtractionError::DigestMismatch);
        }
        let extractor = self.extractors.for_mime(&document.mime_type)?;
        let name = extractor.name().to_string();

        let task = tokio::task::spawn_blocking(move || extractor.extract(&bytes));
        match tokio::time::timeout(self.config.timeout(), task).await {
            Err(_) => Err(ExtractionError::Timeout(self.config.timeout_secs)),
            Ok(Err(join)) => Err(ExtractionError::Crashed(join.to_string())),
            Ok(Ok(result)) => result.map(|payload| (payload, name)),
        }
    }

    fn settle(
        &self,
        document_id: DocumentId,
        attempt: u32,
        result: Result<(SpecificationPayload, String), ExtractionError>,
        ctx: &RequestContext,
    ) -> Result<AttemptOutcome, EngineError> {
        let max_attempts = self.config.max_attempts;
        let max_chars = self.config.error_max_chars;

        self.db.transaction(|tx| {
            let mut document = tx
                .document_any(document_id)
                .cloned()
                .ok_or_else(|| EngineError::not_found("document", document_id))?;
            let now = Utc::now();

            let outcome = match result {
                Ok((payload, extractor)) => {
                    validate_transition(
                        document.extraction_status,
                        ExtractionStatus::Completed,
                        attempt,
                        max_attempts,
                    )?;
                    let sections = payload.section_count();
                    document.extraction_status = ExtractionStatus::Completed;
                    document.extraction_payload = Some(payload);
                    document.extraction_model = Some(extractor.clone());
                    document.extracted_at = Some(now);
                    tx.audit(
                        AuditRecord::about::<Document>(AuditAction::ExtractionCompleted, document_id)
                            .context(ctx)
                            .details(json!({
                                "attempt": attempt,
                                "extractor": extractor,
                                "sections": sections,
                            })),
                    );
                    tracing::info!(document = %document_id, attempt, sections, "extraction completed");
                    AttemptOutcome::Completed {
                        attempts: attempt,
                        sections,
                    }
                }
                Err(err) => {
                    validate_transition(
                        document.extraction_status,
                        ExtractionStatus::Failed,
                        attempt,
                        max_attempts,
                    )?;
                    let error = truncate_error(&err.to_string(), max_chars);
                    let will_retry = attempt < max_attempts;
                    document.extraction_status = ExtractionStatus::Failed;
                    document.extraction_error = Some(error.clone());
                    tx.audit(
                        AuditRecord::about::<Document>(AuditAction::ExtractionFailed, document_id)
                            .context(ctx)
                            .details(json!({
                                "attempt": attempt,
                                "error": error,
                                "will_retry": will_retry,
                            })),
                    );
                    if will_retry {
                        tracing::warn!(document = %document_id, attempt, %error, "extraction failed, will retry");
                    } else {
                        tracing::error!(document = %document_id, attempt, %error, "extraction retries exhausted");
                    }
                    AttemptOutcome::Failed {
                        attempts: attempt,
                        error,
                        will_retry,
                    }
                }
            };
            document.updated_at = now;
            tx.update_document(document)?;
            Ok(outcome)
        })
    }

    /// Attempt until the document settles, sleeping the backoff between tries
    ///
    /// # Errors
    /// `RetryExhausted` when every attempt failed, `PreconditionFailed` if
    /// the document is being processed elsewhere, `NotFound` if deleted.
    pub async fn run_to_completion(&self, document_id: DocumentId) -> Result<Document, EngineError> {
        loop {
            match self.attempt(document_id).await? {
                AttemptOutcome::Completed { .. } => break,
                AttemptOutcome::Failed { will_retry: true, .. } => {
                    tokio::time::sleep(self.config.backoff()).await;
                }
                AttemptOutcome::Failed {
                    attempts, error, ..
                } => {
                    return Err(EngineError::RetryExhausted {
                        document_id,
                        attempts,
                        last_error: error,
                    })
                }
                AttemptOutcome::Skipped { status } => {
                    let document = self
                        .db
                        .read()
                        .document(document_id)
                        .cloned()
                        .ok_or_else(|| EngineError::not_found("document", document_id))?;
                    return match status {
                        ExtractionStatus::Completed => Ok(document),
                        ExtractionStatus::Failed => Err(EngineError::RetryExhausted {
                            document_id,
                            attempts: document.extraction_attempts,
                            last_error: document.extraction_error.unwrap_or_default(),
                        }),
                        other => Err(EngineError::PreconditionFailed(format!(
                            "document is {other} elsewhere"
                        ))),
                    };
                }
            }
        }
        self.db
            .read()
            .document_any(document_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("document", document_id))
    }
}
