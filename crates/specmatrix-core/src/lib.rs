//! SpecMatrix Core - compliance-gated traceability engine
//!
//! Turns uploaded specification documents into a traceability matrix:
//! - Layered access gate (role, ownership, collaborative password)
//! - Extraction state machine with bounded retries
//! - Idempotent generation with an explicit forced-regeneration path
//! - Human review workflow with terminal approval
//! - Retention purge as the only physical delete
//!
//! Every mutation commits together with its audit rows or not at all.
//!
//! # Example
//!
//! ```rust,ignore
//! use specmatrix_core::{DocumentSelector, Engine, EngineConfig};
//! use specmatrix_model::{Principal, RequestContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder(EngineConfig::new()).build().await?;
//! let alice = Principal::engineer("alice");
//! let ctx = RequestContext::new();
//!
//! let project = engine.create_project(&alice, "LIMS upgrade", None, None, &ctx)?;
//! let report = engine
//!     .generate_batch(&alice, project.id, &[], DocumentSelector::AllExtracted, None, false, &ctx)
//!     .await?;
//! println!("{} generated, {} skipped", report.generated, report.skipped);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod access;
pub mod blob;
pub mod config;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod orchestrator;
pub mod password;
pub mod resolver;
pub mod retention;
pub mod review;
pub mod runner;

pub use access::{Decision, Intent, ReadGrant, WriteGrant};
pub use blob::{BlobStore, MemoryBlobStore};
pub use config::{AuditConfig, EngineConfig, ExtractionConfig, GenerationConfig, RetentionConfig};
pub use engine::{Engine, EngineBuilder, NewRequirement, RequirementPatch};
pub use error::{ConfigError, EngineError, ExtractionError};
pub use extraction::{AttemptOutcome, ExtractionWorker, Extractor, ExtractorRegistry};
pub use orchestrator::{
    BatchReport, DocumentSelector, GenerationOutcome, ItemOutcome, ItemResult, Orchestrator,
};
pub use password::{Argon2Hasher, SecretHasher};
pub use resolver::{AuthError, PrincipalResolver, StaticPrincipalResolver};
pub use retention::PurgeReport;
pub use review::EntryPatch;
pub use runner::{
    BackgroundJobs, DeferredTaskRunner, Job, Task, TaskHandler, TaskRunner, TaskVerdict,
    TokioTaskRunner,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
