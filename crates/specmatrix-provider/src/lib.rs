//! SpecMatrix Provider
//!
//! The AI assessment capability: given a requirement and a specification
//! bundle, produce a structured compliance [`Assessment`].
//!
//! Two implementations share one contract and are chosen by
//! [`build_provider`] from configuration:
//!
//! - [`RemoteProvider`]: hosted model over REST, higher fidelity
//! - [`LocalProvider`]: self-hosted model over REST, lower cost
//!
//! Both send the same [`SpecBundle`], run at temperature 0.0 and return the
//! same canonical degraded record when the model's output is unusable, so
//! callers never branch on which implementation is active.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod assessment;
pub mod bundle;
pub mod config;
pub mod error;
pub mod local;
pub mod prompt;
pub mod remote;

pub use assessment::{assessment_schema, parse_assessment, Assessment, GeneratedAssessment};
pub use bundle::{BundledDocument, DocumentSource, SpecBundle};
pub use config::{LocalSettings, ProviderConfig, ProviderKind, RemoteSettings};
pub use error::ProviderError;
pub use local::LocalProvider;
pub use prompt::{render_prompt, PROMPT_VERSION};
pub use remote::RemoteProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Identity of the active implementation, recorded in generation metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Which implementation
    pub kind: ProviderKind,
    /// Model identifier
    pub model: String,
}

/// One assessment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRequest {
    /// Requirement text
    pub requirement: String,
    /// Requirement category
    pub category: String,
    /// Specification bundle built from extracted documents
    pub bundle: SpecBundle,
    /// Optional project context
    pub project_context: Option<Value>,
}

/// The assessment capability
///
/// `assess` returns `Ok` with a degraded record when the model answered but
/// its output could not be used, and `Err` only for transport-level failures.
#[async_trait]
pub trait AssessmentProvider: Send + Sync {
    /// Implementation identity
    fn descriptor(&self) -> ProviderDescriptor;

    /// Assess one requirement against the bundle
    async fn assess(&self, request: &AssessmentRequest) -> Result<GeneratedAssessment, ProviderError>;

    /// Whether the backend is reachable
    async fn health(&self) -> bool {
        true
    }
}

/// Build the configured implementation
///
/// # Errors
/// Returns `Config` if the selected implementation is misconfigured.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn AssessmentProvider>, ProviderError> {
    let provider: Arc<dyn AssessmentProvider> = match config.kind {
        ProviderKind::Remote => Arc::new(RemoteProvider::new(&config.remote, config.timeout())?),
        ProviderKind::Local => Arc::new(LocalProvider::new(&config.local, config.timeout())?),
    };
    let descriptor = provider.descriptor();
    tracing::info!(kind = %descriptor.kind, model = %descriptor.model, "assessment provider ready");
    Ok(provider)
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
