//! Engine configuration
//!
//! Defaults, then TOML, then environment overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use specmatrix_provider::{ProviderConfig, ProviderKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Batch generation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Items generated concurrently per batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_pause_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause_ms: 1_000,
        }
    }
}

/// Extraction worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Attempts before a document settles in `failed`
    pub max_attempts: u32,
    /// Wait between attempts
    pub retry_backoff_secs: u64,
    /// Bound on one extraction call
    pub timeout_secs: u64,
    /// Stored error text is truncated to this many characters
    pub error_max_chars: usize,
    /// Background workers
    pub workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_secs: 60,
            timeout_secs: 300,
            error_max_chars: 1_000,
            workers: 2,
        }
    }
}

impl ExtractionConfig {
    /// Wait between attempts
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    /// Bound on one extraction call
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retention purge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a soft-deleted project is kept
    pub retention_days: u32,
    /// How often the purge runs
    pub purge_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            purge_interval_secs: 86_400,
        }
    }
}

/// Audit settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines journal; in-memory only when unset
    pub journal_path: Option<PathBuf>,
}

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Assessment provider
    pub provider: ProviderConfig,
    /// Batch generation
    pub generation: GenerationConfig,
    /// Extraction worker
    pub extraction: ExtractionConfig,
    /// Retention purge
    pub retention: RetentionConfig,
    /// Audit journal
    pub audit: AuditConfig,
}

impl EngineConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML
    ///
    /// # Errors
    /// `Parse` on malformed TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load TOML from `path`, apply environment overrides and validate
    ///
    /// # Errors
    /// `Read`, `Parse`, `Env` or `Invalid`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SPECMATRIX_*` overrides read through `lookup`
    ///
    /// # Errors
    /// `Env` when a value does not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("SPECMATRIX_PROVIDER") {
            self.provider.kind = value
                .parse::<ProviderKind>()
                .map_err(|_| ConfigError::Env {
                    key: "SPECMATRIX_PROVIDER",
                    value,
                })?;
        }
        if let Some(value) = lookup("SPECMATRIX_REMOTE_API_KEY") {
            self.provider.remote.api_key = Some(value);
        }
        if let Some(value) = lookup("SPECMATRIX_LOCAL_URL") {
            self.provider.local.base_url = value;
        }
        if let Some(value) = lookup("SPECMATRIX_RETENTION_DAYS") {
            self.retention.retention_days = value.parse().map_err(|_| ConfigError::Env {
                key: "SPECMATRIX_RETENTION_DAYS",
                value,
            })?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with
    ///
    /// # Errors
    /// `Invalid` naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.batch_size == 0 {
            return Err(ConfigError::Invalid("generation.batch_size must be at least 1".into()));
        }
        if self.extraction.max_attempts == 0 {
            return Err(ConfigError::Invalid("extraction.max_attempts must be at least 1".into()));
        }
        if self.extraction.workers == 0 {
            return Err(ConfigError::Invalid("extraction.workers must be at least 1".into()));
        }
        if self.retention.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid("retention.purge_interval_secs must be positive".into()));
        }
        if self.provider.timeout_secs == 0 || self.extraction.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.provider.kind == ProviderKind::Remote
            && self
                .provider
                .remote
                .api_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "remote provider selected without provider.remote.api_key".into(),
            ));
        }
        Ok(())
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.generation.batch_size = batch_size;
        self
    }

    /// With pause between batches
    #[inline]
    #[must_use]
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.generation.batch_pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With extraction retry policy
    #[inline]
    #[must_use]
    pub fn with_extraction_retries(mut self, max_attempts: u32, backoff_secs: u64) -> Self {
        self.extraction.max_attempts = max_attempts;
        self.extraction.retry_backoff_secs = backoff_secs;
        self
    }

    /// With retention window
    #[inline]
    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention.retention_days = days;
        self
    }

    /// With provider call bound
    #[inline]
    #[must_use]
    pub fn with_provider_timeout(mut self, secs: u64) -> Self {
        self.provider.timeout_secs = secs;
        self
    }

    /// Pause between batches
    #[inline]
    #[must_use]
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.generation.batch_pause_ms)
    }
}
