//! Provider configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted model
    Remote,
    /// Self-hosted model
    #[default]
    Local,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => f.write_str("remote"),
            Self::Local => f.write_str("local"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "gemini" => Ok(Self::Remote),
            "local" | "ollama" => Ok(Self::Local),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Hosted model settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// API root
    pub base_url: String,
    /// Model name
    pub model: String,
    /// API key; required when this implementation is selected
    pub api_key: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
        }
    }
}

/// Self-hosted model settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Server root
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Context window in tokens
    pub num_ctx: u32,
    /// Maximum tokens to generate
    pub num_predict: u32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            num_ctx: 32_768,
            num_predict: 4_096,
        }
    }
}

/// Provider selection and settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Active implementation
    pub kind: ProviderKind,
    /// Hosted model settings
    pub remote: RemoteSettings,
    /// Self-hosted model settings
    pub local: LocalSettings,
    /// Per-call time bound
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            remote: RemoteSettings::default(),
            local: LocalSettings::default(),
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    /// Per-call time bound
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
