//! Client metadata attached to audit rows

use serde::{Deserialize, Serialize};

/// Where a request came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Client IP address (IPv4 or IPv6)
    pub ip_address: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
    /// Correlation id
    pub request_id: Option<String>,
    /// Session id
    pub session_id: Option<String>,
}

impl RequestContext {
    /// Empty context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for actions initiated by background workers
    #[must_use]
    pub fn system() -> Self {
        Self {
            ip_address: Some("system".to_string()),
            user_agent: Some("background-worker".to_string()),
            request_id: None,
            session_id: None,
        }
    }

    /// With client IP
    #[inline]
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// With user agent
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// With correlation id
    #[inline]
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}
