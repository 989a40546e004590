//! Authenticated principals

use crate::id::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Oversight role: reads everything, writes nothing
    Admin,
    /// Validation engineer: reads what the gate allows, writes collaboratively
    Engineer,
}

/// Capability scopes granted to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Own profile
    Me,
    /// Standard engineering access
    Engineer,
    /// Administrative oversight
    Admin,
    /// Audit trail access
    Audit,
}

/// An authenticated caller, as produced by the principal resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User identity
    pub user_id: UserId,
    /// Display name or e-mail, for logs only
    pub name: String,
    /// Role
    pub role: Role,
    /// Granted scopes
    pub scopes: BTreeSet<Scope>,
}

impl Principal {
    /// Create an engineer principal with the default engineer scopes
    #[must_use]
    pub fn engineer(name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(),
            name: name.into(),
            role: Role::Engineer,
            scopes: [Scope::Me, Scope::Engineer].into_iter().collect(),
        }
    }

    /// Create an administrator principal with the default admin scopes
    #[must_use]
    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(),
            name: name.into(),
            role: Role::Admin,
            scopes: [Scope::Me, Scope::Engineer, Scope::Admin, Scope::Audit]
                .into_iter()
                .collect(),
        }
    }

    /// Add a scope
    #[inline]
    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.insert(scope);
        self
    }

    /// Whether this principal is an administrator
    #[inline]
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this principal holds `scope`
    #[inline]
    #[must_use]
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}
