//! Principal resolution

use dashmap::DashMap;
use specmatrix_model::Principal;

/// Credential could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Unknown or revoked credential
    #[error("invalid credential")]
    InvalidCredential,
}

/// Resolves a credential into a principal
pub trait PrincipalResolver: Send + Sync {
    /// Look up the principal for `credential`
    ///
    /// # Errors
    /// `InvalidCredential` when unknown.
    fn resolve(&self, credential: &str) -> Result<Principal, AuthError>;
}

/// Token table held in memory
#[derive(Debug, Default)]
pub struct StaticPrincipalResolver {
    tokens: DashMap<String, Principal>,
}

impl StaticPrincipalResolver {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token
    pub fn insert(&self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }

    /// Revoke a token; returns whether it existed
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }
}

impl PrincipalResolver for StaticPrincipalResolver {
    fn resolve(&self, credential: &str) -> Result<Principal, AuthError> {
        self.tokens
            .get(credential)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specmatrix_model::Scope;

    #[test]
    fn resolves_and_revokes() {
        let resolver = StaticPrincipalResolver::new();
        let auditor = Principal::engineer("qa").with_scope(Scope::Audit);
        resolver.insert("tok-1", auditor.clone());

        let resolved = resolver.resolve("tok-1").unwrap();
        assert_eq!(resolved.user_id, auditor.user_id);
        assert!(resolved.has_scope(Scope::Audit));

        assert!(resolver.revoke("tok-1"));
        assert_eq!(resolver.resolve("tok-1").unwrap_err(), AuthError::InvalidCredential);
    }
}
