//! Audit queries

use crate::entry::{AuditAction, AuditEntry};
use crate::error::AuditError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use specmatrix_model::UserId;
use std::collections::BTreeSet;

/// Default page size
pub const DEFAULT_LIMIT: usize = 100;

/// Filter over the audit chain
///
/// Filters are conjunctive. `subjects` restricts results to a set of subject
/// ids and is how a query gets scoped to one project's entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Only rows by this actor
    pub actor: Option<UserId>,
    /// Only rows with this action
    pub action: Option<AuditAction>,
    /// Only rows about this subject type
    pub subject_type: Option<String>,
    /// Only rows about this subject id
    pub subject_id: Option<String>,
    /// Only rows whose subject id is in this set
    pub subjects: Option<BTreeSet<String>>,
    /// Inclusive lower time bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper time bound
    pub to: Option<DateTime<Utc>>,
    /// Page size
    pub limit: usize,
    /// Rows to skip
    pub offset: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            actor: None,
            action: None,
            subject_type: None,
            subject_id: None,
            subjects: None,
            from: None,
            to: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl AuditQuery {
    /// Unfiltered query with the default page size
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by actor
    #[must_use]
    pub fn actor(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Filter by action
    #[must_use]
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Filter by subject type and optionally id
    #[must_use]
    pub fn subject(mut self, subject_type: impl Into<String>, subject_id: Option<String>) -> Self {
        self.subject_type = Some(subject_type.into());
        self.subject_id = subject_id;
        self
    }

    /// Restrict to a set of subject ids
    #[must_use]
    pub fn within(mut self, subjects: BTreeSet<String>) -> Self {
        self.subjects = Some(subjects);
        self
    }

    /// Time window
    #[must_use]
    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Page
    #[must_use]
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Check the page size lies in `1..=max_limit` and the window is ordered
    ///
    /// # Errors
    /// Returns `InvalidQuery` describing the problem.
    pub fn validate(&self, max_limit: usize) -> Result<(), AuditError> {
        if self.limit == 0 || self.limit > max_limit {
            return Err(AuditError::InvalidQuery(format!(
                "limit must be between 1 and {max_limit}, got {}",
                self.limit
            )));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AuditError::InvalidQuery(
                    "time window start is after its end".into(),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn matches(&self, entry: &AuditEntry) -> bool {
        if self.actor.is_some_and(|a| entry.actor != Some(a)) {
            return false;
        }
        if self.action.is_some_and(|a| entry.action != a) {
            return false;
        }
        if let Some(ty) = &self.subject_type {
            if &entry.subject_type != ty {
                return false;
            }
        }
        if let Some(id) = &self.subject_id {
            if &entry.subject_id != id {
                return false;
            }
        }
        if let Some(set) = &self.subjects {
            if !set.contains(&entry.subject_id) {
                return false;
            }
        }
        if self.from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        true
    }
}

/// One page of query results, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    /// Entries on this page
    pub entries: Vec<AuditEntry>,
    /// Matching entries across all pages
    pub total: usize,
    /// Page size used
    pub limit: usize,
    /// Offset used
    pub offset: usize,
}
