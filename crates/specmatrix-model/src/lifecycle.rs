//! Soft-delete lifecycle
//!
//! Application code never removes rows. Deletion is a state of the entity,
//! and [`SoftDelete::is_visible`] is the only visibility predicate used by
//! queries. Physical removal happens exclusively in the retention purge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a soft-deletable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    /// Visible to readers
    #[default]
    Active,
    /// Soft-deleted; invisible to readers, kept for audit reconstruction
    Deleted {
        /// When the entity was soft-deleted
        at: DateTime<Utc>,
    },
}

impl Lifecycle {
    /// Whether the entity is active
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Deletion timestamp, if deleted
    #[inline]
    #[must_use]
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active => None,
            Self::Deleted { at } => Some(*at),
        }
    }

    /// Whether the entity was deleted strictly before `cutoff`
    #[inline]
    #[must_use]
    pub fn deleted_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.deleted_at().is_some_and(|at| at < cutoff)
    }
}

/// Entities that follow the soft-delete lifecycle
pub trait SoftDelete {
    /// Current lifecycle state
    fn lifecycle(&self) -> &Lifecycle;

    /// Mutable lifecycle state
    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Visible iff not soft-deleted
    #[inline]
    fn is_visible(&self) -> bool {
        self.lifecycle().is_active()
    }

    /// Mark as deleted at `at`. Returns `false` if it was already deleted.
    fn soft_delete(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_visible() {
            return false;
        }
        *self.lifecycle_mut() = Lifecycle::Deleted { at };
        true
    }
}
