//! Table set and read queries

use chrono::{DateTime, Utc};
use im::OrdMap;
use specmatrix_model::{
    ContentDigest, Document, DocumentId, MatrixEntry, MatrixEntryId, Project, ProjectAccess, ProjectId,
    Requirement, RequirementId, SoftDelete, UserId,
};
use std::collections::BTreeSet;
use std::ops::Deref;

/// Every table plus the unique indices over active rows
///
/// Cloning is O(1); clones share structure until written.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub(crate) projects: OrdMap<ProjectId, Project>,
    pub(crate) access: OrdMap<(UserId, ProjectId), ProjectAccess>,
    pub(crate) documents: OrdMap<DocumentId, Document>,
    pub(crate) requirements: OrdMap<RequirementId, Requirement>,
    pub(crate) entries: OrdMap<MatrixEntryId, MatrixEntry>,
    pub(crate) requirement_codes: OrdMap<(ProjectId, String), RequirementId>,
    pub(crate) active_pairs: OrdMap<(RequirementId, DocumentId), MatrixEntryId>,
}

fn visible<T: SoftDelete>(row: Option<&T>) -> Option<&T> {
    row.filter(|r| r.is_visible())
}

impl Tables {
    /// Visible project
    #[must_use]
    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        visible(self.projects.get(&id))
    }

    /// Project regardless of lifecycle
    #[must_use]
    pub fn project_any(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    /// Visible projects, oldest id first
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values().filter(|p| p.is_visible())
    }

    /// Projects soft-deleted strictly before `cutoff`
    pub fn projects_deleted_before(&self, cutoff: DateTime<Utc>) -> impl Iterator<Item = &Project> {
        self.projects
            .values()
            .filter(move |p| p.lifecycle.deleted_before(cutoff))
    }

    /// Verified access record for (user, project)
    #[must_use]
    pub fn access(&self, user: UserId, project: ProjectId) -> Option<&ProjectAccess> {
        self.access.get(&(user, project))
    }

    /// Visible document
    #[must_use]
    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        visible(self.documents.get(&id))
    }

    /// Document regardless of lifecycle
    #[must_use]
    pub fn document_any(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    /// Visible documents of a project
    pub fn documents_in(&self, project: ProjectId) -> impl Iterator<Item = &Document> {
        self.documents
            .values()
            .filter(move |d| d.project_id == project && d.is_visible())
    }

    /// Content digests of a project's documents, deleted ones included
    #[must_use]
    pub fn digests_of(&self, project: ProjectId) -> BTreeSet<ContentDigest> {
        self.documents
            .values()
            .filter(|d| d.project_id == project)
            .map(|d| d.digest)
            .collect()
    }

    /// Whether any stored document row, deleted or not, points at `digest`
    #[must_use]
    pub fn digest_in_use(&self, digest: &ContentDigest) -> bool {
        self.documents.values().any(|d| d.digest == *digest)
    }

    /// Visible requirement
    #[must_use]
    pub fn requirement(&self, id: RequirementId) -> Option<&Requirement> {
        visible(self.requirements.get(&id))
    }

    /// Visible requirement by user-facing code
    #[must_use]
    pub fn requirement_by_code(&self, project: ProjectId, code: &str) -> Option<&Requirement> {
        self.requirement_codes
            .get(&(project, code.to_string()))
            .and_then(|id| self.requirement(*id))
    }

    /// Visible requirements of a project
    pub fn requirements_in(&self, project: ProjectId) -> impl Iterator<Item = &Requirement> {
        self.requirements
            .values()
            .filter(move |r| r.project_id == project && r.is_visible())
    }

    /// Visible matrix entry
    #[must_use]
    pub fn entry(&self, id: MatrixEntryId) -> Option<&MatrixEntry> {
        visible(self.entries.get(&id))
    }

    /// Matrix entry regardless of lifecycle
    #[must_use]
    pub fn entry_any(&self, id: MatrixEntryId) -> Option<&MatrixEntry> {
        self.entries.get(&id)
    }

    /// The active entry for a (requirement, document) pair
    #[must_use]
    pub fn active_entry(&self, requirement: RequirementId, document: DocumentId) -> Option<&MatrixEntry> {
        self.active_pairs
            .get(&(requirement, document))
            .and_then(|id| self.entry(*id))
    }

    /// Visible entries whose requirement belongs to `project`
    pub fn entries_in(&self, project: ProjectId) -> impl Iterator<Item = &MatrixEntry> {
        self.entries.values().filter(move |e| {
            e.is_visible()
                && self
                    .requirements
                    .get(&e.requirement_id)
                    .is_some_and(|r| r.project_id == project)
        })
    }

    /// Number of visible entries for a pair, ignoring the index
    #[must_use]
    pub fn count_active_for(&self, requirement: RequirementId, document: DocumentId) -> usize {
        self.entries
            .values()
            .filter(|e| e.is_visible() && e.pair() == (requirement, document))
            .count()
    }

    /// Subject ids of a project and every row that belongs to it,
    /// soft-deleted rows included
    #[must_use]
    pub fn subjects_of(&self, project: ProjectId) -> BTreeSet<String> {
        let mut subjects = BTreeSet::new();
        subjects.insert(project.to_string());
        let requirements: BTreeSet<RequirementId> = self
            .requirements
            .values()
            .filter(|r| r.project_id == project)
            .map(|r| r.id)
            .collect();
        subjects.extend(requirements.iter().map(ToString::to_string));
        subjects.extend(
            self.documents
                .values()
                .filter(|d| d.project_id == project)
                .map(|d| d.id.to_string()),
        );
        subjects.extend(
            self.entries
                .values()
                .filter(|e| requirements.contains(&e.requirement_id))
                .map(|e| e.id.to_string()),
        );
        subjects
    }
}

/// Point-in-time, read-only view of the store
#[derive(Debug, Clone)]
pub struct Snapshot(pub(crate) Tables);

impl Deref for Snapshot {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.0
    }
}

/// Rows removed by a cascading purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    /// Projects removed
    pub projects: usize,
    /// Access records removed
    pub access: usize,
    /// Documents removed
    pub documents: usize,
    /// Requirements removed
    pub requirements: usize,
    /// Matrix entries removed
    pub entries: usize,
}

impl PurgeCounts {
    /// Total rows removed
    #[must_use]
    pub fn total(&self) -> usize {
        self.projects + self.access + self.documents + self.requirements + self.entries
    }
}
