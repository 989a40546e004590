//! Database handle and transactions

use crate::error::StoreError;
use crate::tables::{PurgeCounts, Snapshot, Tables};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use specmatrix_audit::{AuditLedger, AuditRecord};
use specmatrix_model::{
    Document, DocumentId, MatrixEntry, MatrixEntryId, Project, ProjectAccess, ProjectId,
    Requirement, RequirementId, SoftDelete,
};
use std::ops::Deref;
use std::sync::Arc;

/// Shared store handle
#[derive(Debug)]
pub struct Database {
    tables: Mutex<Tables>,
    ledger: Arc<AuditLedger>,
}

impl Database {
    /// Empty store writing audit entries to `ledger`
    #[must_use]
    pub fn new(ledger: Arc<AuditLedger>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            ledger,
        }
    }

    /// The audit ledger transactions commit into
    #[must_use]
    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    /// Consistent read-only snapshot
    #[must_use]
    pub fn read(&self) -> Snapshot {
        Snapshot(self.tables.lock().clone())
    }

    /// Run `f` as one serializable transaction
    ///
    /// `f` sees and mutates a private copy of the tables. If it returns `Ok`
    /// and recorded audit entries for its mutations, the entries are sealed
    /// into the ledger and the copy becomes visible. Any error, including an
    /// audit write failure, discards the copy.
    ///
    /// # Errors
    /// Whatever `f` returns, `UnauditedMutation` if `f` mutated without
    /// recording, or `Audit` if the ledger rejected the batch.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.tables.lock();
        let mut tx = Tx {
            tables: guard.clone(),
            records: Vec::new(),
            mutations: 0,
        };

        let value = f(&mut tx)?;

        if tx.mutations > 0 && tx.records.is_empty() {
            tracing::error!(mutations = tx.mutations, "rejecting unaudited transaction");
            return Err(StoreError::UnauditedMutation {
                mutations: tx.mutations,
            }
            .into());
        }

        if !tx.records.is_empty() {
            self.ledger
                .append_batch(tx.records)
                .map_err(StoreError::from)?;
        }

        if tx.mutations > 0 {
            *guard = tx.tables;
        }
        Ok(value)
    }
}

/// Open transaction: reads see earlier writes of the same transaction
#[derive(Debug)]
pub struct Tx {
    tables: Tables,
    records: Vec<AuditRecord>,
    mutations: usize,
}

impl Deref for Tx {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl Tx {
    /// Queue an audit record for commit
    pub fn audit(&mut self, record: AuditRecord) {
        self.records.push(record);
    }

    /// Queue several audit records
    pub fn audit_all(&mut self, records: impl IntoIterator<Item = AuditRecord>) {
        self.records.extend(records);
    }

    /// Audit records queued so far
    #[must_use]
    pub fn pending_audit(&self) -> &[AuditRecord] {
        &self.records
    }

    fn touch(&mut self) {
        self.mutations += 1;
    }

    // ---- projects ---------------------------------------------------------

    /// Insert a new project
    ///
    /// # Errors
    /// `Conflict` if the id is taken.
    pub fn insert_project(&mut self, project: Project) -> Result<(), StoreError> {
        if self.tables.projects.contains_key(&project.id) {
            return Err(StoreError::Conflict(format!("project {} exists", project.id)));
        }
        self.tables.projects.insert(project.id, project);
        self.touch();
        Ok(())
    }

    /// Replace a visible project
    ///
    /// # Errors
    /// `NotFound` if absent or deleted.
    pub fn update_project(&mut self, project: Project) -> Result<(), StoreError> {
        if self.tables.project(project.id).is_none() {
            return Err(StoreError::not_found("project", project.id));
        }
        self.tables.projects.insert(project.id, project);
        self.touch();
        Ok(())
    }

    /// Soft-delete a project, returning the deleted row
    ///
    /// # Errors
    /// `NotFound` if absent or already deleted.
    pub fn soft_delete_project(
        &mut self,
        id: ProjectId,
        at: DateTime<Utc>,
    ) -> Result<Project, StoreError> {
        let mut project = self
            .tables
            .project(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("project", id))?;
        project.soft_delete(at);
        project.updated_at = at;
        self.tables.projects.insert(id, project.clone());
        self.touch();
        Ok(project)
    }

    /// Record verified password access; idempotent per (user, project)
    pub fn grant_access(&mut self, access: ProjectAccess) -> bool {
        let key = (access.user_id, access.project_id);
        if self.tables.access.contains_key(&key) {
            return false;
        }
        self.tables.access.insert(key, access);
        self.touch();
        true
    }

    // ---- documents --------------------------------------------------------

    /// Insert a new document
    ///
    /// # Errors
    /// `NotFound` if its project is not visible.
    pub fn insert_document(&mut self, document: Document) -> Result<(), StoreError> {
        if self.tables.project(document.project_id).is_none() {
            return Err(StoreError::not_found("project", document.project_id));
        }
        self.tables.documents.insert(document.id, document);
        self.touch();
        Ok(())
    }

    /// Replace a document row
    ///
    /// Extraction settles documents that may have been soft-deleted while
    /// processing, so only existence is required.
    ///
    /// # Errors
    /// `NotFound` if the row does not exist.
    pub fn update_document(&mut self, document: Document) -> Result<(), StoreError> {
        if !self.tables.documents.contains_key(&document.id) {
            return Err(StoreError::not_found("document", document.id));
        }
        self.tables.documents.insert(document.id, document);
        self.touch();
        Ok(())
    }

    /// Soft-delete a document, returning the deleted row
    ///
    /// # Errors
    /// `NotFound` if absent or already deleted.
    pub fn soft_delete_document(
        &mut self,
        id: DocumentId,
        at: DateTime<Utc>,
    ) -> Result<Document, StoreError> {
        let mut document = self
            .tables
            .document(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("document", id))?;
        document.soft_delete(at);
        document.updated_at = at;
        self.tables.documents.insert(id, document.clone());
        self.touch();
        Ok(document)
    }

    // ---- requirements -----------------------------------------------------

    fn claim_code(&mut self, requirement: &Requirement) -> Result<(), StoreError> {
        let key = (requirement.project_id, requirement.code.clone());
        match self.tables.requirement_codes.get(&key) {
            Some(holder) if *holder != requirement.id => Err(StoreError::Conflict(format!(
                "requirement code {} already exists in project {}",
                requirement.code, requirement.project_id
            ))),
            _ => {
                self.tables.requirement_codes.insert(key, requirement.id);
                Ok(())
            }
        }
    }

    /// Insert a new requirement
    ///
    /// # Errors
    /// `Conflict` if its code is taken in the project, `NotFound` if the
    /// project is not visible.
    pub fn insert_requirement(&mut self, requirement: Requirement) -> Result<(), StoreError> {
        if self.tables.project(requirement.project_id).is_none() {
            return Err(StoreError::not_found("project", requirement.project_id));
        }
        self.claim_code(&requirement)?;
        self.tables.requirements.insert(requirement.id, requirement);
        self.touch();
        Ok(())
    }

    /// Replace a visible requirement, re-indexing its code
    ///
    /// # Errors
    /// `NotFound` if absent, `Conflict` if the new code is taken.
    pub fn update_requirement(&mut self, requirement: Requirement) -> Result<(), StoreError> {
        let previous = self
            .tables
            .requirement(requirement.id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("requirement", requirement.id))?;
        if previous.code != requirement.code {
            self.claim_code(&requirement)?;
            self.tables
                .requirement_codes
                .remove(&(previous.project_id, previous.code));
        }
        self.tables.requirements.insert(requirement.id, requirement);
        self.touch();
        Ok(())
    }

    /// Soft-delete a requirement and release its code
    ///
    /// # Errors
    /// `NotFound` if absent or already deleted.
    pub fn soft_delete_requirement(
        &mut self,
        id: RequirementId,
        at: DateTime<Utc>,
    ) -> Result<Requirement, StoreError> {
        let mut requirement = self
            .tables
            .requirement(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("requirement", id))?;
        requirement.soft_delete(at);
        requirement.updated_at = at;
        self.tables
            .requirement_codes
            .remove(&(requirement.project_id, requirement.code.clone()));
        self.tables.requirements.insert(id, requirement.clone());
        self.touch();
        Ok(requirement)
    }

    // ---- matrix entries ---------------------------------------------------

    /// Insert a new matrix entry
    ///
    /// # Errors
    /// `Conflict` if an active entry already exists for the pair.
    pub fn insert_entry(&mut self, entry: MatrixEntry) -> Result<(), StoreError> {
        let pair = entry.pair();
        if let Some(existing) = self.tables.active_pairs.get(&pair) {
            return Err(StoreError::Conflict(format!(
                "active matrix entry {existing} already exists for requirement {} and document {}",
                pair.0, pair.1
            )));
        }
        self.tables.active_pairs.insert(pair, entry.id);
        self.tables.entries.insert(entry.id, entry);
        self.touch();
        Ok(())
    }

    /// Replace a visible matrix entry
    ///
    /// # Errors
    /// `NotFound` if absent or deleted.
    pub fn update_entry(&mut self, entry: MatrixEntry) -> Result<(), StoreError> {
        match self.tables.entry(entry.id) {
            Some(current) if current.pair() == entry.pair() => {}
            Some(_) => {
                return Err(StoreError::Conflict(
                    "matrix entry cannot move to another pair".into(),
                ))
            }
            None => return Err(StoreError::not_found("matrix_entry", entry.id)),
        }
        self.tables.entries.insert(entry.id, entry);
        self.touch();
        Ok(())
    }

    /// Soft-delete a matrix entry and free its pair
    ///
    /// # Errors
    /// `Conflict` if it was already deleted (a concurrent replacement won),
    /// `NotFound` if it never existed.
    pub fn soft_delete_entry(
        &mut self,
        id: MatrixEntryId,
        at: DateTime<Utc>,
    ) -> Result<MatrixEntry, StoreError> {
        let mut entry = self
            .tables
            .entry_any(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("matrix_entry", id))?;
        if !entry.soft_delete(at) {
            return Err(StoreError::Conflict(format!(
                "matrix entry {id} was already replaced"
            )));
        }
        entry.updated_at = at;
        self.tables.active_pairs.remove(&entry.pair());
        self.tables.entries.insert(id, entry.clone());
        self.touch();
        Ok(entry)
    }

    // ---- retention --------------------------------------------------------

    /// Physically remove a project and everything that belongs to it
    ///
    /// # Errors
    /// `NotFound` if no such row exists in any lifecycle state.
    pub fn purge_project(&mut self, id: ProjectId) -> Result<PurgeCounts, StoreError> {
        if self.tables.projects.remove(&id).is_none() {
            return Err(StoreError::not_found("project", id));
        }
        let mut counts = PurgeCounts {
            projects: 1,
            ..PurgeCounts::default()
        };

        let t = &mut self.tables;
        let access: Vec<_> = t.access.keys().filter(|(_, p)| *p == id).copied().collect();
        for key in &access {
            t.access.remove(key);
        }
        counts.access = access.len();

        let documents: Vec<DocumentId> = t
            .documents
            .values()
            .filter(|d| d.project_id == id)
            .map(|d| d.id)
            .collect();
        for did in &documents {
            t.documents.remove(did);
        }
        counts.documents = documents.len();

        let requirements: Vec<Requirement> = t
            .requirements
            .values()
            .filter(|r| r.project_id == id)
            .cloned()
            .collect();
        for requirement in &requirements {
            t.requirements.remove(&requirement.id);
            t.requirement_codes
                .remove(&(requirement.project_id, requirement.code.clone()));
        }
        counts.requirements = requirements.len();

        let entries: Vec<MatrixEntry> = t
            .entries
            .values()
            .filter(|e| requirements.iter().any(|r| r.id == e.requirement_id))
            .cloned()
            .collect();
        for entry in &entries {
            t.entries.remove(&entry.id);
            if t.active_pairs.get(&entry.pair()) == Some(&entry.id) {
                t.active_pairs.remove(&entry.pair());
            }
        }
        counts.entries = entries.len();

        self.touch();
        Ok(counts)
    }
}
