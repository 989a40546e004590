//! The hash-chained audit ledger

use crate::entry::{AuditEntry, AuditRecord, ChainHash};
use crate::error::AuditError;
use crate::query::{AuditPage, AuditQuery};
use crate::sink::{AuditSink, VolatileSink};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;

/// Append-only, queryable audit chain
///
/// Records are sealed and persisted to the sink before they become visible.
/// If the sink rejects a batch, nothing is appended and the caller is expected
/// to roll back the mutation the batch describes.
#[derive(Debug)]
pub struct AuditLedger {
    entries: RwLock<Vec<AuditEntry>>,
    sink: Arc<dyn AuditSink>,
}

impl Default for AuditLedger {
    fn default() -> Self {
        Self::new(Arc::new(VolatileSink))
    }
}

impl AuditLedger {
    /// Empty ledger writing through `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            sink,
        }
    }

    /// Reopen a ledger from previously persisted entries
    ///
    /// # Errors
    /// Returns `IntegrityViolation` if `history` is not an intact chain.
    pub fn with_history(
        sink: Arc<dyn AuditSink>,
        history: Vec<AuditEntry>,
    ) -> Result<Self, AuditError> {
        verify_chain(&history)?;
        Ok(Self {
            entries: RwLock::new(history),
            sink,
        })
    }

    /// Seal and persist a batch atomically
    ///
    /// # Errors
    /// Returns the sink's error; the ledger is unchanged in that case.
    pub fn append_batch(&self, records: Vec<AuditRecord>) -> Result<Vec<AuditEntry>, AuditError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut guard = self.entries.write();
        let (mut sequence, mut prev) = guard
            .last()
            .map_or((0, ChainHash::GENESIS), |e| (e.sequence, e.hash));
        let now = Utc::now();

        let sealed: Vec<AuditEntry> = records
            .into_iter()
            .map(|record| {
                sequence += 1;
                let entry = AuditEntry::seal(record, sequence, now, prev);
                prev = entry.hash;
                entry
            })
            .collect();

        if let Err(err) = self.sink.persist(&sealed) {
            tracing::error!(error = %err, batch = sealed.len(), "audit sink rejected batch");
            return Err(err);
        }

        for entry in &sealed {
            tracing::debug!(
                sequence = entry.sequence,
                action = %entry.action,
                subject = %entry.subject_id,
                "audit entry appended"
            );
        }
        guard.extend(sealed.iter().cloned());
        Ok(sealed)
    }

    /// Seal and persist one record
    ///
    /// # Errors
    /// See [`AuditLedger::append_batch`].
    pub fn append(&self, record: AuditRecord) -> Result<AuditEntry, AuditError> {
        self.append_batch(vec![record])?
            .pop()
            .ok_or_else(|| AuditError::SinkUnavailable("empty batch result".into()))
    }

    /// Copy of every entry, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Check every link in the chain
    ///
    /// # Errors
    /// Returns `IntegrityViolation` naming the first broken entry.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        verify_chain(&self.entries.read())
    }

    /// Filtered, newest-first page of entries
    ///
    /// The caller validates `query` against its own limit bounds.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> AuditPage {
        let guard = self.entries.read();
        let matching: Vec<&AuditEntry> = guard.iter().rev().filter(|e| query.matches(e)).collect();
        let total = matching.len();
        let entries = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        AuditPage {
            entries,
            total,
            limit: query.limit,
            offset: query.offset,
        }
    }
}

/// Verify that `entries` form an intact chain from genesis
///
/// # Errors
/// Returns `IntegrityViolation` with the sequence of the first bad entry.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), AuditError> {
    let mut prev = ChainHash::GENESIS;
    for (index, entry) in entries.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        if entry.sequence != expected_sequence
            || entry.prev_hash != prev
            || entry.hash != entry.compute_hash()
        {
            return Err(AuditError::IntegrityViolation {
                sequence: expected_sequence,
            });
        }
        prev = entry.hash;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditAction;
    use serde_json::json;

    #[derive(Debug)]
    struct RejectingSink;

    impl AuditSink for RejectingSink {
        fn persist(&self, _entries: &[AuditEntry]) -> Result<(), AuditError> {
            Err(AuditError::SinkUnavailable("down".into()))
        }
    }

    fn record(subject: &str) -> AuditRecord {
        AuditRecord::new(AuditAction::RequirementCreated, "requirement", subject)
    }

    #[test]
    fn batch_is_chained_in_order() {
        let ledger = AuditLedger::default();
        ledger.append(record("r0")).unwrap();
        let sealed = ledger.append_batch(vec![record("r1"), record("r2")]).unwrap();
        assert_eq!(sealed[0].sequence, 2);
        assert_eq!(sealed[1].prev_hash, sealed[0].hash);
        assert_eq!(ledger.len(), 3);
        ledger.verify_integrity().unwrap();
    }

    #[test]
    fn rejected_batch_leaves_ledger_unchanged() {
        let ledger = AuditLedger::new(Arc::new(RejectingSink));
        let err = ledger.append(record("r1")).unwrap_err();
        assert!(matches!(err, AuditError::SinkUnavailable(_)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn tampering_is_detected() {
        let ledger = AuditLedger::default();
        ledger
            .append_batch(vec![record("a"), record("b"), record("c")])
            .unwrap();
        let mut entries = ledger.entries();
        entries[1].details = json!({"forged": true});
        let err = verify_chain(&entries).unwrap_err();
        assert!(matches!(err, AuditError::IntegrityViolation { sequence: 2 }));

        let mut entries = ledger.entries();
        entries.remove(1);
        assert!(verify_chain(&entries).unwrap_err().is_integrity_violation());
    }

    #[test]
    fn reopen_continues_chain() {
        let first = AuditLedger::default();
        first.append_batch(vec![record("a"), record("b")]).unwrap();
        let reopened =
            AuditLedger::with_history(Arc::new(VolatileSink), first.entries()).unwrap();
        let next = reopened.append(record("c")).unwrap();
        assert_eq!(next.sequence, 3);
        reopened.verify_integrity().unwrap();
    }
}
