//! Durable sinks for sealed audit entries

use crate::entry::AuditEntry;
use crate::error::AuditError;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Durable destination for sealed entries
///
/// `persist` must either durably store the whole batch or return an error.
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Store a batch of sealed entries
    ///
    /// # Errors
    /// Any failure; the ledger will not append the batch.
    fn persist(&self, entries: &[AuditEntry]) -> Result<(), AuditError>;
}

/// Sink that keeps nothing beyond the in-memory ledger
#[derive(Debug, Default, Clone, Copy)]
pub struct VolatileSink;

impl AuditSink for VolatileSink {
    fn persist(&self, _entries: &[AuditEntry]) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Append-only JSON-lines journal
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open (or create) a journal for appending
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Journal location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlSink {
    fn persist(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        let mut file = self.file.lock();
        file.write_all(&buf)?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

/// Read every entry from a JSON-lines journal, skipping blank lines
///
/// # Errors
/// Returns `Io` or `Serialization` on the first unreadable line.
pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>, AuditError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}
