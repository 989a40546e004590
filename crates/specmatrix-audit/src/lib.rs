//! SpecMatrix Audit Trail
//!
//! Immutable record of every state transition, suitable for reconstructing
//! who did what, when and why.
//!
//! # Architecture
//!
//! ```text
//! AuditRecord ──seal──▶ AuditEntry (sequence, timestamp, prev_hash, hash)
//!                            │
//!                 AuditSink::persist (durable first)
//!                            │
//!                 AuditLedger (queryable chain)
//! ```
//!
//! Entries are chained with SHA-256: altering or removing any row breaks
//! [`AuditLedger::verify_integrity`]. Nothing in this crate updates or deletes
//! an entry once it is appended.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod entry;
pub mod error;
pub mod ledger;
pub mod query;
pub mod sink;

pub use entry::{AuditAction, AuditEntry, AuditRecord, ChainHash, ValueChange};
pub use error::AuditError;
pub use ledger::{verify_chain, AuditLedger};
pub use query::{AuditPage, AuditQuery};
pub use sink::{read_journal, AuditSink, JsonlSink, VolatileSink};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
