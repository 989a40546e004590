//! SpecMatrix Store
//!
//! Relational state held in persistent maps. A transaction works on an O(1)
//! clone of every table; on commit its audit records are sealed into the
//! [`AuditLedger`](specmatrix_audit::AuditLedger) first and the new tables are
//! swapped in only if that succeeds. Readers therefore never observe a
//! mutation whose audit entry is not yet durable.
//!
//! Uniqueness is enforced at commit time, inside the single writer lock:
//!
//! - requirement code per project (active rows)
//! - one active matrix entry per (requirement, document)
//! - one access record per (user, project)

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod db;
pub mod error;
pub mod tables;

pub use db::{Database, Tx};
pub use error::StoreError;
pub use tables::{PurgeCounts, Snapshot, Tables};
