//! Storage boundary.
//!
//! The engine never owns persistence; it talks to a [`Store`]. A store must
//! offer equality filtering (for version groups) and all-or-nothing
//! multi-row updates through [`Store::transaction`]. Records carry a row
//! version and a save with a stale version fails with
//! [`SyncError::Concurrency`](crate::SyncError::Concurrency).
//!
//! [`MemoryStore`] is the in-process implementation used by tests and by
//! hosts that keep records in memory.

mod filter;
mod memory;

pub use filter::{Clause, Filter};
pub use memory::{MemoryStore, Validator};

use crate::error::Result;
use crate::types::{Record, RecordRef, RecordType, TenantId};

/// A (tenant, type) pair naming one table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub tenant: Option<TenantId>,
    pub kind: RecordType,
}

impl TableKey {
    pub fn new(kind: impl Into<RecordType>, tenant: Option<TenantId>) -> Self {
        Self {
            tenant,
            kind: kind.into(),
        }
    }

    /// Table a record belongs to.
    pub fn of(record: &Record) -> Self {
        Self {
            tenant: record.tenant.clone(),
            kind: record.kind.clone(),
        }
    }

    pub fn of_ref(reference: &RecordRef) -> Self {
        Self {
            tenant: reference.tenant.clone(),
            kind: reference.kind.clone(),
        }
    }
}

/// Operations available inside a transaction.
pub trait StoreTxn {
    fn load(&mut self, reference: &RecordRef) -> Result<Record>;
    fn save(&mut self, record: Record) -> Result<Record>;
    fn query(&mut self, table: &TableKey, filter: &Filter) -> Result<Vec<Record>>;
}

/// Record store consumed by the engine.
pub trait Store: Send + Sync {
    /// Load a record. Missing records are [`SyncError::NotFound`](crate::SyncError::NotFound).
    fn load(&self, reference: &RecordRef) -> Result<Record>;

    /// Insert (no id) or update (id set) a record, returning the stored row.
    fn save(&self, record: Record) -> Result<Record>;

    fn delete(&self, reference: &RecordRef) -> Result<()>;

    /// All rows of `table` matching `filter`, ordered by id.
    fn query(&self, table: &TableKey, filter: &Filter) -> Result<Vec<Record>>;

    /// Run `work` atomically: either every write it makes is published, or none.
    fn transaction(&self, work: &mut dyn FnMut(&mut dyn StoreTxn) -> Result<()>) -> Result<()>;
}
