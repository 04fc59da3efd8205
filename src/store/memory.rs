//! In-memory store.

use super::{Filter, Store, StoreTxn, TableKey};
use crate::error::{Result, SyncError};
use crate::types::{Record, RecordId, RecordRef, RecordType, Timestamp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Save-time validation hook; an `Err` rejects the write.
pub type Validator = Arc<dyn Fn(&Record) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Clone, Debug, Default)]
struct Table {
    next_id: u64,
    rows: BTreeMap<RecordId, Record>,
}

type Tables = HashMap<TableKey, Table>;

/// Record store held in process memory.
///
/// Every table lives behind one lock. Transactions stage their writes on a
/// copy of the tables and publish it only when the work succeeds.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    validators: RwLock<HashMap<RecordType, Validator>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            validators: RwLock::new(HashMap::new()),
        }
    }

    /// Reject saves of `kind` for which `validator` returns an error.
    pub fn with_validator<F>(self, kind: impl Into<RecordType>, validator: F) -> Self
    where
        F: Fn(&Record) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validators.write().insert(kind.into(), Arc::new(validator));
        self
    }

    /// Number of rows in a table.
    pub fn count(&self, table: &TableKey) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn load_from(tables: &Tables, reference: &RecordRef) -> Result<Record> {
    tables
        .get(&TableKey::of_ref(reference))
        .and_then(|t| t.rows.get(&reference.id))
        .cloned()
        .ok_or_else(|| SyncError::NotFound(reference.clone()))
}

fn query_from(tables: &Tables, table: &TableKey, filter: &Filter) -> Vec<Record> {
    match tables.get(table) {
        Some(t) => t
            .rows
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect(),
        None => Vec::new(),
    }
}

fn save_into(
    tables: &mut Tables,
    validators: &HashMap<RecordType, Validator>,
    mut record: Record,
) -> Result<Record> {
    if let Some(validate) = validators.get(&record.kind) {
        (**validate)(&record).map_err(SyncError::Persistence)?;
    }

    let now = Timestamp::now();
    let table = tables.entry(TableKey::of(&record)).or_default();

    match record.id {
        None => {
            table.next_id += 1;
            let id = RecordId(table.next_id);
            record.id = Some(id);
            record.version = 1;
            record.created_at = now;
            record.updated_at = now;
            table.rows.insert(id, record.clone());
        }
        Some(id) => {
            let stored = table.rows.get(&id).ok_or_else(|| {
                SyncError::NotFound(RecordRef {
                    kind: record.kind.clone(),
                    id,
                    tenant: record.tenant.clone(),
                })
            })?;

            if stored.version != record.version {
                return Err(SyncError::Concurrency(format!(
                    "{}#{} is at version {}, write was based on {}",
                    record.kind, id, stored.version, record.version
                )));
            }

            record.version += 1;
            record.created_at = stored.created_at;
            // Keep modification order strict even when the clock does not move.
            record.updated_at = now.max(Timestamp(stored.updated_at.0 + 1));
            table.rows.insert(id, record.clone());
        }
    }

    Ok(record)
}

struct MemoryTxn<'a> {
    tables: &'a mut Tables,
    validators: &'a HashMap<RecordType, Validator>,
}

impl StoreTxn for MemoryTxn<'_> {
    fn load(&mut self, reference: &RecordRef) -> Result<Record> {
        load_from(self.tables, reference)
    }

    fn save(&mut self, record: Record) -> Result<Record> {
        save_into(self.tables, self.validators, record)
    }

    fn query(&mut self, table: &TableKey, filter: &Filter) -> Result<Vec<Record>> {
        Ok(query_from(self.tables, table, filter))
    }
}

impl Store for MemoryStore {
    fn load(&self, reference: &RecordRef) -> Result<Record> {
        load_from(&self.tables.read(), reference)
    }

    fn save(&self, record: Record) -> Result<Record> {
        let validators = self.validators.read();
        save_into(&mut self.tables.write(), &validators, record)
    }

    fn delete(&self, reference: &RecordRef) -> Result<()> {
        let mut tables = self.tables.write();
        tables
            .get_mut(&TableKey::of_ref(reference))
            .and_then(|t| t.rows.remove(&reference.id))
            .map(|_| ())
            .ok_or_else(|| SyncError::NotFound(reference.clone()))
    }

    fn query(&self, table: &TableKey, filter: &Filter) -> Result<Vec<Record>> {
        Ok(query_from(&self.tables.read(), table, filter))
    }

    fn transaction(&self, work: &mut dyn FnMut(&mut dyn StoreTxn) -> Result<()>) -> Result<()> {
        let validators = self.validators.read();
        let mut tables = self.tables.write();
        let mut staged = tables.clone();

        {
            let mut txn = MemoryTxn {
                tables: &mut staged,
                validators: &validators,
            };
            work(&mut txn)?;
        }

        *tables = staged;
        Ok(())
    }
}
