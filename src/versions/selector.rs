//! Version selector: keeps exactly one current member per version group.

use super::CurrentMarker;
use crate::error::{Result, SyncError};
use crate::store::{Filter, Store, StoreTxn, TableKey};
use crate::types::{Record, RecordType, TenantId};
use serde_json::Value;
use tracing::{debug, warn};

/// Current-record maintenance for one record type.
#[derive(Clone, Debug)]
pub struct VersionSelector {
    kind: RecordType,
    marker: CurrentMarker,
    /// Fields whose values define a version group.
    conditions: Vec<String>,
}

impl VersionSelector {
    pub fn new<I, S>(kind: impl Into<RecordType>, marker: CurrentMarker, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: kind.into(),
            marker,
            conditions: conditions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind(&self) -> &RecordType {
        &self.kind
    }

    pub fn marker(&self) -> &CurrentMarker {
        &self.marker
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    /// Filter selecting the group `record` belongs to, evaluated against its
    /// own values. A missing condition field groups as null.
    pub fn group_filter(&self, record: &Record) -> Filter {
        self.conditions.iter().fold(Filter::all(), |filter, field| {
            let value = record.attribute(field).cloned().unwrap_or(Value::Null);
            filter.eq(field.clone(), value)
        })
    }

    /// Filter selecting the current member of the groups matching `conditions`.
    ///
    /// Pure: builds a predicate, touches no storage.
    pub fn is_current<I, K, V>(&self, conditions: I) -> Filter
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        conditions
            .into_iter()
            .fold(Filter::all(), |filter, (k, v)| filter.eq(k, v))
            .and(self.marker.clause())
    }

    /// The current member of `record`'s group, if the group has one.
    pub fn current_of(&self, store: &dyn Store, record: &Record) -> Result<Option<Record>> {
        let filter = self.group_filter(record).and(self.marker.clause());
        let table = TableKey::new(self.kind.clone(), record.tenant.clone());
        Ok(store.query(&table, &filter)?.into_iter().next())
    }

    /// Current member of the group given by `conditions` in `tenant`.
    pub fn find_current<I, K, V>(
        &self,
        store: &dyn Store,
        tenant: Option<TenantId>,
        conditions: I,
    ) -> Result<Option<Record>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let table = TableKey::new(self.kind.clone(), tenant);
        Ok(store
            .query(&table, &self.is_current(conditions))?
            .into_iter()
            .next())
    }

    /// Make `record` the current member of its group.
    ///
    /// Clears the marker on every other member, then marks and saves
    /// `record`, all in one store transaction. A new record is inserted only
    /// after the clear. If the group already holds several current members
    /// they are all cleared and a warning is logged. When an existing record
    /// changes group, the group it left gets its newest member as current.
    pub fn set_current(&self, store: &dyn Store, record: Record) -> Result<Record> {
        self.check(&record)?;

        let table = TableKey::new(self.kind.clone(), record.tenant.clone());
        let current = self.group_filter(&record).and(self.marker.clause());
        let mut saved = None;

        store.transaction(&mut |txn| {
            let previous = match record.reference() {
                Some(reference) => Some(txn.load(&reference)?),
                None => None,
            };

            let mut others: Vec<Record> = txn
                .query(&table, &current)?
                .into_iter()
                .filter(|r| record.id.is_none() || r.id != record.id)
                .collect();

            if others.len() > 1 {
                // Newest first, so the heal log names the survivor of the race.
                others.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
                warn!(
                    kind = %self.kind,
                    count = others.len(),
                    newest = ?others[0].id,
                    "version group had several current members, clearing"
                );
            }

            for mut other in others {
                self.marker.clear(&mut other);
                txn.save(other)?;
            }

            let mut target = record.clone();
            if !self.marker.is_marked(&target) {
                self.marker.mark(&mut target);
            }
            let target = txn.save(target)?;

            if let Some(previous) = &previous {
                self.settle_left_group(txn, previous, &target)?;
            }
            saved = Some(target);
            Ok(())
        })?;

        let saved = saved.ok_or_else(|| {
            SyncError::Persistence("transaction finished without saving the record".into())
        })?;
        debug!(kind = %self.kind, id = ?saved.id, "record marked current");
        Ok(saved)
    }

    /// Save a record of this type.
    ///
    /// New records, and existing ones that carry the marker, become current.
    /// An unmarked existing record is saved as it is, then both the group it
    /// left and the group it is in are settled so each keeps exactly one
    /// current member.
    pub fn save(&self, store: &dyn Store, record: Record) -> Result<Record> {
        if record.is_new() || self.marker.is_marked(&record) {
            return self.set_current(store, record);
        }
        self.check(&record)?;

        let reference = record.reference().ok_or_else(|| {
            SyncError::Persistence("existing record has no reference".into())
        })?;
        let mut saved = None;

        store.transaction(&mut |txn| {
            let previous = txn.load(&reference)?;
            let target = txn.save(record.clone())?;

            self.settle_left_group(txn, &previous, &target)?;
            self.settle(txn, &TableKey::of(&target), self.group_filter(&target))?;
            // Settling may have marked the saved row itself.
            saved = Some(txn.load(&reference)?);
            Ok(())
        })?;

        saved.ok_or_else(|| {
            SyncError::Persistence("transaction finished without saving the record".into())
        })
    }

    /// Settle the group `previous` belonged to if `saved` is no longer in it.
    fn settle_left_group(&self, txn: &mut dyn StoreTxn, previous: &Record, saved: &Record) -> Result<()> {
        let left = self.group_filter(previous);
        if previous.tenant == saved.tenant && left == self.group_filter(saved) {
            return Ok(());
        }
        self.settle(txn, &TableKey::of(previous), left)
    }

    /// Mark the newest member of `group` when the group has members but no
    /// current one.
    fn settle(&self, txn: &mut dyn StoreTxn, table: &TableKey, group: Filter) -> Result<()> {
        let current = group.clone().and(self.marker.clause());
        if !txn.query(table, &current)?.is_empty() {
            return Ok(());
        }

        let newest = txn
            .query(table, &group)?
            .into_iter()
            .max_by_key(|r| (r.updated_at, r.id));
        if let Some(mut newest) = newest {
            debug!(kind = %self.kind, id = ?newest.id, "promoting newest member to current");
            self.marker.mark(&mut newest);
            txn.save(newest)?;
        }
        Ok(())
    }

    fn check(&self, record: &Record) -> Result<()> {
        if record.kind != self.kind {
            return Err(SyncError::Configuration(format!(
                "selector for {} cannot version a {} record",
                self.kind, record.kind
            )));
        }
        if !self.marker.is_valid(record) {
            return Err(SyncError::Persistence(format!(
                "{} holds an invalid current marker in '{}'",
                record.kind,
                self.marker.field()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn doc(owner: &str) -> Record {
        Record::new("doc").with_field("owner", owner)
    }

    fn current_count(store: &MemoryStore, selector: &VersionSelector, owner: &str) -> usize {
        let table = TableKey::new("doc", None);
        store
            .query(&table, &selector.is_current([("owner", owner)]))
            .unwrap()
            .len()
    }

    #[test]
    fn test_first_member_becomes_current() {
        let store = MemoryStore::new();
        let selector = VersionSelector::new("doc", CurrentMarker::flag("is_current"), ["owner"]);

        let first = selector.save(&store, doc("X")).unwrap();
        assert_eq!(first.field("is_current"), Some(&json!(1)));
        assert_eq!(current_count(&store, &selector, "X"), 1);
    }

    #[test]
    fn test_groups_are_independent() {
        let store = MemoryStore::new();
        let selector =
            VersionSelector::new("doc", CurrentMarker::timestamp("current_at"), ["owner"]);

        selector.save(&store, doc("X")).unwrap();
        selector.save(&store, doc("Y")).unwrap();
        selector.save(&store, doc("X")).unwrap();

        assert_eq!(current_count(&store, &selector, "X"), 1);
        assert_eq!(current_count(&store, &selector, "Y"), 1);
    }

    #[test]
    fn test_set_current_on_existing_member() {
        let store = MemoryStore::new();
        let selector = VersionSelector::new("doc", CurrentMarker::flag("is_current"), ["owner"]);

        let first = selector.save(&store, doc("X")).unwrap();
        let second = selector.save(&store, doc("X")).unwrap();

        let first = store.load(&first.reference().unwrap()).unwrap();
        assert_eq!(first.field("is_current"), Some(&json!(0)));

        selector.set_current(&store, first.clone()).unwrap();

        let found = selector
            .find_current(&store, None, [("owner", "X")])
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
        let second = store.load(&second.reference().unwrap()).unwrap();
        assert_eq!(second.field("is_current"), Some(&json!(0)));
    }

    #[test]
    fn test_self_heals_duplicate_currents() {
        let store = MemoryStore::new();
        let selector = VersionSelector::new("doc", CurrentMarker::flag("is_current"), ["owner"]);

        // Corrupt state left behind by an earlier race.
        store.save(doc("X").with_field("is_current", 1)).unwrap();
        store.save(doc("X").with_field("is_current", 1)).unwrap();
        assert_eq!(current_count(&store, &selector, "X"), 2);

        let fresh = selector.save(&store, doc("X")).unwrap();

        assert_eq!(current_count(&store, &selector, "X"), 1);
        let current = selector.current_of(&store, &fresh).unwrap().unwrap();
        assert_eq!(current.id, fresh.id);
    }

    #[test]
    fn test_unmarking_only_member_keeps_it_current() {
        let store = MemoryStore::new();
        let marker = CurrentMarker::flag("is_current");
        let selector = VersionSelector::new("doc", marker.clone(), ["owner"]);

        let mut only = selector.save(&store, doc("X")).unwrap();
        marker.clear(&mut only);
        let saved = selector.save(&store, only).unwrap();

        assert_eq!(saved.field("is_current"), Some(&json!(1)));
        assert_eq!(current_count(&store, &selector, "X"), 1);
    }

    #[test]
    fn test_group_change_settles_both_groups() {
        let store = MemoryStore::new();
        let selector = VersionSelector::new("doc", CurrentMarker::flag("is_current"), ["owner"]);

        selector.save(&store, doc("Y")).unwrap();
        let older = selector.save(&store, doc("X")).unwrap();
        let mut newer = selector.save(&store, doc("X")).unwrap();
        newer.fields.insert("owner".into(), json!("Y"));
        selector.save(&store, newer).unwrap();

        assert_eq!(current_count(&store, &selector, "Y"), 1);
        assert_eq!(current_count(&store, &selector, "X"), 1);
        let current = selector.current_of(&store, &older).unwrap().unwrap();
        assert_eq!(current.id, older.id);
    }

    #[test]
    fn test_wrong_kind_is_configuration_error() {
        let store = MemoryStore::new();
        let selector = VersionSelector::new("doc", CurrentMarker::flag("is_current"), ["owner"]);

        let result = selector.set_current(&store, Record::new("note"));
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_stale_record_surfaces_conflict_and_keeps_group() {
        let store = MemoryStore::new();
        let selector = VersionSelector::new("doc", CurrentMarker::flag("is_current"), ["owner"]);

        let first = selector.save(&store, doc("X")).unwrap();
        let mut newer = first.clone();
        newer.props.set("title", "v2");
        store.save(newer).unwrap();
        selector.save(&store, doc("X")).unwrap();

        // `first` is now two writes behind.
        let result = selector.set_current(&store, first);
        assert!(matches!(result, Err(SyncError::Concurrency(_))));
        assert_eq!(current_count(&store, &selector, "X"), 1);
    }
}
