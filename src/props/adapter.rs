//! Per-type access to a record's attribute bag.

use crate::types::Record;
use serde_json::{Map, Value};

/// How the engine reads and merges a record type's attributes.
pub trait PropsAdapter: Send + Sync {
    /// Current attributes of `record`.
    fn get(&self, record: &Record) -> Map<String, Value>;

    /// Merge `partial` into the attributes stored under `namespace`.
    fn merge(&self, record: &mut Record, namespace: &str, partial: &Map<String, Value>);
}

/// Default adapter: attributes live in [`Record::props`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnProps;

impl PropsAdapter for ColumnProps {
    fn get(&self, record: &Record) -> Map<String, Value> {
        record.props.to_map()
    }

    fn merge(&self, record: &mut Record, namespace: &str, partial: &Map<String, Value>) {
        record.props.merge_nested(namespace, partial);
    }
}
