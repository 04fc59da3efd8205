//! Storage representations of the "current" marker.

use crate::store::Clause;
use crate::types::{Record, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where and how a record type stores its current marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CurrentMarker {
    /// Nullable timestamp field; non-null means current.
    Timestamp { field: String },
    /// Integer field restricted to 0 and 1; 1 means current.
    Flag { field: String },
}

impl CurrentMarker {
    pub fn timestamp(field: impl Into<String>) -> Self {
        CurrentMarker::Timestamp {
            field: field.into(),
        }
    }

    pub fn flag(field: impl Into<String>) -> Self {
        CurrentMarker::Flag {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            CurrentMarker::Timestamp { field } | CurrentMarker::Flag { field } => field,
        }
    }

    /// Predicate selecting marked records.
    pub fn clause(&self) -> Clause {
        match self {
            CurrentMarker::Timestamp { field } => Clause::IsSet(field.clone()),
            CurrentMarker::Flag { field } => Clause::Eq(field.clone(), Value::from(1)),
        }
    }

    pub fn is_marked(&self, record: &Record) -> bool {
        self.clause().matches(record)
    }

    pub(crate) fn mark(&self, record: &mut Record) {
        let value = match self {
            CurrentMarker::Timestamp { .. } => Value::from(Timestamp::now().0),
            CurrentMarker::Flag { .. } => Value::from(1),
        };
        record.fields.insert(self.field().to_string(), value);
    }

    pub(crate) fn clear(&self, record: &mut Record) {
        let value = match self {
            CurrentMarker::Timestamp { .. } => Value::Null,
            CurrentMarker::Flag { .. } => Value::from(0),
        };
        record.fields.insert(self.field().to_string(), value);
    }

    /// Whether the stored marker value is legal for this representation.
    pub fn is_valid(&self, record: &Record) -> bool {
        match (self, record.fields.get(self.field())) {
            (_, None) | (_, Some(Value::Null)) => true,
            (CurrentMarker::Timestamp { .. }, Some(v)) => v.is_i64(),
            (CurrentMarker::Flag { .. }, Some(v)) => matches!(v.as_i64(), Some(0) | Some(1)),
        }
    }
}
