//! Equality filters over record attributes.

use crate::types::Record;
use serde_json::Value;

/// A single predicate on one attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    /// Attribute equals the value. `Null` also matches a missing attribute.
    Eq(String, Value),
    /// Attribute is present and not null.
    IsSet(String),
}

impl Clause {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Clause::Eq(field, Value::Null) => {
                matches!(record.attribute(field), None | Some(Value::Null))
            }
            Clause::Eq(field, value) => record.attribute(field) == Some(value),
            Clause::IsSet(field) => {
                !matches!(record.attribute(field), None | Some(Value::Null))
            }
        }
    }
}

/// Conjunction of clauses. The empty filter matches every record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.into(), value.into()));
        self
    }

    pub fn is_set(mut self, field: impl Into<String>) -> Self {
        self.clauses.push(Clause::IsSet(field.into()));
        self
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|c| c.matches(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_and_is_set() {
        let record = Record::new("doc")
            .with_field("owner", "X")
            .with_field("current_at", json!(null))
            .with_prop("lang", "en");

        assert!(Filter::all().matches(&record));
        assert!(Filter::all().eq("owner", "X").eq("lang", "en").matches(&record));
        assert!(!Filter::all().eq("owner", "Y").matches(&record));
        assert!(!Filter::all().is_set("current_at").matches(&record));
        assert!(Filter::all().eq("current_at", Value::Null).matches(&record));
        assert!(Filter::all().eq("missing", Value::Null).matches(&record));
    }
}
