//! Core types: record identity, tenants, timestamps and the record itself.

use crate::props::AttributeBag;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Application-defined record type (e.g. "contact", "invoice").
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordType(pub String);

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        RecordType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordType({})", self.0)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordType {
    fn from(s: &str) -> Self {
        RecordType(s.to_string())
    }
}

/// Identifier of a record within its type (assigned by the store).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant (storage connection) a record lives in.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(name: impl Into<String>) -> Self {
        TenantId(name.into())
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Polymorphic pointer to a persisted record: type tag plus id, and the
/// tenant it lives in (`None` means the default connection).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: RecordType,
    pub id: RecordId,
    #[serde(default)]
    pub tenant: Option<TenantId>,
}

impl RecordRef {
    pub fn new(kind: impl Into<RecordType>, id: RecordId) -> Self {
        Self {
            kind: kind.into(),
            id,
            tenant: None,
        }
    }

    /// Place the reference in a tenant.
    pub fn in_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(t) => write!(f, "{}#{}@{}", self.kind, self.id, t),
            None => write!(f, "{}#{}", self.kind, self.id),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. A clock before the epoch reads as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A persisted entity: typed own fields plus a schema-less attribute bag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordType,

    /// Assigned by the store on first save.
    pub id: Option<RecordId>,

    pub tenant: Option<TenantId>,

    /// Own (column) fields.
    pub fields: Map<String, Value>,

    /// Schema-less attributes.
    pub props: AttributeBag,

    /// Row version for compare-and-swap saves (0 = never saved).
    pub version: u64,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Record {
    /// A new, unsaved record.
    pub fn new(kind: impl Into<RecordType>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            tenant: None,
            fields: Map::new(),
            props: AttributeBag::new(),
            version: 0,
            created_at: Timestamp::default(),
            updated_at: Timestamp::default(),
        }
    }

    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Set an own field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set an attribute in the bag.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.set(key, value);
        self
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Reference to this record, if it has been saved.
    pub fn reference(&self) -> Option<RecordRef> {
        self.id.map(|id| RecordRef {
            kind: self.kind.clone(),
            id,
            tenant: self.tenant.clone(),
        })
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Look up an attribute by name: own fields first, then the bag.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| self.props.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_own_fields_shadow_props() {
        let record = Record::new("contact")
            .with_field("name", "Ann")
            .with_prop("name", "Annie")
            .with_prop("phone", "555");

        assert_eq!(record.attribute("name"), Some(&json!("Ann")));
        assert_eq!(record.attribute("phone"), Some(&json!("555")));
        assert_eq!(record.attribute("missing"), None);
    }

    #[test]
    fn test_reference_requires_id() {
        let mut record = Record::new("contact").with_tenant(TenantId::new("acme"));
        assert!(record.reference().is_none());

        record.id = Some(RecordId(4));
        let reference = record.reference().unwrap();
        assert_eq!(reference.id, RecordId(4));
        assert_eq!(reference.tenant, Some(TenantId::new("acme")));
        assert_eq!(reference.to_string(), "contact#4@acme");
    }

    #[test]
    fn test_record_ref_serde() {
        let reference = RecordRef::new("contact", RecordId(9));
        let encoded = serde_json::to_string(&reference).unwrap();
        let decoded: RecordRef = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, reference);
    }
}
