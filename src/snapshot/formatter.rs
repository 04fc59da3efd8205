//! Named formatters: pluggable snapshot shaping.

use super::Snapshot;
use crate::error::{Result, SyncError};
use crate::types::Record;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Turns a subject record into the attribute map mirrored onto references.
pub trait AttributeFormatter: Send + Sync {
    fn apply(&self, subject: &Record) -> Snapshot;
}

impl<F> AttributeFormatter for F
where
    F: Fn(&Record) -> Snapshot + Send + Sync,
{
    fn apply(&self, subject: &Record) -> Snapshot {
        self(subject)
    }
}

/// Formatters by name.
#[derive(Default)]
pub struct FormatterRegistry {
    formatters: RwLock<HashMap<String, Arc<dyn AttributeFormatter>>>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a formatter.
    pub fn register(&self, name: impl Into<String>, formatter: impl AttributeFormatter + 'static) {
        self.formatters
            .write()
            .insert(name.into(), Arc::new(formatter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.formatters.read().contains_key(name)
    }

    /// Look up a formatter; unknown names are a configuration error.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AttributeFormatter>> {
        self.formatters
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::Configuration(format!("unknown formatter '{}'", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.formatters.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatterRegistry")
            .field("names", &self.names())
            .finish()
    }
}
