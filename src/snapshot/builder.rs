//! Snapshot builder.

use super::{FormatterRegistry, Snapshot};
use crate::error::Result;
use crate::subscriptions::Selection;
use crate::types::Record;
use std::sync::Arc;

/// Computes snapshots from subject records.
#[derive(Clone, Debug)]
pub struct SnapshotBuilder {
    formatters: Arc<FormatterRegistry>,
}

impl SnapshotBuilder {
    pub fn new(formatters: Arc<FormatterRegistry>) -> Self {
        Self { formatters }
    }

    pub fn formatters(&self) -> &Arc<FormatterRegistry> {
        &self.formatters
    }

    /// Check that a selection can be built at all.
    pub fn validate(&self, selection: &Selection) -> Result<()> {
        if let Selection::Formatter { name, .. } = selection {
            self.formatters.resolve(name)?;
        }
        Ok(())
    }

    /// Build the snapshot `selection` describes for `subject`.
    ///
    /// Key selections read own fields before the attribute bag; absent keys
    /// are left out. Formatter selections return the formatter's output with
    /// the exception keys removed. Nested values pass through untouched.
    pub fn build(&self, subject: &Record, selection: &Selection) -> Result<Snapshot> {
        match selection {
            Selection::Keys(keys) => Ok(keys
                .iter()
                .filter_map(|key| {
                    subject
                        .attribute(key)
                        .map(|value| (key.clone(), value.clone()))
                })
                .collect()),
            Selection::Formatter { name, except } => {
                let formatter = self.formatters.resolve(name)?;
                let mut snapshot = formatter.apply(subject);
                for key in except {
                    snapshot.remove(key);
                }
                Ok(snapshot)
            }
        }
    }
}
