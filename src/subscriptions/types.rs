//! Subscription types.

use crate::snapshot::{Snapshot, SnapshotDigest};
use crate::types::{RecordRef, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a subscription. Ids grow in creation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

/// Which attributes a reference wants from its subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Copy exactly these keys (ordered, no duplicates).
    Keys(Vec<String>),

    /// Delegate to a named formatter, then drop the `except` keys.
    Formatter {
        name: String,
        #[serde(default)]
        except: Vec<String>,
    },
}

impl Selection {
    /// Key selection; duplicate keys keep their first position.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if !out.contains(&key) {
                out.push(key);
            }
        }
        Selection::Keys(out)
    }

    pub fn formatter(name: impl Into<String>) -> Self {
        Selection::Formatter {
            name: name.into(),
            except: Vec::new(),
        }
    }

    /// Add exception keys to a formatter selection. No effect on key selections.
    pub fn except<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Selection::Formatter { except, .. } = &mut self {
            for key in keys {
                let key = key.into();
                if !except.contains(&key) {
                    except.push(key);
                }
            }
        }
        self
    }
}

/// Last snapshot computed for a subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub snapshot: Snapshot,
    pub digest: SnapshotDigest,
    pub computed_at: Timestamp,
}

/// "`reference` mirrors `selection` of `subject` under `role`."
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,

    /// The dependent record receiving the snapshot.
    pub reference: RecordRef,

    /// The source-of-truth record.
    pub subject: RecordRef,

    /// Key in the reference's attribute bag holding the snapshot.
    pub role: String,

    pub selection: Selection,

    /// `None` until the first sync, and again after the selection changes.
    pub cached: Option<CachedSnapshot>,

    pub created_at: Timestamp,
}
