//! Subscription registry implementation.

use super::types::{CachedSnapshot, Selection, Subscription, SubscriptionId};
use crate::error::{Result, SyncError};
use crate::snapshot::{Snapshot, SnapshotDigest};
use crate::types::{RecordRef, Timestamp};
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for the registry file.
const REGISTRY_MAGIC: &[u8; 4] = b"SUB\0";

/// Current registry format version.
const REGISTRY_VERSION: u8 = 1;

/// Registry contents as stored on disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    /// All subscriptions by ID.
    subscriptions: BTreeMap<SubscriptionId, Subscription>,

    /// Next subscription ID to assign.
    next_id: u64,
}

impl RegistryIndex {
    fn find(&self, reference: &RecordRef, subject: &RecordRef, role: &str) -> Option<SubscriptionId> {
        self.subscriptions
            .values()
            .find(|s| &s.reference == reference && &s.subject == subject && s.role == role)
            .map(|s| s.id)
    }
}

/// Durable mapping from subjects to the references listening to them.
///
/// File-backed registries rewrite their file after every mutation and hold an
/// exclusive lock on a sibling `.lock` file while open.
pub struct SubscriptionRegistry {
    /// Backing file, if persistent.
    path: Option<PathBuf>,

    index: RwLock<RegistryIndex>,

    _lock_file: Option<File>,
}

impl SubscriptionRegistry {
    /// A registry that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            index: RwLock::new(RegistryIndex {
                next_id: 1,
                ..Default::default()
            }),
            _lock_file: None,
        }
    }

    /// Open (or create) a file-backed registry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = Self::acquire_lock(&path)?;

        let registry = Self {
            path: Some(path.clone()),
            index: RwLock::new(RegistryIndex {
                next_id: 1,
                ..Default::default()
            }),
            _lock_file: Some(lock_file),
        };

        if path.exists() {
            let index = Self::load_from_file(&path)?;
            *registry.index.write() = index;
        }

        Ok(registry)
    }

    /// Register `reference` as listening to `subject`, using the subject's
    /// type name as the role.
    pub fn listen(
        &self,
        reference: RecordRef,
        subject: RecordRef,
        selection: Selection,
    ) -> Result<Subscription> {
        let role = subject.kind.to_string();
        self.listen_as(reference, subject, role, selection)
    }

    /// Upsert the subscription for (reference, subject, role).
    ///
    /// Re-registering with the same selection changes nothing. A different
    /// selection replaces the old one and clears the cached snapshot.
    pub fn listen_as(
        &self,
        reference: RecordRef,
        subject: RecordRef,
        role: impl Into<String>,
        selection: Selection,
    ) -> Result<Subscription> {
        let role = role.into();
        let mut index = self.index.write();
        let mut staged = index.clone();

        let subscription = match staged.find(&reference, &subject, &role) {
            Some(id) => {
                let existing = staged
                    .subscriptions
                    .get_mut(&id)
                    .ok_or(SyncError::SubscriptionNotFound(id))?;

                if existing.selection == selection {
                    return Ok(existing.clone());
                }

                debug!(?id, %reference, %subject, "selection changed, cached snapshot cleared");
                existing.selection = selection;
                existing.cached = None;
                existing.clone()
            }
            None => {
                let id = SubscriptionId(staged.next_id);
                staged.next_id += 1;

                let subscription = Subscription {
                    id,
                    reference,
                    subject,
                    role,
                    selection,
                    cached: None,
                    created_at: Timestamp::now(),
                };
                debug!(?id, reference = %subscription.reference, subject = %subscription.subject, "subscription registered");
                staged.subscriptions.insert(id, subscription.clone());
                subscription
            }
        };

        self.commit(&mut index, staged)?;
        Ok(subscription)
    }

    /// Subscriptions whose subject is `subject`, oldest first.
    pub fn subscriptions_for(&self, subject: &RecordRef) -> Vec<Subscription> {
        // Ids are assigned in creation order and the map is keyed by id.
        self.index
            .read()
            .subscriptions
            .values()
            .filter(|s| &s.subject == subject)
            .cloned()
            .collect()
    }

    /// Subscriptions held by `reference`, oldest first.
    pub fn subscriptions_of(&self, reference: &RecordRef) -> Vec<Subscription> {
        self.index
            .read()
            .subscriptions
            .values()
            .filter(|s| &s.reference == reference)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<Subscription> {
        self.index.read().subscriptions.get(&id).cloned()
    }

    /// Store the snapshot just computed for a subscription.
    ///
    /// Recording an unchanged snapshot only moves `computed_at`.
    pub fn record_snapshot(&self, id: SubscriptionId, snapshot: Snapshot) -> Result<CachedSnapshot> {
        let digest = SnapshotDigest::of(&snapshot)?;
        let mut index = self.index.write();
        let mut staged = index.clone();

        let subscription = staged
            .subscriptions
            .get_mut(&id)
            .ok_or(SyncError::SubscriptionNotFound(id))?;

        let computed_at = Timestamp::now();
        let cached = match subscription.cached.take() {
            Some(mut cached) if cached.digest == digest => {
                cached.computed_at = computed_at;
                cached
            }
            _ => CachedSnapshot {
                snapshot,
                digest,
                computed_at,
            },
        };
        subscription.cached = Some(cached.clone());

        self.commit(&mut index, staged)?;
        Ok(cached)
    }

    /// Delete one subscription.
    pub fn forget(&self, id: SubscriptionId) -> Result<Subscription> {
        let mut index = self.index.write();
        let mut staged = index.clone();
        let removed = staged
            .subscriptions
            .remove(&id)
            .ok_or(SyncError::SubscriptionNotFound(id))?;
        self.commit(&mut index, staged)?;
        debug!(?id, "subscription forgotten");
        Ok(removed)
    }

    /// Delete every subscription held by `reference`. Returns how many went.
    pub fn forget_reference(&self, reference: &RecordRef) -> Result<usize> {
        let mut index = self.index.write();
        let mut staged = index.clone();
        staged.subscriptions.retain(|_, s| &s.reference != reference);
        let removed = index.subscriptions.len() - staged.subscriptions.len();
        if removed > 0 {
            self.commit(&mut index, staged)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.index.read().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().subscriptions.is_empty()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Persist `staged`, then make it the live index. A failed write leaves
    /// the live index untouched.
    fn commit(&self, live: &mut RegistryIndex, staged: RegistryIndex) -> Result<()> {
        if let Some(path) = &self.path {
            Self::save_to_file(path, &staged)?;
        }
        *live = staged;
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.with_extension("lock"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| SyncError::Locked)?;
        Ok(lock_file)
    }

    /// Write the index: magic, version, length, MessagePack body, CRC32.
    fn save_to_file(path: &Path, index: &RegistryIndex) -> Result<()> {
        let encoded = rmp_serde::to_vec_named(index)?;
        let checksum = crc32fast::hash(&encoded);

        // Write a sibling file first so a crash never leaves a torn registry.
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(REGISTRY_MAGIC)?;
            file.write_all(&[REGISTRY_VERSION])?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.write_all(&checksum.to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        Ok(())
    }

    fn load_from_file(path: &Path) -> Result<RegistryIndex> {
        let data = fs::read(path)?;
        let truncated = || SyncError::InvalidFormat("Truncated registry file".into());

        let header = REGISTRY_MAGIC.len() + 1 + 8;
        if data.len() < header {
            return Err(truncated());
        }
        if &data[..4] != REGISTRY_MAGIC {
            return Err(SyncError::InvalidFormat("Invalid registry magic".into()));
        }
        if data[4] != REGISTRY_VERSION {
            return Err(SyncError::InvalidFormat(format!(
                "Unsupported registry version: {}",
                data[4]
            )));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[5..header]);
        let len = u64::from_le_bytes(len_bytes) as usize;

        let body_end = header.checked_add(len).ok_or_else(truncated)?;
        let encoded = data.get(header..body_end).ok_or_else(truncated)?;
        let checksum_bytes = data.get(body_end..).filter(|rest| rest.len() == 4).ok_or_else(truncated)?;

        let mut expected = [0u8; 4];
        expected.copy_from_slice(checksum_bytes);
        let expected = u32::from_le_bytes(expected);
        let got = crc32fast::hash(encoded);
        if expected != got {
            return Err(SyncError::ChecksumMismatch { expected, got });
        }

        let index: RegistryIndex = rmp_serde::from_slice(encoded)?;
        Ok(index)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordId;
    use serde_json::json;
    use tempfile::TempDir;

    fn contact(id: u64) -> RecordRef {
        RecordRef::new("contact", RecordId(id))
    }

    fn invoice(id: u64) -> RecordRef {
        RecordRef::new("invoice", RecordId(id))
    }

    fn snapshot(value: serde_json::Value) -> Snapshot {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_listen_twice_keeps_one_row() {
        let registry = SubscriptionRegistry::in_memory();

        let a = registry
            .listen(invoice(1), contact(1), Selection::keys(["name"]))
            .unwrap();
        let b = registry
            .listen(invoice(1), contact(1), Selection::keys(["name"]))
            .unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(registry.len(), 1);
        assert_eq!(a.role, "contact");
    }

    #[test]
    fn test_same_selection_keeps_cache() {
        let registry = SubscriptionRegistry::in_memory();
        let sub = registry
            .listen(invoice(1), contact(1), Selection::keys(["name"]))
            .unwrap();
        registry
            .record_snapshot(sub.id, snapshot(json!({"name": "Ann"})))
            .unwrap();

        let again = registry
            .listen(invoice(1), contact(1), Selection::keys(["name"]))
            .unwrap();
        assert!(again.cached.is_some());
    }

    #[test]
    fn test_changed_selection_invalidates_cache() {
        let registry = SubscriptionRegistry::in_memory();
        let sub = registry
            .listen(invoice(1), contact(1), Selection::keys(["a"]))
            .unwrap();
        registry
            .record_snapshot(sub.id, snapshot(json!({"a": 1})))
            .unwrap();

        let updated = registry
            .listen(invoice(1), contact(1), Selection::keys(["a", "b"]))
            .unwrap();

        assert_eq!(updated.id, sub.id);
        assert_eq!(updated.selection, Selection::keys(["a", "b"]));
        assert!(updated.cached.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_roles_are_distinct_subscriptions() {
        let registry = SubscriptionRegistry::in_memory();
        registry
            .listen_as(invoice(1), contact(1), "billing", Selection::keys(["a"]))
            .unwrap();
        registry
            .listen_as(invoice(1), contact(1), "shipping", Selection::keys(["a"]))
            .unwrap();

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_subscriptions_for_creation_order() {
        let registry = SubscriptionRegistry::in_memory();
        for i in [3, 1, 2] {
            registry
                .listen(invoice(i), contact(7), Selection::keys(["name"]))
                .unwrap();
        }
        registry
            .listen(invoice(9), contact(8), Selection::keys(["name"]))
            .unwrap();

        let refs: Vec<u64> = registry
            .subscriptions_for(&contact(7))
            .iter()
            .map(|s| s.reference.id.0)
            .collect();
        assert_eq!(refs, vec![3, 1, 2]);
    }

    #[test]
    fn test_creation_order_ignores_clock() {
        let registry = SubscriptionRegistry::in_memory();
        let first = registry
            .listen(invoice(1), contact(7), Selection::keys(["name"]))
            .unwrap();
        let second = registry
            .listen(invoice(2), contact(7), Selection::keys(["name"]))
            .unwrap();

        // The wall clock stepped back between the two registrations.
        registry
            .index
            .write()
            .subscriptions
            .get_mut(&second.id)
            .unwrap()
            .created_at = Timestamp(first.created_at.0 - 1_000_000);

        let ids: Vec<SubscriptionId> = registry
            .subscriptions_for(&contact(7))
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_record_snapshot_idempotent() {
        let registry = SubscriptionRegistry::in_memory();
        let sub = registry
            .listen(invoice(1), contact(1), Selection::keys(["name"]))
            .unwrap();

        let first = registry
            .record_snapshot(sub.id, snapshot(json!({"name": "Ann"})))
            .unwrap();
        let second = registry
            .record_snapshot(sub.id, snapshot(json!({"name": "Ann"})))
            .unwrap();

        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(first.digest, second.digest);
        assert!(second.computed_at >= first.computed_at);
    }

    #[test]
    fn test_record_snapshot_unknown_id() {
        let registry = SubscriptionRegistry::in_memory();
        let result = registry.record_snapshot(SubscriptionId(99), Snapshot::new());
        assert!(matches!(result, Err(SyncError::SubscriptionNotFound(_))));
    }

    #[test]
    fn test_forget() {
        let registry = SubscriptionRegistry::in_memory();
        let sub = registry
            .listen(invoice(1), contact(1), Selection::keys(["name"]))
            .unwrap();
        registry
            .listen(invoice(1), contact(2), Selection::keys(["name"]))
            .unwrap();
        registry
            .listen(invoice(2), contact(2), Selection::keys(["name"]))
            .unwrap();

        registry.forget(sub.id).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.forget_reference(&invoice(1)).unwrap(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.forget(sub.id).is_err());
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.bin");

        let id = {
            let registry = SubscriptionRegistry::open(&path).unwrap();
            let sub = registry
                .listen(
                    invoice(1),
                    contact(1),
                    Selection::formatter("card").except(["secret"]),
                )
                .unwrap();
            registry
                .record_snapshot(sub.id, snapshot(json!({"name": "Ann", "tags": ["a"]})))
                .unwrap();
            sub.id
        };

        let registry = SubscriptionRegistry::open(&path).unwrap();
        let sub = registry.get(id).unwrap();
        assert_eq!(sub.selection, Selection::formatter("card").except(["secret"]));
        assert_eq!(sub.cached.unwrap().snapshot["tags"], json!(["a"]));

        // Ids keep growing after a reload.
        let next = registry
            .listen(invoice(2), contact(1), Selection::keys(["name"]))
            .unwrap();
        assert!(next.id > id);
    }

    #[test]
    fn test_failed_write_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.bin");
        let registry = SubscriptionRegistry::open(&path).unwrap();
        let sub = registry
            .listen(invoice(1), contact(1), Selection::keys(["name"]))
            .unwrap();

        // A directory in the way of the staging file makes every write fail.
        fs::create_dir(path.with_extension("tmp")).unwrap();

        let result = registry.listen(invoice(2), contact(1), Selection::keys(["name"]));
        assert!(matches!(result, Err(SyncError::Io(_))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.subscriptions_for(&contact(1)).len(), 1);

        let result = registry.record_snapshot(sub.id, snapshot(json!({"name": "Ann"})));
        assert!(result.is_err());
        assert!(registry.get(sub.id).unwrap().cached.is_none());

        assert!(registry.forget(sub.id).is_err());
        assert_eq!(registry.len(), 1);

        fs::remove_dir(path.with_extension("tmp")).unwrap();
        let next = registry
            .listen(invoice(2), contact(1), Selection::keys(["name"]))
            .unwrap();
        assert_eq!(next.id, SubscriptionId(sub.id.0 + 1));
        drop(registry);

        let reopened = SubscriptionRegistry::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.bin");

        let _first = SubscriptionRegistry::open(&path).unwrap();
        let second = SubscriptionRegistry::open(&path);
        assert!(matches!(second, Err(SyncError::Locked)));
    }

    #[test]
    fn test_corrupt_file_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.bin");

        {
            let registry = SubscriptionRegistry::open(&path).unwrap();
            registry
                .listen(invoice(1), contact(1), Selection::keys(["name"]))
                .unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let result = SubscriptionRegistry::open(&path);
        assert!(matches!(result, Err(SyncError::ChecksumMismatch { .. })));
    }
}
