//! # Property Sync
//!
//! Keeps denormalized attribute snapshots on dependent records in step with
//! the records they mirror, and keeps exactly one current member per group
//! of versioned records.
//!
//! ## Core Concepts
//!
//! - **Subscriptions**: a reference record listens to a subject record under a role
//! - **Snapshots**: selected subject attributes, merged into the reference's attribute bag
//! - **Propagation**: inline or deferred to a task runner, tenant-aware
//! - **Versions**: clear-then-set of a current marker inside one transaction
//!
//! ## Example
//!
//! ```ignore
//! use propsync::{MemoryStore, Record, Selection, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! let engine = SyncEngine::open(Arc::new(MemoryStore::new()), SyncConfig::default())?;
//!
//! let customer = engine.save(Record::new("contact").with_prop("name", "Ann"))?.record;
//! let invoice = engine.save(Record::new("invoice"))?.record;
//!
//! // The invoice keeps a copy of the customer's name under "customer".
//! engine.listen_as(
//!     invoice.reference().unwrap(),
//!     customer.reference().unwrap(),
//!     "customer",
//!     Selection::keys(["name"]),
//! )?;
//!
//! // Saving the customer pushes the new name onto the invoice.
//! let report = engine.save(customer)?.sync;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod props;
pub mod snapshot;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod tenant;
pub mod types;
pub mod versions;

// Re-exports
pub use config::{CrossTenantPolicy, DispatchMode, SyncConfig};
pub use engine::{RunnerFactory, SaveOutcome, SyncEngine, SyncEngineBuilder};
pub use error::{ErrorKind, Result, SyncError};
pub use props::{AttributeBag, ColumnProps, PropsAdapter};
pub use snapshot::{AttributeFormatter, FormatterRegistry, Snapshot, SnapshotBuilder, SnapshotDigest};
pub use store::{Clause, Filter, MemoryStore, Store, StoreTxn, TableKey, Validator};
pub use subscriptions::{CachedSnapshot, Selection, Subscription, SubscriptionId, SubscriptionRegistry};
pub use sync::{
    DeadLetter, InlineRunner, OutcomeStatus, SkipReason, SubscriptionOutcome, SyncCoordinator,
    SyncPhase, SyncReport, SyncTask, TaskHandler, TaskRunner, ThreadedRunner,
};
pub use tenant::{TenantContext, TenantGuard, TenantStack};
pub use types::*;
pub use versions::{CurrentMarker, VersionSelector};
