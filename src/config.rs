//! Engine configuration.

use crate::subscriptions::Subscription;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where subject-change propagation runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the caller's thread, returning the report.
    #[default]
    Inline,
    /// Handed to the task runner; the caller does not wait.
    Deferred,
}

/// Decides whether a subscription may write into a reference that lives in
/// a different tenant than its subject.
#[derive(Clone)]
pub struct CrossTenantPolicy(Arc<dyn Fn(&Subscription) -> bool + Send + Sync>);

impl CrossTenantPolicy {
    /// Never sync across tenants.
    pub fn deny() -> Self {
        Self::from_fn(|_: &Subscription| false)
    }

    /// Always sync across tenants.
    pub fn allow() -> Self {
        Self::from_fn(|_: &Subscription| true)
    }

    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn(&Subscription) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn permits(&self, subscription: &Subscription) -> bool {
        (*self.0)(subscription)
    }
}

impl Default for CrossTenantPolicy {
    fn default() -> Self {
        Self::deny()
    }
}

impl fmt::Debug for CrossTenantPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CrossTenantPolicy(..)")
    }
}

/// Sync engine configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Inline or deferred propagation.
    pub dispatch: DispatchMode,

    /// Cross-tenant syncing rule.
    pub cross_tenant: CrossTenantPolicy,

    /// Treat each synced reference as a changed subject in turn.
    /// Default: false
    pub cascade: bool,

    /// Deepest cascade hop followed when `cascade` is on.
    /// Default: 8
    pub max_cascade_depth: usize,

    /// Attempts the threaded runner makes per task before giving up.
    /// Default: 3
    pub max_task_attempts: u32,

    /// Bound of the threaded runner's queue.
    /// Default: 1024
    pub queue_capacity: usize,

    /// Registry file (None = in-memory registry).
    pub registry_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Inline,
            cross_tenant: CrossTenantPolicy::deny(),
            cascade: false,
            max_cascade_depth: 8,
            max_task_attempts: 3,
            queue_capacity: 1024,
            registry_path: None,
        }
    }
}
