//! Main engine struct tying all components together.

use crate::config::{DispatchMode, SyncConfig};
use crate::error::{Result, SyncError};
use crate::props::PropsAdapter;
use crate::snapshot::{FormatterRegistry, SnapshotBuilder};
use crate::store::Store;
use crate::subscriptions::{Selection, Subscription, SubscriptionRegistry};
use crate::sync::{DeadLetter, SyncCoordinator, SyncReport, SyncTask, TaskHandler, TaskRunner, ThreadedRunner};
use crate::tenant::{TenantContext, TenantStack};
use crate::types::{Record, RecordRef, RecordType};
use crate::versions::VersionSelector;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds the task runner used in [`DispatchMode::Deferred`] from the handler
/// that runs one task.
pub type RunnerFactory = Box<dyn FnOnce(TaskHandler) -> Result<Box<dyn TaskRunner>> + Send>;

/// Result of [`SyncEngine::save`].
#[derive(Debug)]
pub struct SaveOutcome {
    /// The stored row.
    pub record: Record,
    /// Propagation report; `None` when propagation was deferred.
    pub sync: Option<SyncReport>,
}

/// The sync engine.
///
/// Provides a unified interface for:
/// - Registering subscriptions
/// - Saving records, versioned types included
/// - Propagating subject changes inline or through a task runner
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn Store>,
    registry: Arc<SubscriptionRegistry>,
    builder: SnapshotBuilder,
    tenants: Arc<dyn TenantContext>,
    coordinator: Arc<SyncCoordinator>,
    /// Present only in deferred mode.
    runner: Option<Box<dyn TaskRunner>>,
    selectors: RwLock<HashMap<RecordType, VersionSelector>>,
}

impl SyncEngine {
    /// Engine over `store` with default collaborators.
    pub fn open(store: Arc<dyn Store>, config: SyncConfig) -> Result<Self> {
        Self::builder(store).config(config).build()
    }

    pub fn builder(store: Arc<dyn Store>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            store,
            config: SyncConfig::default(),
            registry: None,
            formatters: None,
            tenants: None,
            adapters: Vec::new(),
            runner: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn formatters(&self) -> &Arc<FormatterRegistry> {
        self.builder.formatters()
    }

    pub fn tenants(&self) -> &Arc<dyn TenantContext> {
        &self.tenants
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    // --- Subscriptions ---

    /// Make `reference` listen to `subject` under the subject's type name.
    pub fn listen(
        &self,
        reference: RecordRef,
        subject: RecordRef,
        selection: Selection,
    ) -> Result<Subscription> {
        self.builder.validate(&selection)?;
        self.registry.listen(reference, subject, selection)
    }

    /// Make `reference` listen to `subject` under `role`.
    pub fn listen_as(
        &self,
        reference: RecordRef,
        subject: RecordRef,
        role: impl Into<String>,
        selection: Selection,
    ) -> Result<Subscription> {
        self.builder.validate(&selection)?;
        self.registry.listen_as(reference, subject, role, selection)
    }

    // --- Versioned types ---

    /// Route saves of the selector's type through it. Replaces any selector
    /// registered for the same type.
    pub fn register_versioned(&self, selector: VersionSelector) {
        debug!(kind = %selector.kind(), field = selector.marker().field(), "versioned type registered");
        self.selectors
            .write()
            .insert(selector.kind().clone(), selector);
    }

    pub fn selector(&self, kind: &RecordType) -> Option<VersionSelector> {
        self.selectors.read().get(kind).cloned()
    }

    // --- Records ---

    /// Persist `record`, then propagate the change to its listeners.
    ///
    /// A new record of a versioned type becomes the current member of its
    /// group. Sync failures do not fail the save; they are in the report.
    pub fn save(&self, record: Record) -> Result<SaveOutcome> {
        let saved = match self.selector(&record.kind) {
            Some(selector) => selector.save(&*self.store, record)?,
            None => self.store.save(record)?,
        };
        self.after_write(saved)
    }

    /// Make `record` the current member of its version group, then propagate.
    pub fn set_current(&self, record: Record) -> Result<SaveOutcome> {
        let selector = self.selector(&record.kind).ok_or_else(|| {
            SyncError::Configuration(format!("{} is not a versioned type", record.kind))
        })?;
        let saved = selector.set_current(&*self.store, record)?;
        self.after_write(saved)
    }

    /// Delete a record and the subscriptions it holds as a reference.
    pub fn delete(&self, reference: &RecordRef) -> Result<()> {
        self.store.delete(reference)?;
        let forgotten = self.registry.forget_reference(reference)?;
        debug!(%reference, forgotten, "record deleted");
        Ok(())
    }

    /// Propagate a change of `subject`.
    ///
    /// Inline dispatch runs every subscription before returning the report.
    /// Deferred dispatch enqueues a task carrying the current tenant and
    /// returns `None`.
    pub fn notify_changed(&self, subject: &RecordRef) -> Result<Option<SyncReport>> {
        match &self.runner {
            None => Ok(Some(self.coordinator.on_subject_changed(subject))),
            Some(runner) => {
                runner.enqueue(SyncTask::new(subject.clone(), self.tenants.current()))?;
                debug!(%subject, "sync deferred");
                Ok(None)
            }
        }
    }

    /// Tasks the runner gave up on.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.runner
            .as_ref()
            .map(|runner| runner.dead_letters())
            .unwrap_or_default()
    }

    /// Finish queued propagation and stop the runner.
    pub fn shutdown(&self) -> Result<()> {
        match &self.runner {
            Some(runner) => runner.shutdown(),
            None => Ok(()),
        }
    }

    fn after_write(&self, saved: Record) -> Result<SaveOutcome> {
        let subject = saved.reference().ok_or_else(|| {
            SyncError::Persistence(format!("store returned a {} row without an id", saved.kind))
        })?;
        let sync = self.notify_changed(&subject)?;
        Ok(SaveOutcome {
            record: saved,
            sync,
        })
    }
}

/// Step-by-step construction of a [`SyncEngine`].
pub struct SyncEngineBuilder {
    store: Arc<dyn Store>,
    config: SyncConfig,
    registry: Option<Arc<SubscriptionRegistry>>,
    formatters: Option<Arc<FormatterRegistry>>,
    tenants: Option<Arc<dyn TenantContext>>,
    adapters: Vec<(RecordType, Arc<dyn PropsAdapter>)>,
    runner: Option<RunnerFactory>,
}

impl SyncEngineBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing registry instead of the one `registry_path` names.
    pub fn registry(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn formatters(mut self, formatters: Arc<FormatterRegistry>) -> Self {
        self.formatters = Some(formatters);
        self
    }

    pub fn tenants(mut self, tenants: Arc<dyn TenantContext>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    /// Merge snapshots into records of `kind` through `adapter`.
    pub fn adapter(mut self, kind: impl Into<RecordType>, adapter: Arc<dyn PropsAdapter>) -> Self {
        self.adapters.push((kind.into(), adapter));
        self
    }

    /// Runner for deferred dispatch. Defaults to a [`ThreadedRunner`].
    pub fn runner<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(TaskHandler) -> Result<Box<dyn TaskRunner>> + Send + 'static,
    {
        self.runner = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let config = self.config;

        let registry = match (self.registry, &config.registry_path) {
            (Some(registry), _) => registry,
            (None, Some(path)) => Arc::new(SubscriptionRegistry::open(path)?),
            (None, None) => Arc::new(SubscriptionRegistry::in_memory()),
        };
        let formatters = self.formatters.unwrap_or_default();
        let tenants = self
            .tenants
            .unwrap_or_else(|| Arc::new(TenantStack::new()) as Arc<dyn TenantContext>);
        let builder = SnapshotBuilder::new(formatters);

        let coordinator = self.adapters.into_iter().fold(
            SyncCoordinator::new(
                Arc::clone(&self.store),
                Arc::clone(&registry),
                builder.clone(),
                Arc::clone(&tenants),
                config.clone(),
            ),
            |coordinator, (kind, adapter)| coordinator.with_adapter(kind, adapter),
        );
        let coordinator = Arc::new(coordinator);

        let runner = match config.dispatch {
            DispatchMode::Inline => None,
            DispatchMode::Deferred => {
                let handler = task_handler(&coordinator);
                Some(match self.runner {
                    Some(factory) => factory(handler)?,
                    None => Box::new(ThreadedRunner::start(
                        handler,
                        config.queue_capacity,
                        config.max_task_attempts,
                    )?) as Box<dyn TaskRunner>,
                })
            }
        };

        info!(
            dispatch = ?config.dispatch,
            persistent = registry.is_persistent(),
            subscriptions = registry.len(),
            "sync engine ready"
        );

        Ok(SyncEngine {
            config,
            store: self.store,
            registry,
            builder,
            tenants,
            coordinator,
            runner,
            selectors: RwLock::new(HashMap::new()),
        })
    }
}

/// Handler that runs one deferred task through `coordinator`.
fn task_handler(coordinator: &Arc<SyncCoordinator>) -> TaskHandler {
    let coordinator = Arc::clone(coordinator);
    Arc::new(move |task: &SyncTask| -> Result<()> {
        coordinator.run_task(task).map(|_| ())
    })
}
