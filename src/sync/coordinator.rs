//! Sync coordinator.

use super::report::{OutcomeStatus, SkipReason, SubscriptionOutcome, SyncPhase, SyncReport};
use super::task::SyncTask;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::props::{ColumnProps, PropsAdapter};
use crate::snapshot::{SnapshotBuilder, SnapshotDigest};
use crate::store::Store;
use crate::subscriptions::{Subscription, SubscriptionRegistry};
use crate::tenant::{TenantContext, TenantGuard};
use crate::types::{Record, RecordRef, RecordType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// Propagates subject changes to the references listening to them.
pub struct SyncCoordinator {
    store: Arc<dyn Store>,
    registry: Arc<SubscriptionRegistry>,
    builder: SnapshotBuilder,
    tenants: Arc<dyn TenantContext>,
    adapters: HashMap<RecordType, Arc<dyn PropsAdapter>>,
    default_adapter: Arc<dyn PropsAdapter>,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SubscriptionRegistry>,
        builder: SnapshotBuilder,
        tenants: Arc<dyn TenantContext>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            registry,
            builder,
            tenants,
            adapters: HashMap::new(),
            default_adapter: Arc::new(ColumnProps),
            config,
        }
    }

    /// Use `adapter` to merge snapshots into references of `kind`.
    pub fn with_adapter(mut self, kind: impl Into<RecordType>, adapter: Arc<dyn PropsAdapter>) -> Self {
        self.adapters.insert(kind.into(), adapter);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Apply every subscription of `subject` once, in creation order.
    ///
    /// The caller must already be in the subject's tenant context. Failures
    /// are isolated per subscription and returned in the report.
    pub fn on_subject_changed(&self, subject: &RecordRef) -> SyncReport {
        let span = info_span!("sync_subject", kind = %subject.kind, id = %subject.id);
        let _enter = span.enter();

        let mut report = SyncReport::new(subject.clone());
        let mut visited = HashSet::new();
        visited.insert(subject.clone());

        report.phase = SyncPhase::Dispatched;
        self.propagate(subject, 0, &mut visited, &mut report);
        report.phase = SyncPhase::Complete;

        info!(
            applied = report.applied().count(),
            failed = report.failed().count(),
            skipped = report.skipped().count(),
            "subject change propagated"
        );
        report
    }

    /// Handle a deferred task: re-enter the tenant captured at enqueue time,
    /// then propagate.
    ///
    /// Errors when the run left failures worth another attempt, so the task
    /// runner can apply its retry policy.
    pub fn run_task(&self, task: &SyncTask) -> Result<SyncReport> {
        let _guard = TenantGuard::switch_to(&*self.tenants, task.tenant.as_ref())?;
        let report = self.on_subject_changed(&task.subject);

        if report.has_retryable_failures() {
            return Err(SyncError::Dispatch(format!(
                "{} of {} subscriptions of {} failed",
                report.failed().count(),
                report.outcomes.len(),
                task.subject
            )));
        }
        Ok(report)
    }

    fn propagate(
        &self,
        subject: &RecordRef,
        depth: usize,
        visited: &mut HashSet<RecordRef>,
        report: &mut SyncReport,
    ) {
        let subscriptions = self.registry.subscriptions_for(subject);
        if subscriptions.is_empty() {
            return;
        }
        debug!(%subject, depth, count = subscriptions.len(), "subscriptions loaded");

        let loaded = self.store.load(subject);

        for sub in subscriptions {
            let status = match self.skip_reason(&sub) {
                Some(reason) => {
                    debug!(id = ?sub.id, reference = %sub.reference, ?reason, "subscription skipped");
                    OutcomeStatus::Skipped(reason)
                }
                None => match &loaded {
                    Ok(subject_record) => match self.apply(&sub, subject_record) {
                        Ok(digest) => OutcomeStatus::Applied { digest },
                        Err(e) => {
                            warn!(id = ?sub.id, reference = %sub.reference, error = %e, "subscription sync failed");
                            OutcomeStatus::Failed(e)
                        }
                    },
                    Err(e) => {
                        warn!(id = ?sub.id, error = %e, "subject could not be loaded");
                        OutcomeStatus::Failed(subject_load_error(subject, e))
                    }
                },
            };

            let applied = matches!(status, OutcomeStatus::Applied { .. });
            let reference = sub.reference.clone();
            report.outcomes.push(SubscriptionOutcome {
                subscription: sub.id,
                reference: sub.reference,
                depth,
                status,
            });

            // Each record fans out at most once per event.
            if applied
                && self.config.cascade
                && depth < self.config.max_cascade_depth
                && visited.insert(reference.clone())
            {
                self.propagate(&reference, depth + 1, visited, report);
            }
        }
    }

    fn skip_reason(&self, sub: &Subscription) -> Option<SkipReason> {
        if sub.reference.tenant != sub.subject.tenant && !self.config.cross_tenant.permits(sub) {
            return Some(SkipReason::CrossTenant);
        }
        None
    }

    /// Sync one subscription. The snapshot is complete before the reference
    /// is touched, so a failure leaves the previous snapshot in place.
    ///
    /// Once the reference is saved the subscription counts as applied: a
    /// failure to cache the snapshot afterwards is only logged, and the next
    /// sync recomputes it.
    fn apply(&self, sub: &Subscription, subject: &Record) -> Result<SnapshotDigest> {
        let _guard = TenantGuard::switch_to(&*self.tenants, sub.reference.tenant.as_ref())?;

        let snapshot = self.builder.build(subject, &sub.selection)?;
        let digest = SnapshotDigest::of(&snapshot)?;

        let mut reference = self.store.load(&sub.reference)?;
        self.adapter_for(&reference.kind)
            .merge(&mut reference, &sub.role, &snapshot);
        self.store.save(reference)?;

        match self.registry.record_snapshot(sub.id, snapshot) {
            Ok(_) => debug!(id = ?sub.id, reference = %sub.reference, %digest, "snapshot applied"),
            Err(e) => warn!(
                id = ?sub.id,
                reference = %sub.reference,
                error = %e,
                "snapshot applied but not cached"
            ),
        }
        Ok(digest)
    }

    fn adapter_for(&self, kind: &RecordType) -> &dyn PropsAdapter {
        self.adapters
            .get(kind)
            .unwrap_or(&self.default_adapter)
            .as_ref()
    }
}

/// Per-subscription copy of a subject load failure.
fn subject_load_error(subject: &RecordRef, e: &SyncError) -> SyncError {
    match e {
        SyncError::NotFound(_) => SyncError::NotFound(subject.clone()),
        SyncError::Concurrency(msg) => SyncError::Concurrency(msg.clone()),
        other => SyncError::Persistence(other.to_string()),
    }
}
