//! Outcome reporting for one subject-change event.

use crate::error::{ErrorKind, SyncError};
use crate::snapshot::SnapshotDigest;
use crate::subscriptions::SubscriptionId;
use crate::types::RecordRef;

/// Lifecycle of one subject-change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    /// Created, subscriptions not loaded yet.
    Pending,
    /// Subscriptions loaded and being applied.
    Dispatched,
    /// Every loaded subscription was attempted once.
    Complete,
}

/// Why a subscription was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Reference lives in another tenant and the policy forbids crossing.
    CrossTenant,
}

#[derive(Debug)]
pub enum OutcomeStatus {
    Applied { digest: SnapshotDigest },
    Skipped(SkipReason),
    Failed(SyncError),
}

/// Result of applying one subscription.
#[derive(Debug)]
pub struct SubscriptionOutcome {
    pub subscription: SubscriptionId,
    pub reference: RecordRef,
    /// 0 for direct subscriptions of the changed subject, n for the n-th cascade hop.
    pub depth: usize,
    pub status: OutcomeStatus,
}

impl SubscriptionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, OutcomeStatus::Applied { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.status {
            OutcomeStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Every outcome of one subject-change event, in processing order.
#[derive(Debug)]
pub struct SyncReport {
    pub subject: RecordRef,
    pub phase: SyncPhase,
    pub outcomes: Vec<SubscriptionOutcome>,
}

impl SyncReport {
    pub fn new(subject: RecordRef) -> Self {
        Self {
            subject,
            phase: SyncPhase::Pending,
            outcomes: Vec::new(),
        }
    }

    pub fn applied(&self) -> impl Iterator<Item = &SubscriptionOutcome> {
        self.outcomes.iter().filter(|o| o.is_applied())
    }

    pub fn failed(&self) -> impl Iterator<Item = &SubscriptionOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SubscriptionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Skipped(_)))
    }

    /// No subscription failed.
    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Some failure may succeed on another attempt (store rejection or conflict).
    pub fn has_retryable_failures(&self) -> bool {
        self.failed().any(|o| {
            matches!(
                o.error().map(SyncError::kind),
                Some(ErrorKind::Persistence) | Some(ErrorKind::Concurrency)
            )
        })
    }
}
