//! Subject-change propagation.
//!
//! When a subject record changes, [`SyncCoordinator::on_subject_changed`]
//! loads its subscriptions in creation order and, for each one, builds the
//! snapshot, merges it into the reference's attributes under the
//! subscription's role, saves the reference and records the snapshot.
//! Subscriptions succeed or fail independently; the [`SyncReport`] lists
//! every outcome.
//!
//! Propagation runs inline or through a [`TaskRunner`], which receives a
//! serialized [`SyncTask`] carrying the subject identity and the tenant that
//! was active when the change happened.

mod coordinator;
mod report;
mod task;

pub use coordinator::SyncCoordinator;
pub use report::{OutcomeStatus, SkipReason, SubscriptionOutcome, SyncPhase, SyncReport};
pub use task::{DeadLetter, InlineRunner, SyncTask, TaskHandler, TaskRunner, ThreadedRunner};
