//! Subscription registry.
//!
//! A subscription records that a *reference* record mirrors selected
//! attributes of a *subject* record under a role name. The registry keeps at
//! most one subscription per (reference, subject, role), lists a subject's
//! subscriptions in creation order, and caches the last snapshot computed for
//! each one.
//!
//! # Example
//!
//! ```ignore
//! let registry = SubscriptionRegistry::open("./subscriptions.bin")?;
//!
//! // The invoice mirrors the customer's name and phone under "customer".
//! registry.listen_as(invoice, customer, "customer", Selection::keys(["name", "phone"]))?;
//!
//! for sub in registry.subscriptions_for(&customer) {
//!     println!("{:?} listens to {:?}", sub.reference, sub.subject);
//! }
//! ```

mod registry;
mod types;

pub use registry::SubscriptionRegistry;
pub use types::{CachedSnapshot, Selection, Subscription, SubscriptionId};
