//! Tenant (storage connection) context.
//!
//! The engine never switches tenants through ambient state. A
//! [`TenantContext`] is handed to it explicitly and every switch goes
//! through a [`TenantGuard`], which leaves the context again when dropped,
//! on error paths included.

use crate::error::{Result, SyncError};
use crate::types::TenantId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Enter/exit access to tenant contexts. Contexts nest.
///
/// `None` names the default connection.
pub trait TenantContext: Send + Sync {
    fn current(&self) -> Option<TenantId>;
    fn enter(&self, tenant: Option<&TenantId>) -> Result<()>;
    fn exit(&self) -> Result<()>;
}

/// Nestable context tracker. Each thread has its own stack, so a worker
/// thread switching tenants does not affect callers.
#[derive(Debug, Default)]
pub struct TenantStack {
    stacks: Mutex<HashMap<ThreadId, Vec<Option<TenantId>>>>,
}

impl TenantStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of contexts the calling thread has entered.
    pub fn depth(&self) -> usize {
        self.stacks
            .lock()
            .get(&thread::current().id())
            .map_or(0, Vec::len)
    }
}

impl TenantContext for TenantStack {
    fn current(&self) -> Option<TenantId> {
        self.stacks
            .lock()
            .get(&thread::current().id())
            .and_then(|stack| stack.last().cloned())
            .flatten()
    }

    fn enter(&self, tenant: Option<&TenantId>) -> Result<()> {
        self.stacks
            .lock()
            .entry(thread::current().id())
            .or_default()
            .push(tenant.cloned());
        Ok(())
    }

    fn exit(&self) -> Result<()> {
        let id = thread::current().id();
        let mut stacks = self.stacks.lock();
        let stack = stacks
            .get_mut(&id)
            .ok_or_else(|| SyncError::Configuration("tenant exit without matching enter".into()))?;
        stack.pop();
        if stack.is_empty() {
            stacks.remove(&id);
        }
        Ok(())
    }
}

/// Scoped tenant switch. Exits on drop if it entered.
#[must_use = "the tenant context is left as soon as the guard is dropped"]
pub struct TenantGuard<'a> {
    context: &'a dyn TenantContext,
    entered: Option<Option<TenantId>>,
}

impl<'a> TenantGuard<'a> {
    /// Enter `target` unless it is already the current context.
    pub fn switch_to(context: &'a dyn TenantContext, target: Option<&TenantId>) -> Result<Self> {
        if context.current().as_ref() == target {
            return Ok(Self {
                context,
                entered: None,
            });
        }

        context.enter(target)?;
        debug!(tenant = ?target, "entered tenant context");
        Ok(Self {
            context,
            entered: Some(target.cloned()),
        })
    }

    /// Whether this guard switched context.
    pub fn switched(&self) -> bool {
        self.entered.is_some()
    }
}

impl Drop for TenantGuard<'_> {
    fn drop(&mut self) {
        if let Some(tenant) = self.entered.take() {
            match self.context.exit() {
                Ok(()) => debug!(?tenant, "left tenant context"),
                Err(e) => warn!(?tenant, error = %e, "failed to leave tenant context"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_enters_and_exits() {
        let stack = TenantStack::new();
        let acme = TenantId::new("acme");

        {
            let guard = TenantGuard::switch_to(&stack, Some(&acme)).unwrap();
            assert!(guard.switched());
            assert_eq!(stack.current(), Some(acme.clone()));
        }

        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.current(), None);
    }

    #[test]
    fn test_guard_skips_same_context() {
        let stack = TenantStack::new();
        let acme = TenantId::new("acme");
        stack.enter(Some(&acme)).unwrap();

        {
            let guard = TenantGuard::switch_to(&stack, Some(&acme)).unwrap();
            assert!(!guard.switched());
        }

        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_nested_contexts() {
        let stack = TenantStack::new();
        let acme = TenantId::new("acme");
        let globex = TenantId::new("globex");

        let outer = TenantGuard::switch_to(&stack, Some(&acme)).unwrap();
        {
            let _inner = TenantGuard::switch_to(&stack, Some(&globex)).unwrap();
            assert_eq!(stack.current(), Some(globex.clone()));
            let _back = TenantGuard::switch_to(&stack, None).unwrap();
            assert_eq!(stack.current(), None);
        }
        assert_eq!(stack.current(), Some(acme));
        drop(outer);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_unbalanced_exit() {
        let stack = TenantStack::new();
        assert!(stack.exit().is_err());
    }

    #[test]
    fn test_threads_have_separate_stacks() {
        let stack = std::sync::Arc::new(TenantStack::new());
        let acme = TenantId::new("acme");
        stack.enter(Some(&acme)).unwrap();

        let other = std::sync::Arc::clone(&stack);
        let seen = std::thread::spawn(move || {
            let before = other.current();
            other.enter(Some(&TenantId::new("globex"))).unwrap();
            other.exit().unwrap();
            before
        })
        .join()
        .unwrap();

        assert_eq!(seen, None);
        assert_eq!(stack.current(), Some(acme));
        assert_eq!(stack.depth(), 1);
    }
}
