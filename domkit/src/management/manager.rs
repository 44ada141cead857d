//! Thread-safe domain manager implementation.

use std::collections::HashMap;
use std::sync::Arc;

use domkit_shared::errors::{DomainError, DomainResult};
use parking_lot::RwLock;

use crate::domain::{Domain, DomainId, DomainSnapshot};
use crate::hypervisor::DomHandle;

/// Thread-safe registry of live domains.
///
/// Shared by the runtime via `Clone` (inner `Arc`). Concurrent reads
/// (`get`, `list`) with exclusive writes (`register`, `remove`).
///
/// A domain torn down through [`Domain::destroy`] directly stays in the map
/// until the next [`list`](Self::list) or [`prune_terminated`](Self::prune_terminated).
/// Lookups never return terminated domains.
#[derive(Clone, Debug, Default)]
pub struct DomainManager {
    inner: Arc<RwLock<DomainManagerInner>>,
}

#[derive(Debug, Default)]
struct DomainManagerInner {
    domains: HashMap<DomainId, Arc<Domain>>,
}

impl DomainManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructed domain.
    ///
    /// # Errors
    ///
    /// Returns error if a domain with this id is already registered.
    pub fn register(&self, domain: Arc<Domain>) -> DomainResult<()> {
        let mut inner = self.inner.write();
        if inner.domains.contains_key(domain.id()) {
            return Err(DomainError::Internal(format!(
                "domain {} already registered",
                domain.id()
            )));
        }

        tracing::debug!(
            domain_id = %domain.id(),
            dom = ?domain.dom(),
            name = ?domain.name(),
            "Registering domain"
        );
        inner.domains.insert(domain.id().clone(), domain);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Domain>> {
        self.inner
            .read()
            .domains
            .get(id)
            .filter(|domain| !domain.is_terminated())
            .cloned()
    }

    /// Find a domain by name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Domain>> {
        self.inner
            .read()
            .domains
            .values()
            .find(|domain| !domain.is_terminated() && domain.name().as_deref() == Some(name))
            .cloned()
    }

    /// Find a domain by hypervisor handle.
    pub fn get_by_dom(&self, dom: DomHandle) -> Option<Arc<Domain>> {
        self.inner
            .read()
            .domains
            .values()
            .find(|domain| !domain.is_terminated() && domain.dom() == Some(dom))
            .cloned()
    }

    /// Snapshots of all live domains, newest first.
    pub fn list(&self) -> Vec<DomainSnapshot> {
        self.prune_terminated();
        let domains: Vec<Arc<Domain>> = self.inner.read().domains.values().cloned().collect();

        let mut snapshots: Vec<DomainSnapshot> = domains.iter().map(|d| d.snapshot()).collect();
        // ULIDs sort by creation time.
        snapshots.sort_by(|a, b| b.id.cmp(&a.id));
        snapshots
    }

    /// Remove a domain from the manager, returning it.
    pub fn remove(&self, id: &str) -> Option<Arc<Domain>> {
        let removed = self.inner.write().domains.remove(id);
        if removed.is_some() {
            tracing::debug!(domain_id = %id, "Removed domain");
        }
        removed
    }

    /// Drop terminated domains. Returns how many were removed.
    pub fn prune_terminated(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.domains.len();
        inner.domains.retain(|id, domain| {
            let live = !domain.is_terminated();
            if !live {
                tracing::debug!(domain_id = %id, "Pruned terminated domain");
            }
            live
        });
        before - inner.domains.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().domains.is_empty()
    }
}
