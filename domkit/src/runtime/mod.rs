//! Public entry point: the domain runtime.

pub mod constants;
pub mod options;

use std::path::Path;
use std::sync::Arc;

use domkit_shared::Node;
use domkit_shared::errors::{DomainError, DomainResult};

use crate::domain::{Domain, DomainSnapshot, init};
use crate::handlers::Registries;
use crate::hypervisor::{DomHandle, DomainInfo, Platform};
use crate::management::DomainManager;
use options::RuntimeOptions;

/// Everything a domain needs from its runtime.
///
/// Read-only after construction; domains hold it instead of the runtime
/// itself so the runtime → domain ownership stays acyclic.
pub struct RuntimeContext {
    pub platform: Platform,
    pub registries: Arc<Registries>,
    pub options: RuntimeOptions,
}

/// Shared reference to the runtime context.
pub type SharedContext = Arc<RuntimeContext>;

/// Creates, restores and tracks domains.
///
/// # Example
///
/// ```ignore
/// let runtime = DomainRuntime::new(platform, Registries::with_builtins(), RuntimeOptions::default());
/// let domain = runtime.create(config).await?;
/// runtime.destroy(domain.id().as_str()).await?;
/// ```
pub struct DomainRuntime {
    ctx: SharedContext,
    manager: DomainManager,
}

impl DomainRuntime {
    pub fn new(platform: Platform, registries: Registries, options: RuntimeOptions) -> Self {
        tracing::debug!(
            images = ?registries.images.names(),
            devices = ?registries.devices.names(),
            fields = ?registries.fields.names(),
            "Initialized domain runtime"
        );
        Self {
            ctx: Arc::new(RuntimeContext {
                platform,
                registries: Arc::new(registries),
                options,
            }),
            manager: DomainManager::new(),
        }
    }

    /// Runtime with the built-in handlers and default options.
    pub fn with_defaults(platform: Platform) -> Self {
        Self::new(platform, Registries::with_builtins(), RuntimeOptions::default())
    }

    pub fn registries(&self) -> &Registries {
        &self.ctx.registries
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.ctx.options
    }

    pub fn platform(&self) -> &Platform {
        &self.ctx.platform
    }

    pub fn manager(&self) -> &DomainManager {
        &self.manager
    }

    // ========================================================================
    // ENTRY POINTS
    // ========================================================================

    /// Create a domain from a configuration tree.
    ///
    /// On failure the partially built domain is destroyed and never registered.
    pub async fn create(&self, config: Node) -> DomainResult<Arc<Domain>> {
        let domain = init::create(Arc::clone(&self.ctx), config).await?;
        self.manager.register(Arc::clone(&domain))?;
        Ok(domain)
    }

    /// Attach to a domain that survived a restart of the control plane.
    pub async fn recreate(&self, saved: &Node, info: &DomainInfo) -> DomainResult<Arc<Domain>> {
        let domain = init::recreate(Arc::clone(&self.ctx), saved, info).await?;
        self.manager.register(Arc::clone(&domain))?;
        Ok(domain)
    }

    /// Restore a domain from a saved image.
    pub async fn restore(&self, source: &Path, progress: bool) -> DomainResult<Arc<Domain>> {
        let domain = init::restore(Arc::clone(&self.ctx), source, progress).await?;
        self.manager.register(Arc::clone(&domain))?;
        Ok(domain)
    }

    // ========================================================================
    // LOOKUP AND TEARDOWN
    // ========================================================================

    pub fn get(&self, id: &str) -> Option<Arc<Domain>> {
        self.manager.get(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Domain>> {
        self.manager.get_by_name(name)
    }

    pub fn get_by_dom(&self, dom: DomHandle) -> Option<Arc<Domain>> {
        self.manager.get_by_dom(dom)
    }

    /// Snapshots of all live domains, newest first.
    pub fn list(&self) -> Vec<DomainSnapshot> {
        self.manager.list()
    }

    /// Destroy a domain and stop tracking it.
    pub async fn destroy(&self, id: &str) -> DomainResult<()> {
        let domain = self
            .manager
            .get(id)
            .ok_or_else(|| DomainError::InvalidState(format!("domain {} not found", id)))?;

        let result = domain.destroy().await;
        self.manager.remove(id);
        result
    }
}
