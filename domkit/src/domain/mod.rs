//! Domain entity - the stateful record of one virtual machine.
//!
//! A [`Domain`] is created by one of the runtime entry points (create,
//! recreate, restore), driven through the construction pipeline in
//! [`init`], and torn down by [`Domain::destroy`].
//!
//! Mutable fields live behind a `parking_lot::RwLock` that is never held
//! across an `.await`. Runtime device add/remove and destroy are serialized
//! by an async mutex.

mod boot;
pub mod devices;
mod hotplug;
mod info;
pub(crate) mod init;
mod lifecycle;
pub mod state;

pub use boot::BootImage;
pub use devices::{Device, DeviceTable};
pub use info::DomainSnapshot;
pub use state::{DomainStatus, RestartMode, ShutdownReason, shutdown_reason};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use domkit_shared::Node;
use domkit_shared::constants::tags;
use domkit_shared::errors::{DomainError, DomainResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::hypervisor::{ConsoleInfo, DeviceHandle, DomHandle, DomainInfo, Platform};
use crate::runtime::SharedContext;
use crate::runtime::options::RuntimeOptions;

// ============================================================================
// DOMAIN ID
// ============================================================================

/// Stable identifier of a domain entity (ULID).
///
/// Assigned when the entity is created, before the hypervisor hands out a
/// [`DomHandle`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    /// Length of a full id (26 chars = ULID format).
    pub const FULL_LENGTH: usize = 26;

    /// Length of the short id used in logs.
    pub const SHORT_LENGTH: usize = 8;

    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Parse an id, `None` unless it is a valid ULID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == Self::FULL_LENGTH && ulid::Ulid::from_string(s).is_ok() {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..Self::SHORT_LENGTH]
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainId({})", self.short())
    }
}

impl AsRef<str> for DomainId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for DomainId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// DOMAIN
// ============================================================================

/// Mutable state of a domain.
#[derive(Debug)]
pub(crate) struct DomainInner {
    pub(crate) dom: Option<DomHandle>,
    pub(crate) name: Option<String>,
    pub(crate) memory_mib: u64,
    pub(crate) cpu: i32,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) restart_mode: RestartMode,
    pub(crate) console_port: Option<u16>,
    pub(crate) console: Option<ConsoleInfo>,
    pub(crate) blkif_backend: bool,
    pub(crate) netif_backend: bool,
    pub(crate) status: DomainStatus,
    pub(crate) devices: DeviceTable,
    pub(crate) config: Option<Node>,
    pub(crate) image: Option<BootImage>,
    pub(crate) info: Option<DomainInfo>,
    pub(crate) ipaddrs: Vec<String>,
    pub(crate) configs: Vec<Node>,
}

impl DomainInner {
    fn new() -> Self {
        Self {
            dom: None,
            name: None,
            memory_mib: 0,
            cpu: crate::runtime::constants::defaults::ANY_CPU,
            start_time: None,
            restart_mode: RestartMode::default(),
            console_port: None,
            console: None,
            blkif_backend: false,
            netif_backend: false,
            status: DomainStatus::Active,
            devices: DeviceTable::new(),
            config: None,
            image: None,
            info: None,
            ipaddrs: Vec::new(),
            configs: Vec::new(),
        }
    }
}

/// One virtual machine.
///
/// Shared as `Arc<Domain>` between the runtime, the construction pipeline
/// and the sub-operations it spawns.
pub struct Domain {
    id: DomainId,
    recreate: bool,
    ctx: SharedContext,
    pub(crate) inner: RwLock<DomainInner>,
    /// Set once the hypervisor destroy call has been issued.
    pub(crate) domain_destroyed: AtomicBool,
    /// Serializes runtime device operations and destroy.
    pub(crate) op_lock: tokio::sync::Mutex<()>,
}

impl Domain {
    /// Create an Active entity with no hypervisor handle yet.
    ///
    /// `recreate` marks an entity attached to a domain that already exists
    /// in the hypervisor: memory allocation and image build are skipped.
    pub fn new(ctx: SharedContext, recreate: bool) -> Self {
        Self::with_id(DomainId::new(), ctx, recreate)
    }

    /// Create an Active entity under an existing id.
    pub fn with_id(id: DomainId, ctx: SharedContext, recreate: bool) -> Self {
        Self {
            id,
            recreate,
            ctx,
            inner: RwLock::new(DomainInner::new()),
            domain_destroyed: AtomicBool::new(false),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn id(&self) -> &DomainId {
        &self.id
    }

    pub fn is_recreate(&self) -> bool {
        self.recreate
    }

    /// Collaborators this domain talks to.
    pub fn platform(&self) -> &Platform {
        &self.ctx.platform
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.ctx.options
    }

    pub(crate) fn context(&self) -> &SharedContext {
        &self.ctx
    }

    /// Hypervisor handle, once assigned.
    pub fn dom(&self) -> Option<DomHandle> {
        self.inner.read().dom
    }

    /// Hypervisor handle, or `InvalidState` if none was assigned yet.
    pub fn require_dom(&self) -> DomainResult<DomHandle> {
        self.dom().ok_or_else(|| {
            DomainError::InvalidState(format!("domain {} has no hypervisor handle", self.id))
        })
    }

    pub fn name(&self) -> Option<String> {
        self.inner.read().name.clone()
    }

    pub fn memory_mib(&self) -> u64 {
        self.inner.read().memory_mib
    }

    /// CPU affinity; -1 means any CPU.
    pub fn cpu(&self) -> i32 {
        self.inner.read().cpu
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.inner.read().start_time
    }

    pub fn restart_mode(&self) -> RestartMode {
        self.inner.read().restart_mode
    }

    /// Requested console port.
    pub fn console_port(&self) -> Option<u16> {
        self.inner.read().console_port
    }

    /// Console allocated during image build.
    pub fn console(&self) -> Option<ConsoleInfo> {
        self.inner.read().console.clone()
    }

    /// Whether this domain hosts the block backend.
    pub fn is_blkif_backend(&self) -> bool {
        self.inner.read().blkif_backend
    }

    /// Whether this domain hosts the network backend.
    pub fn is_netif_backend(&self) -> bool {
        self.inner.read().netif_backend
    }

    pub fn status(&self) -> DomainStatus {
        self.inner.read().status
    }

    pub fn is_terminated(&self) -> bool {
        self.status().is_terminated()
    }

    /// Retained configuration tree.
    pub fn config(&self) -> Option<Node> {
        self.inner.read().config.clone()
    }

    pub fn boot_image(&self) -> Option<BootImage> {
        self.inner.read().image.clone()
    }

    /// Last record pulled from the control plane.
    pub fn info(&self) -> Option<DomainInfo> {
        self.inner.read().info.clone()
    }

    /// Addresses collected by the `vfr` field.
    pub fn ipaddrs(&self) -> Vec<String> {
        self.inner.read().ipaddrs.clone()
    }

    /// Extra configuration records added by field handlers.
    pub fn configs(&self) -> Vec<Node> {
        self.inner.read().configs.clone()
    }

    /// Fail with `InvalidState` once the domain is terminated.
    pub fn ensure_active(&self) -> DomainResult<()> {
        let status = self.status();
        if status.is_terminated() {
            return Err(DomainError::InvalidState(format!(
                "domain {} is {}",
                self.id, status
            )));
        }
        Ok(())
    }

    // ========================================================================
    // MUTATORS
    // ========================================================================

    /// Assign the hypervisor handle. Allowed once.
    pub(crate) fn set_dom(&self, dom: DomHandle) -> DomainResult<()> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.dom {
            return Err(DomainError::Internal(format!(
                "domain {} already has handle {}, refusing {}",
                self.id, existing, dom
            )));
        }
        inner.dom = Some(dom);
        Ok(())
    }

    /// Record extra configuration data.
    pub fn add_config(&self, config: Node) {
        self.inner.write().configs.push(config);
    }

    /// Replace the addresses announced after restore.
    pub fn set_ipaddrs(&self, ipaddrs: Vec<String>) {
        self.inner.write().ipaddrs = ipaddrs;
    }

    /// Whether the restart policy asks for a restart after `reason`.
    pub fn restart_needed(&self, reason: ShutdownReason) -> bool {
        self.restart_mode().restart_needed(reason)
    }

    /// Pull the live record from the control plane and adopt its memory size.
    pub fn refresh(&self) -> DomainResult<Option<DomainInfo>> {
        let dom = self.require_dom()?;
        let info = self.platform().control.domain_get_info(dom)?;
        if let Some(ref info) = info {
            let mut inner = self.inner.write();
            inner.memory_mib = info.mem_kb / 1024;
            inner.info = Some(info.clone());
        }
        Ok(info)
    }

    // ========================================================================
    // DEVICE TABLE
    // ========================================================================

    /// Append a device to the table; returns its index.
    ///
    /// Refused once the domain is terminated: the handle is destroyed and
    /// `InvalidState` returned.
    pub async fn add_device(
        &self,
        kind: &str,
        handle: Arc<dyn DeviceHandle>,
    ) -> DomainResult<usize> {
        let refused = {
            let mut inner = self.inner.write();
            if inner.status.is_active() {
                return Ok(inner.devices.add(kind, handle));
            }
            handle
        };
        Err(self.refuse_device(kind, refused).await)
    }

    /// Place a device at its declared index. Same termination rule as [`Domain::add_device`].
    pub(crate) async fn insert_device(
        &self,
        kind: &str,
        index: usize,
        handle: Arc<dyn DeviceHandle>,
    ) -> DomainResult<()> {
        let refused = {
            let mut inner = self.inner.write();
            if inner.status.is_active() {
                inner.devices.insert(kind, index, handle);
                return Ok(());
            }
            handle
        };
        Err(self.refuse_device(kind, refused).await)
    }

    async fn refuse_device(&self, kind: &str, handle: Arc<dyn DeviceHandle>) -> DomainError {
        tracing::warn!(
            domain_id = %self.id,
            kind,
            device = ?handle.id(),
            "Domain terminated, destroying late device"
        );
        if let Err(e) = handle.destroy().await {
            tracing::warn!(domain_id = %self.id, kind, "Failed to destroy late device: {}", e);
        }
        DomainError::InvalidState(format!(
            "domain {} terminated, {} not attached",
            self.id, kind
        ))
    }

    /// Devices of a type, in index order.
    pub fn get_devices(&self, kind: &str) -> Vec<Device> {
        self.inner.read().devices.get(kind).to_vec()
    }

    pub fn get_device_by_index(&self, kind: &str, index: usize) -> Option<Device> {
        self.inner.read().devices.get_by_index(kind, index).cloned()
    }

    pub fn get_device_by_id(&self, kind: &str, id: &str) -> Option<Device> {
        self.inner.read().devices.get_by_id(kind, id).cloned()
    }

    pub fn device_count(&self, kind: &str) -> usize {
        self.inner.read().devices.count(kind)
    }

    /// Device sub-trees of a type from the retained configuration, in order.
    ///
    /// For `(device (vif (mac ..)))` this yields `(vif (mac ..))`.
    pub fn config_devices(&self, kind: &str) -> Vec<Node> {
        let inner = self.inner.read();
        match inner.config.as_ref() {
            Some(config) => device_subtrees(config, kind).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// The `index`-th device sub-tree of a type.
    pub fn config_device(&self, kind: &str, index: usize) -> Option<Node> {
        self.config_devices(kind).into_iter().nth(index)
    }
}

/// `(device (<kind> ...))` sub-trees of `config`, yielding the `(<kind> ...)` part.
pub(crate) fn device_subtrees<'a>(
    config: &'a Node,
    kind: &'a str,
) -> impl Iterator<Item = &'a Node> + 'a {
    config
        .children_named(tags::DEVICE)
        .filter_map(Node::child0)
        .filter(move |dev| dev.name() == Some(kind))
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Domain")
            .field("id", &self.id)
            .field("dom", &inner.dom)
            .field("name", &inner.name)
            .field("memory_mib", &inner.memory_mib)
            .field("status", &inner.status)
            .field("recreate", &self.recreate)
            .finish()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        write!(f, "domain id={}", self.id)?;
        if let Some(dom) = inner.dom {
            write!(f, " dom={}", dom)?;
        }
        if let Some(ref name) = inner.name {
            write!(f, " name={}", name)?;
        }
        write!(f, " memory={}", inner.memory_mib)?;
        if let Some(ref console) = inner.console {
            write!(f, " console={}", console.id)?;
        }
        if let Some(ref image) = inner.image {
            write!(f, " image={}", image.kernel.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_id() {
        let id = DomainId::new();
        assert_eq!(id.as_str().len(), DomainId::FULL_LENGTH);
        assert_eq!(id.short().len(), DomainId::SHORT_LENGTH);
        assert_eq!(DomainId::parse(id.as_str()), Some(id.clone()));
        assert!(DomainId::parse("not-a-ulid").is_none());
        assert_ne!(DomainId::new(), id);
    }
}
