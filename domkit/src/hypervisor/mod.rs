//! Collaborator abstraction for the hypervisor control plane.
//!
//! The orchestrator never talks to the hypervisor or to backend device
//! subsystems directly. Everything goes through the traits in this module,
//! bundled into a [`Platform`] that is injected into every domain:
//!
//! - [`ControlPlane`]: privileged domain create/build/destroy primitives
//! - [`BackendController`]: network and block backend device provisioning
//! - [`ConsoleManager`]: console allocation and control channels
//! - [`DiskResolver`]: raw partition and device-name lookup
//! - [`ArpAnnouncer`]: unsolicited ARP after a domain comes back
//!
//! Control plane calls are synchronous (they map to hypercalls). Backend
//! controllers wait on the backend domain and disk lookup shells out to
//! host tools, so both are asynchronous.

use async_trait::async_trait;
use domkit_shared::Node;
use domkit_shared::errors::DomainResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod arp;
pub mod disk;

pub use arp::{ArpOptions, ArpingAnnouncer};
pub use disk::HostDiskResolver;

// ============================================================================
// DOMAIN HANDLE
// ============================================================================

/// Hypervisor-assigned domain handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomHandle(pub u32);

impl DomHandle {
    /// Convert a raw status/handle returned by the control plane.
    ///
    /// Handles are strictly positive; zero and negative values signal failure.
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw > 0 {
            u32::try_from(raw).ok().map(DomHandle)
        } else {
            None
        }
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// CONTROL PLANE
// ============================================================================

/// Live domain record reported by the control plane.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub dom: u32,
    pub name: String,
    pub mem_kb: u64,
    pub running: bool,
    pub blocked: bool,
    pub paused: bool,
    pub shutdown: bool,
    pub crashed: bool,
    pub shutdown_reason: u32,
    /// CPU the domain is currently placed on.
    pub cpu: i32,
    /// Accumulated CPU time in nanoseconds.
    pub cpu_time: u64,
}

/// Arguments to the boot image builder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// OS type, selects the builder (`linux`, `netbsd`).
    pub os_type: String,
    pub dom: DomHandle,
    pub kernel: PathBuf,
    /// Control event channel of the domain's console.
    pub control_channel: u32,
    pub cmdline: String,
    pub ramdisk: Option<PathBuf>,
    /// `SIF_*` start-info flags.
    pub flags: u32,
}

/// Result of restoring a domain from a saved image.
#[derive(Clone, Debug)]
pub struct RestoredImage {
    /// Raw handle; negative on failure.
    pub dom: i64,
    /// Configuration embedded in the image (`(vmconfig (config ...))`).
    pub vmconfig: Node,
}

/// Privileged hypervisor control primitives.
///
/// Methods return the hypervisor's raw status so the orchestrator decides
/// what counts as failure. `Err` is reserved for transport-level problems.
pub trait ControlPlane: Send + Sync {
    /// Allocate a domain. Returns the new handle, or a value `<= 0` on failure.
    fn domain_create(&self, memory_kib: u64, name: &str, cpu: i32) -> DomainResult<i64>;

    /// Build the boot image into an allocated domain. Returns 0 on success.
    fn domain_build(&self, request: &BuildRequest) -> DomainResult<i32>;

    /// Destroy a domain. Returns a negative status on failure.
    fn domain_destroy(&self, dom: DomHandle) -> DomainResult<i32>;

    /// Look up the live record of a domain.
    fn domain_get_info(&self, dom: DomHandle) -> DomainResult<Option<DomainInfo>>;

    /// Grant or revoke access to a physical PCI function. Returns a negative status on failure.
    fn physdev_pci_access_modify(
        &self,
        dom: DomHandle,
        bus: u32,
        dev: u32,
        func: u32,
        enable: bool,
    ) -> DomainResult<i32>;

    /// Restore a domain from a saved image.
    fn restore(&self, os_type: &str, source: &Path, progress: bool) -> DomainResult<RestoredImage>;
}

// ============================================================================
// BACKEND CONTROLLERS
// ============================================================================

/// One physical extent backing a virtual block device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Device number of the partition.
    pub device: u64,
    pub start_sector: u64,
    pub nr_sectors: u64,
    /// `Disk` or a partition type name.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Segment {
    /// A segment spanning a whole device.
    pub fn whole_disk(device: u64) -> Self {
        Self {
            device,
            start_sector: 0,
            nr_sectors: 1 << 63,
            kind: "Disk".to_string(),
        }
    }
}

/// Device creation request passed to a backend controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceRequest {
    /// Network interface; the backend reads mac/bridge/etc. from the config.
    Net { config: Node },
    /// Block device exported from a single physical extent.
    Block {
        vdev: u64,
        mode: String,
        segment: Segment,
    },
}

/// Handle to a device resource managed by a backend controller.
#[async_trait]
pub trait DeviceHandle: Send + Sync + fmt::Debug {
    /// Device id property, if the backend assigns one.
    fn id(&self) -> Option<String>;

    /// Introspection record of the device.
    fn sxpr(&self) -> Node;

    /// Bring the device administratively up.
    async fn up(&self, _vm_name: &str) -> DomainResult<()> {
        Ok(())
    }

    /// Release this one device.
    async fn destroy(&self) -> DomainResult<()>;
}

/// Network or block backend controller.
#[async_trait]
pub trait BackendController: Send + Sync {
    /// Human-readable name (`netif`, `blkif`).
    fn name(&self) -> &'static str;

    /// Make sure a controller for `dom` exists.
    async fn ensure_controller(&self, dom: DomHandle, recreate: bool) -> DomainResult<()>;

    /// Declare `dom` as the domain hosting this backend.
    async fn set_control_domain(&self, dom: DomHandle, recreate: bool) -> DomainResult<()>;

    /// Create the device resource keyed by `(dom, index)`.
    async fn create_device(
        &self,
        dom: DomHandle,
        index: usize,
        request: DeviceRequest,
        recreate: bool,
    ) -> DomainResult<()>;

    /// Look up a created device resource.
    fn lookup_device(&self, dom: DomHandle, index: usize) -> Option<Arc<dyn DeviceHandle>>;

    /// Destroy every device of `dom`. Returns `false` if no controller existed.
    async fn destroy_all(&self, dom: DomHandle) -> DomainResult<bool>;
}

// ============================================================================
// CONSOLES
// ============================================================================

/// Console allocated to a domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleInfo {
    pub id: String,
    /// Host port clients connect to.
    pub port: u16,
    /// Control event channel handed to the domain builder.
    pub control_channel: u32,
}

impl ConsoleInfo {
    pub fn to_sxpr(&self) -> Node {
        Node::list(
            "console",
            [
                Node::field("id", &self.id),
                Node::field("port", self.port),
                Node::field("channel", self.control_channel),
            ],
        )
    }
}

/// Console allocator.
pub trait ConsoleManager: Send + Sync {
    /// Allocate a console for `dom`, on `port` if requested.
    fn allocate(&self, dom: DomHandle, port: Option<u16>) -> DomainResult<ConsoleInfo>;

    /// Close the control channel to `dom`. Returns whether one was open.
    fn close_channel(&self, dom: DomHandle) -> bool;
}

// ============================================================================
// DISKS AND NETWORK ANNOUNCEMENTS
// ============================================================================

/// Raw partition and device-name lookup.
#[async_trait]
pub trait DiskResolver: Send + Sync {
    /// Physical extents of a partition or disk name (`sda1`, `/dev/hda`, `0x301`).
    async fn lookup_raw_partition(&self, name: &str) -> DomainResult<Option<Vec<Segment>>>;

    /// Device number of a block device name as seen by the OS.
    async fn device_number(&self, name: &str) -> DomainResult<u64>;
}

/// Announces domain addresses on the local network.
#[async_trait]
pub trait ArpAnnouncer: Send + Sync {
    async fn announce(&self, addresses: &[String]) -> DomainResult<()>;
}

// ============================================================================
// PLATFORM
// ============================================================================

/// Bundle of collaborators injected into every domain.
#[derive(Clone)]
pub struct Platform {
    pub control: Arc<dyn ControlPlane>,
    pub netif: Arc<dyn BackendController>,
    pub blkif: Arc<dyn BackendController>,
    pub consoles: Arc<dyn ConsoleManager>,
    pub disks: Arc<dyn DiskResolver>,
    pub arp: Arc<dyn ArpAnnouncer>,
}

impl Platform {
    /// Create a platform with host-backed disk lookup and ARP announcement.
    pub fn new(
        control: Arc<dyn ControlPlane>,
        netif: Arc<dyn BackendController>,
        blkif: Arc<dyn BackendController>,
        consoles: Arc<dyn ConsoleManager>,
    ) -> Self {
        Self {
            control,
            netif,
            blkif,
            consoles,
            disks: Arc::new(HostDiskResolver::new()),
            arp: Arc::new(ArpingAnnouncer::new(ArpOptions::default())),
        }
    }

    /// Replace the disk resolver.
    pub fn with_disks(mut self, disks: Arc<dyn DiskResolver>) -> Self {
        self.disks = disks;
        self
    }

    /// Replace the ARP announcer.
    pub fn with_arp(mut self, arp: Arc<dyn ArpAnnouncer>) -> Self {
        self.arp = arp;
        self
    }
}
