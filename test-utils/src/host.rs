//! Console, disk and ARP fakes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domkit::hypervisor::{
    ArpAnnouncer, ConsoleInfo, ConsoleManager, DiskResolver, DomHandle, Segment,
};
use domkit_shared::errors::{DomainError, DomainResult};
use parking_lot::Mutex;

// ============================================================================
// CONSOLES
// ============================================================================

/// Base port for consoles allocated without an explicit port.
pub const CONSOLE_PORT_BASE: u16 = 9600;

#[derive(Default)]
struct ConsoleState {
    open: HashSet<DomHandle>,
    allocated: Vec<ConsoleInfo>,
    closed: Vec<DomHandle>,
}

/// Consoles on `9600 + dom` unless a port is requested; the control
/// channel is `dom + 100`.
#[derive(Default)]
pub struct FakeConsoles {
    state: Mutex<ConsoleState>,
}

impl FakeConsoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated(&self) -> Vec<ConsoleInfo> {
        self.state.lock().allocated.clone()
    }

    pub fn closed(&self) -> Vec<DomHandle> {
        self.state.lock().closed.clone()
    }
}

impl ConsoleManager for FakeConsoles {
    fn allocate(&self, dom: DomHandle, port: Option<u16>) -> DomainResult<ConsoleInfo> {
        let console = ConsoleInfo {
            id: dom.to_string(),
            port: port.unwrap_or(CONSOLE_PORT_BASE + dom.0 as u16),
            control_channel: dom.0 + 100,
        };
        let mut state = self.state.lock();
        state.open.insert(dom);
        state.allocated.push(console.clone());
        Ok(console)
    }

    fn close_channel(&self, dom: DomHandle) -> bool {
        let mut state = self.state.lock();
        state.closed.push(dom);
        state.open.remove(&dom)
    }
}

// ============================================================================
// DISKS
// ============================================================================

/// Disk resolver backed by fixed tables.
#[derive(Default)]
pub struct FakeDisks {
    partitions: HashMap<String, Vec<Segment>>,
    devices: HashMap<String, u64>,
}

impl FakeDisks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a partition name to its extents.
    pub fn with_partition(mut self, name: &str, segments: Vec<Segment>) -> Self {
        self.partitions.insert(name.to_string(), segments);
        self
    }

    /// Map a guest device name to a device number.
    pub fn with_device(mut self, name: &str, number: u64) -> Self {
        self.devices.insert(name.to_string(), number);
        self
    }
}

#[async_trait]
impl DiskResolver for FakeDisks {
    async fn lookup_raw_partition(&self, name: &str) -> DomainResult<Option<Vec<Segment>>> {
        Ok(self.partitions.get(name).cloned())
    }

    async fn device_number(&self, name: &str) -> DomainResult<u64> {
        self.devices
            .get(name)
            .copied()
            .ok_or_else(|| DomainError::Resource(format!("unknown device name: {}", name)))
    }
}

// ============================================================================
// ARP
// ============================================================================

#[derive(Default)]
struct ArpState {
    announced: Vec<Vec<String>>,
    fail: bool,
}

/// Records address announcements.
#[derive(Default)]
pub struct FakeArp {
    state: Mutex<ArpState>,
}

impl FakeArp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every announcement fail.
    pub fn fail(&self) {
        self.state.lock().fail = true;
    }

    pub fn announced(&self) -> Vec<Vec<String>> {
        self.state.lock().announced.clone()
    }
}

#[async_trait]
impl ArpAnnouncer for FakeArp {
    async fn announce(&self, addresses: &[String]) -> DomainResult<()> {
        let mut state = self.state.lock();
        state.announced.push(addresses.to_vec());
        if state.fail {
            return Err(DomainError::Resource("arping failed".to_string()));
        }
        Ok(())
    }
}
